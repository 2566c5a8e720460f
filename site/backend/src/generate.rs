use std::path::PathBuf;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use report_pipeline::export::{
    lab_orders_file_name, lab_orders_workbook, patient_services_workbook, report_file_name,
};

use crate::cli::{ReportKind, RunArgs, Settings};
use crate::pipeline::Pipeline;

fn lookup_progress(label: &str) -> ProgressBar {
    let progress = ProgressBar::new(0);
    let template = format!(
        "{{spinner:.green}} [{label} {{elapsed_precise}}] [{{bar:40.magenta/blue}}] {{pos}}/{{len}} {{msg}}"
    );
    if let Ok(style) = ProgressStyle::with_template(&template) {
        progress.set_style(style.progress_chars("=> "));
    }
    progress.set_message("starting lookups");
    progress
}

/// Builds one report outside the HTTP server and writes the workbook to disk.
pub async fn run(settings: Settings, opts: RunArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_settings(&settings)?;

    let (bytes, default_name, summary) = match opts.report {
        ReportKind::Inpatient => {
            let report = pipeline
                .patient_services()
                .with_progress(lookup_progress("32430"))
                .get_list_patients_with_services(&opts.start_date, &opts.end_date)
                .await?;
            let bytes = patient_services_workbook(&report.rows)
                .context("Failed writing inpatient workbook")?;
            let name = report_file_name(report.start_date, report.end_date);
            (bytes, name, report.to_string())
        }
        ReportKind::Invitro => {
            let report = pipeline
                .lab_orders()
                .with_progress(lookup_progress("invitro"))
                .build_lab_orders_report(&opts.start_date, &opts.end_date)
                .await?;
            let bytes =
                lab_orders_workbook(&report.rows).context("Failed writing lab orders workbook")?;
            let name = lab_orders_file_name(report.start_date, report.end_date);
            (bytes, name, report.summary.to_string())
        }
    };

    let output = opts.output.unwrap_or_else(|| PathBuf::from(default_name));
    std::fs::write(&output, &bytes)
        .with_context(|| format!("Failed writing {}", output.display()))?;
    println!("Wrote {} ({} bytes): {}", output.display(), bytes.len(), summary);
    Ok(())
}
