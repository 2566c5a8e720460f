use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use report_pipeline::cache::DEFAULT_CAPACITY;
use report_pipeline::gateway::DEFAULT_REQUEST_ENDPOINT;

#[derive(Parser, Debug)]
#[command(name = "reports-backend")]
#[command(about = "Inpatient and laboratory reports built from the medical information system gateway", long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the report HTTP API.
    Serve(ServeArgs),
    /// Build one report and write it to a file.
    Run(RunArgs),
}

/// Gateway access and pipeline tuning shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
pub struct Settings {
    /// Base URL of the gateway, e.g. http://gateway.local:8080
    #[arg(long, env = "GATEWAY_URL")]
    pub gateway_url: String,

    #[arg(long, env = "GATEWAY_REQUEST_ENDPOINT", default_value = DEFAULT_REQUEST_ENDPOINT)]
    pub gateway_request_endpoint: String,

    /// Sent to the gateway in the X-API-KEY header.
    #[arg(long, env = "GATEWAY_API_KEY", hide_env_values = true)]
    pub gateway_api_key: Option<String>,

    /// Per-call HTTP timeout, seconds.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 30)]
    pub request_timeout: u64,

    /// Upper bound for one lookup including its retries, seconds.
    #[arg(long, env = "LOOKUP_BUDGET", default_value_t = 180)]
    pub lookup_budget: u64,

    /// Entries kept per lookup cache.
    #[arg(long, env = "CACHE_CAPACITY", default_value_t = DEFAULT_CAPACITY)]
    pub cache_capacity: usize,

    /// JSON object mapping employer organisation ids to a category label.
    #[arg(long, env = "EMPLOYER_CATEGORIES")]
    pub employer_categories: Option<PathBuf>,

    /// Default log filter; RUST_LOG takes precedence.
    #[arg(long, env = "LOGS_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log gateway payloads at debug level.
    #[arg(long, env = "DEBUG_HTTP")]
    pub debug_http: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Required in X-API-KEY on /report routes. Unset disables the check.
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Upper bound for one report request, seconds.
    #[arg(long, env = "REPORT_TIMEOUT", default_value_t = 900)]
    pub report_timeout: u64,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// Inpatient services with payment sources (report 32430).
    Inpatient,
    /// Completed laboratory requests.
    Invitro,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value = "inpatient")]
    pub report: ReportKind,

    /// First day, DD.MM.YYYY
    #[arg(long)]
    pub start_date: String,

    /// Last day, DD.MM.YYYY
    #[arg(long)]
    pub end_date: String,

    /// Output path. Defaults to the report's file name in the current directory.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_command_parses_with_defaults() {
        let args = Args::try_parse_from([
            "reports-backend",
            "--gateway-url",
            "http://gateway.local",
            "run",
            "--start-date",
            "01.11.2025",
            "--end-date",
            "30.11.2025",
        ])
        .unwrap();

        assert_eq!(args.settings.request_timeout, 30);
        assert_eq!(args.settings.gateway_request_endpoint, "/gateway/request");
        match args.cmd {
            Command::Run(run) => {
                assert_eq!(run.report, ReportKind::Inpatient);
                assert_eq!(run.start_date, "01.11.2025");
                assert!(run.output.is_none());
            }
            Command::Serve(_) => panic!("expected run"),
        }
    }

    #[test]
    fn serve_command_takes_host_and_port() {
        let args = Args::try_parse_from([
            "reports-backend",
            "--gateway-url",
            "http://gateway.local",
            "serve",
            "--port",
            "9000",
        ])
        .unwrap();
        match args.cmd {
            Command::Serve(serve) => {
                assert_eq!(serve.port, 9000);
                assert_eq!(serve.report_timeout, 900);
            }
            Command::Run(_) => panic!("expected serve"),
        }
    }
}
