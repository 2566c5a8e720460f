use chrono::NaiveDate;
use rust_xlsxwriter::{Color, ExcelDateTime, Format, FormatAlign, Workbook, Worksheet, XlsxError};

use crate::common::format_gateway_date;
use crate::constants::INPATIENT_REPORT_ID;
use crate::lab_orders::LabOrderRow;
use crate::row::PatientServiceRow;

const WIDE_COLUMN: f64 = 45.0;
const MISSING_EMPLOYER_FILL: u32 = 0xFFE4E1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Date,
    Int,
}

struct Column {
    title: &'static str,
    kind: Kind,
    wide: bool,
}

const fn column(title: &'static str, kind: Kind, wide: bool) -> Column {
    Column { title, kind, wide }
}

const PATIENT_SERVICE_COLUMNS: [Column; 22] = [
    column("ФИО", Kind::Text, false),
    column("ДР", Kind::Date, false),
    column("Возраст", Kind::Int, false),
    column("Адрес", Kind::Text, true),
    column("Страховая", Kind::Text, true),
    column("Номер полиса", Kind::Text, false),
    column("Номер карты", Kind::Text, false),
    column("Поступление", Kind::Date, false),
    column("Выписка", Kind::Date, false),
    column("Результат", Kind::Text, false),
    column("Койко-дни", Kind::Int, false),
    column("Отделение", Kind::Text, true),
    column("Профиль", Kind::Text, true),
    column("МКБ", Kind::Text, false),
    column("Диагноз", Kind::Text, false),
    column("Врач", Kind::Text, false),
    column("Должность врача", Kind::Text, true),
    column("Код услуги", Kind::Text, false),
    column("Название", Kind::Text, true),
    column("Кол-во", Kind::Int, false),
    column("Дата", Kind::Date, false),
    column("Источник оплаты", Kind::Text, false),
];

const LAB_ORDER_TITLES: [&str; 11] = [
    "Фамилия",
    "Имя",
    "Отчество",
    "ДР",
    "Соц.статус",
    "Таможня/УФССП",
    "Место работы",
    "Дата услуги",
    "Вид оплаты",
    "Код услуги",
    "Услуга",
];
const LAB_EMPLOYER_COLUMN: u16 = 6;
const LAB_CENTERED_COLUMNS: [u16; 2] = [3, 7];

enum Cell<'a> {
    Text(Option<&'a str>),
    Date(Option<NaiveDate>),
    Int(Option<i64>),
}

fn text(value: &Option<String>) -> Cell<'_> {
    Cell::Text(value.as_deref())
}

fn patient_service_cells(row: &PatientServiceRow) -> [Cell<'_>; 22] {
    [
        text(&row.full_name),
        Cell::Date(row.birthday),
        Cell::Int(row.age),
        text(&row.address),
        text(&row.insurance_company),
        text(&row.polis_number),
        text(&row.card_number),
        Cell::Date(row.start_date),
        Cell::Date(row.end_date),
        text(&row.outcome_result),
        Cell::Int(row.bed_days),
        text(&row.department),
        text(&row.department_profile),
        text(&row.diag_code),
        text(&row.diag_name),
        text(&row.doctor_name),
        text(&row.doctor_position),
        text(&row.service_code),
        text(&row.service_name),
        Cell::Int(row.service_quantity),
        Cell::Date(row.service_date),
        text(&row.payment_source),
    ]
}

/// `report_32430_<start>-<end>.xlsx`
pub fn report_file_name(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "report_{}_{}-{}.xlsx",
        INPATIENT_REPORT_ID,
        format_gateway_date(start),
        format_gateway_date(end)
    )
}

pub fn lab_orders_file_name(start: NaiveDate, end: NaiveDate) -> String {
    format!(
        "invitro_{}-{}.xlsx",
        format_gateway_date(start),
        format_gateway_date(end)
    )
}

fn header_format() -> Format {
    Format::new().set_bold().set_align(FormatAlign::Center)
}

fn centered() -> Format {
    Format::new().set_align(FormatAlign::Center)
}

fn excel_date(date: NaiveDate) -> Result<ExcelDateTime, XlsxError> {
    ExcelDateTime::parse_from_str(&date.format("%Y-%m-%d").to_string())
}

fn write_header(sheet: &mut Worksheet, titles: impl IntoIterator<Item = &'static str>) -> Result<(), XlsxError> {
    let format = header_format();
    for (col, title) in titles.into_iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, title, &format)?;
    }
    Ok(())
}

/// Renders the enriched inpatient rows. An empty slice yields a header-only
/// sheet.
pub fn patient_services_workbook(rows: &[PatientServiceRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let date_format = centered().set_num_format("dd.mm.yyyy");
    let number_format = centered();

    write_header(sheet, PATIENT_SERVICE_COLUMNS.iter().map(|c| c.title))?;

    for (index, record) in rows.iter().enumerate() {
        let row = index as u32 + 1;
        for (col, cell) in patient_service_cells(record).into_iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(Some(text)) => {
                    sheet.write_string(row, col, text)?;
                }
                Cell::Date(Some(date)) => {
                    sheet.write_datetime_with_format(row, col, &excel_date(date)?, &date_format)?;
                }
                Cell::Int(Some(value)) => {
                    sheet.write_number_with_format(row, col, value as f64, &number_format)?;
                }
                Cell::Text(None) | Cell::Date(None) | Cell::Int(None) => {}
            }
        }
    }

    sheet.autofit();
    for (col, column) in PATIENT_SERVICE_COLUMNS.iter().enumerate() {
        let col = col as u16;
        if column.wide {
            sheet.set_column_width(col, WIDE_COLUMN)?;
        }
        if column.kind != Kind::Text {
            sheet.set_column_format(col, &number_format)?;
        }
    }
    let last_col = PATIENT_SERVICE_COLUMNS.len() as u16 - 1;
    sheet.autofilter(0, 0, rows.len() as u32, last_col)?;

    workbook.save_to_buffer()
}

/// Renders the laboratory orders report. Rows without employer data are
/// filled so they stand out.
pub fn lab_orders_workbook(rows: &[LabOrderRow]) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let highlight = Format::new().set_background_color(Color::RGB(MISSING_EMPLOYER_FILL));
    let highlight_centered = centered().set_background_color(Color::RGB(MISSING_EMPLOYER_FILL));
    let plain_centered = centered();

    write_header(sheet, LAB_ORDER_TITLES)?;

    for (index, record) in rows.iter().enumerate() {
        let row = index as u32 + 1;
        for (col, value) in record.cells().into_iter().enumerate() {
            let col = col as u16;
            let center = LAB_CENTERED_COLUMNS.contains(&col);
            let format = match (record.missing_employer, center) {
                (true, true) => &highlight_centered,
                (true, false) => &highlight,
                (false, true) => &plain_centered,
                (false, false) => {
                    sheet.write_string(row, col, value)?;
                    continue;
                }
            };
            sheet.write_string_with_format(row, col, value, format)?;
        }
    }

    sheet.autofit();
    sheet.set_column_width(LAB_EMPLOYER_COLUMN, WIDE_COLUMN)?;
    sheet.autofilter(0, 0, rows.len() as u32, LAB_ORDER_TITLES.len() as u16 - 1)?;

    workbook.save_to_buffer()
}
