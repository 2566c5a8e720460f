use chrono::{NaiveDate, NaiveDateTime};
use ordered_float::OrderedFloat;
use serde::Serialize;

use crate::common::parse_gateway_date;

/// One cell of a downloaded sheet, as cached in the file (formulas are not
/// re-evaluated).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(OrderedFloat<f64>),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn number(value: f64) -> Self {
        CellValue::Number(OrderedFloat(value))
    }

    /// Whether the cell counts towards a row being non-empty. Zero, false and
    /// the empty string do not.
    pub fn is_filled(&self) -> bool {
        match self {
            CellValue::Empty => false,
            CellValue::Text(s) => !s.is_empty(),
            CellValue::Number(n) => n.0 != 0.0,
            CellValue::Bool(b) => *b,
            CellValue::DateTime(_) => true,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

pub fn row_is_blank(row: &[CellValue]) -> bool {
    !row.iter().any(CellValue::is_filled)
}

/// Zero-based positions of the report columns in the source export.
pub mod col {
    pub const FULL_NAME: usize = 1;
    pub const BIRTHDAY: usize = 2;
    pub const AGE: usize = 3;
    pub const ADDRESS: usize = 4;
    pub const INSURANCE_COMPANY: usize = 5;
    pub const POLIS_NUMBER: usize = 6;
    pub const CARD_NUMBER: usize = 7;
    pub const START_DATE: usize = 9;
    pub const END_DATE: usize = 10;
    pub const OUTCOME_RESULT: usize = 11;
    pub const BED_DAYS: usize = 12;
    pub const DEPARTMENT: usize = 18;
    pub const DEPARTMENT_PROFILE: usize = 19;
    pub const DIAG_CODE: usize = 20;
    pub const DIAG_NAME: usize = 21;
    pub const DOCTOR_NAME: usize = 22;
    pub const DOCTOR_POSITION: usize = 23;
    pub const SERVICE_CODE: usize = 24;
    pub const SERVICE_NAME: usize = 25;
    pub const SERVICE_QUANTITY: usize = 26;
    pub const SERVICE_DATE: usize = 27;
}

/// One patient-service line of the inpatient report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatientServiceRow {
    pub full_name: Option<String>,
    pub birthday: Option<NaiveDate>,
    pub age: Option<i64>,
    pub address: Option<String>,
    pub insurance_company: Option<String>,
    pub polis_number: Option<String>,
    pub card_number: Option<String>,

    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub outcome_result: Option<String>,
    pub bed_days: Option<i64>,

    pub department: Option<String>,
    pub department_profile: Option<String>,
    pub diag_code: Option<String>,
    pub diag_name: Option<String>,
    pub doctor_name: Option<String>,
    pub doctor_position: Option<String>,

    pub service_code: Option<String>,
    pub service_name: Option<String>,
    pub service_quantity: Option<i64>,
    pub service_date: Option<NaiveDate>,

    pub payment_source: Option<String>,
}

impl PatientServiceRow {
    /// Builds a record from a positional row. Never fails: cells that are
    /// missing or cannot be coerced become `None`.
    pub fn from_row(raw: &[CellValue]) -> Self {
        let at = |index: usize| raw.get(index);
        Self {
            full_name: coerce_text(at(col::FULL_NAME)),
            birthday: coerce_date(at(col::BIRTHDAY)),
            age: coerce_int(at(col::AGE)),
            address: coerce_text(at(col::ADDRESS)),
            insurance_company: coerce_text(at(col::INSURANCE_COMPANY)),
            polis_number: coerce_text(at(col::POLIS_NUMBER)),
            card_number: coerce_text(at(col::CARD_NUMBER)),
            start_date: coerce_date(at(col::START_DATE)),
            end_date: coerce_date(at(col::END_DATE)),
            outcome_result: coerce_text(at(col::OUTCOME_RESULT)),
            bed_days: coerce_int(at(col::BED_DAYS)),
            department: coerce_text(at(col::DEPARTMENT)),
            department_profile: coerce_text(at(col::DEPARTMENT_PROFILE)),
            diag_code: coerce_text(at(col::DIAG_CODE)),
            diag_name: coerce_text(at(col::DIAG_NAME)),
            doctor_name: coerce_text(at(col::DOCTOR_NAME)),
            doctor_position: coerce_text(at(col::DOCTOR_POSITION)),
            service_code: coerce_text(at(col::SERVICE_CODE)),
            service_name: coerce_text(at(col::SERVICE_NAME)),
            service_quantity: coerce_int(at(col::SERVICE_QUANTITY)),
            service_date: coerce_date(at(col::SERVICE_DATE)),
            payment_source: None,
        }
    }

    /// False when none of the mapped columns carried a value, e.g. a
    /// sub-heading that only fills the row counter column.
    pub fn has_mapped_values(&self) -> bool {
        let texts = [
            &self.full_name,
            &self.address,
            &self.insurance_company,
            &self.polis_number,
            &self.card_number,
            &self.outcome_result,
            &self.department,
            &self.department_profile,
            &self.diag_code,
            &self.diag_name,
            &self.doctor_name,
            &self.doctor_position,
            &self.service_code,
            &self.service_name,
        ];
        let dates = [
            &self.birthday,
            &self.start_date,
            &self.end_date,
            &self.service_date,
        ];
        let ints = [&self.age, &self.bed_days, &self.service_quantity];

        texts.iter().any(|v| v.is_some())
            || dates.iter().any(|v| v.is_some())
            || ints.iter().any(|v| v.is_some())
    }
}

fn coerce_text(cell: Option<&CellValue>) -> Option<String> {
    let text = match cell? {
        CellValue::Empty => return None,
        CellValue::Text(s) => s.trim().to_string(),
        CellValue::Number(n) => {
            let n = n.0;
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", n as i64)
            } else {
                n.to_string()
            }
        }
        CellValue::Bool(b) => b.to_string(),
        CellValue::DateTime(dt) => crate::common::format_gateway_date(dt.date()),
    };
    (!text.is_empty()).then_some(text)
}

fn coerce_date(cell: Option<&CellValue>) -> Option<NaiveDate> {
    match cell? {
        CellValue::DateTime(dt) => Some(dt.date()),
        CellValue::Text(s) => parse_gateway_date(s),
        _ => None,
    }
}

fn coerce_int(cell: Option<&CellValue>) -> Option<i64> {
    let value = match cell? {
        CellValue::Number(n) => n.0,
        CellValue::Text(s) => s.trim().parse::<f64>().ok()?,
        CellValue::Bool(b) => f64::from(u8::from(*b)),
        CellValue::Empty | CellValue::DateTime(_) => return None,
    };
    value.is_finite().then(|| value.floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn row_with(cells: &[(usize, CellValue)]) -> Vec<CellValue> {
        let mut row = vec![CellValue::Empty; 28];
        for (index, value) in cells {
            row[*index] = value.clone();
        }
        row
    }

    #[test]
    fn text_dates_parse_only_in_day_month_year_order() {
        let row = row_with(&[
            (col::START_DATE, text("05.03.2024")),
            (col::END_DATE, text("2024-03-05")),
        ]);
        let record = PatientServiceRow::from_row(&row);
        assert_eq!(record.start_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(record.end_date, None);
    }

    #[test]
    fn native_datetimes_keep_their_date_part() {
        let dt = NaiveDate::from_ymd_opt(2025, 11, 13)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        let row = row_with(&[(col::SERVICE_DATE, CellValue::DateTime(dt))]);
        let record = PatientServiceRow::from_row(&row);
        assert_eq!(record.service_date, NaiveDate::from_ymd_opt(2025, 11, 13));
    }

    #[test]
    fn integers_are_floored_or_absent() {
        let row = row_with(&[
            (col::AGE, text("47.0")),
            (col::BED_DAYS, text("abc")),
            (col::SERVICE_QUANTITY, CellValue::number(2.9)),
        ]);
        let record = PatientServiceRow::from_row(&row);
        assert_eq!(record.age, Some(47));
        assert_eq!(record.bed_days, None);
        assert_eq!(record.service_quantity, Some(2));

        let row = row_with(&[(col::AGE, text("NaN")), (col::BED_DAYS, text("inf"))]);
        let record = PatientServiceRow::from_row(&row);
        assert_eq!(record.age, None);
        assert_eq!(record.bed_days, None);
    }

    #[test]
    fn strings_are_trimmed_and_blank_becomes_absent() {
        let row = row_with(&[
            (col::FULL_NAME, text("  Иванов Иван Иванович ")),
            (col::ADDRESS, text("   ")),
            (col::CARD_NUMBER, CellValue::number(12345.0)),
        ]);
        let record = PatientServiceRow::from_row(&row);
        assert_eq!(record.full_name.as_deref(), Some("Иванов Иван Иванович"));
        assert_eq!(record.address, None);
        assert_eq!(record.card_number.as_deref(), Some("12345"));
    }

    #[test]
    fn short_rows_yield_absent_fields() {
        let record = PatientServiceRow::from_row(&[text("1"), text("Петров")]);
        assert_eq!(record.full_name.as_deref(), Some("Петров"));
        assert_eq!(record.service_date, None);
        assert_eq!(record.payment_source, None);
        assert!(record.has_mapped_values());

        let counter_only = PatientServiceRow::from_row(&[text("12")]);
        assert!(!counter_only.has_mapped_values());
    }

    #[test]
    fn zero_false_and_empty_text_do_not_fill_a_row() {
        let row = vec![
            CellValue::Empty,
            text(""),
            CellValue::number(0.0),
            CellValue::Bool(false),
        ];
        assert!(row_is_blank(&row));
        assert!(!row_is_blank(&[CellValue::Empty, text(" ")]));
    }
}
