//! Fixed identifiers of the upstream deployment the reports are built for.

pub const INPATIENT_REPORT_ID: &str = "32430";
pub const LPU_ID: &str = "13102423";
pub const REGION_CODE: &str = "301";
pub const PMUSER_ID: &str = "461432278617";

pub const LAB_MED_SERVICE_ID: &str = "3010101000015552";
pub const LAB_SERVICE_COMPLEX_PARENT_ID: &str = "3010101000029801";

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
