use std::collections::HashSet;
use std::io::Cursor;

use calamine::{Data, Range, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::common::preview_bytes;
use crate::error::NormalizeError;
use crate::row::{CellValue, PatientServiceRow, row_is_blank};

pub const ZIP_SIGNATURE: &[u8] = b"PK\x03\x04";

/// Zero-based index of the first data row of the primary sheet (row 6).
const DATA_START: usize = 5;
/// Zero-based index of the first data row of continuation sheets (row 4).
const CONTINUATION_START: usize = 3;
const FOOTER_MARKER: &str = "итого";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeSummary {
    pub sheets: usize,
    pub kept: usize,
    pub blank: usize,
    pub duplicates: usize,
    pub unparsable: usize,
    /// 1-based row of the footer that ended the scan, if one was found.
    pub footer_row: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowSkip {
    Blank,
    Duplicate,
    Unparsable(String),
}

#[derive(Debug, Clone)]
pub struct NormalizedRows {
    pub rows: Vec<PatientServiceRow>,
    pub summary: NormalizeSummary,
}

/// Turns a downloaded export into deduplicated typed rows.
///
/// CPU bound; async callers should run it on a blocking thread.
pub fn normalize(bytes: &[u8]) -> Result<NormalizedRows, NormalizeError> {
    if !bytes.starts_with(ZIP_SIGNATURE) {
        return Err(NormalizeError::Format {
            preview: preview_bytes(bytes),
        });
    }

    let mut sheets = read_sheets(bytes)?;
    let sheet_count = sheets.len();
    let combined = combine_sheets(&mut sheets);

    let mut summary = NormalizeSummary {
        sheets: sheet_count,
        ..Default::default()
    };
    let mut rows = Vec::new();
    let mut seen: HashSet<&[CellValue]> = HashSet::new();

    for (index, raw) in combined.iter().enumerate().skip(DATA_START) {
        if is_footer(raw) {
            summary.footer_row = Some(index + 1);
            break;
        }
        match accept_row(raw, &mut seen) {
            Ok(record) => {
                summary.kept += 1;
                rows.push(record);
            }
            Err(RowSkip::Blank) => summary.blank += 1,
            Err(RowSkip::Duplicate) => summary.duplicates += 1,
            Err(RowSkip::Unparsable(reason)) => {
                tracing::warn!("Skipping spreadsheet row {}: {}", index + 1, reason);
                summary.unparsable += 1;
            }
        }
    }

    tracing::info!(
        "Normalized export: sheets={} kept={} duplicates={} blank={} unparsable={}",
        summary.sheets,
        summary.kept,
        summary.duplicates,
        summary.blank,
        summary.unparsable
    );
    Ok(NormalizedRows { rows, summary })
}

/// Classifies one scanned row. Building the record itself cannot fail; rows
/// whose mapped columns are all empty are filtered out here on purpose and
/// counted as unparsable.
fn accept_row<'a>(
    raw: &'a [CellValue],
    seen: &mut HashSet<&'a [CellValue]>,
) -> Result<PatientServiceRow, RowSkip> {
    if row_is_blank(raw) {
        return Err(RowSkip::Blank);
    }
    if !seen.insert(raw) {
        return Err(RowSkip::Duplicate);
    }
    let record = PatientServiceRow::from_row(raw);
    if !record.has_mapped_values() {
        return Err(RowSkip::Unparsable(
            "no report column carries a value".to_string(),
        ));
    }
    Ok(record)
}

fn is_footer(raw: &[CellValue]) -> bool {
    raw.first()
        .and_then(CellValue::as_text)
        .is_some_and(|s| s.to_lowercase().contains(FOOTER_MARKER))
}

/// Cell grid of one sheet, indexed by absolute zero-based row and column.
#[derive(Debug, Default)]
struct Grid {
    rows: Vec<Vec<CellValue>>,
}

#[derive(Debug, Clone, Copy)]
struct MergedRegion {
    first_row: usize,
    first_col: usize,
    last_row: usize,
    last_col: usize,
}

impl Grid {
    fn from_range(range: &Range<Data>) -> Self {
        let mut grid = Grid::default();
        let Some((start_row, start_col)) = range.start() else {
            return grid;
        };
        for (row_offset, row) in range.rows().enumerate() {
            for (col_offset, cell) in row.iter().enumerate() {
                let value = cell_value(cell);
                if value != CellValue::Empty {
                    grid.set(
                        start_row as usize + row_offset,
                        start_col as usize + col_offset,
                        value,
                    );
                }
            }
        }
        let (end_row, end_col) = range.end().unwrap_or((start_row, start_col));
        grid.ensure(end_row as usize, end_col as usize);
        grid
    }

    fn get(&self, row: usize, col: usize) -> CellValue {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .cloned()
            .unwrap_or_default()
    }

    fn set(&mut self, row: usize, col: usize, value: CellValue) {
        self.ensure(row, col);
        self.rows[row][col] = value;
    }

    fn ensure(&mut self, row: usize, col: usize) {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize(col + 1, CellValue::Empty);
        }
    }

    /// Copies the top-left value of every merged region into all of its cells.
    fn fill_merged(&mut self, regions: &[MergedRegion]) {
        for region in regions {
            let value = self.get(region.first_row, region.first_col);
            for row in region.first_row..=region.last_row {
                for col in region.first_col..=region.last_col {
                    self.set(row, col, value.clone());
                }
            }
        }
    }
}

fn read_sheets(bytes: &[u8]) -> Result<Vec<Grid>, NormalizeError> {
    let workbook_err = |e: calamine::XlsxError| NormalizeError::Workbook(e.to_string());

    let mut workbook = Xlsx::new(Cursor::new(bytes)).map_err(workbook_err)?;
    workbook.load_merged_regions().map_err(workbook_err)?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names() {
        let range = workbook.worksheet_range(&name).map_err(workbook_err)?;
        let regions: Vec<MergedRegion> = workbook
            .merged_regions_by_sheet(&name)
            .into_iter()
            .map(|(_, _, dims)| MergedRegion {
                first_row: dims.start.0 as usize,
                first_col: dims.start.1 as usize,
                last_row: dims.end.0 as usize,
                last_col: dims.end.1 as usize,
            })
            .collect();

        let mut grid = Grid::from_range(&range);
        grid.fill_merged(&regions);
        sheets.push(grid);
    }

    if sheets.is_empty() {
        return Err(NormalizeError::Workbook("workbook has no sheets".to_string()));
    }
    Ok(sheets)
}

/// Appends the data rows of continuation sheets to the first sheet and pads
/// every row to the common width.
fn combine_sheets(sheets: &mut [Grid]) -> Vec<Vec<CellValue>> {
    let Some((first, rest)) = sheets.split_first_mut() else {
        return Vec::new();
    };
    let mut rows = std::mem::take(&mut first.rows);
    for sheet in rest.iter_mut() {
        rows.extend(
            std::mem::take(&mut sheet.rows)
                .into_iter()
                .skip(CONTINUATION_START)
                .filter(|row| !row_is_blank(row)),
        );
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut rows {
        row.resize(width, CellValue::Empty);
    }
    rows
}

fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(n) => CellValue::number(*n),
        Data::Int(n) => CellValue::number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Text(e.to_string()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) => CellValue::DateTime(value),
            None => CellValue::number(dt.as_f64()),
        },
        Data::DateTimeIso(s) => parse_iso_datetime(s).map_or_else(
            || CellValue::Text(s.clone()),
            CellValue::DateTime,
        ),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

fn parse_iso_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}
