use chrono::NaiveDate;

/// Date format used by the gateway, the report parameters and the export.
pub const GATEWAY_DATE_FORMAT: &str = "%d.%m.%Y";

pub fn parse_gateway_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), GATEWAY_DATE_FORMAT).ok()
}

pub fn format_gateway_date(date: NaiveDate) -> String {
    date.format(GATEWAY_DATE_FORMAT).to_string()
}

pub fn truncate_for_log(text: &str) -> String {
    truncate_chars(text.trim(), 300)
}

/// Readable preview of a binary payload, for errors about unexpected content.
pub fn preview_bytes(bytes: &[u8]) -> String {
    let head = &bytes[..bytes.len().min(200)];
    String::from_utf8_lossy(head)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_dates_round_trip_through_text() {
        let date = parse_gateway_date(" 05.03.2024 ").unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(format_gateway_date(date), "05.03.2024");
        assert_eq!(parse_gateway_date("2024-03-05"), None);
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let text = "итого".repeat(100);
        let cut = truncate_chars(&text, 7);
        assert_eq!(cut, "итогоит...");
        assert_eq!(truncate_chars("short", 300), "short");
    }

    #[test]
    fn preview_drops_undecodable_bytes() {
        let mut bytes = b"<html>Service down".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        assert_eq!(preview_bytes(&bytes), "<html>Service down");
    }
}
