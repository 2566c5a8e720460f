use std::collections::HashMap;

/// `PayType_id` values of the gateway and their report labels.
const BUILTIN_PAY_TYPES: &[(&str, &str)] = &[
    ("1", "ОМС"),
    ("2", "Бюджет"),
    ("3", "Платные услуги"),
    ("4", "ДМС"),
    ("5", "Прочее"),
    ("6", "Средства МО"),
    ("7", "Федеральный бюджет"),
    ("8", "Местный бюджет"),
    ("9", "Высокотехнологичная помощь"),
];

/// Maps payment-type identifiers to human readable payment sources.
#[derive(Debug, Clone)]
pub struct PayTypeTable {
    labels: HashMap<String, String>,
}

impl Default for PayTypeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PayTypeTable {
    pub fn builtin() -> Self {
        let labels = BUILTIN_PAY_TYPES
            .iter()
            .map(|(id, label)| (id.to_string(), label.to_string()))
            .collect();
        Self { labels }
    }

    /// Built-in table with entries replaced or added from `overrides`.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut table = Self::builtin();
        table.labels.extend(overrides);
        table
    }

    pub fn get(&self, pay_type_id: &str) -> Option<&str> {
        self.labels.get(pay_type_id.trim()).map(String::as_str)
    }

    /// Label for a matched service. Unknown identifiers produce a visible
    /// placeholder instead of an empty cell.
    pub fn label(&self, pay_type_id: &str) -> String {
        match self.get(pay_type_id) {
            Some(label) => label.to_string(),
            None => unknown_pay_type_label(pay_type_id),
        }
    }
}

pub fn unknown_pay_type_label(pay_type_id: &str) -> String {
    format!("Неизвестный id типа оплаты ({pay_type_id})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_ids_map_to_labels() {
        let table = PayTypeTable::builtin();
        assert_eq!(table.label("1"), "ОМС");
        assert_eq!(table.get(" 4 "), Some("ДМС"));
    }

    #[test]
    fn unknown_ids_are_named_in_the_label() {
        let table = PayTypeTable::builtin();
        assert_eq!(table.label("3010101"), "Неизвестный id типа оплаты (3010101)");
        assert_eq!(table.label(""), "Неизвестный id типа оплаты ()");
    }

    #[test]
    fn overrides_replace_builtin_entries() {
        let overrides = HashMap::from([
            ("1".to_string(), "ОМС (терфонд)".to_string()),
            ("301".to_string(), "Грант".to_string()),
        ]);
        let table = PayTypeTable::with_overrides(overrides);
        assert_eq!(table.label("1"), "ОМС (терфонд)");
        assert_eq!(table.label("301"), "Грант");
        assert_eq!(table.label("2"), "Бюджет");
    }
}
