// 🧹 Field Normalizer - canonical phone, date and text values
//
// Every function here is total: input that cannot be parsed passes through
// (trimmed) instead of failing, and normalizing twice gives the same value.

use crate::dataset::Dataset;
use crate::error::{LinkageError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// FIELD KIND
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Phone,
    Date,
    #[default]
    Text,
}

impl FieldKind {
    pub fn name(&self) -> &str {
        match self {
            FieldKind::Phone => "phone",
            FieldKind::Date => "date",
            FieldKind::Text => "text",
        }
    }

    /// Infer the kind from a column name ("ContactPhone" -> phone, "Executed" -> date)
    pub fn guess(column: &str) -> Self {
        let lower = column.to_lowercase();

        if ["phone", "tel", "mobile"].iter().any(|k| lower.contains(k)) {
            FieldKind::Phone
        } else if ["date", "executed", "time"].iter().any(|k| lower.contains(k)) {
            FieldKind::Date
        } else {
            FieldKind::Text
        }
    }
}

// ============================================================================
// RULES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneRules {
    /// Country calling code prepended to local numbers (default: "373")
    pub country_code: String,

    /// Digits in a local subscriber number (default: 8)
    pub local_length: usize,

    /// National trunk prefix replaced by the country code (default: "0")
    pub trunk_prefix: String,
}

impl Default for PhoneRules {
    fn default() -> Self {
        PhoneRules {
            country_code: "373".to_string(),
            local_length: 8,
            trunk_prefix: "0".to_string(),
        }
    }
}

impl PhoneRules {
    pub fn with_country_code(country_code: &str) -> Self {
        PhoneRules {
            country_code: country_code.to_string(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_length == 0 {
            return Err(LinkageError::InvalidPhoneRules(
                "local_length must be greater than zero".to_string(),
            ));
        }
        if !self.country_code.chars().all(|c| c.is_ascii_digit()) {
            return Err(LinkageError::InvalidPhoneRules(format!(
                "country_code '{}' must contain only digits",
                self.country_code
            )));
        }
        if !self.trunk_prefix.chars().all(|c| c.is_ascii_digit()) {
            return Err(LinkageError::InvalidPhoneRules(format!(
                "trunk_prefix '{}' must contain only digits",
                self.trunk_prefix
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DateRules {
    /// chrono patterns tried in order; 2-digit-year patterns come before 4-digit ones
    pub input_formats: Vec<String>,

    /// Canonical output pattern (default: "%Y-%m-%d")
    pub output_format: String,
}

impl Default for DateRules {
    fn default() -> Self {
        let input_formats = [
            "%d.%m.%y", "%d-%m-%y", "%d/%m/%y", "%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d", "%d.%m.%Y",
            "%d-%m-%Y", "%d/%m/%Y", "%d %b %Y", "%d %B %Y",
        ];

        DateRules {
            input_formats: input_formats.iter().map(|f| f.to_string()).collect(),
            output_format: "%Y-%m-%d".to_string(),
        }
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalizer {
    phone: PhoneRules,
    date: DateRules,
}

impl Normalizer {
    pub fn new(phone: PhoneRules, date: DateRules) -> Self {
        Normalizer { phone, date }
    }

    pub fn phone_rules(&self) -> &PhoneRules {
        &self.phone
    }

    pub fn date_rules(&self) -> &DateRules {
        &self.date
    }

    pub fn normalize(&self, kind: FieldKind, raw: &str) -> String {
        match kind {
            FieldKind::Phone => self.normalize_phone(raw),
            FieldKind::Date => self.normalize_date(raw),
            FieldKind::Text => normalize_text(raw),
        }
    }

    /// Digit-only phone number in international form where the length allows it
    pub fn normalize_phone(&self, raw: &str) -> String {
        if is_missing(raw) {
            return String::new();
        }

        let trimmed = raw.trim();
        let trimmed = match trimmed.strip_suffix(".0") {
            Some(int_part) if !int_part.is_empty() && int_part.bytes().all(|b| b.is_ascii_digit()) => {
                int_part
            }
            _ => trimmed,
        };

        let number = digits(trimmed);
        let PhoneRules {
            country_code,
            local_length,
            trunk_prefix,
        } = &self.phone;

        if number.len() == *local_length {
            return format!("{}{}", country_code, number);
        }

        if !trunk_prefix.is_empty()
            && number.len() == local_length + trunk_prefix.len()
            && number.starts_with(trunk_prefix.as_str())
        {
            return format!("{}{}", country_code, &number[trunk_prefix.len()..]);
        }

        if let Some(rest) = number.strip_prefix(country_code.as_str()) {
            if !trunk_prefix.is_empty()
                && rest.len() == local_length + trunk_prefix.len()
                && rest.starts_with(trunk_prefix.as_str())
            {
                return format!("{}{}", country_code, &rest[trunk_prefix.len()..]);
            }
        }

        number
    }

    /// Canonical date string, or the trimmed input when no pattern parses
    pub fn normalize_date(&self, raw: &str) -> String {
        if is_missing(raw) {
            return String::new();
        }

        let trimmed = raw.trim();
        match self.parse_date(trimmed) {
            Some(date) => date.format(&self.date.output_format).to_string(),
            None => trimmed.to_string(),
        }
    }

    /// Parse with each input pattern, then the output pattern, then without a time part
    pub fn parse_date(&self, raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        self.try_formats(trimmed).or_else(|| {
            let date_part = trimmed.split([' ', 'T']).next().unwrap_or(trimmed);
            if date_part.len() < trimmed.len() {
                self.try_formats(date_part)
            } else {
                None
            }
        })
    }

    fn try_formats(&self, value: &str) -> Option<NaiveDate> {
        self.date
            .input_formats
            .iter()
            .chain(std::iter::once(&self.date.output_format))
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
    }

    /// Rewrite one column in place; returns how many cells changed
    pub fn normalize_column(&self, dataset: &mut Dataset, column: &str, kind: FieldKind) -> Result<usize> {
        let index = dataset
            .column_index(column)
            .ok_or_else(|| LinkageError::MissingColumn(column.to_string()))?;

        let updates: Vec<(usize, String)> = dataset
            .records()
            .filter_map(|record| {
                let raw = record.value(index);
                let normalized = self.normalize(kind, raw);
                (normalized != raw).then_some((record.position(), normalized))
            })
            .collect();

        let changed = updates.len();
        for (position, value) in updates {
            dataset.set(position, index, value);
        }

        Ok(changed)
    }
}

// ============================================================================
// HELPERS
// ============================================================================

/// Empty cells and the placeholder spellings spreadsheet exports write for them
pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty()
        || ["nan", "none", "null", "nat"]
            .iter()
            .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// ASCII digits of a value, in order
pub fn digits(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lowercased with whitespace runs collapsed
pub fn normalize_text(raw: &str) -> String {
    if is_missing(raw) {
        return String::new();
    }

    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
