//! Element types and their built-in behavior.

use crate::error::SdkError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static CARDHOLDER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z ,.\-']{2,}$").unwrap());

static CARD_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[0-9]{2,6}[ -]?){3,5}\s*$").unwrap());

static EXPIRATION_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(0[1-9]|1[0-2])/([0-9]{2})$").unwrap());

static CVV: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{3,4}$").unwrap());

static PIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{4,12}$").unwrap());

static SSN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{3}-?[0-9]{2}-?[0-9]{4}$").unwrap());

static DOB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0[1-9]|[12][0-9]|3[01])/(0[1-9]|1[0-2])/[0-9]{4}$").unwrap()
});

static ZIP_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{5}(?:-[0-9]{4})?$").unwrap());

/// Kind of input a secure element renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Text,
    Textarea,
    Password,
    CardholderName,
    CardNumber,
    ExpirationDate,
    Cvv,
    Pin,
    Ssn,
    Dob,
    ZipCode,
    Radio,
    Checkbox,
    Dropdown,
}

impl ElementType {
    pub const ALL: [ElementType; 14] = [
        ElementType::Text,
        ElementType::Textarea,
        ElementType::Password,
        ElementType::CardholderName,
        ElementType::CardNumber,
        ElementType::ExpirationDate,
        ElementType::Cvv,
        ElementType::Pin,
        ElementType::Ssn,
        ElementType::Dob,
        ElementType::ZipCode,
        ElementType::Radio,
        ElementType::Checkbox,
        ElementType::Dropdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Text => "text",
            ElementType::Textarea => "textarea",
            ElementType::Password => "password",
            ElementType::CardholderName => "cardholder_name",
            ElementType::CardNumber => "card_number",
            ElementType::ExpirationDate => "expiration_date",
            ElementType::Cvv => "cvv",
            ElementType::Pin => "pin",
            ElementType::Ssn => "ssn",
            ElementType::Dob => "dob",
            ElementType::ZipCode => "zip_code",
            ElementType::Radio => "radio",
            ElementType::Checkbox => "checkbox",
            ElementType::Dropdown => "dropdown",
        }
    }

    /// Whether values of this type are withheld from the host by default.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self,
            ElementType::Password
                | ElementType::CardNumber
                | ElementType::ExpirationDate
                | ElementType::Cvv
                | ElementType::Pin
                | ElementType::Ssn
                | ElementType::Dob
        )
    }

    /// Built-in validation, used when the validation list says `default`.
    pub fn regex(&self) -> Option<&'static Regex> {
        match self {
            ElementType::CardholderName => Some(&CARDHOLDER_NAME),
            ElementType::CardNumber => Some(&CARD_NUMBER),
            ElementType::ExpirationDate => Some(&EXPIRATION_DATE),
            ElementType::Cvv => Some(&CVV),
            ElementType::Pin => Some(&PIN),
            ElementType::Ssn => Some(&SSN),
            ElementType::Dob => Some(&DOB),
            ElementType::ZipCode => Some(&ZIP_CODE),
            _ => None,
        }
    }

    /// Mask pattern applied when the caller sets no mask.
    pub fn default_mask(&self) -> Option<&'static str> {
        match self {
            ElementType::Ssn => Some("999-99-9999"),
            ElementType::ExpirationDate => Some("99/99"),
            _ => None,
        }
    }

    /// `(regex, replacement)` applied when the caller sets neither a mask
    /// nor a replace pattern.
    pub fn default_replace_pattern(&self) -> Option<(&'static str, &'static str)> {
        match self {
            ElementType::CardNumber | ElementType::Cvv | ElementType::Pin => Some(("[^0-9]", "")),
            _ => None,
        }
    }

    /// Radio and checkbox frames carry their option value in the frame name.
    pub fn carries_value(&self) -> bool {
        matches!(self, ElementType::Radio | ElementType::Checkbox)
    }

    /// Type-specific checks beyond the regex.
    pub fn check(&self, value: &str) -> bool {
        match self {
            ElementType::CardNumber => luhn(value),
            _ => true,
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ElementType {
    type Err = SdkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SdkError::InvalidElementType(s.to_string()))
    }
}

/// Luhn checksum over the digits of `value`; separators are ignored.
pub fn luhn(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
