//! Input masks.
//!
//! A mask is a pattern such as `999-99-9999` in which some characters are
//! placeholders (mapped to a single-character class) and the rest are
//! literals inserted automatically while the user types.

use crate::error::SdkError;
use regex::Regex;
use std::collections::BTreeMap;

/// `{pattern, replacer, char classes}`.
#[derive(Debug, Clone)]
pub struct Mask {
    pattern: Vec<char>,
    replacer: Option<char>,
    classes: Vec<(char, Regex)>,
}

fn anchored(class: &str) -> Result<Regex, SdkError> {
    Regex::new(&format!("^(?:{class})$"))
        .map_err(|e| SdkError::InvalidElementOptions(format!("mask class {class}: {e}")))
}

impl Mask {
    /// Pattern with the default classes: `9` digit, `a` letter, `*` either.
    pub fn new(pattern: &str) -> Result<Self, SdkError> {
        let defaults = BTreeMap::from([
            ("9".to_string(), "[0-9]".to_string()),
            ("a".to_string(), "[a-zA-Z]".to_string()),
            ("*".to_string(), "[a-zA-Z0-9]".to_string()),
        ]);
        Self::with_classes(pattern, None, &defaults)
    }

    /// Pattern with caller supplied classes. Keys must be single characters.
    pub fn with_classes(
        pattern: &str,
        replacer: Option<char>,
        classes: &BTreeMap<String, String>,
    ) -> Result<Self, SdkError> {
        if pattern.is_empty() {
            return Err(SdkError::InvalidElementOptions("mask pattern is empty".into()));
        }
        let mut compiled = Vec::with_capacity(classes.len());
        for (key, class) in classes {
            let mut chars = key.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return Err(SdkError::InvalidElementOptions(format!(
                    "mask placeholder {key:?} must be one character"
                )));
            };
            compiled.push((c, anchored(class)?));
        }
        Ok(Self {
            pattern: pattern.chars().collect(),
            replacer,
            classes: compiled,
        })
    }

    pub fn pattern_len(&self) -> usize {
        self.pattern.len()
    }

    fn class(&self, c: char) -> Option<&Regex> {
        self.classes.iter().find(|(k, _)| *k == c).map(|(_, re)| re)
    }

    fn is_placeholder(&self, i: usize) -> bool {
        self.pattern
            .get(i)
            .is_some_and(|c| self.class(*c).is_some())
    }

    fn accepts(&self, i: usize, c: char) -> bool {
        if Some(c) == self.replacer {
            return false;
        }
        match self.pattern.get(i).and_then(|p| self.class(*p)) {
            Some(re) => {
                let mut buf = [0u8; 4];
                re.is_match(c.encode_utf8(&mut buf))
            }
            None => false,
        }
    }

    /// Format `value` against the pattern.
    ///
    /// `prev` is the previously formatted value; when `value` is exactly one
    /// character shorter and the removed character was a literal, the
    /// placeholder before it is removed as well so backspace moves past
    /// auto-inserted separators.
    pub fn apply(&self, value: &str, prev: &str, focus: bool) -> String {
        if value.is_empty() || (prev == value && !focus && self.unmask(value).is_empty()) {
            return self.empty(focus);
        }

        let mut v: Vec<char> = value.chars().collect();
        let p: Vec<char> = prev.chars().collect();

        if !p.is_empty() && v.len() + 1 == p.len() {
            let removed = (0..p.len())
                .find(|&i| v.get(i) != p.get(i))
                .unwrap_or(p.len() - 1);
            if removed > 0 && !self.is_placeholder(removed) {
                if let Some(start) = (0..removed).rev().find(|&i| self.is_placeholder(i)) {
                    v.drain(start..removed.min(v.len()));
                }
            }
        }

        let mut i = 0;
        while i < self.pattern.len() {
            let slot = self.pattern[i];
            let placeholder = self.class(slot).is_some();
            match v.get(i).copied() {
                None if placeholder => match self.replacer {
                    Some(r) => v.push(r),
                    None => break,
                },
                None => v.push(slot),
                Some(c) if placeholder => {
                    if !self.accepts(i, c) {
                        v.remove(i);
                        continue;
                    }
                }
                Some(c) => {
                    if c != slot {
                        v.insert(i, slot);
                    }
                }
            }
            i += 1;
        }

        v.truncate(self.pattern.len());
        v.into_iter().collect()
    }

    fn empty(&self, focus: bool) -> String {
        match self.replacer {
            Some(r) if focus => self
                .pattern
                .iter()
                .map(|c| if self.class(*c).is_some() { r } else { *c })
                .collect(),
            _ => String::new(),
        }
    }

    /// Extract the characters at placeholder positions.
    ///
    /// With a replacer, extraction stops after the last position holding a
    /// real character.
    pub fn unmask(&self, value: &str) -> String {
        let mut out = String::new();
        let mut keep = 0;
        for (i, c) in value.chars().enumerate() {
            if !self.is_placeholder(i) {
                continue;
            }
            out.push(c);
            if self.replacer != Some(c) {
                keep = out.chars().count();
            }
        }
        if self.replacer.is_some() {
            out.chars().take(keep).collect()
        } else {
            out
        }
    }

    /// Full length with no placeholder still holding the replacer.
    pub fn is_complete(&self, formatted: &str) -> bool {
        let chars: Vec<char> = formatted.chars().collect();
        chars.len() == self.pattern.len()
            && chars
                .iter()
                .enumerate()
                .all(|(i, c)| !(self.is_placeholder(i) && Some(*c) == self.replacer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_each(mask: &Mask, input: &str) -> String {
        let mut shown = String::new();
        for c in input.chars() {
            let next = format!("{shown}{c}");
            shown = mask.apply(&next, &shown, true);
        }
        shown
    }

    #[test]
    fn test_format_inserts_literals() {
        let ssn = Mask::new("999-99-9999").unwrap();
        assert_eq!(ssn.apply("123456789", "", true), "123-45-6789");
        assert_eq!(type_each(&ssn, "123456789"), "123-45-6789");
        assert_eq!(ssn.apply("12", "", true), "12");
        assert_eq!(ssn.apply("123", "", true), "123-");
    }

    #[test]
    fn test_rejects_wrong_class_and_truncates() {
        let expiry = Mask::new("99/99").unwrap();
        assert_eq!(expiry.apply("1a2", "", true), "12/");
        assert_eq!(expiry.apply("123456", "", true), "12/34");
    }

    #[test]
    fn test_backspace_over_literal() {
        let expiry = Mask::new("99/99").unwrap();
        // "12/" -> user deletes "/" -> the digit before goes too.
        assert_eq!(expiry.apply("12", "12/", true), "1");
        // Deleting a digit is a plain edit.
        assert_eq!(expiry.apply("12/3", "12/34", true), "12/3");
    }

    #[test]
    fn test_unmask_round_trip() {
        for (pattern, raw) in [
            ("999-99-9999", "123456789"),
            ("99/99", "1227"),
            ("(999) 999-9999", "5551234567"),
            ("aa-99", "ab12"),
        ] {
            let mask = Mask::new(pattern).unwrap();
            let shown = mask.apply(raw, "", true);
            assert_eq!(mask.unmask(&shown), raw, "pattern {pattern}");
            assert!(mask.is_complete(&shown));
        }
    }

    #[test]
    fn test_replacer_fills_and_unmasks() {
        let classes = BTreeMap::from([("9".to_string(), "[0-9]".to_string())]);
        let mask = Mask::with_classes("99/99", Some('_'), &classes).unwrap();
        assert_eq!(mask.apply("", "", true), "__/__");
        assert_eq!(mask.apply("", "", false), "");
        let shown = mask.apply("1", "", true);
        assert_eq!(shown, "1_/__");
        assert_eq!(mask.unmask(&shown), "1");
        assert!(!mask.is_complete(&shown));
    }

    #[test]
    fn test_blur_with_nothing_typed_clears() {
        let classes = BTreeMap::from([("9".to_string(), "[0-9]".to_string())]);
        let mask = Mask::with_classes("99/99", Some('_'), &classes).unwrap();
        assert_eq!(mask.apply("__/__", "__/__", false), "");
    }

    #[test]
    fn test_bad_placeholder_key() {
        let classes = BTreeMap::from([("99".to_string(), "[0-9]".to_string())]);
        assert!(Mask::with_classes("99", None, &classes).is_err());
    }
}
