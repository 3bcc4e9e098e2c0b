//! Element options and their validation.

use super::mask::Mask;
use super::types::ElementType;
use crate::error::SdkError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Validation list keywords that are not regexes.
pub const VALIDATION_REQUIRED: &str = "required";
pub const VALIDATION_DEFAULT: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropdownOption {
    pub value: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskOptions {
    pub pattern: String,
    /// Placeholder character to regex class. Defaults to `9`, `a`, `*`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacer: Option<char>,
}

impl MaskOptions {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            classes: None,
            replacer: None,
        }
    }

    pub fn compile(&self) -> Result<Mask, SdkError> {
        match &self.classes {
            Some(classes) => Mask::with_classes(&self.pattern, self.replacer, classes),
            None if self.replacer.is_none() => Mask::new(&self.pattern),
            None => {
                let defaults = BTreeMap::from([
                    ("9".to_string(), "[0-9]".to_string()),
                    ("a".to_string(), "[a-zA-Z]".to_string()),
                    ("*".to_string(), "[a-zA-Z0-9]".to_string()),
                ]);
                Mask::with_classes(&self.pattern, self.replacer, &defaults)
            }
        }
    }
}

/// Options a host passes to `create` and `update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementOptions {
    /// Vault column path, e.g. `cards.card_number`.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    pub disabled: bool,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<MaskOptions>,
    /// `(regex, replacement)`, applied to every input when no mask is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_pattern: Option<(String, String)>,
    pub sensitive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub styles: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_styles: Option<Value>,
    /// Choices of a dropdown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<DropdownOption>>,
}

impl ElementOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn is_required(&self) -> bool {
        self.validation
            .as_ref()
            .is_some_and(|v| v.iter().any(|s| s == VALIDATION_REQUIRED))
    }

    /// Fill type defaults the caller left out. A caller mask suppresses the
    /// default replace pattern and vice versa.
    pub fn with_type_defaults(mut self, element_type: ElementType) -> Self {
        self.sensitive = self.sensitive || element_type.is_sensitive();
        if self.mask.is_none() && self.replace_pattern.is_none() {
            if let Some(pattern) = element_type.default_mask() {
                self.mask = Some(MaskOptions::new(pattern));
            } else if let Some((re, with)) = element_type.default_replace_pattern() {
                self.replace_pattern = Some((re.to_string(), with.to_string()));
            }
        }
        self
    }

    /// Copy handed back by `get_options`: no value, no dropdown choices.
    pub fn public_view(&self) -> Self {
        Self {
            value: None,
            options: None,
            ..self.clone()
        }
    }
}

/// Compile a regex written either plainly or as `/source/flags`.
pub fn compile_pattern(pattern: &str) -> Result<Regex, SdkError> {
    let source = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) if flags.chars().all(|c| "gimsuy".contains(c)) => {
            let inline: String = flags.chars().filter(|c| "ims".contains(*c)).collect();
            if inline.is_empty() {
                body.to_string()
            } else {
                format!("(?{inline}){body}")
            }
        }
        _ => pattern.to_string(),
    };
    Regex::new(&source)
        .map_err(|e| SdkError::InvalidElementOptions(format!("invalid regex {pattern}: {e}")))
}

/// Check options for `element_type`; `previous` is set on update.
pub fn validate_element_options(
    element_type: ElementType,
    previous: Option<&ElementOptions>,
    options: &ElementOptions,
) -> Result<(), SdkError> {
    if options.name.trim().is_empty() {
        return Err(SdkError::InvalidElementOptions("name is required".into()));
    }
    if options.name.contains(':') {
        return Err(SdkError::InvalidElementOptions(format!(
            "name {} must not contain ':'",
            options.name
        )));
    }
    if let Some(prev) = previous {
        if prev.name != options.name {
            return Err(SdkError::InvalidElementOptions(
                "name cannot be changed by update".into(),
            ));
        }
        if prev.sensitive && !options.sensitive {
            return Err(SdkError::SensitivityDowngrade(options.name.clone()));
        }
    }
    if element_type.carries_value() && options.value.as_deref().unwrap_or("").is_empty() {
        return Err(SdkError::InvalidElementOptions(format!(
            "{element_type} element {} needs a value",
            options.name
        )));
    }
    if element_type == ElementType::Dropdown
        && options.options.as_ref().map_or(true, |o| o.is_empty())
    {
        return Err(SdkError::InvalidElementOptions(format!(
            "dropdown {} needs options",
            options.name
        )));
    }
    if options.mask.is_some() && options.replace_pattern.is_some() {
        return Err(SdkError::InvalidElementOptions(
            "mask and replace pattern cannot both be set".into(),
        ));
    }
    if let (Some(min), Some(max)) = (options.min_length, options.max_length) {
        if min > max {
            return Err(SdkError::InvalidElementOptions(format!(
                "min length {min} exceeds max length {max}"
            )));
        }
    }
    if let Some(mask) = &options.mask {
        mask.compile()?;
    }
    if let Some((re, _)) = &options.replace_pattern {
        compile_pattern(re)?;
    }
    for entry in options.validation.iter().flatten() {
        if entry != VALIDATION_REQUIRED && entry != VALIDATION_DEFAULT {
            compile_pattern(entry)?;
        }
    }
    Ok(())
}

/// Shallow-merge `patch` over `current` and report which top-level keys
/// actually changed.
pub fn merge_options(
    current: &ElementOptions,
    patch: &Value,
) -> Result<(ElementOptions, Map<String, Value>), SdkError> {
    let Value::Object(patch) = patch else {
        return Err(SdkError::InvalidElementOptions("options must be an object".into()));
    };
    let Value::Object(mut merged) = serde_json::to_value(current)? else {
        return Err(SdkError::InvalidElementOptions("options must be an object".into()));
    };
    let before = merged.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    let changed: Map<String, Value> = merged
        .iter()
        .filter(|(k, v)| before.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let options: ElementOptions = serde_json::from_value(Value::Object(merged))
        .map_err(|e| SdkError::InvalidElementOptions(e.to_string()))?;
    Ok((options, changed))
}
