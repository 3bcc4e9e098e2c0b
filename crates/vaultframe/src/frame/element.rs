//! The input widget rendered inside an element frame.
//!
//! Stands in for the frame's DOM input: it holds what the input displays,
//! its checked state and style classes, and turns user input into
//! `FormField::set_value` calls carrying the input's own validity.

use super::field::{FieldEvent, FieldNotice, FormField};
use crate::bus::events::ElementState;
use crate::elements::options::{merge_options, validate_element_options};
use crate::elements::{ElementOptions, ElementType, ListenerHandle};
use crate::error::SdkError;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::warn;

const CLASS_PREFIX: &str = "VaultElement";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub display: String,
    pub checked: bool,
    pub focused: bool,
    pub classes: Vec<String>,
    pub label_classes: Vec<String>,
}

pub struct FrameElement {
    field: Arc<FormField>,
    options: Mutex<ElementOptions>,
    view: Mutex<View>,
    handles: Mutex<Vec<ListenerHandle>>,
}

impl std::fmt::Debug for FrameElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameElement")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

fn class_names(prefix: &str, name: &str, state: &ElementState) -> Vec<String> {
    let mut kinds = vec!["base"];
    if state.is_focused {
        kinds.push("focus");
    }
    if state.is_empty {
        kinds.push("empty");
    } else {
        if !state.is_valid {
            kinds.push("invalid");
        }
        if state.is_complete {
            kinds.push("complete");
        }
    }
    kinds
        .into_iter()
        .map(|kind| format!("{prefix}-{name}-{kind}"))
        .collect()
}

impl FrameElement {
    /// Mount the widget on `field`. Listeners of a previous mount are
    /// dropped first.
    pub fn mount(field: Arc<FormField>, options: ElementOptions) -> Result<Arc<Self>, SdkError> {
        validate_element_options(field.field_type(), None, &options)?;
        field.reset_events();
        let element = Arc::new(Self {
            field,
            options: Mutex::new(options.clone()),
            view: Mutex::new(View::default()),
            handles: Mutex::new(Vec::new()),
        });
        element.listen();
        element.apply_rules(&options)?;
        element.setup_input(false);
        Ok(element)
    }

    fn options(&self) -> MutexGuard<'_, ElementOptions> {
        self.options.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn view(&self) -> MutexGuard<'_, View> {
        self.view.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listen(self: &Arc<Self>) {
        let on = |event: FieldEvent, weak: Weak<Self>| {
            self.field.on(event, move |notice| {
                if let Some(element) = weak.upgrade() {
                    element.on_field_event(event, notice);
                }
            })
        };
        let handles = vec![
            on(FieldEvent::Change, Arc::downgrade(self)),
            on(FieldEvent::Options, Arc::downgrade(self)),
            on(FieldEvent::Focus, Arc::downgrade(self)),
            on(FieldEvent::Blur, Arc::downgrade(self)),
        ];
        *self.handles.lock().unwrap_or_else(|e| e.into_inner()) = handles;
    }

    fn on_field_event(&self, event: FieldEvent, notice: &FieldNotice) {
        match (event, notice) {
            (FieldEvent::Change, FieldNotice::State(state)) => self.on_change(state),
            (FieldEvent::Options, FieldNotice::Options(patch)) => {
                if let Err(e) = self.update_options(&Value::Object(patch.clone())) {
                    warn!("rejected option update for {}: {e}", self.field.frame_name());
                }
            }
            (FieldEvent::Focus, _) => self.view().focused = true,
            (FieldEvent::Blur, _) => self.view().focused = false,
            _ => {}
        }
    }

    fn on_change(&self, state: &ElementState) {
        let (name, reformats) = {
            let options = self.options();
            (
                options.name.clone(),
                options.mask.is_some() || options.replace_pattern.is_some(),
            )
        };
        let value = state.value.clone().unwrap_or_default();
        let option_value = self.field.option_value().map(str::to_string);
        let mut view = self.view();
        match self.field.field_type() {
            ElementType::Radio => {
                if !value.is_empty() {
                    view.checked = option_value.as_deref() == Some(value.as_str());
                }
            }
            ElementType::Checkbox => {
                view.checked = !value.is_empty() && option_value.as_deref() == Some(value.as_str());
            }
            _ if reformats => view.display = value,
            _ => {}
        }
        view.classes = class_names(CLASS_PREFIX, &name, state);
        view.label_classes = class_names(&format!("{CLASS_PREFIX}-label"), &name, state);
    }

    fn apply_rules(&self, options: &ElementOptions) -> Result<(), SdkError> {
        self.field.set_validation(options.validation.as_deref())?;
        self.field.set_replace_pattern(options.replace_pattern.as_ref())?;
        self.field.set_mask(options.mask.as_ref())?;
        self.field.set_sensitive(options.sensitive)?;
        Ok(())
    }

    /// Merge an option patch, validate it against the current options and
    /// push the new rules into the field.
    pub fn update_options(&self, patch: &Value) -> Result<(), SdkError> {
        let current = self.options().clone();
        let (merged, changed) = merge_options(&current, patch)?;
        validate_element_options(self.field.field_type(), Some(&current), &merged)?;
        self.apply_rules(&merged)?;
        let new_value = changed.contains_key("value")
            && merged.value.as_deref() != Some(self.field.get_value().as_str());
        *self.options() = merged;
        self.setup_input(new_value);
        Ok(())
    }

    /// Re-sync the field with what the input shows. `new_value` forces the
    /// option value into a text-like input.
    fn setup_input(&self, new_value: bool) {
        let options = self.options().clone();
        let field_type = self.field.field_type();
        if field_type.carries_value() {
            let checked = self.field.is_checked();
            self.view().checked = checked;
            let valid = self.check_validity(if checked {
                options.value.as_deref().unwrap_or_default()
            } else {
                ""
            });
            self.field.revalidate(valid);
            return;
        }

        let value = match self.field.value_if_set() {
            Some(current) if !new_value => current,
            _ => options.value.clone().unwrap_or_default(),
        };
        self.view().display = value.clone();
        let valid = self.check_validity(&value);
        self.field.set_value(&value, valid);
    }

    /// The input's own constraint check: required and length limits.
    pub fn check_validity(&self, value: &str) -> bool {
        let options = self.options();
        let len = value.chars().count();
        if value.is_empty() {
            return !options.is_required();
        }
        options.min_length.map_or(true, |min| len >= min)
            && options.max_length.map_or(true, |max| len <= max)
    }

    /// The user typed `raw` into the input.
    pub fn input(&self, raw: &str) {
        if self.field.field_type().carries_value() {
            self.select();
            return;
        }
        self.view().display = raw.to_string();
        let valid = self.check_validity(raw);
        self.field.set_value(raw, valid);
    }

    /// Click on a radio or checkbox option.
    pub fn select(&self) {
        let Some(option) = self.field.option_value().map(str::to_string) else {
            return;
        };
        let unchecking =
            self.field.field_type() == ElementType::Checkbox && self.field.is_checked();
        let valid = self.check_validity(if unchecking { "" } else { &option });
        self.field.set_value(&option, valid);
    }

    pub fn focus(&self) {
        self.view().focused = true;
        self.field.on_focus_change(true);
    }

    pub fn blur(&self) {
        self.view().focused = false;
        self.field.on_focus_change(false);
    }

    pub fn field(&self) -> &Arc<FormField> {
        &self.field
    }

    pub fn display_value(&self) -> String {
        self.view().display.clone()
    }

    /// Replace what the input shows without touching the field.
    pub fn set_display(&self, value: &str) {
        self.view().display = value.to_string();
    }

    pub fn is_checked(&self) -> bool {
        self.view().checked
    }

    pub fn is_focused(&self) -> bool {
        self.view().focused
    }

    pub fn classes(&self) -> Vec<String> {
        self.view().classes.clone()
    }

    pub fn label_classes(&self) -> Vec<String> {
        self.view().label_classes.clone()
    }

    pub fn current_options(&self) -> ElementOptions {
        self.options().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::element_frame_name;
    use crate::bus::Bus;
    use crate::client::tests::ScriptedTransport;
    use crate::config::ControllerOptions;
    use crate::elements::MaskOptions;
    use crate::frame::{FrameDirectory, SecureEnv};
    use serde_json::json;

    fn field(bus: &Bus, t: ElementType, name: &str, value: Option<&str>) -> Arc<FormField> {
        let env = SecureEnv {
            bus: bus.clone(),
            origin: "https://secure.example".into(),
            host_origin: "https://host.example".into(),
            directory: FrameDirectory::new(),
            transport: Arc::new(ScriptedTransport::default()),
            options: ControllerOptions::default(),
            retries: 0,
        };
        FormField::new(&element_frame_name(t, name, value), &env, "c1").unwrap()
    }

    #[test]
    fn test_required_empty_is_invalid() {
        let bus = Bus::new();
        let mut options = ElementOptions::named("user.email");
        options.validation = Some(vec!["required".into()]);
        let widget = FrameElement::mount(field(&bus, ElementType::Text, "user.email", None), options)
            .unwrap();
        assert!(!widget.field().state().is_valid);
        assert!(widget.classes().contains(&"VaultElement-user.email-empty".to_string()));

        widget.input("joey@example.com");
        assert!(widget.field().state().is_valid);
        assert_eq!(
            widget.classes(),
            vec![
                "VaultElement-user.email-base".to_string(),
                "VaultElement-user.email-complete".to_string()
            ]
        );
    }

    #[test]
    fn test_length_limits() {
        let bus = Bus::new();
        let mut options = ElementOptions::named("user.code");
        options.min_length = Some(2);
        options.max_length = Some(4);
        let widget =
            FrameElement::mount(field(&bus, ElementType::Text, "user.code", None), options).unwrap();
        widget.input("a");
        assert!(!widget.field().state().is_valid);
        assert!(widget.label_classes().contains(&"VaultElement-label-user.code-invalid".to_string()));
        widget.input("abcd");
        assert!(widget.field().state().is_valid);
        widget.input("abcde");
        assert!(!widget.field().state().is_valid);
    }

    #[test]
    fn test_mask_reformats_display() {
        let bus = Bus::new();
        let options = ElementOptions::named("person.ssn").with_type_defaults(ElementType::Ssn);
        let widget =
            FrameElement::mount(field(&bus, ElementType::Ssn, "person.ssn", None), options).unwrap();
        widget.input("123456789");
        assert_eq!(widget.display_value(), "123-45-6789");
        assert!(widget.field().state().is_complete);
    }

    #[test]
    fn test_initial_value_and_remount() {
        let bus = Bus::new();
        let mut options = ElementOptions::named("user.city");
        options.value = Some("Paris".into());
        let f = field(&bus, ElementType::Text, "user.city", None);
        let widget = FrameElement::mount(f.clone(), options.clone()).unwrap();
        assert_eq!(widget.display_value(), "Paris");
        widget.input("Lyon");

        // A remounted frame shows the field's value, not the option value.
        let again = FrameElement::mount(f, options).unwrap();
        assert_eq!(again.display_value(), "Lyon");
    }

    #[test]
    fn test_option_updates() {
        let bus = Bus::new();
        let widget = FrameElement::mount(
            field(&bus, ElementType::Text, "user.code", None),
            ElementOptions::named("user.code"),
        )
        .unwrap();
        widget
            .update_options(&json!({"mask": MaskOptions::new("99-99")}))
            .unwrap();
        widget.input("1234");
        assert_eq!(widget.display_value(), "12-34");

        assert!(widget.update_options(&json!({"name": "other.code"})).is_err());
        widget.update_options(&json!({"sensitive": true})).unwrap();
        assert!(matches!(
            widget.update_options(&json!({"sensitive": false})),
            Err(SdkError::SensitivityDowngrade(_))
        ));
    }

    #[test]
    fn test_radio_checked_follows_group() {
        let bus = Bus::new();
        let mut basic = ElementOptions::named("user.plan");
        basic.value = Some("basic".into());
        let mut pro = basic.clone();
        pro.value = Some("pro".into());

        let a = FrameElement::mount(field(&bus, ElementType::Radio, "user.plan", Some("basic")), basic)
            .unwrap();
        let b = FrameElement::mount(field(&bus, ElementType::Radio, "user.plan", Some("pro")), pro)
            .unwrap();
        a.select();
        assert!(a.is_checked());
        assert!(!b.is_checked());
        b.select();
        assert!(b.is_checked());
        assert!(!a.is_checked());
    }

    #[test]
    fn test_focus_and_blur() {
        let bus = Bus::new();
        let widget = FrameElement::mount(
            field(&bus, ElementType::Text, "user.name", None),
            ElementOptions::named("user.name"),
        )
        .unwrap();
        widget.focus();
        assert!(widget.field().state().is_focused);
        assert!(widget.classes().iter().any(|c| c.ends_with("-focus")));
        widget.blur();
        assert!(!widget.field().state().is_focused);
    }
}
