//! Field state machine.
//!
//! A `FormField` owns the value of one element frame. It lives in the
//! controller's `SecureForm`, so the value survives the frame being
//! remounted, and it is the only thing allowed to change its own state.
//! Every change is reported twice: the public status (value omitted when
//! sensitive) goes to the host, the full state goes to the frame's widget.

use super::SecureEnv;
use crate::bus::events::{
    parse_element_frame_name, scoped, ElementEvent, ElementState, InputEvent, RadioSync, SetValue,
    INPUT_EVENT, RADIO_SYNC, SET_VALUE,
};
use crate::bus::{BusEndpoint, Subscription};
use crate::elements::options::{compile_pattern, VALIDATION_DEFAULT, VALIDATION_REQUIRED};
use crate::elements::{ElementType, EventEmitter, ListenerHandle, Mask, MaskOptions};
use crate::error::SdkError;
use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldState {
    pub value: String,
    pub is_focused: bool,
    pub is_valid: bool,
    pub is_empty: bool,
    pub is_complete: bool,
    pub name: String,
}

impl FieldState {
    fn new(name: &str) -> Self {
        Self {
            value: String::new(),
            is_focused: false,
            is_valid: false,
            is_empty: true,
            is_complete: false,
            name: name.to_string(),
        }
    }
}

/// Events a field raises for the widget of its own frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEvent {
    Focus,
    Blur,
    Change,
    Options,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldNotice {
    /// Full state, raw value included. Never leaves the secure origin.
    State(ElementState),
    /// Changed option keys pushed by the host.
    Options(Map<String, Value>),
}

enum Validation {
    /// The element type's own regex and checks.
    Builtin,
    Custom(Regex),
}

struct Rules {
    sensitive: bool,
    validation: Validation,
    replace: Option<(Regex, String)>,
    mask: Option<Mask>,
}

struct Inner {
    state: FieldState,
    /// Whether any value was ever set.
    touched: bool,
    /// Last widget verdict passed to `set_value`.
    dom_valid: bool,
    rules: Rules,
}

impl Inner {
    fn unformatted(&self) -> String {
        match &self.rules.mask {
            Some(mask) => mask.unmask(&self.state.value),
            None => self.state.value.clone(),
        }
    }

    fn validates(&self, element_type: ElementType, value: &str) -> bool {
        match &self.rules.validation {
            Validation::Builtin => {
                element_type.regex().map_or(true, |re| re.is_match(value))
                    && element_type.check(value)
            }
            Validation::Custom(re) => re.is_match(value),
        }
    }

    fn status(&self, element_type: ElementType, full: bool) -> ElementState {
        ElementState {
            is_empty: self.state.is_empty,
            is_complete: self.state.is_complete,
            is_valid: self.state.is_valid,
            is_focused: self.state.is_focused,
            value: (full || !self.rules.sensitive).then(|| self.state.value.clone()),
            element_type: Some(element_type),
        }
    }
}

pub struct FormField {
    frame_name: String,
    field_type: ElementType,
    field_name: String,
    option_value: Option<String>,
    container_id: String,
    to_host: BusEndpoint,
    to_secure: BusEndpoint,
    inner: Mutex<Inner>,
    events: EventEmitter<FieldEvent, FieldNotice>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for FormField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormField")
            .field("frame_name", &self.frame_name)
            .field("field_type", &self.field_type)
            .finish_non_exhaustive()
    }
}

/// `YYYY-MM-DD` as typed into a date input becomes `DD/MM/YYYY`.
fn to_display_date(value: &str) -> Option<String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%d/%m/%Y").to_string())
}

impl FormField {
    pub fn new(
        frame_name: &str,
        env: &SecureEnv,
        container_id: &str,
    ) -> Result<Arc<Self>, SdkError> {
        let (field_type, field_name, option_value) = parse_element_frame_name(frame_name)?;
        let field = Arc::new(Self {
            frame_name: frame_name.to_string(),
            field_type,
            option_value,
            container_id: container_id.to_string(),
            to_host: env.to_host(),
            to_secure: env.to_secure(),
            inner: Mutex::new(Inner {
                state: FieldState::new(&field_name),
                touched: false,
                dom_valid: true,
                rules: Rules {
                    sensitive: field_type.is_sensitive(),
                    validation: Validation::Builtin,
                    replace: None,
                    mask: None,
                },
            }),
            field_name,
            events: EventEmitter::new(),
            subscriptions: Mutex::new(Vec::new()),
        });
        field.listen();
        Ok(field)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listen(self: &Arc<Self>) {
        let mut subs = Vec::new();

        let weak = Arc::downgrade(self);
        subs.push(self.to_host.on(&scoped(INPUT_EVENT, &self.container_id), move |msg, _| {
            let Some(field) = weak.upgrade() else { return };
            let Ok(event) = msg.payload_as::<InputEvent>() else {
                return;
            };
            if event.name != field.frame_name {
                return;
            }
            match event.event {
                ElementEvent::Focus => field.focus_from_host(true),
                ElementEvent::Blur => field.focus_from_host(false),
                _ => {}
            }
        }));

        let weak = Arc::downgrade(self);
        subs.push(self.to_host.on(&scoped(SET_VALUE, &self.container_id), move |msg, _| {
            let Some(field) = weak.upgrade() else { return };
            match msg.payload_as::<SetValue>() {
                Ok(SetValue::Value { name, value }) if name == field.frame_name => {
                    field.set_value(&value, true);
                }
                Ok(SetValue::Options { name, options }) if name == field.frame_name => {
                    field
                        .events
                        .emit(&FieldEvent::Options, &FieldNotice::Options(options));
                }
                _ => {}
            }
        }));

        if self.field_type == ElementType::Radio {
            let weak = Arc::downgrade(self);
            subs.push(self.to_secure.on(&scoped(RADIO_SYNC, &self.container_id), move |msg, _| {
                let Some(field) = weak.upgrade() else { return };
                let Ok(sync) = msg.payload_as::<RadioSync>() else {
                    return;
                };
                if sync.field_type == field.field_type
                    && sync.field_name == field.field_name
                    && !sync.value.is_empty()
                    && sync.value != field.lock().state.value
                {
                    field.set_value(&sync.value, true);
                }
            }));
        }

        *self.subscriptions.lock().unwrap_or_else(|e| e.into_inner()) = subs;
    }

    pub fn frame_name(&self) -> &str {
        &self.frame_name
    }

    pub fn field_type(&self) -> ElementType {
        self.field_type
    }

    /// Vault column path, without the option value.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn option_value(&self) -> Option<&str> {
        self.option_value.as_deref()
    }

    /// Apply an input value.
    ///
    /// `dom_valid` is the widget's own verdict (required, length limits).
    pub fn set_value(&self, raw: &str, dom_valid: bool) {
        let value = {
            let inner = self.lock();
            let mut value = match (&inner.rules.mask, &inner.rules.replace) {
                (Some(mask), _) => mask.apply(raw, &inner.state.value, inner.state.is_focused),
                (None, Some((re, with))) => re.replace_all(raw, with.as_str()).into_owned(),
                (None, None) => raw.to_string(),
            };
            if self.field_type == ElementType::Checkbox && inner.state.value == value {
                value.clear();
            }
            if self.field_type == ElementType::Dob {
                if let Some(date) = to_display_date(&value) {
                    value = date;
                }
            }
            value
        };
        self.commit(value, dom_valid, true);
    }

    /// Recompute validity of the current value, e.g. after the rules
    /// changed. A checkbox is not toggled.
    pub fn revalidate(&self, dom_valid: bool) {
        let value = self.lock().state.value.clone();
        self.commit(value, dom_valid, false);
    }

    fn commit(&self, value: String, dom_valid: bool, touch: bool) {
        let (public, full, sync) = {
            let mut inner = self.lock();
            let masked_ok = inner
                .rules
                .mask
                .as_ref()
                .map_or(true, |mask| mask.is_complete(&value));
            inner.state.value = value;
            inner.touched |= touch;
            inner.dom_valid = dom_valid;
            inner.state.is_empty = inner.unformatted().is_empty();
            let ok = dom_valid && masked_ok && inner.validates(self.field_type, &inner.state.value);
            inner.state.is_valid = ok;
            inner.state.is_complete = ok;

            let sync = (touch && self.field_type == ElementType::Radio)
                .then(|| inner.state.value.clone());
            (
                inner.status(self.field_type, false),
                inner.status(self.field_type, true),
                sync,
            )
        };

        self.send_change_status(public, full);
        if let Some(value) = sync {
            self.to_secure.emit_as(
                &scoped(RADIO_SYNC, &self.container_id),
                &RadioSync {
                    field_name: self.field_name.clone(),
                    field_type: self.field_type,
                    value,
                },
            );
        }
    }

    fn send_change_status(&self, public: ElementState, full: ElementState) {
        self.to_host.emit_as(
            &scoped(INPUT_EVENT, &self.container_id),
            &InputEvent {
                name: self.frame_name.clone(),
                event: ElementEvent::Change,
                value: Some(public),
            },
        );
        self.events
            .emit(&FieldEvent::Change, &FieldNotice::State(full));
    }

    /// Focus moved inside the frame.
    pub fn on_focus_change(&self, focus: bool) {
        self.to_host.emit_as(
            &scoped(INPUT_EVENT, &self.container_id),
            &InputEvent {
                name: self.frame_name.clone(),
                event: if focus {
                    ElementEvent::Focus
                } else {
                    ElementEvent::Blur
                },
                value: None,
            },
        );
        self.change_focus(focus);
    }

    fn focus_from_host(&self, focus: bool) {
        self.on_focus_change(focus);
        let full = self.lock().status(self.field_type, true);
        let event = if focus {
            FieldEvent::Focus
        } else {
            FieldEvent::Blur
        };
        self.events.emit(&event, &FieldNotice::State(full));
    }

    /// Update focus and re-apply the mask so prompt characters show or hide.
    /// The widget's last verdict carries over; focus alone never makes a
    /// field valid.
    pub fn change_focus(&self, focus: bool) {
        let (public, full, remask) = {
            let mut inner = self.lock();
            inner.state.is_focused = focus;
            let remask = inner
                .rules
                .mask
                .is_some()
                .then(|| (inner.state.value.clone(), inner.dom_valid));
            (
                inner.status(self.field_type, false),
                inner.status(self.field_type, true),
                remask,
            )
        };
        self.send_change_status(public, full);
        if let Some((value, dom_valid)) = remask {
            self.set_value(&value, dom_valid);
        }
    }

    /// Value as the input shows it. Dates come back as `YYYY-MM-DD`.
    pub fn get_value(&self) -> String {
        let value = self.lock().state.value.clone();
        if self.field_type == ElementType::Dob && !value.is_empty() {
            return value.split('/').rev().collect::<Vec<_>>().join("-");
        }
        value
    }

    /// The value if anything was ever set.
    pub fn value_if_set(&self) -> Option<String> {
        let touched = self.lock().touched;
        touched.then(|| self.get_value())
    }

    /// Value with mask literals removed.
    pub fn get_unformatted_value(&self) -> String {
        self.lock().unformatted()
    }

    /// Status as the host may see it.
    pub fn status(&self) -> ElementState {
        self.lock().status(self.field_type, false)
    }

    pub fn state(&self) -> FieldState {
        self.lock().state.clone()
    }

    pub fn is_sensitive(&self) -> bool {
        self.lock().rules.sensitive
    }

    /// Radio and checkbox: whether this option is the selected one.
    pub fn is_checked(&self) -> bool {
        let inner = self.lock();
        let value = &inner.state.value;
        !value.is_empty() && self.option_value.as_deref() == Some(value.as_str())
    }

    /// `default` selects the type's built-in rule; otherwise the last custom
    /// pattern wins. No custom pattern means the built-in rule.
    pub fn set_validation(&self, validation: Option<&[String]>) -> Result<(), SdkError> {
        let list = validation.unwrap_or_default();
        let rule = if list.iter().any(|v| v == VALIDATION_DEFAULT) {
            Validation::Builtin
        } else {
            match list
                .iter()
                .filter(|v| *v != VALIDATION_REQUIRED)
                .last()
            {
                Some(pattern) => Validation::Custom(compile_pattern(pattern)?),
                None => Validation::Builtin,
            }
        };
        self.lock().rules.validation = rule;
        Ok(())
    }

    pub fn set_replace_pattern(&self, pattern: Option<&(String, String)>) -> Result<(), SdkError> {
        let compiled = match pattern {
            Some((re, with)) => Some((compile_pattern(re)?, with.clone())),
            None => None,
        };
        self.lock().rules.replace = compiled;
        Ok(())
    }

    pub fn set_mask(&self, mask: Option<&MaskOptions>) -> Result<(), SdkError> {
        let compiled = mask.map(MaskOptions::compile).transpose()?;
        self.lock().rules.mask = compiled;
        Ok(())
    }

    /// Sensitivity only ever goes from off to on.
    pub fn set_sensitive(&self, sensitive: bool) -> Result<(), SdkError> {
        let mut inner = self.lock();
        if inner.rules.sensitive && !sensitive {
            return Err(SdkError::SensitivityDowngrade(self.field_name.clone()));
        }
        inner.rules.sensitive = sensitive || inner.rules.sensitive;
        Ok(())
    }

    #[must_use = "dropping the handle removes the listener"]
    pub fn on<F>(&self, event: FieldEvent, callback: F) -> ListenerHandle
    where
        F: Fn(&FieldNotice) + Send + Sync + 'static,
    {
        self.events.on(event, callback)
    }

    /// Drop every widget listener; a remounted frame starts clean.
    pub fn reset_events(&self) {
        self.events.reset();
    }

    /// Clear the state and every subscription.
    pub fn destroy(&self) {
        {
            let mut inner = self.lock();
            inner.state = FieldState::new("");
            inner.touched = false;
        }
        self.events.reset();
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        debug!("field {} destroyed", self.frame_name);
    }
}
