//! Contact field collection and validation
//!
//! The call overlay presents a configurable subset of contact fields.
//! Recognized field names carry a validation pattern; anything else is
//! free text. Submission is gated on every configured field validating,
//! on at least one contact method (email or phone) being present, and on
//! an explicit consent checkbox.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

pub const EMAIL_FIELD: &str = "email_address";
pub const TELEPHONE_FIELD: &str = "telephone";

/// How long the transient "submitted" acknowledgment stays visible.
const SUBMITTED_TTL: Duration = Duration::from_secs(5);

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static TELEPHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9\s\-().]{5,19}$").unwrap());

/// Validation pattern and message for a recognized field name.
fn field_rule(name: &str) -> Option<(&'static Regex, &'static str)> {
    match name {
        EMAIL_FIELD => Some((&EMAIL_RE, "Enter a valid email address")),
        TELEPHONE_FIELD => Some((&TELEPHONE_RE, "Enter a valid phone number")),
        _ => None,
    }
}

/// A field that currently fails its validation pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct FieldCollector {
    configured: Vec<String>,
    values: HashMap<String, String>,
    consent: bool,
    submitted_at: Option<Instant>,
}

impl FieldCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set which named fields are presented, discarding previous input.
    pub fn configure<I, S>(&mut self, field_names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.configured = field_names.into_iter().map(Into::into).collect();
        self.values.clear();
        self.consent = false;
        self.submitted_at = None;
    }

    pub fn configured_fields(&self) -> &[String] {
        &self.configured
    }

    /// Record a keystroke-level update for a presented field.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) {
        if !self.configured.iter().any(|f| f == name) {
            tracing::debug!(field = name, "ignoring value for unconfigured field");
            return;
        }
        self.values.insert(name.to_string(), value.into());
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set_consent(&mut self, consent: bool) {
        self.consent = consent;
    }

    /// True when at least one of email/telephone holds a non-empty value.
    pub fn has_contact_method(&self) -> bool {
        [EMAIL_FIELD, TELEPHONE_FIELD]
            .iter()
            .any(|field| self.values.get(*field).is_some_and(|v| !v.is_empty()))
    }

    /// Current validation failure for one field, if any.
    ///
    /// Empty values never fail: optional fields stay optional.
    pub fn field_issue(&self, name: &str) -> Option<FieldIssue> {
        let value = self.values.get(name)?;
        if value.is_empty() {
            return None;
        }
        let (pattern, message) = field_rule(name)?;
        if pattern.is_match(value) {
            return None;
        }
        Some(FieldIssue {
            field: name.to_string(),
            message: message.to_string(),
        })
    }

    /// All current validation failures, in configured field order.
    pub fn validate(&self) -> Vec<FieldIssue> {
        self.configured
            .iter()
            .filter_map(|name| self.field_issue(name))
            .collect()
    }

    /// Whether the submit action is currently permitted.
    pub fn can_submit(&self) -> bool {
        self.validate().is_empty() && self.has_contact_method() && self.consent
    }

    /// Mark the entered data as sent.
    ///
    /// Returns false (and changes nothing) when the gate is not satisfied.
    /// Does not transmit anything itself: transmission happens when the
    /// session bridge reads the snapshot at call end.
    pub fn submit(&mut self) -> bool {
        if !self.can_submit() {
            return false;
        }
        self.submitted_at = Some(Instant::now());
        true
    }

    /// Whether the "submitted" acknowledgment is currently showing.
    pub fn submitted(&mut self) -> bool {
        if let Some(at) = self.submitted_at
            && at.elapsed() >= SUBMITTED_TTL
        {
            self.submitted_at = None;
        }
        self.submitted_at.is_some()
    }

    /// Snapshot of the non-empty entered values.
    ///
    /// Callable at any time; the bridge reads it on call end whether or
    /// not the user explicitly submitted.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// Discard all per-call input for the next call.
    pub fn clear(&mut self) {
        self.values.clear();
        self.consent = false;
        self.submitted_at = None;
    }
}
