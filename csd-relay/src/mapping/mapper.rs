//! Payload mapper
//!
//! Applies a [`MappingConfiguration`] to a raw inbound payload. Rules are
//! folded in configuration order; notes fragments collect in the fold's
//! accumulator and are flushed exactly once after the last rule.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use super::config::{MappingConfiguration, MappingRule, NOTES_CONTENT_PLACEHOLDER};
use super::transform::{SourceValue, TargetContribution, Transform};

/// Outbound form data for the portal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetPayload {
    /// Dedicated target fields (including the notes field when configured)
    pub fields: BTreeMap<String, String>,
    /// Assembled composite notes, if any rule contributed
    pub notes: Option<String>,
}

/// A required rule that resolved to nothing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub source_field: String,
    pub target_field: String,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.message, self.source_field, self.target_field)
    }
}

/// Hard errors and soft warnings from one mapping run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All error messages on one line, for `last_error`
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Default)]
struct Accumulator {
    fields: BTreeMap<String, String>,
    notes: Vec<String>,
    report: ValidationReport,
}

impl Accumulator {
    fn apply_rule(mut self, rule: &MappingRule, raw: &Map<String, Value>) -> Self {
        let mut value = SourceValue::from_payload(raw, &rule.source_field);
        if value.is_empty() {
            if let Some(fallback) = &rule.fallback {
                let resolved = fallback.resolve(raw);
                if !resolved.is_empty() {
                    value = SourceValue::Text(resolved);
                }
            }
        }

        let application = rule.transform.apply(&value, rule);

        // Attachments never contribute, so presence of the upload is what counts
        let satisfied = match rule.transform {
            Transform::Attachment => !value.is_empty(),
            _ => !application.contribution.is_empty(),
        };
        if rule.required && !satisfied {
            self.report.errors.push(ValidationError {
                source_field: rule.source_field.clone(),
                target_field: rule.target_field.clone(),
                message: format!("Required field missing: {}", rule.label),
            });
        }

        if let Some(warning) = application.warning {
            self.report.warnings.push(warning);
        }

        match application.contribution {
            // No portal control exists for a placeholder target yet
            TargetContribution::Field { .. } if rule.is_placeholder() => {}
            TargetContribution::Field { target_field, value } => {
                self.fields.insert(target_field, value);
            }
            TargetContribution::Notes(fragment) => self.notes.push(fragment),
            TargetContribution::Nothing => {}
        }

        self
    }

    fn finish(mut self, config: &MappingConfiguration) -> (TargetPayload, ValidationReport) {
        let notes = if self.notes.is_empty() {
            None
        } else {
            let content = self.notes.join(&config.notes_separator);
            let rendered = config
                .notes_template
                .replace(NOTES_CONTENT_PLACEHOLDER, &content);

            match &config.composite_notes_field {
                Some(field) => {
                    self.fields.insert(field.clone(), rendered.clone());
                }
                None => self.report.warnings.push(
                    "Composite notes assembled but no composite_notes_field is configured; notes were not posted"
                        .to_string(),
                ),
            }
            Some(rendered)
        };

        (
            TargetPayload {
                fields: self.fields,
                notes,
            },
            self.report,
        )
    }
}

/// Map a raw payload to a target payload plus its validation report
///
/// Pure: the same payload and configuration always produce the same output.
/// Every required-field failure is reported; mapping never stops early.
pub fn map(raw: &Map<String, Value>, config: &MappingConfiguration) -> (TargetPayload, ValidationReport) {
    config
        .rules
        .iter()
        .fold(Accumulator::default(), |acc, rule| acc.apply_rule(rule, raw))
        .finish(config)
}
