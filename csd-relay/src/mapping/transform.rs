//! Value transforms
//!
//! Every transform identifier in a mapping document resolves to a variant of
//! [`Transform`] at load time. Applying a transform is a pure function of the
//! source value and the rule; it never reads global state.

use serde_json::{Map, Value};

use super::config::{MappingRule, TargetType};

/// Mapped value that sends the original value to the notes buffer
const NOTES_SENTINELS: [&str; 2] = ["NOTES", "COMPOSITE_NOTES"];

/// Separator for multi-valued answers
pub const LIST_SEPARATOR: &str = ", ";

/// Closed set of value transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    CopyThrough,
    ValueMap,
    NotesAppend,
    MultiSelectAppend,
    FormatPhone,
    Attachment,
}

/// Identifier table accepted in mapping documents
const IDENTIFIERS: &[(&str, Transform)] = &[
    ("copy", Transform::CopyThrough),
    ("copy_through", Transform::CopyThrough),
    ("value_map", Transform::ValueMap),
    ("map_value", Transform::ValueMap),
    ("map_roof_type", Transform::ValueMap),
    ("map_manufacturer", Transform::ValueMap),
    ("append_to_notes", Transform::NotesAppend),
    ("notes_append", Transform::NotesAppend),
    ("multi_select_append", Transform::MultiSelectAppend),
    ("append_multi_select", Transform::MultiSelectAppend),
    ("format_phone", Transform::FormatPhone),
    ("upload_file", Transform::Attachment),
];

impl Transform {
    /// Resolve a document identifier; `None` for an unknown identifier
    ///
    /// An absent identifier is copy-through, except on `file` targets where
    /// it is an attachment.
    pub fn resolve(identifier: Option<&str>, target_type: TargetType) -> Option<Self> {
        let identifier = identifier.map(str::trim).filter(|s| !s.is_empty());
        match identifier {
            None if target_type == TargetType::File => Some(Transform::Attachment),
            None => Some(Transform::CopyThrough),
            Some(id) => IDENTIFIERS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(id))
                .map(|(_, transform)| *transform),
        }
    }

    /// Canonical identifier, for messages
    pub fn identifier(&self) -> &'static str {
        match self {
            Transform::CopyThrough => "copy_through",
            Transform::ValueMap => "value_map",
            Transform::NotesAppend => "append_to_notes",
            Transform::MultiSelectAppend => "multi_select_append",
            Transform::FormatPhone => "format_phone",
            Transform::Attachment => "upload_file",
        }
    }

    /// Transforms whose only possible output is a notes fragment
    pub fn writes_notes_only(&self) -> bool {
        matches!(self, Transform::NotesAppend | Transform::MultiSelectAppend)
    }

    /// Apply to one source value
    pub fn apply(&self, value: &SourceValue, rule: &MappingRule) -> Application {
        if value.is_empty() {
            return Application::nothing();
        }

        match self {
            Transform::CopyThrough => Application::routed(rule, value.render()),
            Transform::FormatPhone => Application::routed(rule, format_phone(&value.render())),
            Transform::NotesAppend | Transform::MultiSelectAppend => {
                Application::notes(rule, &value.render())
            }
            Transform::ValueMap => apply_value_map(&value.render(), rule),
            Transform::Attachment => Application {
                contribution: TargetContribution::Nothing,
                warning: Some(format!(
                    "Attachment '{}' skipped: file transfer is not supported",
                    rule.source_field
                )),
            },
        }
    }
}

fn apply_value_map(raw: &str, rule: &MappingRule) -> Application {
    let (mapped, warning) = match rule.value_mapping.get(raw) {
        Some(mapped) => (mapped.clone(), None),
        None => match &rule.default_value {
            Some(default) => (default.clone(), None),
            None => (
                raw.to_string(),
                Some(format!(
                    "No value mapping for '{}' in {}; value passed through",
                    raw, rule.source_field
                )),
            ),
        },
    };

    let mut application = if NOTES_SENTINELS.contains(&mapped.as_str()) {
        Application::notes(rule, raw)
    } else {
        Application::routed(rule, mapped)
    };
    application.warning = warning;
    application
}

/// Normalize a North American phone number to `(XXX)-XXX-XXXX`
///
/// Ten digits are formatted directly; eleven digits with a leading `1` drop
/// the country code. Anything else is returned unchanged.
pub fn format_phone(input: &str) -> String {
    let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => return input.trim().to_string(),
    };
    format!("({})-{}-{}", &national[..3], &national[3..6], &national[6..])
}

/// Inbound value for one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceValue {
    Missing,
    Text(String),
    List(Vec<String>),
}

impl SourceValue {
    /// Look up `key` in the raw payload
    pub fn from_payload(payload: &Map<String, Value>, key: &str) -> Self {
        payload.get(key).map(Self::from_json).unwrap_or(SourceValue::Missing)
    }

    /// Convert a JSON value
    ///
    /// Objects are compound answers (name, address, phone parts): their
    /// non-empty leaves are joined with a space, in map order.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SourceValue::Missing,
            Value::Array(items) => {
                let items: Vec<String> = items
                    .iter()
                    .map(render_scalar_or_compound)
                    .filter(|s| !s.is_empty())
                    .collect();
                if items.is_empty() {
                    SourceValue::Missing
                } else {
                    SourceValue::List(items)
                }
            }
            other => {
                let text = render_scalar_or_compound(other);
                if text.is_empty() {
                    SourceValue::Missing
                } else {
                    SourceValue::Text(text)
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SourceValue::Missing => true,
            SourceValue::Text(text) => text.is_empty(),
            SourceValue::List(items) => items.is_empty(),
        }
    }

    /// Render as a single string; lists are joined with `", "`
    pub fn render(&self) -> String {
        match self {
            SourceValue::Missing => String::new(),
            SourceValue::Text(text) => text.clone(),
            SourceValue::List(items) => items.join(LIST_SEPARATOR),
        }
    }
}

fn render_scalar_or_compound(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .map(render_scalar_or_compound)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(LIST_SEPARATOR),
        Value::Object(map) => map
            .values()
            .map(render_scalar_or_compound)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Where a transformed value goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetContribution {
    Field { target_field: String, value: String },
    Notes(String),
    Nothing,
}

impl TargetContribution {
    pub fn is_empty(&self) -> bool {
        match self {
            TargetContribution::Field { value, .. } => value.trim().is_empty(),
            TargetContribution::Notes(fragment) => fragment.trim().is_empty(),
            TargetContribution::Nothing => true,
        }
    }
}

/// Result of applying one rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    pub contribution: TargetContribution,
    pub warning: Option<String>,
}

impl Application {
    fn nothing() -> Self {
        Self {
            contribution: TargetContribution::Nothing,
            warning: None,
        }
    }

    fn notes(rule: &MappingRule, value: &str) -> Self {
        Self {
            contribution: TargetContribution::Notes(format!("{}: {}", rule.label, value)),
            warning: None,
        }
    }

    /// Dedicated field, or a notes fragment for rules aimed at the notes buffer
    fn routed(rule: &MappingRule, value: String) -> Self {
        if rule.targets_notes() {
            return Self::notes(rule, &value);
        }
        Self {
            contribution: TargetContribution::Field {
                target_field: rule.target_field.clone(),
                value,
            },
            warning: None,
        }
    }
}
