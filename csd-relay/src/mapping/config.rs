//! Field mapping configuration
//!
//! The mapping is a JSON document listing, in order, how each inbound
//! JotForm field becomes a CSD portal field or a line of the composite
//! notes. It is validated completely at load time: a configuration that
//! loads is one the mapper can apply without further checks.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use super::transform::Transform;

/// Target sentinel: append to the shared notes buffer instead of a field
pub const COMPOSITE_NOTES: &str = "COMPOSITE_NOTES";

/// Placeholder the notes template must contain
pub const NOTES_CONTENT_PLACEHOLDER: &str = "{notes_content}";

/// Template applied when the document does not name one
pub const DEFAULT_NOTES_TEMPLATE: &str = "=== SUBMISSION DETAILS ===\n{notes_content}";

/// Separator between notes fragments when the document does not name one
pub const DEFAULT_NOTES_SEPARATOR: &str = "\n";

/// Target fields with this prefix have not been mapped to a portal control yet
const PLACEHOLDER_PREFIX: &str = "PLACEHOLDER";

/// Mapping configuration errors (fatal at load, never degraded silently)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read mapping file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed mapping JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Rule #{rule} ({source_field}): unknown target_type '{value}'")]
    UnknownTargetType {
        rule: usize,
        source_field: String,
        value: String,
    },

    #[error("Rule #{rule} ({source_field}): unknown transform '{value}'")]
    UnknownTransform {
        rule: usize,
        source_field: String,
        value: String,
    },

    #[error("Target field '{target_field}' is written by both rule #{first} and rule #{second}")]
    DuplicateTarget {
        target_field: String,
        first: usize,
        second: usize,
    },

    #[error("Rule #{rule} ({source_field}): {message}")]
    InvalidRule {
        rule: usize,
        source_field: String,
        message: String,
    },

    #[error("Invalid mapping document: {0}")]
    InvalidDocument(String),
}

/// Destination control kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Text,
    Select,
    Radio,
    Composite,
    File,
}

impl FromStr for TargetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(TargetType::Text),
            "select" => Ok(TargetType::Select),
            "radio" => Ok(TargetType::Radio),
            "composite" => Ok(TargetType::Composite),
            "file" => Ok(TargetType::File),
            _ => Err(s.to_string()),
        }
    }
}

/// One piece of a fallback template
#[derive(Debug, Clone, PartialEq, Eq)]
enum FallbackSegment {
    Literal(String),
    Field(String),
}

/// Value used when a rule's source field is empty
///
/// `{name}` placeholders are replaced with the raw payload's value for
/// `name`. If any referenced field is empty the whole fallback resolves to
/// an empty string, so a required rule still fails validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fallback {
    template: String,
    segments: Vec<FallbackSegment>,
}

impl Fallback {
    pub fn parse(template: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner == '{' {
                            return Err(format!("nested '{{' in fallback '{}'", template));
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(format!("unclosed placeholder in fallback '{}'", template));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(format!("empty placeholder in fallback '{}'", template));
                    }
                    if !literal.is_empty() {
                        segments.push(FallbackSegment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(FallbackSegment::Field(name.to_string()));
                }
                '}' => return Err(format!("unmatched '}}' in fallback '{}'", template)),
                other => literal.push(other),
            }
        }

        if !literal.is_empty() {
            segments.push(FallbackSegment::Literal(literal));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resolve against the raw payload
    pub fn resolve(&self, payload: &Map<String, Value>) -> String {
        let mut resolved = String::new();
        for segment in &self.segments {
            match segment {
                FallbackSegment::Literal(text) => resolved.push_str(text),
                FallbackSegment::Field(name) => {
                    let value = super::transform::SourceValue::from_payload(payload, name).render();
                    if value.is_empty() {
                        return String::new();
                    }
                    resolved.push_str(&value);
                }
            }
        }
        resolved.trim().to_string()
    }
}

/// Validated mapping rule
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRule {
    pub source_field: String,
    pub label: String,
    pub target_field: String,
    pub target_type: TargetType,
    pub required: bool,
    pub transform: Transform,
    pub value_mapping: BTreeMap<String, String>,
    pub default_value: Option<String>,
    pub fallback: Option<Fallback>,
}

impl MappingRule {
    /// True when the rule writes to the composite notes buffer
    pub fn targets_notes(&self) -> bool {
        self.target_field == COMPOSITE_NOTES
    }

    /// True when the target has not been wired to a portal control
    pub fn is_placeholder(&self) -> bool {
        self.target_field.starts_with(PLACEHOLDER_PREFIX)
    }
}

/// Payload keys used to fill the denormalized dashboard columns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayFieldNames {
    pub submitter_name: String,
    pub submitter_email: String,
    pub builder_name: String,
    pub plan_name: String,
}

impl Default for DisplayFieldNames {
    fn default() -> Self {
        Self {
            submitter_name: "salesman".to_string(),
            submitter_email: "submitterEmail".to_string(),
            builder_name: "builderName".to_string(),
            plan_name: "planName".to_string(),
        }
    }
}

/// Counts shown on the mapping dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingSummary {
    pub total_fields: usize,
    pub mapped_fields: usize,
    pub unmapped_fields: usize,
    pub required_fields: usize,
    pub file_upload_fields: usize,
    pub notes_fields: usize,
    pub version: String,
    pub last_updated: Option<String>,
}

/// Immutable, validated mapping configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MappingConfiguration {
    pub version: String,
    pub last_updated: Option<String>,
    pub rules: Vec<MappingRule>,
    pub composite_notes_field: Option<String>,
    pub notes_template: String,
    pub notes_separator: String,
    pub display_fields: DisplayFieldNames,
    /// The JSON text this configuration was parsed from
    pub document: String,
}

#[derive(Debug, Deserialize)]
struct RawMappingDocument {
    #[serde(default)]
    version: Option<Value>,
    #[serde(default)]
    last_updated: Option<String>,
    #[serde(default)]
    composite_notes_field: Option<String>,
    #[serde(default)]
    composite_notes_template: Option<String>,
    #[serde(default)]
    notes_separator: Option<String>,
    #[serde(default)]
    display_fields: DisplayFieldNames,
    mappings: Vec<RawMappingRule>,
}

#[derive(Debug, Deserialize)]
struct RawMappingRule {
    #[serde(alias = "jotform_field")]
    source_field: String,
    #[serde(default, alias = "jotform_label")]
    label: Option<String>,
    #[serde(alias = "csd_field")]
    target_field: String,
    #[serde(default, alias = "field_type")]
    target_type: Option<String>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    transform: Option<String>,
    #[serde(default)]
    value_mapping: Option<BTreeMap<String, String>>,
    #[serde(default, alias = "default")]
    default_value: Option<String>,
    #[serde(default)]
    fallback: Option<String>,
}

impl MappingConfiguration {
    /// Load and validate a mapping file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse and validate a mapping document
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawMappingDocument = serde_json::from_str(text)?;

        let notes_template = raw
            .composite_notes_template
            .unwrap_or_else(|| DEFAULT_NOTES_TEMPLATE.to_string());
        if !notes_template.contains(NOTES_CONTENT_PLACEHOLDER) {
            return Err(ConfigError::InvalidDocument(format!(
                "composite_notes_template must contain {}",
                NOTES_CONTENT_PLACEHOLDER
            )));
        }

        let rules = raw
            .mappings
            .into_iter()
            .enumerate()
            .map(|(index, rule)| validate_rule(index + 1, rule))
            .collect::<Result<Vec<_>, _>>()?;

        // Dedicated targets must be unique; COMPOSITE_NOTES may repeat
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for (index, rule) in rules.iter().enumerate() {
            if rule.targets_notes() {
                continue;
            }
            if let Some(first) = seen.insert(rule.target_field.as_str(), index + 1) {
                return Err(ConfigError::DuplicateTarget {
                    target_field: rule.target_field.clone(),
                    first,
                    second: index + 1,
                });
            }
        }

        let composite_notes_field = raw
            .composite_notes_field
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        if let Some(field) = &composite_notes_field {
            if field == COMPOSITE_NOTES || seen.contains_key(field.as_str()) {
                return Err(ConfigError::InvalidDocument(format!(
                    "composite_notes_field '{}' collides with a dedicated target field",
                    field
                )));
            }
        }

        let version = match raw.version {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "unknown".to_string(),
        };

        Ok(Self {
            version,
            last_updated: raw.last_updated,
            rules,
            composite_notes_field,
            notes_template,
            notes_separator: raw
                .notes_separator
                .unwrap_or_else(|| DEFAULT_NOTES_SEPARATOR.to_string()),
            display_fields: raw.display_fields,
            document: text.to_string(),
        })
    }

    /// Summary counts for the dashboard
    pub fn summary(&self) -> MappingSummary {
        let mapped_fields = self.rules.iter().filter(|r| !r.is_placeholder()).count();
        MappingSummary {
            total_fields: self.rules.len(),
            mapped_fields,
            unmapped_fields: self.rules.len() - mapped_fields,
            required_fields: self.rules.iter().filter(|r| r.required).count(),
            file_upload_fields: self
                .rules
                .iter()
                .filter(|r| r.transform == Transform::Attachment)
                .count(),
            notes_fields: self.rules.iter().filter(|r| r.targets_notes()).count(),
            version: self.version.clone(),
            last_updated: self.last_updated.clone(),
        }
    }
}

fn validate_rule(rule: usize, raw: RawMappingRule) -> Result<MappingRule, ConfigError> {
    let source_field = raw.source_field.trim().to_string();
    let invalid = |message: String| ConfigError::InvalidRule {
        rule,
        source_field: source_field.clone(),
        message,
    };

    if source_field.is_empty() {
        return Err(invalid("source_field is empty".to_string()));
    }

    let target_field = raw.target_field.trim().to_string();
    if target_field.is_empty() {
        return Err(invalid("target_field is empty".to_string()));
    }

    let target_type = match raw.target_type.as_deref() {
        None => TargetType::Text,
        Some(value) => value
            .parse::<TargetType>()
            .map_err(|value| ConfigError::UnknownTargetType {
                rule,
                source_field: source_field.clone(),
                value,
            })?,
    };

    let transform = Transform::resolve(raw.transform.as_deref(), target_type).ok_or_else(|| {
        ConfigError::UnknownTransform {
            rule,
            source_field: source_field.clone(),
            value: raw.transform.clone().unwrap_or_default(),
        }
    })?;

    if transform.writes_notes_only() && target_field != COMPOSITE_NOTES {
        return Err(invalid(format!(
            "transform '{}' must target {}",
            transform.identifier(),
            COMPOSITE_NOTES
        )));
    }

    let value_mapping = raw.value_mapping.unwrap_or_default();
    if transform == Transform::ValueMap && value_mapping.is_empty() {
        return Err(invalid("value_map transform requires a non-empty value_mapping".to_string()));
    }

    let fallback = raw
        .fallback
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(Fallback::parse)
        .transpose()
        .map_err(invalid)?;

    let label = raw
        .label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| source_field.clone());

    Ok(MappingRule {
        source_field,
        label,
        target_field,
        target_type,
        required: raw.required,
        transform,
        value_mapping,
        default_value: raw.default_value,
        fallback,
    })
}
