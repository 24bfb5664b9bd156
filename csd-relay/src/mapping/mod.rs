//! Field mapping: configuration, value transforms, and the payload mapper

pub mod config;
pub mod mapper;
pub mod store;
pub mod transform;

pub use config::{
    ConfigError, DisplayFieldNames, MappingConfiguration, MappingRule, MappingSummary, TargetType,
    COMPOSITE_NOTES,
};
pub use mapper::{map, TargetPayload, ValidationError, ValidationReport};
pub use store::MappingStore;
pub use transform::{format_phone, Application, SourceValue, TargetContribution, Transform};
