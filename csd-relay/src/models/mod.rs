//! Data models for csd-relay

pub mod submission;

pub use submission::{
    AttemptOutcome, DisplayFields, ErrorKind, RawPayload, Resolution, SubmissionEvent,
    SubmissionRecord, SubmissionStats, SubmissionStatus,
};
