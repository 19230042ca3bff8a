use chrono::{DateTime, Utc};

/// Faults raised by the recurrence engine.
///
/// All of these are deterministic: retrying the same input yields the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecurrenceError {
    #[error("Unsupported frequency: '{0}' (expected 'monthly' or 'weekly')")]
    UnsupportedFrequency(String),

    #[error("Malformed recurrence rule: {0}")]
    MalformedRule(String),

    #[error("Recurring entry {entry_id} has no usable recurrence rule")]
    MissingOrInvalidRule { entry_id: String },

    #[error("Invalid query window: {0}")]
    InvalidWindow(String),

    #[error("Recurring entry is missing required field '{0}'")]
    MissingField(&'static str),
}

impl RecurrenceError {
    pub(crate) fn window_reversed(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        RecurrenceError::InvalidWindow(format!(
            "end ({}) is before start ({})",
            end.to_rfc3339(),
            start.to_rfc3339()
        ))
    }
}
