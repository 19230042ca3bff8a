use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;

use crate::recurrence::Frequency;

// ============================================================================
// Calendar Entry Models
// ============================================================================

/// A stored calendar entry: either a single occurrence or the parent row of a
/// recurring series.
///
/// For a series, `start_time_utc`/`end_time_utc` describe the first occurrence
/// and fix the duration of every later one. `recurrence_pattern` is derived
/// from `frequency`, `start_time_utc` and `recurrence_ends_utc` when the row is
/// written and is never recomputed.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEntry {
    pub id: String,
    pub event_id: String,
    pub creator_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub all_day: bool,
    pub recurring: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_pattern: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /entries`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCalendarEntry {
    pub event_id: String,
    pub creator_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub all_day: bool,
    pub recurring: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    /// Kept as text so an unknown value surfaces as an unsupported frequency
    /// rather than a generic body rejection.
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
    /// Only accepted so it can be rejected explicitly; the pattern is always derived.
    #[serde(default)]
    pub recurrence_pattern: Option<String>,
}

/// Body of `PATCH /entries/:id`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCalendarEntry {
    pub title: Option<String>,
    /// `None` when absent, `Some(None)` when sent as `null` (clears it).
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub all_day: Option<bool>,
    pub start_time_utc: Option<DateTime<Utc>>,
    pub end_time_utc: Option<DateTime<Utc>>,
    pub recurring: Option<bool>,
    pub frequency: Option<String>,
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
    pub recurrence_pattern: Option<String>,
}

/// Marks a field as present, so `null` becomes `Some(None)` instead of `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}
