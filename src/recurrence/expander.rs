//! Materialization of recurring entries into concrete occurrences.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::error::RecurrenceError;
use super::rule::{decode, encode, Frequency, RecurrenceRule};
use super::window::{QueryWindow, WindowClassifier};
use crate::db::models::CalendarEntry;

/// One concrete instance of a recurring entry, computed on demand and never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    /// Id of the series this occurrence belongs to.
    pub entry_id: String,
    pub event_id: String,
    pub creator_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub all_day: bool,
    pub recurring: bool,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    pub frequency: Option<Frequency>,
    pub recurrence_ends_utc: Option<DateTime<Utc>>,
}

/// Occurrences of one entry inside a window.
///
/// `iter()` builds occurrences lazily and can be called any number of times.
#[derive(Debug, Clone)]
pub struct Expansion<'a> {
    entry: &'a CalendarEntry,
    starts: Vec<DateTime<Utc>>,
    duration: Duration,
}

impl<'a> Expansion<'a> {
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Occurrence> + '_ {
        self.starts.iter().map(move |start| Occurrence {
            entry_id: self.entry.id.clone(),
            event_id: self.entry.event_id.clone(),
            creator_id: self.entry.creator_id.clone(),
            title: self.entry.title.clone(),
            description: self.entry.description.clone(),
            all_day: self.entry.all_day,
            recurring: true,
            start_time_utc: *start,
            end_time_utc: *start + self.duration,
            frequency: self.entry.frequency,
            recurrence_ends_utc: self.entry.recurrence_ends_utc,
        })
    }
}

/// Expand a recurring entry into the occurrences whose start lies in `window`.
///
/// A series row without a decodable pattern is a data-integrity fault and is
/// reported as such, never treated as a single entry.
pub fn expand_entry<'a>(
    entry: &'a CalendarEntry,
    window: &QueryWindow,
) -> Result<Expansion<'a>, RecurrenceError> {
    let missing = || RecurrenceError::MissingOrInvalidRule {
        entry_id: entry.id.clone(),
    };

    if !entry.recurring {
        return Err(missing());
    }
    let rule = entry
        .recurrence_pattern
        .as_deref()
        .ok_or_else(|| missing())
        .and_then(|pattern| {
            decode(pattern).map_err(|e| {
                tracing::warn!("Stored pattern of entry {} is unusable: {}", entry.id, e);
                missing()
            })
        })?;

    let starts = rule.occurrences_between(window.start(), window.end())?;

    Ok(Expansion {
        entry,
        starts,
        duration: entry.end_time_utc - entry.start_time_utc,
    })
}

/// Canonical pattern for a recurring entry, from its frequency, start and
/// recurrence end.
pub fn compute_rule(entry: &CalendarEntry) -> Result<String, RecurrenceError> {
    let frequency = entry
        .frequency
        .ok_or(RecurrenceError::MissingField("frequency"))?;
    let until = entry
        .recurrence_ends_utc
        .ok_or(RecurrenceError::MissingField("recurrenceEndsUtc"))?;
    let rule = RecurrenceRule::new(frequency, entry.start_time_utc, until)?;
    Ok(encode(&rule))
}

/// Select the entries relevant to `window` and expand the recurring ones.
///
/// Returns the matching single entries as stored plus every occurrence of
/// every candidate series.
pub fn expand_window(
    entries: &[CalendarEntry],
    window: &QueryWindow,
) -> Result<(Vec<CalendarEntry>, Vec<Occurrence>), RecurrenceError> {
    expand_window_with(&WindowClassifier::default(), entries, window)
}

pub fn expand_window_with(
    classifier: &WindowClassifier,
    entries: &[CalendarEntry],
    window: &QueryWindow,
) -> Result<(Vec<CalendarEntry>, Vec<Occurrence>), RecurrenceError> {
    let (single, series) = classifier.classify(entries, window);

    let mut occurrences = Vec::new();
    for entry in series {
        let expansion = expand_entry(entry, window)?;
        if !expansion.is_empty() {
            tracing::debug!(
                "Expanded series {} into {} occurrences",
                entry.id,
                expansion.len()
            );
        }
        occurrences.extend(expansion.iter());
    }

    Ok((single.into_iter().cloned().collect(), occurrences))
}
