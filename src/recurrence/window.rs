//! Query windows and candidate selection.
//!
//! Selection is expressed as a small set of [`Predicate`]s so the same rule can
//! be evaluated against rows in memory and pushed down into SQL by the store.

use chrono::{DateTime, Duration, NaiveDate, Utc};

use super::error::RecurrenceError;
use crate::db::models::CalendarEntry;

/// Inclusive `[start, end]` range of UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl QueryWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, RecurrenceError> {
        if end < start {
            return Err(RecurrenceError::window_reversed(start, end));
        }
        Ok(Self { start, end })
    }

    /// Parse raw query-string bounds.
    ///
    /// Each bound is either RFC 3339 or a bare `YYYY-MM-DD`, which means
    /// midnight UTC of that day.
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, RecurrenceError> {
        let start = parse_bound("start", start)?;
        let end = parse_bound("end", end)?;
        Self::new(start, end)
    }

    /// Reject windows longer than `max_days` (0 disables the cap).
    pub fn ensure_max_span(self, max_days: u32) -> Result<Self, RecurrenceError> {
        if max_days > 0 && self.end - self.start > Duration::days(i64::from(max_days)) {
            return Err(RecurrenceError::InvalidWindow(format!(
                "window spans more than {} days",
                max_days
            )));
        }
        Ok(self)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<DateTime<Utc>, RecurrenceError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RecurrenceError::InvalidWindow(format!("missing '{}'", name)))?;

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            RecurrenceError::InvalidWindow(format!("'{}' is not an ISO 8601 date: {}", name, raw))
        })
}

/// Stored column a predicate compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    StartTimeUtc,
    EndTimeUtc,
    RecurrenceEndsUtc,
}

impl Column {
    pub fn as_sql(self) -> &'static str {
        match self {
            Column::StartTimeUtc => "start_time_utc",
            Column::EndTimeUtc => "end_time_utc",
            Column::RecurrenceEndsUtc => "recurrence_ends_utc",
        }
    }

    fn value(self, entry: &CalendarEntry) -> Option<DateTime<Utc>> {
        match self {
            Column::StartTimeUtc => Some(entry.start_time_utc),
            Column::EndTimeUtc => Some(entry.end_time_utc),
            Column::RecurrenceEndsUtc => entry.recurrence_ends_utc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    AtLeast,
    AtMost,
}

impl Comparison {
    pub fn as_sql(self) -> &'static str {
        match self {
            Comparison::AtLeast => ">=",
            Comparison::AtMost => "<=",
        }
    }
}

/// `column <op> bound`, e.g. `start_time_utc <= window.end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Predicate {
    pub column: Column,
    pub comparison: Comparison,
    pub bound: DateTime<Utc>,
}

impl Predicate {
    fn new(column: Column, comparison: Comparison, bound: DateTime<Utc>) -> Self {
        Self {
            column,
            comparison,
            bound,
        }
    }

    /// A missing column value (NULL in the store) never matches.
    pub fn matches(&self, entry: &CalendarEntry) -> bool {
        match self.column.value(entry) {
            Some(value) => match self.comparison {
                Comparison::AtLeast => value >= self.bound,
                Comparison::AtMost => value <= self.bound,
            },
            None => false,
        }
    }
}

/// How an entry's stored interval must relate to the query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// The interval lies entirely inside the window.
    Containment,
    /// The interval intersects the window (`s <= end AND e >= start`).
    Overlap,
}

impl SelectionPolicy {
    fn predicates(self, interval_end: Column, window: &QueryWindow) -> Vec<Predicate> {
        match self {
            SelectionPolicy::Containment => vec![
                Predicate::new(Column::StartTimeUtc, Comparison::AtLeast, window.start),
                Predicate::new(interval_end, Comparison::AtMost, window.end),
            ],
            SelectionPolicy::Overlap => vec![
                Predicate::new(Column::StartTimeUtc, Comparison::AtMost, window.end),
                Predicate::new(interval_end, Comparison::AtLeast, window.start),
            ],
        }
    }
}

/// Candidate selection for read-by-window queries.
///
/// Single entries are matched on `[start_time_utc, end_time_utc]` and series on
/// `[start_time_utc, recurrence_ends_utc]`, each under its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowClassifier {
    pub non_recurring: SelectionPolicy,
    pub recurring: SelectionPolicy,
}

impl Default for WindowClassifier {
    fn default() -> Self {
        // Single entries use containment and series use overlap. The two are
        // inconsistent; change `non_recurring` here if that gets resolved.
        Self {
            non_recurring: SelectionPolicy::Containment,
            recurring: SelectionPolicy::Overlap,
        }
    }
}

impl WindowClassifier {
    pub fn non_recurring_predicates(&self, window: &QueryWindow) -> Vec<Predicate> {
        self.non_recurring.predicates(Column::EndTimeUtc, window)
    }

    pub fn recurring_predicates(&self, window: &QueryWindow) -> Vec<Predicate> {
        self.recurring.predicates(Column::RecurrenceEndsUtc, window)
    }

    pub fn predicates_for(&self, recurring: bool, window: &QueryWindow) -> Vec<Predicate> {
        if recurring {
            self.recurring_predicates(window)
        } else {
            self.non_recurring_predicates(window)
        }
    }

    pub fn is_candidate(&self, entry: &CalendarEntry, window: &QueryWindow) -> bool {
        self.predicates_for(entry.recurring, window)
            .iter()
            .all(|p| p.matches(entry))
    }

    /// Split entries into `(non_recurring, recurring)` candidates, dropping the rest.
    pub fn classify<'a>(
        &self,
        entries: &'a [CalendarEntry],
        window: &QueryWindow,
    ) -> (Vec<&'a CalendarEntry>, Vec<&'a CalendarEntry>) {
        entries
            .iter()
            .filter(|entry| self.is_candidate(entry, window))
            .partition(|entry| !entry.recurring)
    }
}
