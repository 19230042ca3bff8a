use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{CalendarEntry, CreateCalendarEntry, UpdateCalendarEntry};
use crate::db::CalendarEntryRepository;
use crate::error::{AppError, AppResult};
use crate::recurrence::{
    compute_rule, expand_window, Frequency, Occurrence, QueryWindow, RecurrenceError,
    WindowClassifier,
};

/// One element of a read-by-window response: a stored single entry or an
/// expanded occurrence of a series.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum WindowItem {
    Entry(CalendarEntry),
    Occurrence(Occurrence),
}

/// Entry lifecycle: validation, rule derivation on write, and window reads.
///
/// The recurrence pattern of a series is computed before the row is first
/// written, so a created series is never stored without its rule. Updates
/// never recompute it; anything that would change the series shape is
/// rejected instead.
pub struct EntryService;

impl EntryService {
    pub async fn create(pool: &SqlitePool, request: CreateCalendarEntry) -> AppResult<CalendarEntry> {
        let entry = Self::build_entry(request, Utc::now())?;
        CalendarEntryRepository::insert(pool, &entry).await?;

        info!(
            "Created calendar entry {} (recurring: {}, pattern: {})",
            entry.id,
            entry.recurring,
            entry.recurrence_pattern.as_deref().unwrap_or("-")
        );
        Ok(entry)
    }

    /// Validate a create request and build the row to insert, including the
    /// derived recurrence pattern for a series.
    pub fn build_entry(request: CreateCalendarEntry, now: DateTime<Utc>) -> AppResult<CalendarEntry> {
        require_text("eventId", &request.event_id)?;
        require_text("creatorId", &request.creator_id)?;
        require_text("title", &request.title)?;
        if request.recurrence_pattern.is_some() {
            return Err(AppError::Validation(
                "recurrencePattern is derived by the server and cannot be supplied".to_string(),
            ));
        }
        if request.end_time_utc < request.start_time_utc {
            return Err(AppError::Validation(
                "endTimeUtc must not be before startTimeUtc".to_string(),
            ));
        }

        let (frequency, recurrence_ends_utc) = if request.recurring {
            let frequency: Frequency = request
                .frequency
                .as_deref()
                .ok_or(RecurrenceError::MissingField("frequency"))?
                .parse()?;
            let ends = request
                .recurrence_ends_utc
                .ok_or(RecurrenceError::MissingField("recurrenceEndsUtc"))?;
            if ends < request.start_time_utc {
                return Err(AppError::Validation(
                    "recurrenceEndsUtc must not be before startTimeUtc".to_string(),
                ));
            }
            (Some(frequency), Some(ends))
        } else {
            if request.frequency.is_some() || request.recurrence_ends_utc.is_some() {
                return Err(AppError::Validation(
                    "frequency and recurrenceEndsUtc are only allowed on recurring entries"
                        .to_string(),
                ));
            }
            (None, None)
        };

        let mut entry = CalendarEntry {
            id: Uuid::new_v4().to_string(),
            event_id: request.event_id,
            creator_id: request.creator_id,
            title: request.title,
            description: request.description,
            all_day: request.all_day,
            recurring: request.recurring,
            start_time_utc: request.start_time_utc,
            end_time_utc: request.end_time_utc,
            frequency,
            recurrence_ends_utc,
            recurrence_pattern: None,
            created_at: now,
            updated_at: now,
        };
        if entry.recurring {
            entry.recurrence_pattern = Some(compute_rule(&entry)?);
        }
        Ok(entry)
    }

    pub async fn get(pool: &SqlitePool, id: &str) -> AppResult<CalendarEntry> {
        CalendarEntryRepository::find_by_id(pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Calendar entry {} not found", id)))
    }

    pub async fn update(
        pool: &SqlitePool,
        id: &str,
        changes: UpdateCalendarEntry,
    ) -> AppResult<CalendarEntry> {
        let existing = Self::get(pool, id).await?;
        let updated = Self::apply_update(existing, changes, Utc::now())?;
        CalendarEntryRepository::update(pool, &updated).await?;

        info!("Updated calendar entry {}", updated.id);
        Ok(updated)
    }

    /// Merge an update into an entry.
    ///
    /// Recurrence transitions (single <-> series, or a different frequency,
    /// anchor or recurrence end) are not supported and yield
    /// `UnsupportedTransition`. A series may still change its descriptive
    /// fields and its duration. A `null` description clears it.
    pub fn apply_update(
        mut entry: CalendarEntry,
        changes: UpdateCalendarEntry,
        now: DateTime<Utc>,
    ) -> AppResult<CalendarEntry> {
        if changes.recurrence_pattern.is_some() {
            return Err(AppError::Validation(
                "recurrencePattern is derived by the server and cannot be supplied".to_string(),
            ));
        }

        let frequency = changes
            .frequency
            .as_deref()
            .map(str::parse::<Frequency>)
            .transpose()?;
        let transition = changes.recurring.is_some_and(|r| r != entry.recurring)
            || frequency.is_some_and(|f| Some(f) != entry.frequency)
            || changes
                .recurrence_ends_utc
                .is_some_and(|e| Some(e) != entry.recurrence_ends_utc)
            || (entry.recurring
                && changes
                    .start_time_utc
                    .is_some_and(|s| s != entry.start_time_utc));
        if transition {
            return Err(AppError::UnsupportedTransition(
                "Changing recurrence on an existing entry is not supported; delete and recreate it"
                    .to_string(),
            ));
        }

        if let Some(title) = changes.title {
            require_text("title", &title)?;
            entry.title = title;
        }
        if let Some(description) = changes.description {
            entry.description = description;
        }
        if let Some(all_day) = changes.all_day {
            entry.all_day = all_day;
        }
        if let Some(start) = changes.start_time_utc {
            entry.start_time_utc = start;
        }
        if let Some(end) = changes.end_time_utc {
            entry.end_time_utc = end;
        }
        if entry.end_time_utc < entry.start_time_utc {
            return Err(AppError::Validation(
                "endTimeUtc must not be before startTimeUtc".to_string(),
            ));
        }

        entry.updated_at = now;
        Ok(entry)
    }

    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<()> {
        if !CalendarEntryRepository::delete(pool, id).await? {
            return Err(AppError::NotFound(format!("Calendar entry {} not found", id)));
        }
        info!("Deleted calendar entry {}", id);
        Ok(())
    }

    /// Single entries inside the window followed by the occurrences of every
    /// series overlapping it.
    ///
    /// The store narrows the rows with the same predicates the in-memory
    /// classifier applies, so `expand_window` sees only candidates.
    pub async fn list_in_window(
        pool: &SqlitePool,
        window: &QueryWindow,
    ) -> AppResult<Vec<WindowItem>> {
        let classifier = WindowClassifier::default();
        let mut candidates = CalendarEntryRepository::find_matching(
            pool,
            false,
            &classifier.non_recurring_predicates(window),
        )
        .await?;
        candidates.extend(
            CalendarEntryRepository::find_matching(
                pool,
                true,
                &classifier.recurring_predicates(window),
            )
            .await?,
        );

        let (single, occurrences) = expand_window(&candidates, window)?;
        debug!(
            "Window read: {} entries, {} occurrences",
            single.len(),
            occurrences.len()
        );

        Ok(single
            .into_iter()
            .map(WindowItem::Entry)
            .chain(occurrences.into_iter().map(WindowItem::Occurrence))
            .collect())
    }

    /// Attach patterns to series rows stored without one. Rows whose rule
    /// cannot be computed are logged and left as they are.
    pub async fn backfill_missing_patterns(pool: &SqlitePool) -> AppResult<usize> {
        let pending = CalendarEntryRepository::find_recurring_without_pattern(pool).await?;
        let mut patched = 0usize;

        for entry in pending {
            match compute_rule(&entry) {
                Ok(pattern) => {
                    if CalendarEntryRepository::set_recurrence_pattern(pool, &entry.id, &pattern)
                        .await?
                    {
                        patched += 1;
                    }
                }
                Err(e) => warn!(
                    "Cannot derive recurrence pattern for entry {}: {}",
                    entry.id, e
                ),
            }
        }

        if patched > 0 {
            info!("Backfilled recurrence patterns for {} entries", patched);
        }
        Ok(patched)
    }

    /// Insert a handful of sample entries anchored at `now`.
    pub async fn seed_sample_entries(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<CalendarEntry>> {
        let sample = |title: &str, description: &str| CreateCalendarEntry {
            event_id: "634b339218b3b892b312e5ca".to_string(),
            creator_id: "424b339218b3b892b312e5cb".to_string(),
            title: title.to_string(),
            description: Some(description.to_string()),
            all_day: false,
            recurring: false,
            start_time_utc: now,
            end_time_utc: now + Duration::days(1),
            frequency: None,
            recurrence_ends_utc: None,
            recurrence_pattern: None,
        };

        let requests = vec![
            sample("Birthday party", "Let's celebrate Janie!"),
            sample("Dog walk", "Time for Scottie walking"),
            CreateCalendarEntry {
                recurring: true,
                end_time_utc: now + Duration::hours(1),
                frequency: Some(Frequency::Weekly.to_string()),
                recurrence_ends_utc: Some(now + Duration::weeks(8)),
                ..sample("Dog walk", "Time for Scottie walking")
            },
        ];

        let mut created = Vec::with_capacity(requests.len());
        for request in requests {
            let entry = Self::build_entry(request, now)?;
            CalendarEntryRepository::insert(pool, &entry).await?;
            created.push(entry);
        }

        info!("Seeded {} sample calendar entries", created.len());
        Ok(created)
    }
}

fn require_text(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}
