use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::CalendarEntry;
use crate::error::{AppError, AppResult};
use crate::recurrence::Predicate;

// ============================================================================
// Calendar Entry Repository
// ============================================================================

const ENTRY_COLUMNS: &str = r#"
    id, event_id, creator_id, title, description, all_day, recurring,
    start_time_utc, end_time_utc, frequency, recurrence_ends_utc,
    recurrence_pattern, created_at, updated_at
"#;

/// Repository for the `calendar_entries` table.
pub struct CalendarEntryRepository;

impl CalendarEntryRepository {
    /// Insert a fully built entry (including its recurrence pattern, if any) in one statement.
    pub async fn insert(pool: &SqlitePool, entry: &CalendarEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO calendar_entries (
                id, event_id, creator_id, title, description, all_day, recurring,
                start_time_utc, end_time_utc, frequency, recurrence_ends_utc,
                recurrence_pattern, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.event_id)
        .bind(&entry.creator_id)
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.all_day)
        .bind(entry.recurring)
        .bind(entry.start_time_utc)
        .bind(entry.end_time_utc)
        .bind(entry.frequency)
        .bind(entry.recurrence_ends_utc)
        .bind(&entry.recurrence_pattern)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> AppResult<Option<CalendarEntry>> {
        sqlx::query_as::<_, CalendarEntry>(&format!(
            "SELECT {} FROM calendar_entries WHERE id = ?",
            ENTRY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Entries with the given `recurring` flag that satisfy every predicate,
    /// ordered by start time.
    pub async fn find_matching(
        pool: &SqlitePool,
        recurring: bool,
        predicates: &[Predicate],
    ) -> AppResult<Vec<CalendarEntry>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM calendar_entries WHERE recurring = ",
            ENTRY_COLUMNS
        ));
        query.push_bind(recurring);

        for predicate in predicates {
            query
                .push(" AND ")
                .push(predicate.column.as_sql())
                .push(" ")
                .push(predicate.comparison.as_sql())
                .push(" ")
                .push_bind(predicate.bound);
        }
        query.push(" ORDER BY start_time_utc, id");

        query
            .build_query_as::<CalendarEntry>()
            .fetch_all(pool)
            .await
            .map_err(AppError::Database)
    }

    /// Series rows that were stored without their derived pattern.
    pub async fn find_recurring_without_pattern(
        pool: &SqlitePool,
    ) -> AppResult<Vec<CalendarEntry>> {
        sqlx::query_as::<_, CalendarEntry>(&format!(
            "SELECT {} FROM calendar_entries WHERE recurring = 1 AND recurrence_pattern IS NULL",
            ENTRY_COLUMNS
        ))
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }

    /// Attach a pattern to a series row that has none. Returns `false` when
    /// the row is gone or already carries a pattern.
    pub async fn set_recurrence_pattern(
        pool: &SqlitePool,
        id: &str,
        pattern: &str,
    ) -> AppResult<bool> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE calendar_entries
            SET recurrence_pattern = ?,
                updated_at = ?
            WHERE id = ? AND recurring = 1 AND recurrence_pattern IS NULL
            "#,
        )
        .bind(pattern)
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist the mutable fields of an entry. Recurrence columns are never
    /// touched here.
    pub async fn update(pool: &SqlitePool, entry: &CalendarEntry) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE calendar_entries
            SET title = ?,
                description = ?,
                all_day = ?,
                start_time_utc = ?,
                end_time_utc = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.all_day)
        .bind(entry.start_time_utc)
        .bind(entry.end_time_utc)
        .bind(entry.updated_at)
        .bind(&entry.id)
        .execute(pool)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }

    /// Delete an entry by id. Returns `false` if nothing was deleted.
    pub async fn delete(pool: &SqlitePool, id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM calendar_entries WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::test_support::{single_entry, weekly_entry};
    use crate::db::test_pool;
    use crate::recurrence::{QueryWindow, WindowClassifier};
    use chrono::{DateTime, Duration, TimeZone};

    fn day(d: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap() + Duration::days(d)
    }

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let pool = test_pool().await;
        let entry = weekly_entry(day(4), day(4) + Duration::hours(1), day(28));

        CalendarEntryRepository::insert(&pool, &entry).await.unwrap();
        let found = CalendarEntryRepository::find_by_id(&pool, &entry.id)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found, entry);
        assert!(CalendarEntryRepository::find_by_id(&pool, "missing")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn window_predicates_agree_with_in_memory_classification() {
        let pool = test_pool().await;
        let entries = vec![
            single_entry(day(3), day(4)),
            single_entry(day(1), day(3)),
            single_entry(day(6), day(7)),
            weekly_entry(day(0), day(0) + Duration::hours(1), day(3)),
            weekly_entry(day(0), day(0) + Duration::hours(1), day(30)),
            weekly_entry(day(4), day(4) + Duration::hours(1), day(30)),
            weekly_entry(day(6), day(6) + Duration::hours(1), day(30)),
            weekly_entry(day(0), day(0) + Duration::hours(1), day(1)),
        ];
        for entry in &entries {
            CalendarEntryRepository::insert(&pool, entry).await.unwrap();
        }

        let classifier = WindowClassifier::default();
        let window = QueryWindow::new(day(2), day(5)).unwrap();
        let (expected_single, expected_series) = classifier.classify(&entries, &window);

        let single = CalendarEntryRepository::find_matching(
            &pool,
            false,
            &classifier.non_recurring_predicates(&window),
        )
        .await
        .unwrap();
        let series = CalendarEntryRepository::find_matching(
            &pool,
            true,
            &classifier.recurring_predicates(&window),
        )
        .await
        .unwrap();

        let ids = |list: &[CalendarEntry]| {
            let mut ids: Vec<String> = list.iter().map(|e| e.id.clone()).collect();
            ids.sort();
            ids
        };
        let expected_ids = |list: &[&CalendarEntry]| {
            let mut ids: Vec<String> = list.iter().map(|e| e.id.clone()).collect();
            ids.sort();
            ids
        };

        assert_eq!(single.len(), 1);
        assert_eq!(series.len(), 3);
        assert_eq!(ids(&single), expected_ids(&expected_single));
        assert_eq!(ids(&series), expected_ids(&expected_series));
    }

    #[tokio::test]
    async fn pattern_backfill_only_touches_rows_without_one() {
        let pool = test_pool().await;
        let mut bare = weekly_entry(day(0), day(0) + Duration::hours(1), day(14));
        let pattern = bare.recurrence_pattern.take().unwrap();
        let complete = weekly_entry(day(0), day(0) + Duration::hours(1), day(14));
        CalendarEntryRepository::insert(&pool, &bare).await.unwrap();
        CalendarEntryRepository::insert(&pool, &complete).await.unwrap();

        let pending = CalendarEntryRepository::find_recurring_without_pattern(&pool)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, bare.id);

        assert!(CalendarEntryRepository::set_recurrence_pattern(&pool, &bare.id, &pattern)
            .await
            .unwrap());
        assert!(!CalendarEntryRepository::set_recurrence_pattern(&pool, &complete.id, "x")
            .await
            .unwrap());

        let patched = CalendarEntryRepository::find_by_id(&pool, &bare.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.recurrence_pattern, Some(pattern));
    }

    #[tokio::test]
    async fn update_and_delete() {
        let pool = test_pool().await;
        let mut entry = single_entry(day(1), day(2));
        CalendarEntryRepository::insert(&pool, &entry).await.unwrap();

        entry.title = "Moved party".to_string();
        entry.start_time_utc = day(3);
        entry.end_time_utc = day(4);
        CalendarEntryRepository::update(&pool, &entry).await.unwrap();

        let stored = CalendarEntryRepository::find_by_id(&pool, &entry.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, "Moved party");
        assert_eq!(stored.start_time_utc, day(3));

        assert!(CalendarEntryRepository::delete(&pool, &entry.id).await.unwrap());
        assert!(!CalendarEntryRepository::delete(&pool, &entry.id).await.unwrap());
    }
}
