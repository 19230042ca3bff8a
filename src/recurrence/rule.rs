//! Recurrence rule codec.
//!
//! A series is stored as a single canonical line:
//!
//! ```text
//! FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z
//! ```
//!
//! Decoding also accepts the two-line `DTSTART:...` / `RRULE:...` text that
//! older rows were written with, so every stored pattern canonicalizes to the
//! form above.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};

use super::error::RecurrenceError;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Most occurrence starts a single expansion may produce.
pub const MAX_OCCURRENCES: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Frequency {
    Monthly,
    Weekly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Monthly => "monthly",
            Frequency::Weekly => "weekly",
        }
    }

    /// RFC 5545 `FREQ` token.
    pub fn rrule_token(self) -> &'static str {
        match self {
            Frequency::Monthly => "MONTHLY",
            Frequency::Weekly => "WEEKLY",
        }
    }
}

impl FromStr for Frequency {
    type Err = RecurrenceError;

    /// Accepts both the API spelling (`weekly`) and the rule token (`WEEKLY`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" => Ok(Frequency::Monthly),
            "weekly" => Ok(Frequency::Weekly),
            _ => Err(RecurrenceError::UnsupportedFrequency(s.to_string())),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded form of a stored recurrence pattern.
///
/// Instants carry whole-second precision, matching the textual grammar, so
/// `decode(&encode(&rule)) == rule` holds for every constructed rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    frequency: Frequency,
    dtstart: DateTime<Utc>,
    until: DateTime<Utc>,
}

impl RecurrenceRule {
    pub fn new(
        frequency: Frequency,
        dtstart: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Self, RecurrenceError> {
        let dtstart = dtstart.trunc_subsecs(0);
        let until = until.trunc_subsecs(0);
        if until < dtstart {
            return Err(RecurrenceError::MalformedRule(format!(
                "UNTIL {} precedes DTSTART {}",
                until.format(TIMESTAMP_FORMAT),
                dtstart.format(TIMESTAMP_FORMAT)
            )));
        }
        Ok(Self {
            frequency,
            dtstart,
            until,
        })
    }

    /// Ordered occurrence starts inside `[from, to]` (both inclusive).
    ///
    /// Nothing before `DTSTART` or after `UNTIL` is ever returned. A window
    /// holding more than [`MAX_OCCURRENCES`] starts is an error, never a
    /// truncated list.
    pub fn occurrences_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, RecurrenceError> {
        let lower = from.max(self.dtstart);
        let upper = to.min(self.until);
        if lower > upper {
            return Ok(Vec::new());
        }

        let set = self
            .to_rfc5545()
            .parse::<RRuleSet>()
            .map_err(|e| RecurrenceError::MalformedRule(e.to_string()))?;

        // Widen by a second on each side; the exact inclusive clip happens below.
        let tz: rrule::Tz = Utc.into();
        let after = (lower - Duration::seconds(1)).with_timezone(&tz);
        let before = (upper + Duration::seconds(1)).with_timezone(&tz);

        let result = set.after(after).before(before).all(MAX_OCCURRENCES);
        if result.limited {
            tracing::warn!(
                "Occurrence iteration hit its limit for rule {}",
                encode(self)
            );
            return Err(RecurrenceError::InvalidWindow(format!(
                "window yields more than {} occurrences",
                MAX_OCCURRENCES
            )));
        }

        Ok(result
            .dates
            .iter()
            .map(|dt| dt.with_timezone(&Utc))
            .filter(|dt| *dt >= lower && *dt <= upper)
            .collect())
    }

    /// `DTSTART` + `RRULE` lines understood by the `rrule` crate.
    fn to_rfc5545(&self) -> String {
        format!(
            "DTSTART:{}\nRRULE:FREQ={};UNTIL={}",
            self.dtstart.format(TIMESTAMP_FORMAT),
            self.frequency.rrule_token(),
            self.until.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Canonical textual form of a rule.
pub fn encode(rule: &RecurrenceRule) -> String {
    format!(
        "FREQ={};DTSTART={};UNTIL={}",
        rule.frequency.rrule_token(),
        rule.dtstart.format(TIMESTAMP_FORMAT),
        rule.until.format(TIMESTAMP_FORMAT)
    )
}

/// Parse a stored pattern back into a rule.
pub fn decode(pattern: &str) -> Result<RecurrenceRule, RecurrenceError> {
    let trimmed = pattern.trim();
    if trimmed.is_empty() {
        return Err(RecurrenceError::MalformedRule("empty rule".to_string()));
    }

    let mut fields = RuleFields::default();
    if trimmed.contains('\n') || trimmed.contains(':') {
        decode_legacy(trimmed, &mut fields)?;
    } else {
        decode_params(trimmed, &mut fields, &["FREQ", "DTSTART", "UNTIL"])?;
    }
    fields.finish()
}

/// Two-line form: `DTSTART:<ts>` followed by `RRULE:FREQ=..;UNTIL=..`.
fn decode_legacy(text: &str, fields: &mut RuleFields) -> Result<(), RecurrenceError> {
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            RecurrenceError::MalformedRule(format!("expected NAME:VALUE, got '{}'", line))
        })?;
        match name.trim().to_ascii_uppercase().as_str() {
            "DTSTART" => fields.set("DTSTART", value)?,
            "RRULE" => decode_params(value, fields, &["FREQ", "UNTIL"])?,
            other => {
                return Err(RecurrenceError::MalformedRule(format!(
                    "unsupported property '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn decode_params(
    text: &str,
    fields: &mut RuleFields,
    allowed: &[&str],
) -> Result<(), RecurrenceError> {
    for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            RecurrenceError::MalformedRule(format!("expected KEY=VALUE, got '{}'", part))
        })?;
        let key = key.trim().to_ascii_uppercase();
        if !allowed.contains(&key.as_str()) {
            return Err(RecurrenceError::MalformedRule(format!(
                "unsupported key '{}'",
                key
            )));
        }
        fields.set(&key, value)?;
    }
    Ok(())
}

#[derive(Default)]
struct RuleFields {
    frequency: Option<Frequency>,
    dtstart: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

impl RuleFields {
    fn set(&mut self, key: &str, value: &str) -> Result<(), RecurrenceError> {
        let duplicate = match key {
            "FREQ" => {
                let freq = value.parse().map_err(|_| {
                    RecurrenceError::MalformedRule(format!("unknown FREQ '{}'", value.trim()))
                })?;
                self.frequency.replace(freq).is_some()
            }
            "DTSTART" => self.dtstart.replace(parse_timestamp(key, value)?).is_some(),
            "UNTIL" => self.until.replace(parse_timestamp(key, value)?).is_some(),
            _ => unreachable!("keys are filtered before reaching RuleFields"),
        };
        if duplicate {
            return Err(RecurrenceError::MalformedRule(format!(
                "duplicate key '{}'",
                key
            )));
        }
        Ok(())
    }

    fn finish(self) -> Result<RecurrenceRule, RecurrenceError> {
        let missing = |key: &str| RecurrenceError::MalformedRule(format!("missing {}", key));
        let frequency = self.frequency.ok_or_else(|| missing("FREQ"))?;
        let dtstart = self.dtstart.ok_or_else(|| missing("DTSTART"))?;
        let until = self.until.ok_or_else(|| missing("UNTIL"))?;
        RecurrenceRule::new(frequency, dtstart, until)
    }
}

fn parse_timestamp(key: &str, value: &str) -> Result<DateTime<Utc>, RecurrenceError> {
    NaiveDateTime::parse_from_str(&value.trim().to_ascii_uppercase(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            RecurrenceError::MalformedRule(format!("invalid {} '{}': {}", key, value.trim(), e))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn encodes_monthly_rule_canonically() {
        let rule = RecurrenceRule::new(
            Frequency::Monthly,
            utc(2023, 1, 1, 0, 0),
            utc(2024, 1, 1, 0, 0),
        )
        .unwrap();

        assert_eq!(
            encode(&rule),
            "FREQ=MONTHLY;DTSTART=20230101T000000Z;UNTIL=20240101T000000Z"
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let starts = [utc(2023, 1, 5, 14, 48), utc(2020, 2, 29, 23, 59)];
        for freq in [Frequency::Monthly, Frequency::Weekly] {
            for start in starts {
                let rule =
                    RecurrenceRule::new(freq, start, start + Duration::days(400)).unwrap();
                assert_eq!(decode(&encode(&rule)).unwrap(), rule);
            }
        }
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let start = utc(2023, 1, 5, 14, 48) + Duration::milliseconds(250);
        let rule = RecurrenceRule::new(Frequency::Weekly, start, start + Duration::days(7)).unwrap();

        assert_eq!(rule.dtstart, utc(2023, 1, 5, 14, 48));
        assert_eq!(decode(&encode(&rule)).unwrap(), rule);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let canonical = "FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z";
        assert_eq!(encode(&decode(canonical).unwrap()), canonical);

        // Reordered, lower-cased, padded and legacy forms all collapse to the canonical text.
        for variant in [
            "UNTIL=20230129T144800Z;FREQ=WEEKLY;DTSTART=20230105T144800Z",
            "  freq=weekly; dtstart=20230105t144800z; until=20230129T144800Z ",
            "DTSTART:20230105T144800Z\nRRULE:FREQ=WEEKLY;UNTIL=20230129T144800Z",
        ] {
            assert_eq!(encode(&decode(variant).unwrap()), canonical, "{}", variant);
        }
    }

    #[test]
    fn frequency_parsing() {
        assert_eq!("weekly".parse::<Frequency>().unwrap(), Frequency::Weekly);
        assert_eq!("MONTHLY".parse::<Frequency>().unwrap(), Frequency::Monthly);
        assert_eq!(
            "daily".parse::<Frequency>(),
            Err(RecurrenceError::UnsupportedFrequency("daily".to_string()))
        );
    }

    #[test]
    fn unknown_frequency_text_is_unsupported() {
        let err = "yearly".parse::<Frequency>().unwrap_err();
        assert!(matches!(err, RecurrenceError::UnsupportedFrequency(f) if f == "yearly"));
    }

    #[test]
    fn malformed_rules_are_rejected() {
        let cases = [
            "",
            "FREQ=WEEKLY",
            "FREQ=DAILY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z",
            "FREQ=WEEKLY;DTSTART=2023-01-05;UNTIL=20230129T144800Z",
            "FREQ=WEEKLY;DTSTART=20230105T144800;UNTIL=20230129T144800Z",
            "FREQ=WEEKLY;FREQ=MONTHLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z",
            "FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z;BYDAY=MO",
            "FREQ=WEEKLY;DTSTART=20230129T144800Z;UNTIL=20230105T144800Z",
            "FREQ WEEKLY",
            "EXDATE:20230105T144800Z",
        ];
        for case in cases {
            assert!(
                matches!(decode(case), Err(RecurrenceError::MalformedRule(_))),
                "expected MalformedRule for {:?}",
                case
            );
        }
    }

    #[test]
    fn weekly_occurrences_are_clipped_to_window() {
        let rule = decode("FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z").unwrap();
        let starts = rule
            .occurrences_between(utc(2023, 1, 10, 0, 0), utc(2023, 1, 20, 0, 0))
            .unwrap();

        assert_eq!(starts, vec![utc(2023, 1, 12, 14, 48), utc(2023, 1, 19, 14, 48)]);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let rule = decode("FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z").unwrap();
        let starts = rule
            .occurrences_between(utc(2023, 1, 12, 14, 48), utc(2023, 1, 19, 14, 48))
            .unwrap();

        assert_eq!(starts, vec![utc(2023, 1, 12, 14, 48), utc(2023, 1, 19, 14, 48)]);
    }

    #[test]
    fn occurrences_stop_at_until() {
        let rule = decode("FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z").unwrap();
        let starts = rule
            .occurrences_between(utc(2023, 1, 1, 0, 0), utc(2023, 3, 1, 0, 0))
            .unwrap();

        assert_eq!(starts.len(), 4);
        assert_eq!(starts.first(), Some(&utc(2023, 1, 5, 14, 48)));
        assert_eq!(starts.last(), Some(&utc(2023, 1, 26, 14, 48)));
        assert!(starts.iter().all(|s| *s <= rule.until));
    }

    #[test]
    fn monthly_occurrences_keep_day_of_month() {
        let rule = decode("FREQ=MONTHLY;DTSTART=20230115T090000Z;UNTIL=20231231T000000Z").unwrap();
        let starts = rule
            .occurrences_between(utc(2023, 3, 1, 0, 0), utc(2023, 6, 1, 0, 0))
            .unwrap();

        assert_eq!(
            starts,
            vec![
                utc(2023, 3, 15, 9, 0),
                utc(2023, 4, 15, 9, 0),
                utc(2023, 5, 15, 9, 0)
            ]
        );
    }

    #[test]
    fn monthly_series_on_the_31st_skips_short_months() {
        let rule = decode("FREQ=MONTHLY;DTSTART=20230131T120000Z;UNTIL=20230601T000000Z").unwrap();
        let starts = rule
            .occurrences_between(utc(2023, 1, 1, 0, 0), utc(2023, 6, 1, 0, 0))
            .unwrap();

        assert_eq!(
            starts,
            vec![
                utc(2023, 1, 31, 12, 0),
                utc(2023, 3, 31, 12, 0),
                utc(2023, 5, 31, 12, 0)
            ]
        );
    }

    #[test]
    fn window_outside_series_yields_nothing() {
        let rule = decode("FREQ=WEEKLY;DTSTART=20230105T144800Z;UNTIL=20230129T144800Z").unwrap();

        assert!(rule
            .occurrences_between(utc(2022, 1, 1, 0, 0), utc(2022, 12, 31, 0, 0))
            .unwrap()
            .is_empty());
        assert!(rule
            .occurrences_between(utc(2023, 2, 1, 0, 0), utc(2023, 3, 1, 0, 0))
            .unwrap()
            .is_empty());
        // Inside the series but between two occurrences.
        assert!(rule
            .occurrences_between(utc(2023, 1, 6, 0, 0), utc(2023, 1, 11, 0, 0))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn oversized_expansion_is_an_error_not_a_short_list() {
        let rule = RecurrenceRule::new(
            Frequency::Weekly,
            utc(1900, 1, 1, 0, 0),
            utc(3300, 1, 1, 0, 0),
        )
        .unwrap();

        let err = rule
            .occurrences_between(utc(1900, 1, 1, 0, 0), utc(3300, 1, 1, 0, 0))
            .unwrap_err();
        assert!(matches!(err, RecurrenceError::InvalidWindow(_)));

        // The same series over a bounded window still expands.
        let starts = rule
            .occurrences_between(utc(2023, 1, 1, 0, 0), utc(2023, 2, 1, 0, 0))
            .unwrap();
        assert_eq!(starts.len(), 5);
    }

    #[test]
    fn single_instant_series() {
        let start = utc(2023, 1, 5, 14, 48);
        let rule = RecurrenceRule::new(Frequency::Monthly, start, start).unwrap();

        assert_eq!(rule.occurrences_between(start, start).unwrap(), vec![start]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// 2000-01-01T00:00:00Z
        const EPOCH_2000: i64 = 946_684_800;
        const DAY: i64 = 86_400;

        fn instant(secs: i64, nanos: u32) -> DateTime<Utc> {
            Utc.timestamp_opt(EPOCH_2000 + secs, nanos).unwrap()
        }

        fn frequency() -> impl Strategy<Value = Frequency> {
            prop_oneof![Just(Frequency::Weekly), Just(Frequency::Monthly)]
        }

        prop_compose! {
            /// Series anchored anywhere in 2000..2040, possibly off a whole
            /// second, lasting up to ~5 years.
            fn rule()(
                freq in frequency(),
                start in 0i64..40 * 365 * DAY,
                nanos in 0u32..1_000_000_000,
                span in 0i64..5 * 365 * DAY,
            ) -> RecurrenceRule {
                let dtstart = instant(start, nanos);
                RecurrenceRule::new(freq, dtstart, dtstart + Duration::seconds(span)).unwrap()
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(128))]

            #[test]
            fn decode_inverts_encode_for_any_rule(rule in rule()) {
                prop_assert_eq!(rule.dtstart.timestamp_subsec_nanos(), 0);
                prop_assert_eq!(decode(&encode(&rule)).unwrap(), rule);
            }

            #[test]
            fn occurrences_stay_inside_window_and_series(
                rule in rule(),
                from in -DAY * 400..45 * 365 * DAY,
                length in 0i64..400 * DAY,
            ) {
                let from = instant(from, 0);
                let to = from + Duration::seconds(length);
                let starts = rule.occurrences_between(from, to).unwrap();

                for start in &starts {
                    prop_assert!(*start >= from && *start <= to, "{} outside window", start);
                    prop_assert!(*start >= rule.dtstart && *start <= rule.until, "{} outside series", start);
                }
                prop_assert!(starts.windows(2).all(|pair| pair[0] < pair[1]));
            }

            #[test]
            fn full_series_window_starts_at_dtstart(rule in rule()) {
                let starts = rule.occurrences_between(rule.dtstart, rule.until).unwrap();
                prop_assert_eq!(starts.first().copied(), Some(rule.dtstart));
            }
        }
    }
}
