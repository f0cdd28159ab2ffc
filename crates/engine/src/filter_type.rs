//! Date buckets used by the transaction filter and their concrete ranges.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::{EngineError, ResultEngine};

/// An enumerated bucketing of dates, resolved into a `DateRange` relative to
/// "now".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    All,
    Today,
    ThisWeek,
    #[default]
    ThisMonth,
    LastMonth,
    Last30Days,
    ThisYear,
    Custom,
}

impl FilterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::ThisWeek => "this_week",
            Self::ThisMonth => "this_month",
            Self::LastMonth => "last_month",
            Self::Last30Days => "last_30_days",
            Self::ThisYear => "this_year",
            Self::Custom => "custom",
        }
    }
}

impl TryFrom<&str> for FilterType {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" => Ok(Self::All),
            "today" => Ok(Self::Today),
            "this_week" => Ok(Self::ThisWeek),
            "this_month" => Ok(Self::ThisMonth),
            "last_month" => Ok(Self::LastMonth),
            "last_30_days" => Ok(Self::Last30Days),
            "this_year" => Ok(Self::ThisYear),
            "custom" => Ok(Self::Custom),
            other => Err(EngineError::InvalidPreference(format!(
                "invalid filter type: {other}"
            ))),
        }
    }
}

/// Inclusive range of epoch milliseconds, `start <= end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: i64,
    pub end: i64,
}

impl DateRange {
    pub fn new(start: i64, end: i64) -> ResultEngine<Self> {
        if start > end {
            return Err(EngineError::InvalidRange(
                "start must be <= end".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn from_datetimes(start: DateTime<Utc>, end: DateTime<Utc>) -> ResultEngine<Self> {
        Self::new(start.timestamp_millis(), end.timestamp_millis())
    }

    /// Both bounds as UTC datetimes, for querying.
    pub fn bounds(self) -> ResultEngine<(DateTime<Utc>, DateTime<Utc>)> {
        let convert = |ms: i64| {
            DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| {
                EngineError::InvalidRange(format!("timestamp out of range: {ms}"))
            })
        };
        Ok((convert(self.start)?, convert(self.end)?))
    }

}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(i64::from(date.day0()))
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(first_of_month(date) + TimeDelta::days(32)) - TimeDelta::days(1)
}

fn first_of_year(date: NaiveDate) -> NaiveDate {
    date - TimeDelta::days(i64::from(date.ordinal0()))
}

fn last_of_year(date: NaiveDate) -> NaiveDate {
    first_of_year(first_of_year(date) + TimeDelta::days(366)) - TimeDelta::days(1)
}

/// Milliseconds of the first local instant of `date`.
///
/// Usually local midnight. When a DST jump skips midnight the day starts at
/// the first whole hour that exists.
fn start_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let midnight = date.and_time(NaiveTime::MIN);
    (0..24)
        .map(|hour| midnight + TimeDelta::hours(hour))
        .find_map(|local| tz.from_local_datetime(&local).earliest())
        .map_or_else(
            || midnight.and_utc().timestamp_millis(),
            |local| local.timestamp_millis(),
        )
}

/// Last millisecond of `date` in local time.
fn end_of_day<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    date.succ_opt()
        .map_or(i64::MAX, |next| start_of_day(tz, next) - 1)
}

/// Resolves `filter_type` into concrete bounds around `now`, using the time
/// zone of `now` for day boundaries. Weeks start on Monday.
///
/// `custom` is used for `FilterType::Custom`; when it is missing the current
/// month is returned.
pub fn filter_range_at<Tz: TimeZone>(
    filter_type: FilterType,
    now: &DateTime<Tz>,
    custom: Option<DateRange>,
) -> DateRange {
    let tz = now.timezone();
    let today = now.date_naive();
    let (first, last) = match filter_type {
        FilterType::All => {
            return DateRange {
                start: 0,
                end: end_of_day(&tz, today),
            };
        }
        FilterType::Custom => {
            return custom.unwrap_or_else(|| filter_range_at(FilterType::ThisMonth, now, None));
        }
        FilterType::Today => (today, today),
        FilterType::ThisWeek => {
            let monday =
                today - TimeDelta::days(i64::from(today.weekday().num_days_from_monday()));
            (monday, monday + TimeDelta::days(6))
        }
        FilterType::ThisMonth => (first_of_month(today), last_of_month(today)),
        FilterType::LastMonth => {
            let previous = first_of_month(today) - TimeDelta::days(1);
            (first_of_month(previous), previous)
        }
        FilterType::Last30Days => (today - TimeDelta::days(29), today),
        FilterType::ThisYear => (first_of_year(today), last_of_year(today)),
    };
    DateRange {
        start: start_of_day(&tz, first),
        end: end_of_day(&tz, last),
    }
}

#[cfg(test)]
mod tests {
    use chrono_tz::{America::Sao_Paulo, Europe::Rome};

    use super::*;

    fn utc_ms(y: i32, m: u32, d: u32) -> i64 {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0)
            .unwrap()
            .timestamp_millis()
    }

    fn now() -> DateTime<Utc> {
        // Friday.
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn today_covers_the_whole_day() {
        let range = filter_range_at(FilterType::Today, &now(), None);
        assert_eq!(range.start, utc_ms(2024, 3, 15));
        assert_eq!(range.end, utc_ms(2024, 3, 16) - 1);
    }

    #[test]
    fn week_starts_on_monday() {
        let range = filter_range_at(FilterType::ThisWeek, &now(), None);
        assert_eq!(range.start, utc_ms(2024, 3, 11));
        assert_eq!(range.end, utc_ms(2024, 3, 18) - 1);
    }

    #[test]
    fn month_boundaries() {
        let range = filter_range_at(FilterType::ThisMonth, &now(), None);
        assert_eq!(range, DateRange {
            start: utc_ms(2024, 3, 1),
            end: utc_ms(2024, 4, 1) - 1,
        });

        let range = filter_range_at(FilterType::LastMonth, &now(), None);
        assert_eq!(range, DateRange {
            start: utc_ms(2024, 2, 1),
            end: utc_ms(2024, 3, 1) - 1,
        });
    }

    #[test]
    fn last_month_wraps_the_year() {
        let january = Utc.with_ymd_and_hms(2024, 1, 20, 8, 0, 0).unwrap();
        let range = filter_range_at(FilterType::LastMonth, &january, None);
        assert_eq!(range.start, utc_ms(2023, 12, 1));
        assert_eq!(range.end, utc_ms(2024, 1, 1) - 1);
    }

    #[test]
    fn last_30_days_includes_today() {
        let range = filter_range_at(FilterType::Last30Days, &now(), None);
        assert_eq!(range.start, utc_ms(2024, 2, 15));
        assert_eq!(range.end, utc_ms(2024, 3, 16) - 1);
    }

    #[test]
    fn year_boundaries() {
        let range = filter_range_at(FilterType::ThisYear, &now(), None);
        assert_eq!(range.start, utc_ms(2024, 1, 1));
        assert_eq!(range.end, utc_ms(2025, 1, 1) - 1);
    }

    #[test]
    fn custom_falls_back_to_this_month() {
        let custom = DateRange::new(10, 20).unwrap();
        assert_eq!(filter_range_at(FilterType::Custom, &now(), Some(custom)), custom);
        assert_eq!(
            filter_range_at(FilterType::Custom, &now(), None),
            filter_range_at(FilterType::ThisMonth, &now(), None)
        );
    }

    #[test]
    fn skipped_midnight_starts_at_first_local_instant() {
        // Brazil moved clocks from 00:00 to 01:00 on 2018-11-04.
        let local = Utc
            .with_ymd_and_hms(2018, 11, 4, 15, 0, 0)
            .unwrap()
            .with_timezone(&Sao_Paulo);
        let range = filter_range_at(FilterType::Today, &local, None);
        assert_eq!(range.start, utc_ms(2018, 11, 4) + 3 * 3_600_000);
        // The next midnight exists and is UTC-2.
        assert_eq!(range.end, utc_ms(2018, 11, 5) + 2 * 3_600_000 - 1);
    }

    #[test]
    fn boundaries_follow_the_time_zone() {
        let local = now().with_timezone(&Rome);
        let range = filter_range_at(FilterType::ThisMonth, &local, None);
        // Rome is UTC+1 in early March.
        assert_eq!(range.start, utc_ms(2024, 3, 1) - 3_600_000);
        // ...and UTC+2 after the switch on March 31st.
        assert_eq!(range.end, utc_ms(2024, 4, 1) - 2 * 3_600_000 - 1);
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(DateRange::new(5, 1).is_err());
        assert!(DateRange::new(5, 5).is_ok());
    }
}
