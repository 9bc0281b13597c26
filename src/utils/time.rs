//! Location-timezone helpers.
//!
//! The ledger stores absolute instants in UTC. Every conversion between a
//! location's calendar day and that absolute timeline goes through here, so
//! that the location's IANA zone (never the server's local zone) decides
//! where a day starts.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};

/// Parse an IANA timezone identifier such as `America/Toronto`.
pub fn parse_timezone(name: &str) -> AppResult<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| AppError::BadRequest(format!("Unknown timezone: {}", name)))
}

/// Local midnight of `date` in `tz`, as a UTC instant.
///
/// When midnight does not exist (DST gap), the first valid local instant of
/// the day is used instead. On an ambiguous midnight the earlier one wins.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let mut naive = date.and_time(NaiveTime::MIN);
    for _ in 0..(24 * 4) {
        if let Some(dt) = naive.and_local_timezone(tz).earliest() {
            return dt.with_timezone(&Utc);
        }
        naive = naive + Duration::minutes(15);
    }
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Half-open `[start, end)` window of a local calendar day.
pub fn local_day_bounds(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_midnight(date, tz);
    let end = match date.succ_opt() {
        Some(next) => local_midnight(next, tz),
        None => start + Duration::days(1),
    };
    (start, end)
}

/// Calendar date at `now` in `tz`.
pub fn local_today(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

/// The day before `local_today`, as seen from the location.
pub fn local_yesterday(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    let today = local_today(tz, now);
    today.pred_opt().unwrap_or(today)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn rejects_unknown_zone() {
        assert!(parse_timezone("America/Toronto").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus_Mons"),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn west_of_utc_day_window() {
        let tz = parse_timezone("America/New_York").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let (start, end) = local_day_bounds(date, tz);
        assert_eq!(start, utc(2024, 1, 14, 5, 0));
        assert_eq!(end, utc(2024, 1, 15, 5, 0));

        // 23:30 local on the 14th
        let late = utc(2024, 1, 15, 4, 30);
        assert!(late >= start && late < end);
    }

    #[test]
    fn spring_forward_day_is_shorter() {
        let tz = parse_timezone("America/New_York").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let (start, end) = local_day_bounds(date, tz);
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn midnight_in_dst_gap_moves_to_first_valid_instant() {
        // Chile springs forward at local midnight
        let tz = parse_timezone("America/Santiago").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();
        assert_eq!(local_midnight(date, tz), utc(2024, 9, 8, 4, 0));
    }

    #[test]
    fn yesterday_depends_on_zone() {
        // 03:00 UTC on the 15th: still the 14th in Toronto, already the 15th in Tokyo
        let now = utc(2024, 1, 15, 3, 0);
        let toronto = parse_timezone("America/Toronto").unwrap();
        let tokyo = parse_timezone("Asia/Tokyo").unwrap();
        assert_eq!(
            local_yesterday(toronto, now),
            NaiveDate::from_ymd_opt(2024, 1, 13).unwrap()
        );
        assert_eq!(
            local_yesterday(tokyo, now),
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()
        );
    }
}
