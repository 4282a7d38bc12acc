use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Returns the fixed offset from utc for the given historical instant.
/// Since we are dealing with historical data, we need to adjust for daylight savings etc, so it is not good enough to just use the current offset, we need to pass in the historical date and get the offset at that time for the timezone.
pub fn offset_local_from_utc_time(time_zone: &Tz, utc_time: NaiveDateTime) -> FixedOffset {
    let tz_offset = time_zone.offset_from_utc_datetime(&utc_time);
    tz_offset.fix()
}

/// Converts a `DateTime<Utc>` to `DateTime<FixedOffset>` for the given timezone.
/// This accounts for historical timezone changes, including DST.
pub fn time_convert_utc_to_fixed_offset(time_zone: &Tz, utc_datetime: DateTime<Utc>) -> DateTime<FixedOffset> {
    let naive_utc_time = utc_datetime.naive_utc();
    let timezone_aware_datetime = time_zone.from_utc_datetime(&naive_utc_time);
    let fixed_offset = time_zone.offset_from_utc_datetime(&naive_utc_time).fix();
    timezone_aware_datetime.with_timezone(&fixed_offset)
}

/// Converts a local `NaiveDateTime` in the given time zone to `DateTime<Utc>`.
/// Ambiguous local times (the repeated hour of a DST fall-back) resolve to the earlier instant.
pub fn convert_to_utc(naive_date_time: NaiveDateTime, time_zone: Tz) -> DateTime<Utc> {
    match time_zone.from_local_datetime(&naive_date_time).earliest() {
        Some(time) => time.with_timezone(&Utc),
        // non-existent local time inside a DST spring-forward gap, shift an hour
        None => convert_to_utc(naive_date_time + Duration::hours(1), time_zone),
    }
}

/// Midnight of `date` in `time_zone`, expressed in UTC.
pub fn date_start_utc(date: NaiveDate, time_zone: Tz) -> DateTime<Utc> {
    convert_to_utc(date.and_time(chrono::NaiveTime::MIN), time_zone)
}

/// The calendar date of `utc_time` when viewed in `time_zone`.
pub fn local_date_of(utc_time: DateTime<Utc>, time_zone: Tz) -> NaiveDate {
    utc_time.with_timezone(&time_zone).date_naive()
}

/// Rounds a time down to the start of its whole second.
pub fn floor_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// Rounds a time up to the next whole second boundary, times already on a
/// boundary are returned unchanged.
pub fn ceil_to_second(time: DateTime<Utc>) -> DateTime<Utc> {
    let floored = floor_to_second(time);
    if floored == time {
        time
    } else {
        floored + Duration::seconds(1)
    }
}

/// Rounds `time` down to a multiple of `step` counted from the unix epoch.
/// A zero or negative step returns the time unchanged.
pub fn round_down(time: DateTime<Utc>, step: Duration) -> DateTime<Utc> {
    let step_nanos = match step.num_nanoseconds() {
        Some(nanos) if nanos > 0 => nanos,
        _ => return time,
    };
    let time_nanos = match time.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None => return time,
    };
    let remainder = time_nanos.rem_euclid(step_nanos);
    time - Duration::nanoseconds(remainder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    #[test]
    fn round_down_to_minute() {
        let time = Utc.with_ymd_and_hms(2020, 1, 2, 9, 31, 42).unwrap();
        let rounded = round_down(time, Duration::minutes(1));
        assert_eq!(rounded, Utc.with_ymd_and_hms(2020, 1, 2, 9, 31, 0).unwrap());
    }

    #[test]
    fn round_down_on_boundary_is_identity() {
        let time = Utc.with_ymd_and_hms(2020, 1, 2, 9, 31, 0).unwrap();
        assert_eq!(round_down(time, Duration::minutes(1)), time);
    }

    #[test]
    fn ceil_to_second_rounds_up() {
        let time = Utc.with_ymd_and_hms(2020, 1, 2, 9, 31, 42).unwrap() + Duration::milliseconds(250);
        assert_eq!(ceil_to_second(time), Utc.with_ymd_and_hms(2020, 1, 2, 9, 31, 43).unwrap());
    }

    #[test]
    fn new_york_conversion_respects_dst() {
        // January is EST (-5), July is EDT (-4)
        let winter = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap().and_hms_opt(9, 30, 0).unwrap();
        let summer = NaiveDate::from_ymd_opt(2020, 7, 2).unwrap().and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(convert_to_utc(winter, New_York), Utc.with_ymd_and_hms(2020, 1, 2, 14, 30, 0).unwrap());
        assert_eq!(convert_to_utc(summer, New_York), Utc.with_ymd_and_hms(2020, 7, 2, 13, 30, 0).unwrap());
    }
}
