//! The single time abstraction shared by both cores.
//!
//! A [`Stamp`] is an instant counted in 100-nanosecond ticks from the Unix
//! epoch; an [`Elapsed`] is a span in the same unit. Zoned views, field
//! access and calendar arithmetic go through a [`DateTimeContext`], which
//! holds the active time zone.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike,
    Utc,
};
use chrono_tz::Tz;

/// Ticks per second (100 ns resolution).
pub const TICKS_PER_SECOND: i64 = 10_000_000;
/// Ticks per millisecond.
pub const TICKS_PER_MILLI: i64 = 10_000;
/// Ticks per day.
pub const TICKS_PER_DAY: i64 = 86_400 * TICKS_PER_SECOND;

/// Modified Julian Day of the Unix epoch (1970-01-01).
const UNIX_EPOCH_MJD: i64 = 40_587;

/// An instant, counted in 100-nanosecond ticks from the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Stamp(i64);

impl Stamp {
    /// The current instant.
    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_nanos() as i64 / 100),
            Err(e) => Self(-((e.duration().as_nanos() as i64) / 100)),
        }
    }

    /// Build from a raw tick count.
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// The raw tick count.
    pub const fn ticks(&self) -> i64 {
        self.0
    }

    /// Build from milliseconds since the Unix epoch.
    pub const fn from_unix_millis(millis: i64) -> Self {
        Self(millis * TICKS_PER_MILLI)
    }

    /// Milliseconds since the Unix epoch, truncated.
    pub const fn unix_millis(&self) -> i64 {
        self.0.div_euclid(TICKS_PER_MILLI)
    }

    /// UTC view of this instant.
    pub fn utc(&self) -> DateTime<Utc> {
        let secs = self.0.div_euclid(TICKS_PER_SECOND);
        let nanos = (self.0.rem_euclid(TICKS_PER_SECOND) * 100) as u32;
        // Any i64 tick count lands within chrono's supported year range.
        Utc.timestamp_opt(secs, nanos)
            .single()
            .expect("tick count within chrono range")
    }

    fn from_utc_naive(naive: NaiveDateTime) -> Self {
        let secs = naive.and_utc().timestamp();
        let nanos = naive.and_utc().timestamp_subsec_nanos() as i64;
        Self(secs * TICKS_PER_SECOND + nanos / 100)
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.utc().format("%Y-%m-%dT%H:%M:%S%.3fZ"))
    }
}

/// A span of time, counted in 100-nanosecond ticks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Elapsed(i64);

impl Elapsed {
    /// Build from a raw tick count.
    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    /// The raw tick count.
    pub const fn ticks(&self) -> i64 {
        self.0
    }

    /// Build from whole seconds.
    pub const fn from_seconds(seconds: i64) -> Self {
        Self(seconds * TICKS_PER_SECOND)
    }

    /// Build from whole milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis * TICKS_PER_MILLI)
    }
}

impl fmt::Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0 as f64 / TICKS_PER_SECOND as f64)
    }
}

impl std::ops::Sub for Stamp {
    type Output = Elapsed;

    fn sub(self, rhs: Stamp) -> Elapsed {
        Elapsed(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Add<Elapsed> for Stamp {
    type Output = Stamp;

    fn add(self, rhs: Elapsed) -> Stamp {
        Stamp(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub<Elapsed> for Stamp {
    type Output = Stamp;

    fn sub(self, rhs: Elapsed) -> Stamp {
        Stamp(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Add for Elapsed {
    type Output = Elapsed;

    fn add(self, rhs: Elapsed) -> Elapsed {
        Elapsed(self.0.wrapping_add(rhs.0))
    }
}

impl std::ops::Sub for Elapsed {
    type Output = Elapsed;

    fn sub(self, rhs: Elapsed) -> Elapsed {
        Elapsed(self.0.wrapping_sub(rhs.0))
    }
}

impl std::ops::Neg for Elapsed {
    type Output = Elapsed;

    fn neg(self) -> Elapsed {
        Elapsed(-self.0)
    }
}

/// A calendar field of a zoned date-time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum TimeField {
    /// Calendar year.
    Year,
    /// Calendar month.
    Month,
    /// Day of month.
    Day,
    /// Hour of day.
    Hour,
    /// Minute of hour.
    Minute,
    /// Second of minute.
    Second,
    /// Millisecond of second.
    Milli,
}

impl TimeField {
    /// Fixed tick length of this field's unit, where the unit has one.
    ///
    /// Year and month are calendar units and have no fixed length.
    const fn unit_ticks(&self) -> Option<i64> {
        match self {
            Self::Year | Self::Month => None,
            Self::Day => Some(TICKS_PER_DAY),
            Self::Hour => Some(3_600 * TICKS_PER_SECOND),
            Self::Minute => Some(60 * TICKS_PER_SECOND),
            Self::Second => Some(TICKS_PER_SECOND),
            Self::Milli => Some(TICKS_PER_MILLI),
        }
    }
}

/// The time zone requested for a [`DateTimeContext`] is not known.
#[derive(Debug, thiserror::Error)]
#[error("unknown time zone: {0}")]
pub struct UnknownZone(pub String);

/// Zoned view over [`Stamp`]s: field access and calendar arithmetic.
///
/// Without an explicit zone, all views are UTC.
#[derive(Debug, Clone, Default)]
pub struct DateTimeContext {
    zone: Option<Tz>,
}

impl DateTimeContext {
    /// Context with the default (UTC) zone.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the zone by name, or clear it back to the default with `None`.
    pub fn set_zone(&mut self, name: Option<&str>) -> Result<(), UnknownZone> {
        match name {
            None => {
                self.zone = None;
                Ok(())
            }
            Some(name) => {
                let tz = Tz::from_str(name).map_err(|_| UnknownZone(name.to_owned()))?;
                self.zone = Some(tz);
                Ok(())
            }
        }
    }

    /// Name of the active zone, when one is set.
    pub fn zone_name(&self) -> Option<&'static str> {
        self.zone.map(|tz| tz.name())
    }

    /// Wall-clock view of an instant in the active zone.
    pub fn naive(&self, stamp: Stamp) -> NaiveDateTime {
        let utc = stamp.utc();
        match self.zone {
            None => utc.naive_utc(),
            Some(tz) => utc.with_timezone(&tz).naive_local(),
        }
    }

    /// Interpret a wall-clock date-time in the active zone.
    ///
    /// Ambiguous wall clocks (fall-back transitions) resolve to the earlier
    /// instant; nonexistent ones (spring-forward gaps) yield `None`.
    pub fn resolve(&self, naive: NaiveDateTime) -> Option<Stamp> {
        match self.zone {
            None => Some(Stamp::from_utc_naive(naive)),
            Some(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|zoned| Stamp::from_utc_naive(zoned.naive_utc())),
        }
    }

    /// Value of one calendar field.
    pub fn field(&self, stamp: Stamp, field: TimeField) -> i64 {
        let naive = self.naive(stamp);
        match field {
            TimeField::Year => naive.year() as i64,
            TimeField::Month => naive.month() as i64,
            TimeField::Day => naive.day() as i64,
            TimeField::Hour => naive.hour() as i64,
            TimeField::Minute => naive.minute() as i64,
            TimeField::Second => naive.second() as i64,
            TimeField::Milli => (naive.nanosecond() / 1_000_000) as i64,
        }
    }

    /// Day of week, 1 = Monday through 7 = Sunday.
    pub fn day_of_week(&self, stamp: Stamp) -> i64 {
        self.naive(stamp).weekday().number_from_monday() as i64
    }

    /// Number of days in the instant's month.
    pub fn days_in_month(&self, stamp: Stamp) -> i64 {
        let date = self.naive(stamp).date();
        let first = date.with_day(1).unwrap_or(date);
        let next = first
            .checked_add_months(Months::new(1))
            .unwrap_or(first);
        (next - first).num_days()
    }

    /// Add `n` units of a calendar field (negative to subtract).
    pub fn add(&self, stamp: Stamp, field: TimeField, n: i64) -> Option<Stamp> {
        if let Some(unit) = field.unit_ticks() {
            if field == TimeField::Day {
                // Day steps are calendar steps: wall clock is preserved
                // across zone offset transitions.
                let naive = self.naive(stamp);
                let date = naive
                    .date()
                    .checked_add_signed(Duration::days(n))?;
                return self.resolve(date.and_time(naive.time()));
            }
            return Some(Stamp(stamp.ticks().checked_add(unit.checked_mul(n)?)?));
        }

        let naive = self.naive(stamp);
        let months = match field {
            TimeField::Year => n.checked_mul(12)?,
            TimeField::Month => n,
            _ => unreachable!(),
        };
        let date = if months >= 0 {
            naive
                .date()
                .checked_add_months(Months::new(u32::try_from(months).ok()?))?
        } else {
            naive
                .date()
                .checked_sub_months(Months::new(u32::try_from(-months).ok()?))?
        };
        self.resolve(date.and_time(naive.time()))
    }

    /// Truncate an instant down to a field boundary.
    pub fn floor(&self, stamp: Stamp, field: TimeField) -> Option<Stamp> {
        let naive = self.naive(stamp);
        let date = naive.date();
        let floored = match field {
            TimeField::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?.and_hms_opt(0, 0, 0)?,
            TimeField::Month => date.with_day(1)?.and_hms_opt(0, 0, 0)?,
            TimeField::Day => date.and_hms_opt(0, 0, 0)?,
            TimeField::Hour => date.and_hms_opt(naive.hour(), 0, 0)?,
            TimeField::Minute => date.and_hms_opt(naive.hour(), naive.minute(), 0)?,
            TimeField::Second => date.and_hms_opt(naive.hour(), naive.minute(), naive.second())?,
            TimeField::Milli => {
                let millis = naive.nanosecond() / 1_000_000;
                date.and_time(NaiveTime::from_hms_milli_opt(
                    naive.hour(),
                    naive.minute(),
                    naive.second(),
                    millis,
                )?)
            }
        };
        self.resolve(floored)
    }

    /// Round an instant to the nearest field boundary, ties upward.
    pub fn round(&self, stamp: Stamp, field: TimeField) -> Option<Stamp> {
        let floor = self.floor(stamp, field)?;
        let next = self.add(floor, field, 1)?;
        let down = stamp.ticks() - floor.ticks();
        let up = next.ticks() - stamp.ticks();
        Some(if up <= down { next } else { floor })
    }

    /// Break an instant into `(year, month, day, hour, minute, seconds)`,
    /// where seconds carries the fraction.
    pub fn split(&self, stamp: Stamp) -> (i64, i64, i64, i64, i64, f64) {
        let naive = self.naive(stamp);
        let seconds = naive.second() as f64 + naive.nanosecond() as f64 / 1e9;
        (
            naive.year() as i64,
            naive.month() as i64,
            naive.day() as i64,
            naive.hour() as i64,
            naive.minute() as i64,
            seconds,
        )
    }

    /// Rebuild an instant from split fields.
    pub fn join(
        &self,
        year: i64,
        month: i64,
        day: i64,
        hour: i64,
        minute: i64,
        seconds: f64,
    ) -> Option<Stamp> {
        let date = NaiveDate::from_ymd_opt(
            i32::try_from(year).ok()?,
            u32::try_from(month).ok()?,
            u32::try_from(day).ok()?,
        )?;
        if !(0.0..60.0).contains(&seconds) {
            return None;
        }
        let whole = seconds.floor();
        let nanos = ((seconds - whole) * 1e9).round() as u32;
        let time = NaiveTime::from_hms_nano_opt(
            u32::try_from(hour).ok()?,
            u32::try_from(minute).ok()?,
            whole as u32,
            nanos,
        )?;
        self.resolve(date.and_time(time))
    }

    /// Parse a wall-clock date-time (`YYYY-MM-DD[T ]HH:MM:SS[.frac]`, or a
    /// bare date) in the active zone.
    pub fn parse(&self, text: &str) -> Option<Stamp> {
        let text = text.trim();
        let naive = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        self.resolve(naive)
    }

    /// Modified Julian Day of an instant (UTC day count).
    pub fn mjd(&self, stamp: Stamp) -> i64 {
        stamp.ticks().div_euclid(TICKS_PER_DAY) + UNIX_EPOCH_MJD
    }

    /// Midnight UTC of a Modified Julian Day.
    pub fn from_mjd(&self, mjd: i64) -> Stamp {
        Stamp::from_ticks((mjd - UNIX_EPOCH_MJD) * TICKS_PER_DAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> DateTimeContext {
        DateTimeContext::new()
    }

    #[test]
    fn stamp_millis_round_trip() {
        let stamp = Stamp::from_unix_millis(1_234_567_890_123);
        assert_eq!(stamp.unix_millis(), 1_234_567_890_123);
    }

    #[test]
    fn field_access() {
        // 2001-09-09T01:46:40Z
        let stamp = Stamp::from_unix_millis(1_000_000_000_000);
        let ctx = ctx();
        assert_eq!(ctx.field(stamp, TimeField::Year), 2001);
        assert_eq!(ctx.field(stamp, TimeField::Month), 9);
        assert_eq!(ctx.field(stamp, TimeField::Day), 9);
        assert_eq!(ctx.field(stamp, TimeField::Hour), 1);
        assert_eq!(ctx.day_of_week(stamp), 7);
        assert_eq!(ctx.days_in_month(stamp), 30);
    }

    #[test]
    fn floor_and_round() {
        let ctx = ctx();
        let stamp = Stamp::from_unix_millis(1_000_000_000_600);
        let floored = ctx.floor(stamp, TimeField::Second).unwrap();
        assert_eq!(floored.unix_millis(), 1_000_000_000_000);
        let rounded = ctx.round(stamp, TimeField::Second).unwrap();
        assert_eq!(rounded.unix_millis(), 1_000_000_001_000);
    }

    #[test]
    fn calendar_add() {
        let ctx = ctx();
        // 2001-09-09
        let stamp = Stamp::from_unix_millis(1_000_000_000_000);
        let later = ctx.add(stamp, TimeField::Month, 5).unwrap();
        assert_eq!(ctx.field(later, TimeField::Year), 2002);
        assert_eq!(ctx.field(later, TimeField::Month), 2);
        let earlier = ctx.add(stamp, TimeField::Year, -2).unwrap();
        assert_eq!(ctx.field(earlier, TimeField::Year), 1999);
    }

    #[test]
    fn mjd_round_trip() {
        let ctx = ctx();
        let stamp = Stamp::from_ticks(0);
        assert_eq!(ctx.mjd(stamp), 40_587);
        assert_eq!(ctx.from_mjd(40_587), stamp);
    }

    #[test]
    fn split_join_round_trip() {
        let ctx = ctx();
        let stamp = Stamp::from_unix_millis(1_000_000_000_500);
        let (y, mo, d, h, mi, s) = ctx.split(stamp);
        let back = ctx.join(y, mo, d, h, mi, s).unwrap();
        assert_eq!(back, stamp);
    }

    #[test]
    fn zoned_fields() {
        let mut ctx = ctx();
        ctx.set_zone(Some("America/New_York")).unwrap();
        // 2001-09-09T01:46:40Z is the previous evening in New York.
        let stamp = Stamp::from_unix_millis(1_000_000_000_000);
        assert_eq!(ctx.field(stamp, TimeField::Day), 8);
        assert!(ctx.set_zone(Some("Not/AZone")).is_err());
    }
}
