// Trigger kinds and next-fire computation.
//
// Wall-clock triggers (daily/weekly/cron) are evaluated in the collector's
// configured fixed UTC offset; interval triggers are offset-independent.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Utc, Weekday};

use crate::CoreError;

/// When a job fires.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Every `interval`, measured from the previous scheduled fire.
    Interval(StdDuration),
    /// Every day at the given local wall-clock time.
    Daily { hour: u32, minute: u32 },
    /// Every week on the given weekday at the given local time.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
    /// A cron expression (5-field standard form; a seconds field of `0` is
    /// prepended internally).
    Cron(Box<cron::Schedule>),
}

impl Trigger {
    /// Parse the `(schedule_type, schedule_value)` pair stored on a
    /// scan schedule: `interval` seconds, `daily` `HH:MM`,
    /// `weekly` `<weekday>:HH:MM`, or `cron` expression.
    pub fn parse(schedule_type: &str, schedule_value: &str) -> Result<Self, CoreError> {
        let invalid = |reason: String| CoreError::Validation {
            field: "schedule_value".into(),
            reason,
        };

        match schedule_type {
            "interval" => {
                let seconds: u64 = schedule_value
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("invalid interval seconds: {schedule_value}")))?;
                if seconds == 0 {
                    return Err(invalid("interval must be positive".into()));
                }
                Ok(Self::Interval(StdDuration::from_secs(seconds)))
            }
            "daily" => {
                let (hour, minute) = parse_clock(schedule_value)
                    .ok_or_else(|| invalid(format!("invalid daily time: {schedule_value}")))?;
                Ok(Self::Daily { hour, minute })
            }
            "weekly" => {
                let (day, clock) = schedule_value
                    .split_once(':')
                    .ok_or_else(|| invalid(format!("invalid weekly format: {schedule_value}")))?;
                let weekday = Weekday::from_str(day.trim())
                    .map_err(|_| invalid(format!("invalid weekday: {day}")))?;
                let (hour, minute) = parse_clock(clock)
                    .ok_or_else(|| invalid(format!("invalid weekly time: {clock}")))?;
                Ok(Self::Weekly {
                    weekday,
                    hour,
                    minute,
                })
            }
            "cron" => {
                // Standard 5-field cron; the cron crate wants seconds.
                let fields = schedule_value.split_whitespace().count();
                let expr = if fields == 5 {
                    format!("0 {schedule_value}")
                } else {
                    schedule_value.to_owned()
                };
                let schedule = cron::Schedule::from_str(&expr)
                    .map_err(|e| invalid(format!("invalid cron expression: {e}")))?;
                Ok(Self::Cron(Box::new(schedule)))
            }
            other => Err(CoreError::Validation {
                field: "schedule_type".into(),
                reason: format!("expected interval/daily/weekly/cron, got '{other}'"),
            }),
        }
    }

    /// The first fire strictly after `after`, in UTC.
    pub fn next_fire(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        match self {
            Self::Interval(interval) => {
                Some(after + Duration::from_std(*interval).unwrap_or(Duration::seconds(1)))
            }
            Self::Daily { hour, minute } => {
                let local = after.with_timezone(&offset);
                let mut candidate = offset
                    .with_ymd_and_hms(local.year(), local.month(), local.day(), *hour, *minute, 0)
                    .single()?;
                if candidate <= local {
                    candidate += Duration::days(1);
                }
                Some(candidate.with_timezone(&Utc))
            }
            Self::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let local = after.with_timezone(&offset);
                let mut candidate = offset
                    .with_ymd_and_hms(local.year(), local.month(), local.day(), *hour, *minute, 0)
                    .single()?;
                while candidate.weekday() != *weekday || candidate <= local {
                    candidate += Duration::days(1);
                }
                Some(candidate.with_timezone(&Utc))
            }
            Self::Cron(schedule) => {
                let local = after.with_timezone(&offset);
                schedule
                    .after(&local)
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
            }
        }
    }
}

fn parse_clock(raw: &str) -> Option<(u32, u32)> {
    let (h, m) = raw.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
            .and_utc()
    }

    #[test]
    fn interval_fires_after_interval() {
        let t = Trigger::Interval(StdDuration::from_secs(5));
        let after = utc(2026, 3, 2, 12, 0);
        assert_eq!(
            t.next_fire(after, FixedOffset::east_opt(0).unwrap()).unwrap(),
            after + Duration::seconds(5)
        );
    }

    #[test]
    fn daily_rolls_to_next_day_when_past() {
        let t = Trigger::Daily { hour: 2, minute: 0 };
        let offset = FixedOffset::east_opt(0).unwrap();

        let before = utc(2026, 3, 2, 1, 0);
        assert_eq!(t.next_fire(before, offset).unwrap(), utc(2026, 3, 2, 2, 0));

        let after = utc(2026, 3, 2, 3, 0);
        assert_eq!(t.next_fire(after, offset).unwrap(), utc(2026, 3, 3, 2, 0));
    }

    #[test]
    fn daily_respects_offset() {
        // 02:00 local at UTC+2 is 00:00 UTC.
        let t = Trigger::Daily { hour: 2, minute: 0 };
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();

        let after = utc(2026, 3, 1, 22, 0); // 2026-03-02 00:00 local
        assert_eq!(t.next_fire(after, offset).unwrap(), utc(2026, 3, 2, 0, 0));
    }

    #[test]
    fn weekly_lands_on_requested_weekday() {
        // 2026-03-02 is a Monday.
        let t = Trigger::Weekly {
            weekday: Weekday::Wed,
            hour: 14,
            minute: 30,
        };
        let offset = FixedOffset::east_opt(0).unwrap();
        let fire = t.next_fire(utc(2026, 3, 2, 12, 0), offset).unwrap();
        assert_eq!(fire, utc(2026, 3, 4, 14, 30));
        assert_eq!(fire.weekday(), Weekday::Wed);
    }

    #[test]
    fn parse_interval_and_daily() {
        assert!(matches!(
            Trigger::parse("interval", "3600").unwrap(),
            Trigger::Interval(d) if d.as_secs() == 3600
        ));
        assert!(matches!(
            Trigger::parse("daily", "14:00").unwrap(),
            Trigger::Daily { hour: 14, minute: 0 }
        ));
    }

    #[test]
    fn parse_weekly() {
        assert!(matches!(
            Trigger::parse("weekly", "monday:14:00").unwrap(),
            Trigger::Weekly { weekday: Weekday::Mon, hour: 14, minute: 0 }
        ));
    }

    #[test]
    fn parse_five_field_cron() {
        let t = Trigger::parse("cron", "0 */6 * * *").unwrap();
        let offset = FixedOffset::east_opt(0).unwrap();
        let fire = t.next_fire(utc(2026, 3, 2, 1, 30), offset).unwrap();
        assert_eq!(fire, utc(2026, 3, 2, 6, 0));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Trigger::parse("interval", "soon").is_err());
        assert!(Trigger::parse("daily", "25:00").is_err());
        assert!(Trigger::parse("weekly", "someday:14:00").is_err());
        assert!(Trigger::parse("cron", "not a cron").is_err());
        assert!(Trigger::parse("hourly", "1").is_err());
    }
}
