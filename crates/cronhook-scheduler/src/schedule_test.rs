use chrono::{Duration, TimeZone};
use chrono_tz::America::Argentina::Buenos_Aires;

use super::*;

fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

#[test]
fn five_field_cron_is_widened_with_seconds() {
    let cron = CronExpression::parse("0 17 * * *").unwrap();
    assert_eq!(cron.as_str(), "0 17 * * *");
    assert_eq!(cron.normalized(), "0 0 17 * * *");
}

#[test]
fn six_field_cron_is_kept() {
    let cron = CronExpression::parse("30 */5 * * * *").unwrap();
    assert_eq!(cron.normalized(), "30 */5 * * * *");
}

#[test]
fn wrong_field_count_is_rejected() {
    let err = CronExpression::parse("* * *").unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("expected 5 or 6 fields"));
}

#[test]
fn garbage_cron_is_rejected() {
    let err = CronExpression::parse("61 * * * *").unwrap_err();
    assert!(err.is_validation(), "got {err:?}");
}

#[test]
fn next_after_uses_operational_timezone() {
    // 17:00 in Buenos Aires (UTC-3) is 20:00 UTC.
    let cron = CronExpression::parse("0 17 * * *").unwrap();
    let now = utc(2026, 3, 10, 12, 0, 0);
    let next = cron.next_after(now, Buenos_Aires).unwrap();
    assert_eq!(next, utc(2026, 3, 10, 20, 0, 0));
}

#[test]
fn next_after_is_strictly_in_the_future() {
    let cron = CronExpression::parse("0 17 * * *").unwrap();
    let now = utc(2026, 3, 10, 20, 0, 0);
    let next = cron.next_after(now, Buenos_Aires).unwrap();
    assert_eq!(next, utc(2026, 3, 11, 20, 0, 0));
}

#[test]
fn repetitions_must_be_positive() {
    assert!(validate_repetitions(0).unwrap_err().is_validation());
    assert!(validate_repetitions(-3).unwrap_err().is_validation());
    assert_eq!(validate_repetitions(3).unwrap(), 3);
}

#[test]
fn delay_fire_at_must_be_positive() {
    let now = Utc::now();
    assert_eq!(resolve_fire_at(&FireAt::Delay(1_500), now).unwrap(), 1_500);
    assert!(resolve_fire_at(&FireAt::Delay(0), now)
        .unwrap_err()
        .is_validation());
}

#[test]
fn absolute_fire_at_resolves_against_now() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    let at = (now + Duration::minutes(5)).fixed_offset();
    assert_eq!(resolve_fire_at(&FireAt::At(at), now).unwrap(), 300_000);
}

#[test]
fn past_fire_at_is_rejected() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    let at = (now - Duration::seconds(1)).fixed_offset();
    let err = resolve_fire_at(&FireAt::At(at), now).unwrap_err();
    assert!(err.to_string().contains("must be in the future"));
}

#[test]
fn distant_fire_at_is_accepted() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    let at = (now + Duration::days(400)).fixed_offset();
    let delay = resolve_fire_at(&FireAt::At(at), now).unwrap();
    assert_eq!(delay, 400 * 86_400 * 1_000);
}

#[test]
fn unrepresentable_delay_is_rejected() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    let err = resolve_fire_at(&FireAt::Delay(u64::MAX), now).unwrap_err();
    assert!(err.is_validation());
}

#[test]
fn countdown_floors_each_unit() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    let target = now + Duration::days(2) + Duration::hours(3) + Duration::minutes(4) + Duration::milliseconds(5_900);
    assert_eq!(
        Countdown::until(target, now),
        Countdown {
            days: 2,
            hours: 3,
            minutes: 4,
            seconds: 5,
        }
    );
}

#[test]
fn countdown_is_zero_once_passed() {
    let now = utc(2026, 3, 10, 12, 0, 0);
    assert_eq!(
        Countdown::until(now - Duration::hours(1), now),
        Countdown::default()
    );
}

#[test]
fn timestamps_render_in_operational_timezone() {
    let at = utc(2026, 3, 10, 20, 0, 0);
    assert_eq!(
        format_timestamp(at, Buenos_Aires),
        "2026-03-10T17:00:00-03:00"
    );
}
