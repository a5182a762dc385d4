//! Deadline window checks performed when a deferred task fires.

use crate::payload::DeliveryPayload;

/// Where "now" falls relative to a firing's permitted window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineCheck {
    /// Fired before the window opened; the OS should try again later.
    Premature,
    /// Inside the window; dispatch to the owner.
    Valid,
    /// Past the window (or outside this period's flex); drop the firing.
    Expired,
}

pub fn check(payload: &DeliveryPayload, now_ms: i64) -> DeadlineCheck {
    match payload.interval_ms {
        Some(interval_ms) => check_periodic(
            payload.schedule_time_ms,
            interval_ms,
            payload.flex_ms,
            now_ms,
        ),
        None => check_one_off(payload, now_ms),
    }
}

fn check_one_off(payload: &DeliveryPayload, now_ms: i64) -> DeadlineCheck {
    let start = payload.window_start_time_ms.unwrap_or(payload.schedule_time_ms);
    if now_ms < start {
        return DeadlineCheck::Premature;
    }
    match payload.window_end_time_ms {
        Some(end) if now_ms >= end => DeadlineCheck::Expired,
        _ => DeadlineCheck::Valid,
    }
}

/// Valid iff `now` sits in `[interval - flex, interval)` of the current
/// period, periods being counted from the scheduling time. No flex means the
/// whole period is valid.
///
/// The window repeats every period rather than only covering the first one
/// (`[S + I - F, S + I)`), so a periodic task keeps running after its first
/// interval.
fn check_periodic(
    schedule_time_ms: i64,
    interval_ms: i64,
    flex_ms: Option<i64>,
    now_ms: i64,
) -> DeadlineCheck {
    if interval_ms <= 0 {
        return DeadlineCheck::Expired;
    }
    let elapsed = now_ms - schedule_time_ms;
    if elapsed < 0 {
        return DeadlineCheck::Expired;
    }
    let flex = flex_ms.unwrap_or(interval_ms).clamp(0, interval_ms);
    let position = elapsed % interval_ms;
    if position >= interval_ms - flex {
        DeadlineCheck::Valid
    } else {
        DeadlineCheck::Expired
    }
}
