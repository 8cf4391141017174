//! Per-target cooldown between successive executions.

use crate::janitor::target::{Target, TargetState};
use chrono::{DateTime, Duration, Utc};

/// False while `now - last_executed_at < cooldown`.
pub fn is_ready(target: &Target, state: &TargetState, now: DateTime<Utc>) -> bool {
    remaining(target, state, now).is_none()
}

/// Time left before the target may execute again, if any.
pub fn remaining(target: &Target, state: &TargetState, now: DateTime<Utc>) -> Option<Duration> {
    let last = state.last_executed_at?;
    let elapsed = now - last;
    if elapsed < target.cooldown {
        Some(target.cooldown - elapsed)
    } else {
        None
    }
}

/// Starts the cooldown window. Only terminal on-chain outcomes (confirmed or
/// reverted) call this; skips never do.
pub fn mark_executed(state: &mut TargetState, at: DateTime<Utc>) {
    state.last_executed_at = Some(at);
}
