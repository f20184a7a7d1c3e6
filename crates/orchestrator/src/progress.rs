//! Queue-level progress: aggregate percent and remaining-time estimate.

use std::time::Duration;

/// Percentage of finished tasks, rounded down
pub fn aggregate_percent(finished: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((finished.min(total) * 100) / total) as u8
}

/// Remaining time, extrapolated from the average time per finished task
///
/// None until at least one task has finished.
pub fn estimate_remaining(elapsed: Duration, finished: usize, total: usize) -> Option<Duration> {
    if finished == 0 {
        return None;
    }
    let remaining = total.saturating_sub(finished) as u32;
    Some(elapsed / finished as u32 * remaining)
}

/// Format as `Xh Ym Zs`, `Ym Zs` or `Zs`
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
