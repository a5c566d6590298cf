use crate::clock::{date_key, parse_date_key};
use crate::models::{DailyLog, StreakResult};
use chrono::NaiveDate;
use tracing::debug;

/// Derives current and best streaks from the completion log.
///
/// Only days with at least one completion count; a key holding an empty list
/// is the same as a missing key. Keys that are not ISO dates, and dates after
/// `today`, are ignored. `current` is the length of the unbroken run that ends
/// on `today` itself, so it is zero until something is completed today.
pub fn compute_streaks(log: &DailyLog, today: NaiveDate) -> StreakResult {
    let mut dates: Vec<NaiveDate> = log
        .iter()
        .filter(|(_, day)| day.is_active())
        .filter_map(|(key, _)| parse_date_key(key))
        .filter(|date| *date <= today)
        .collect();
    dates.sort_unstable_by(|a, b| b.cmp(a));
    dates.dedup();

    let Some(&latest) = dates.first() else {
        return StreakResult::default();
    };

    let mut current = 0u32;
    let mut best = 0u32;
    let mut run = 0u32;
    let mut expected = Some(today);
    let mut touching_today = true;

    for date in dates {
        if expected == Some(date) {
            run += 1;
        } else {
            touching_today = false;
            run = 1;
        }

        if touching_today {
            current = run;
        }
        best = best.max(run);
        expected = date.pred_opt();
    }

    debug!(current, best, latest = %latest, "computed streaks");

    StreakResult {
        current,
        best,
        last_completion_date: Some(date_key(latest)),
    }
}
