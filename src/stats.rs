use crate::clock::date_key;
use crate::models::{
    CalendarDay, CalendarMonth, DailyLog, DailyPoint, DayRecord, HistoryResponse, Task,
    TodaySummary, WeeklyPoint,
};
use chrono::{Datelike, Duration, NaiveDate};

const MAX_LEVEL: usize = 4;

pub fn build_today(date: NaiveDate, day: &DayRecord, catalog: &[Task]) -> TodaySummary {
    let earned_points = day.points_against(catalog);
    let possible_points: u64 = catalog.iter().map(|task| u64::from(task.points)).sum();
    let percentage = if possible_points == 0 {
        0
    } else {
        ((earned_points * 100 + possible_points / 2) / possible_points) as u32
    };

    TodaySummary {
        date: date_key(date),
        completed: day.completed.clone(),
        earned_points,
        possible_points,
        percentage,
    }
}

/// Month grid for a calendar view. Returns `None` for an impossible month.
pub fn build_calendar(
    log: &DailyLog,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Option<CalendarMonth> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_month = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };

    let days = first
        .iter_days()
        .take_while(|date| *date < next_month)
        .map(|date| {
            let completed_count = completed_on(log, date);
            CalendarDay {
                date: date_key(date),
                completed_count,
                level: completed_count.min(MAX_LEVEL) as u8,
                is_today: date == today,
            }
        })
        .collect();

    Some(CalendarMonth {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_sunday(),
        days,
    })
}

pub fn build_history_at(today: NaiveDate, log: &DailyLog, catalog: &[Task]) -> HistoryResponse {
    const WEEK_COUNT: usize = 8;

    let mut last_7_days = Vec::with_capacity(7);
    for offset in (0..7).rev() {
        let date = today - Duration::days(offset);
        last_7_days.push(DailyPoint {
            date: date_key(date),
            completed_count: completed_on(log, date),
            points: points_on(log, date, catalog),
        });
    }

    let current_week_start = week_start(today);
    let mut weekly_totals = Vec::with_capacity(WEEK_COUNT);

    for offset in (0..WEEK_COUNT).rev() {
        let start = current_week_start - Duration::weeks(offset as i64);
        let end = start + Duration::days(6);

        let mut completed_count = 0usize;
        let mut points = 0u64;
        let mut active_days = 0u8;
        for day_offset in 0..7 {
            let date = start + Duration::days(day_offset);
            let count = completed_on(log, date);
            completed_count += count;
            points = points.saturating_add(points_on(log, date, catalog));
            if count > 0 {
                active_days += 1;
            }
        }

        weekly_totals.push(WeeklyPoint {
            week: week_label(start),
            start_date: date_key(start),
            end_date: date_key(end),
            completed_count,
            points,
            active_days,
        });
    }

    HistoryResponse {
        last_7_days,
        weekly_totals,
    }
}

fn completed_on(log: &DailyLog, date: NaiveDate) -> usize {
    log.get(&date_key(date))
        .map(|day| day.completed.len())
        .unwrap_or_default()
}

// Stored totals go stale when tasks are edited or deleted, so points are
// re-derived from the current catalog.
fn points_on(log: &DailyLog, date: NaiveDate, catalog: &[Task]) -> u64 {
    log.get(&date_key(date))
        .map(|day| day.points_against(catalog))
        .unwrap_or_default()
}

fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

fn week_label(date: NaiveDate) -> String {
    let iso = date.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}
