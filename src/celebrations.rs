use crate::models::{CompletionRecord, DailyLog, StreakResult, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CelebrationKind {
    FirstTask,
    AllTasksComplete,
    #[serde(rename = "streak3")]
    Streak3,
    #[serde(rename = "streak7")]
    Streak7,
    #[serde(rename = "streak30")]
    Streak30,
    PersonalBest,
}

impl CelebrationKind {
    pub fn message(self) -> &'static str {
        match self {
            CelebrationKind::FirstTask => "you completed your first task!",
            CelebrationKind::AllTasksComplete => "you completed all tasks today!",
            CelebrationKind::Streak3 => "three days in a row!",
            CelebrationKind::Streak7 => "seven days in a row!",
            CelebrationKind::Streak30 => "thirty days in a row!",
            CelebrationKind::PersonalBest => "you beat your personal best!",
        }
    }

    pub fn subtitle(self) -> &'static str {
        match self {
            CelebrationKind::FirstTask => {
                "the journey of a thousand miles begins with a single step"
            }
            CelebrationKind::AllTasksComplete => "incredible focus and dedication",
            CelebrationKind::Streak3 => "consistency is key",
            CelebrationKind::Streak7 => "you're building a powerful habit",
            CelebrationKind::Streak30 => "legendary consistency",
            CelebrationKind::PersonalBest => "keep pushing forward",
        }
    }

    fn milestone(streak: u32) -> Option<Self> {
        match streak {
            3 => Some(CelebrationKind::Streak3),
            7 => Some(CelebrationKind::Streak7),
            30 => Some(CelebrationKind::Streak30),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CelebrationData {
    pub streak_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CelebrationEvent {
    pub kind: CelebrationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<CelebrationData>,
    pub message: &'static str,
    pub subtitle: &'static str,
}

impl CelebrationEvent {
    fn new(kind: CelebrationKind) -> Self {
        Self {
            kind,
            data: None,
            message: kind.message(),
            subtitle: kind.subtitle(),
        }
    }

    fn with_streak(kind: CelebrationKind, streak_count: u32) -> Self {
        Self {
            data: Some(CelebrationData { streak_count }),
            ..Self::new(kind)
        }
    }
}

/// Decides which celebrations a completion earns, in display order.
///
/// `today` is the day's full completion list after the new completion was
/// appended. `log` may or may not already contain those records; completions
/// present in both are counted once. Milestones use exact equality so each one
/// fires only on the day its threshold is reached.
pub fn evaluate_celebrations(
    today: &[CompletionRecord],
    catalog: &[Task],
    streak: &StreakResult,
    log: &DailyLog,
) -> Vec<CelebrationEvent> {
    let mut celebrations = Vec::new();

    if lifetime_completions(today, log) == 1 {
        celebrations.push(CelebrationEvent::new(CelebrationKind::FirstTask));
    }

    let completed_known = today
        .iter()
        .filter(|record| catalog.iter().any(|task| task.id == record.task_id))
        .map(|record| &record.task_id)
        .collect::<BTreeSet<_>>()
        .len();
    if completed_known > 0 && completed_known == catalog.len() {
        celebrations.push(CelebrationEvent::new(CelebrationKind::AllTasksComplete));
    }

    if let Some(kind) = CelebrationKind::milestone(streak.current) {
        celebrations.push(CelebrationEvent::with_streak(kind, streak.current));
    }

    if streak.current > 1 && streak.current == streak.best {
        celebrations.push(CelebrationEvent::with_streak(
            CelebrationKind::PersonalBest,
            streak.current,
        ));
    }

    celebrations
}

fn lifetime_completions(today: &[CompletionRecord], log: &DailyLog) -> usize {
    let logged = log
        .values()
        .flat_map(|day| day.completed.iter())
        .filter(|record| !today.iter().any(|fresh| fresh.same_event(record)))
        .count();
    logged + today.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DayRecord, TaskId};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;

    fn at(stamp: &str) -> DateTime<Utc> {
        stamp.parse().unwrap()
    }

    fn task(id: &str, points: u32) -> Task {
        Task {
            id: TaskId::new(id),
            name: id.to_string(),
            points,
            follow_ups: Vec::new(),
        }
    }

    fn completion(id: &str, stamp: &str) -> CompletionRecord {
        CompletionRecord {
            task_id: TaskId::new(id),
            completed_at: at(stamp),
            follow_up_responses: BTreeMap::new(),
        }
    }

    fn streak(current: u32, best: u32) -> StreakResult {
        StreakResult {
            current,
            best,
            last_completion_date: None,
        }
    }

    fn kinds(events: &[CelebrationEvent]) -> Vec<CelebrationKind> {
        events.iter().map(|event| event.kind).collect()
    }

    #[test]
    fn first_completion_on_single_task_catalog() {
        let today = vec![completion("a", "2026-01-05T09:00:00Z")];
        let catalog = vec![task("a", 2)];

        let events = evaluate_celebrations(&today, &catalog, &streak(1, 1), &DailyLog::new());
        assert_eq!(
            kinds(&events),
            vec![CelebrationKind::FirstTask, CelebrationKind::AllTasksComplete]
        );
    }

    #[test]
    fn first_task_counts_today_once_when_already_logged() {
        let today = vec![completion("a", "2026-01-05T09:00:00Z")];
        let mut log = DailyLog::new();
        log.insert(
            "2026-01-05".into(),
            DayRecord {
                completed: today.clone(),
                total_points: 2,
            },
        );

        let catalog = vec![task("a", 2), task("b", 1)];
        let events = evaluate_celebrations(&today, &catalog, &streak(1, 1), &log);
        assert_eq!(kinds(&events), vec![CelebrationKind::FirstTask]);
    }

    #[test]
    fn first_task_does_not_fire_with_history() {
        let mut log = DailyLog::new();
        log.insert(
            "2026-01-04".into(),
            DayRecord {
                completed: vec![completion("a", "2026-01-04T09:00:00Z")],
                total_points: 2,
            },
        );
        let today = vec![completion("a", "2026-01-05T09:00:00Z")];

        let catalog = vec![task("a", 2), task("b", 1)];
        let events = evaluate_celebrations(&today, &catalog, &streak(2, 2), &log);
        assert!(!kinds(&events).contains(&CelebrationKind::FirstTask));
    }

    #[test]
    fn all_tasks_complete_ignores_orphans() {
        let catalog = vec![task("a", 1), task("b", 1)];
        let today = vec![
            completion("a", "2026-01-05T09:00:00Z"),
            completion("gone", "2026-01-05T10:00:00Z"),
        ];
        let mut log = DailyLog::new();
        log.insert(
            "2026-01-01".into(),
            DayRecord {
                completed: vec![completion("a", "2026-01-01T09:00:00Z")],
                total_points: 1,
            },
        );

        let events = evaluate_celebrations(&today, &catalog, &streak(1, 1), &log);
        assert!(events.is_empty());

        let today = vec![
            completion("a", "2026-01-05T09:00:00Z"),
            completion("gone", "2026-01-05T10:00:00Z"),
            completion("b", "2026-01-05T11:00:00Z"),
        ];
        let events = evaluate_celebrations(&today, &catalog, &streak(1, 1), &log);
        assert_eq!(kinds(&events), vec![CelebrationKind::AllTasksComplete]);
    }

    #[test]
    fn empty_catalog_never_reports_all_complete() {
        let today = vec![completion("gone", "2026-01-05T09:00:00Z")];
        let mut log = DailyLog::new();
        log.insert(
            "2026-01-01".into(),
            DayRecord {
                completed: vec![completion("gone", "2026-01-01T09:00:00Z")],
                total_points: 0,
            },
        );

        let events = evaluate_celebrations(&today, &[], &streak(1, 1), &log);
        assert!(events.is_empty());
    }

    #[test]
    fn streak_milestones_are_exclusive_and_exact() {
        let mut log = DailyLog::new();
        log.insert(
            "2025-01-01".into(),
            DayRecord {
                completed: vec![completion("a", "2025-01-01T09:00:00Z")],
                total_points: 1,
            },
        );
        let today = vec![completion("a", "2026-01-05T09:00:00Z")];
        let catalog = vec![task("a", 1), task("b", 1)];

        for current in 0..=40u32 {
            // best above current keeps personalBest out of the picture
            let events = evaluate_celebrations(&today, &catalog, &streak(current, 100), &log);
            let milestones: Vec<_> = kinds(&events)
                .into_iter()
                .filter(|kind| {
                    matches!(
                        kind,
                        CelebrationKind::Streak3
                            | CelebrationKind::Streak7
                            | CelebrationKind::Streak30
                    )
                })
                .collect();

            match current {
                3 => assert_eq!(milestones, vec![CelebrationKind::Streak3]),
                7 => assert_eq!(milestones, vec![CelebrationKind::Streak7]),
                30 => assert_eq!(milestones, vec![CelebrationKind::Streak30]),
                _ => assert!(milestones.is_empty(), "streak {current} fired {milestones:?}"),
            }
        }
    }

    #[test]
    fn personal_best_requires_streak_above_one() {
        let log = DailyLog::new();
        let catalog = vec![task("a", 1), task("b", 1)];
        let today = vec![
            completion("x", "2026-01-05T08:00:00Z"),
            completion("a", "2026-01-05T09:00:00Z"),
        ];

        let cases = [
            (0, 0, false),
            (1, 1, false),
            (2, 2, true),
            (4, 5, false),
            (5, 5, true),
        ];
        for (current, best, expected) in cases {
            let events = evaluate_celebrations(&today, &catalog, &streak(current, best), &log);
            assert_eq!(
                kinds(&events).contains(&CelebrationKind::PersonalBest),
                expected,
                "current {current}, best {best}"
            );
        }
    }

    #[test]
    fn streak_three_precedes_personal_best() {
        let mut log = DailyLog::new();
        log.insert(
            "2026-01-03".into(),
            DayRecord {
                completed: vec![completion("a", "2026-01-03T09:00:00Z")],
                total_points: 1,
            },
        );
        let today = vec![completion("a", "2026-01-05T09:00:00Z")];
        let catalog = vec![task("a", 1), task("b", 1)];

        let events = evaluate_celebrations(&today, &catalog, &streak(3, 3), &log);
        assert_eq!(
            kinds(&events),
            vec![CelebrationKind::Streak3, CelebrationKind::PersonalBest]
        );
        assert_eq!(events[0].data, Some(CelebrationData { streak_count: 3 }));
        assert_eq!(events[0].message, "three days in a row!");
    }

    #[test]
    fn kinds_serialize_with_stable_names() {
        let names: Vec<String> = [
            CelebrationKind::FirstTask,
            CelebrationKind::AllTasksComplete,
            CelebrationKind::Streak3,
            CelebrationKind::Streak7,
            CelebrationKind::Streak30,
            CelebrationKind::PersonalBest,
        ]
        .into_iter()
        .map(|kind| serde_json::to_value(kind).unwrap().as_str().unwrap().to_string())
        .collect();

        assert_eq!(
            names,
            vec!["firstTask", "allTasksComplete", "streak3", "streak7", "streak30", "personalBest"]
        );
    }
}
