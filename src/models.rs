use crate::celebrations::{CelebrationEvent, CelebrationKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_POINTS: u32 = 10;

/// Opaque task identifier. New ids are time-ordered ULIDs; older documents
/// stored millisecond timestamps as JSON numbers, which are read as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(i64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(text) => TaskId(text),
            Repr::Number(number) => TaskId(number.to_string()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowUpKind {
    Text,
    Rating,
    Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpSpec {
    #[serde(rename = "type")]
    pub kind: FollowUpKind,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, deserialize_with = "nullable_vec", skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default = "default_points")]
    pub points: u32,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub follow_ups: Vec<FollowUpSpec>,
}

fn default_points() -> u32 {
    DEFAULT_POINTS
}

/// Answer to one follow-up, tagged by the follow-up's type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FollowUpResponse {
    Text(String),
    Rating(u8),
    Category(String),
}

impl FollowUpResponse {
    pub fn kind(&self) -> FollowUpKind {
        match self {
            FollowUpResponse::Text(_) => FollowUpKind::Text,
            FollowUpResponse::Rating(_) => FollowUpKind::Rating,
            FollowUpResponse::Category(_) => FollowUpKind::Category,
        }
    }
}

impl<'de> Deserialize<'de> for FollowUpResponse {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(tag = "type", content = "value", rename_all = "lowercase")]
        enum Tagged {
            Text(String),
            Rating(u8),
            Category(String),
        }

        // Bare values come from documents written before responses were tagged.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Tagged(Tagged),
            Rating(u8),
            Text(String),
        }

        let response = match Repr::deserialize(deserializer)? {
            Repr::Tagged(Tagged::Text(text)) | Repr::Text(text) => FollowUpResponse::Text(text),
            Repr::Tagged(Tagged::Category(choice)) => FollowUpResponse::Category(choice),
            Repr::Tagged(Tagged::Rating(rating)) | Repr::Rating(rating) => {
                FollowUpResponse::Rating(rating)
            }
        };

        if let FollowUpResponse::Rating(rating) = response {
            if !(1..=5).contains(&rating) {
                return Err(D::Error::custom(format!("rating {rating} is outside 1-5")));
            }
        }

        Ok(response)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub task_id: TaskId,
    pub completed_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "lenient_responses")]
    pub follow_up_responses: BTreeMap<usize, FollowUpResponse>,
}

impl CompletionRecord {
    /// Two records describe the same completion action.
    pub fn same_event(&self, other: &CompletionRecord) -> bool {
        self.task_id == other.task_id && self.completed_at == other.completed_at
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRecord {
    #[serde(default, deserialize_with = "lenient_completions")]
    pub completed: Vec<CompletionRecord>,
    #[serde(default, deserialize_with = "lenient_points")]
    pub total_points: u64,
}

impl DayRecord {
    /// A day only counts toward streaks when something was completed on it.
    pub fn is_active(&self) -> bool {
        !self.completed.is_empty()
    }

    pub fn contains_task(&self, task_id: &TaskId) -> bool {
        self.completed.iter().any(|record| &record.task_id == task_id)
    }

    /// Sum of catalog points for the completions on this day. Completions whose
    /// task has been deleted contribute nothing.
    pub fn points_against(&self, catalog: &[Task]) -> u64 {
        self.completed
            .iter()
            .filter_map(|record| catalog.iter().find(|task| task.id == record.task_id))
            .map(|task| u64::from(task.points))
            .sum()
    }

    pub fn recompute_points(&mut self, catalog: &[Task]) {
        self.total_points = self.points_against(catalog);
    }
}

/// Completion history keyed by ISO date. Absence of a key means no completions.
pub type DailyLog = BTreeMap<String, DayRecord>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreakResult {
    pub current: u32,
    pub best: u32,
    #[serde(default)]
    pub last_completion_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievements {
    #[serde(default)]
    pub first_completion_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UsageEvent {
    SessionStarted {
        session_id: String,
    },
    SessionEnded {
        session_id: String,
        duration_secs: i64,
    },
    Login,
    TaskCreated {
        task_id: TaskId,
        points: u32,
        follow_up_count: usize,
    },
    TaskEdited {
        task_id: TaskId,
        points: u32,
    },
    TaskDeleted {
        task_id: TaskId,
    },
    TaskCompleted {
        task_id: TaskId,
        points: u32,
        has_follow_up_responses: bool,
    },
    CelebrationShown {
        celebration: CelebrationKind,
        streak_count: Option<u32>,
    },
}

impl UsageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            UsageEvent::SessionStarted { .. } => "sessionStarted",
            UsageEvent::SessionEnded { .. } => "sessionEnded",
            UsageEvent::Login => "login",
            UsageEvent::TaskCreated { .. } => "taskCreated",
            UsageEvent::TaskEdited { .. } => "taskEdited",
            UsageEvent::TaskDeleted { .. } => "taskDeleted",
            UsageEvent::TaskCompleted { .. } => "taskCompleted",
            UsageEvent::CelebrationShown { .. } => "celebrationShown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: UsageEvent,
}

/// Everything persisted for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub daily_data: DailyLog,
    #[serde(default)]
    pub streaks: StreakResult,
    #[serde(default)]
    pub achievements: Achievements,
    #[serde(default)]
    pub usage: Vec<UsageRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub points: Option<i64>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUpSpec>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub responses: BTreeMap<usize, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub date: String,
    pub day: DayRecord,
    pub streak: StreakResult,
    pub celebrations: Vec<CelebrationEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodaySummary {
    pub date: String,
    pub completed: Vec<CompletionRecord>,
    pub earned_points: u64,
    pub possible_points: u64,
    pub percentage: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub today: TodaySummary,
    pub streak: StreakResult,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: String,
    pub completed_count: usize,
    pub level: u8,
    pub is_today: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Empty cells before the first day when weeks start on Sunday.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub year: Option<i32>,
    pub month: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPoint {
    pub date: String,
    pub completed_count: usize,
    pub points: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub week: String,
    pub start_date: String,
    pub end_date: String,
    pub completed_count: usize,
    pub points: u64,
    pub active_days: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub last_7_days: Vec<DailyPoint>,
    pub weekly_totals: Vec<WeeklyPoint>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub events: BTreeMap<String, u64>,
    pub sessions: u64,
    pub total_session_secs: i64,
    pub last_seen: Option<DateTime<Utc>>,
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// A day whose `completed` is missing or not a list reads as empty, and
// individual entries that cannot be parsed are dropped.
fn lenient_completions<'de, D>(deserializer: D) -> Result<Vec<CompletionRecord>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Array(items) = Value::deserialize(deserializer)? else {
        return Ok(Vec::new());
    };

    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

// Answers are read one by one; a damaged answer never costs the completion
// it belongs to.
fn lenient_responses<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<usize, FollowUpResponse>, D::Error>
where
    D: Deserializer<'de>,
{
    let Value::Object(answers) = Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };

    Ok(answers
        .into_iter()
        .filter_map(|(index, answer)| {
            let index = index.parse::<usize>().ok()?;
            let answer = serde_json::from_value(answer).ok()?;
            Some((index, answer))
        })
        .collect())
}

fn lenient_points<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Value::deserialize(deserializer)?.as_u64().unwrap_or(0))
}
