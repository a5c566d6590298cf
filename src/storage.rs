use crate::clock::parse_date_key;
use crate::models::{DailyLog, DayRecord, StreakResult, Task, UsageRecord, UserDocument};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::{fs, sync::Mutex};
use tracing::{debug, error, warn};

const MAX_USER_KEY_LEN: usize = 64;
const DAILY_DATA: &str = "dailyData";

/// Usage history is trimmed to the most recent records on every append.
pub const MAX_USAGE_RECORDS: usize = 1000;

type Fields = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid user key '{0}'")]
    InvalidUser(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode user document: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-user persistence for the task catalog, the daily log and the derived
/// records that hang off them.
///
/// Implementors provide whole-document reads and an atomic read-modify-write;
/// every record-level operation is built on those two.
pub trait HabitStore: Send + Sync {
    fn load_document(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<UserDocument, StoreError>> + Send;

    /// Applies `apply` to the user's document and persists the result before
    /// resolving. Concurrent updates to the same store never interleave.
    fn update_document<F, T>(
        &self,
        user: &str,
        apply: F,
    ) -> impl Future<Output = Result<T, StoreError>> + Send
    where
        F: FnOnce(&mut UserDocument) -> T + Send,
        T: Send;

    fn load_tasks(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Vec<Task>, StoreError>> + Send {
        async move { Ok(self.load_document(user).await?.tasks) }
    }

    fn save_tasks(
        &self,
        user: &str,
        tasks: Vec<Task>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.update_document(user, move |doc| doc.tasks = tasks)
    }

    fn load_daily_log(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<DailyLog, StoreError>> + Send {
        async move { Ok(self.load_document(user).await?.daily_data) }
    }

    /// Upserts a single day without touching any other date.
    fn save_day(
        &self,
        user: &str,
        date: &str,
        day: DayRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.update_document(user, move |doc| {
            doc.daily_data.insert(date.to_string(), day);
        })
    }

    fn load_streak(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<StreakResult, StoreError>> + Send {
        async move { Ok(self.load_document(user).await?.streaks) }
    }

    fn save_streak(
        &self,
        user: &str,
        streak: StreakResult,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.update_document(user, move |doc| doc.streaks = streak)
    }

    fn append_usage(
        &self,
        user: &str,
        records: Vec<UsageRecord>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send {
        self.update_document(user, move |doc| {
            doc.usage.extend(records);
            let overflow = doc.usage.len().saturating_sub(MAX_USAGE_RECORDS);
            doc.usage.drain(..overflow);
        })
    }

    fn load_usage(
        &self,
        user: &str,
    ) -> impl Future<Output = Result<Vec<UsageRecord>, StoreError>> + Send {
        async move { Ok(self.load_document(user).await?.usage) }
    }
}

pub fn validate_user(user: &str) -> Result<(), StoreError> {
    let valid = !user.is_empty()
        && user.len() <= MAX_USER_KEY_LEN
        && user
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidUser(user.to_string()))
    }
}

/// Durable store: one pretty-printed JSON document per user.
///
/// Updates only rewrite the fields and days they change. Everything else is
/// written back exactly as it was read, including entries the lenient reader
/// had to skip.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_path(&self, user: &str) -> Result<PathBuf, StoreError> {
        validate_user(user)?;
        Ok(self.root.join(format!("{user}.json")))
    }

    async fn read(&self, path: &Path) -> Result<Option<Value>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => Ok(Some(value)),
                Err(err) => {
                    error!(path = %path.display(), "failed to parse user document: {err}");
                    quarantine(path).await;
                    Ok(None)
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, path: &Path, value: &Value) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        let staging = path.with_extension("json.tmp");

        let mut file = fs::File::create(&staging).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&staging, path).await?;
        debug!(path = %path.display(), "persisted user document");
        Ok(())
    }
}

// Keeps an unreadable document around instead of letting the next write replace it.
async fn quarantine(path: &Path) {
    let backup = path.with_extension("json.corrupt");
    if let Err(err) = fs::copy(path, &backup).await {
        warn!(path = %path.display(), "could not back up unreadable document: {err}");
    }
}

impl HabitStore for FileStore {
    async fn load_document(&self, user: &str) -> Result<UserDocument, StoreError> {
        let path = self.document_path(user)?;
        let stored = self.read(&path).await?;
        Ok(stored.map(document_from_value).unwrap_or_default())
    }

    async fn update_document<F, T>(&self, user: &str, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UserDocument) -> T + Send,
        T: Send,
    {
        let path = self.document_path(user)?;
        let _guard = self.write_lock.lock().await;

        let stored = self.read(&path).await?;
        let before = stored.clone().map(document_from_value).unwrap_or_default();
        let mut doc = before.clone();
        let output = apply(&mut doc);

        let merged = merge_into_stored(stored, &before, &doc)?;
        self.write(&path, &merged).await?;
        Ok(output)
    }
}

/// Produces the JSON to persist after an update: `after` wherever it differs
/// from `before`, and the stored JSON everywhere else.
fn merge_into_stored(
    stored: Option<Value>,
    before: &UserDocument,
    after: &UserDocument,
) -> Result<Value, StoreError> {
    let Some(Value::Object(mut merged)) = stored else {
        return Ok(serde_json::to_value(after)?);
    };

    let mut before = fields_of(before)?;
    for (field, value) in fields_of(after)? {
        let previous = before.remove(&field);
        if field == DAILY_DATA {
            let days = merge_days(
                object(merged.remove(&field)),
                object(previous),
                object(Some(value)),
            );
            merged.insert(field, Value::Object(days));
        } else if previous.as_ref() != Some(&value) || !merged.contains_key(&field) {
            merged.insert(field, value);
        }
    }
    Ok(Value::Object(merged))
}

fn merge_days(mut stored: Fields, before: Fields, after: Fields) -> Fields {
    for date in before.keys() {
        if !after.contains_key(date) {
            stored.remove(date);
        }
    }
    for (date, day) in after {
        if before.get(&date) != Some(&day) {
            stored.insert(date, day);
        }
    }
    stored
}

fn fields_of(doc: &UserDocument) -> Result<Fields, StoreError> {
    Ok(object(Some(serde_json::to_value(doc)?)))
}

fn object(value: Option<Value>) -> Fields {
    match value {
        Some(Value::Object(fields)) => fields,
        _ => Fields::new(),
    }
}

/// In-process store used for anonymous sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<HashMap<String, UserDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HabitStore for MemoryStore {
    async fn load_document(&self, user: &str) -> Result<UserDocument, StoreError> {
        validate_user(user)?;
        let documents = self.documents.lock().await;
        Ok(documents.get(user).cloned().unwrap_or_default())
    }

    async fn update_document<F, T>(&self, user: &str, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UserDocument) -> T + Send,
        T: Send,
    {
        validate_user(user)?;
        let mut documents = self.documents.lock().await;
        Ok(apply(documents.entry(user.to_string()).or_default()))
    }
}

/// Store selected at startup.
#[derive(Debug)]
pub enum AnyStore {
    File(FileStore),
    Memory(MemoryStore),
}

impl HabitStore for AnyStore {
    async fn load_document(&self, user: &str) -> Result<UserDocument, StoreError> {
        match self {
            AnyStore::File(store) => store.load_document(user).await,
            AnyStore::Memory(store) => store.load_document(user).await,
        }
    }

    async fn update_document<F, T>(&self, user: &str, apply: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut UserDocument) -> T + Send,
        T: Send,
    {
        match self {
            AnyStore::File(store) => store.update_document(user, apply).await,
            AnyStore::Memory(store) => store.update_document(user, apply).await,
        }
    }
}

/// Reads a stored document field by field so one damaged record does not
/// take the rest of the user's data with it.
pub fn document_from_value(value: Value) -> UserDocument {
    let Value::Object(mut fields) = value else {
        warn!("user document is not an object; starting empty");
        return UserDocument::default();
    };

    let mut doc = UserDocument::default();
    if let Some(tasks) = fields.remove("tasks") {
        doc.tasks = lenient_list(tasks, "task");
    }
    if let Some(days) = fields.remove("dailyData") {
        doc.daily_data = lenient_daily_log(days);
    }
    if let Some(streaks) = fields.remove("streaks") {
        doc.streaks = lenient_record(streaks, "streaks");
    }
    if let Some(achievements) = fields.remove("achievements") {
        doc.achievements = lenient_record(achievements, "achievements");
    }
    if let Some(usage) = fields.remove("usage") {
        doc.usage = lenient_list(usage, "usage record");
    }
    doc
}

fn lenient_daily_log(value: Value) -> DailyLog {
    let Value::Object(days) = value else {
        warn!("daily log is not an object; ignoring it");
        return DailyLog::new();
    };

    let mut log = DailyLog::new();
    for (date, day) in days {
        if parse_date_key(&date).is_none() {
            warn!(%date, "skipping day with invalid date key");
            continue;
        }
        match serde_json::from_value::<DayRecord>(day) {
            Ok(record) => {
                log.insert(date, record);
            }
            Err(err) => warn!(%date, "skipping malformed day record: {err}"),
        }
    }
    log
}

fn lenient_list<T: DeserializeOwned>(value: Value, what: &str) -> Vec<T> {
    let Value::Array(items) = value else {
        warn!("expected a list of {what}s; ignoring it");
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!("skipping malformed {what}: {err}");
                None
            }
        })
        .collect()
}

fn lenient_record<T: DeserializeOwned + Default>(value: Value, what: &str) -> T {
    serde_json::from_value(value).unwrap_or_else(|err| {
        warn!("ignoring malformed {what}: {err}");
        T::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CompletionRecord, TaskId, UsageEvent};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn day(task: &str) -> DayRecord {
        DayRecord {
            completed: vec![CompletionRecord {
                task_id: TaskId::new(task),
                completed_at: "2026-01-05T09:00:00Z".parse().unwrap(),
                follow_up_responses: BTreeMap::new(),
            }],
            total_points: 10,
        }
    }

    #[test]
    fn user_keys_are_path_safe() {
        assert!(validate_user("local").is_ok());
        assert!(validate_user("user_42-b").is_ok());
        let too_long = "x".repeat(65);
        for bad in ["", "../etc", "a/b", "with space", too_long.as_str()] {
            assert!(matches!(validate_user(bad), Err(StoreError::InvalidUser(_))), "{bad}");
        }
    }

    #[tokio::test]
    async fn memory_store_days_merge_without_clobbering() {
        let store = MemoryStore::new();
        store.save_day("u", "2026-01-04", day("a")).await.unwrap();
        store.save_day("u", "2026-01-05", day("b")).await.unwrap();
        store.save_day("u", "2026-01-05", day("c")).await.unwrap();

        let log = store.load_daily_log("u").await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log["2026-01-04"], day("a"));
        assert_eq!(log["2026-01-05"], day("c"));
        assert!(store.load_daily_log("someone-else").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_day("u", "2026-01-05", day("a")).await.unwrap();
        store
            .save_streak(
                "u",
                StreakResult {
                    current: 1,
                    best: 1,
                    last_completion_date: Some("2026-01-05".into()),
                },
            )
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path());
        let doc = reopened.load_document("u").await.unwrap();
        assert_eq!(doc.daily_data["2026-01-05"], day("a"));
        assert_eq!(doc.streaks.best, 1);
        assert!(!dir.path().join("u.json.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_leaves_untouched_days_as_stored() {
        let dir = tempfile::tempdir().unwrap();
        let damaged_day = json!({
            "completed": [
                {
                    "taskId": "a",
                    "completedAt": "2026-01-03T09:00:00Z",
                    "followUpResponses": { "0": true }
                },
                42
            ],
            "totalPoints": 10,
            "note": "written by an older client"
        });
        let unpadded_day = json!({
            "completed": [{ "taskId": "a", "completedAt": "2026-01-04T09:00:00Z" }],
            "totalPoints": 10
        });
        let stored = json!({
            "tasks": [{ "id": "a", "name": "stretch", "points": 10 }],
            "dailyData": {
                "2026-01-03": damaged_day.clone(),
                "2026-1-4": unpadded_day.clone()
            },
            "theme": "dark"
        });
        let path = dir.path().join("u.json");
        std::fs::write(&path, serde_json::to_vec(&stored).unwrap()).unwrap();

        let store = FileStore::new(dir.path());
        let log = store.load_daily_log("u").await.unwrap();
        assert!(log["2026-01-03"].is_active());
        assert!(!log.contains_key("2026-1-4"));

        store.save_day("u", "2026-01-05", day("a")).await.unwrap();

        let raw: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["dailyData"]["2026-01-03"], damaged_day);
        assert_eq!(raw["dailyData"]["2026-1-4"], unpadded_day);
        assert_eq!(raw["dailyData"]["2026-01-05"], serde_json::to_value(day("a")).unwrap());
        assert_eq!(raw["tasks"], stored["tasks"]);
        assert_eq!(raw["theme"], "dark");
    }

    #[tokio::test]
    async fn file_store_rewrites_only_changed_days() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_day("u", "2026-01-04", day("a")).await.unwrap();
        store.save_day("u", "2026-01-05", day("b")).await.unwrap();

        store
            .update_document("u", |doc| {
                doc.daily_data.remove("2026-01-04");
                doc.daily_data.insert("2026-01-05".into(), day("c"));
            })
            .await
            .unwrap();

        let log = store.load_daily_log("u").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log["2026-01-05"], day("c"));
    }

    #[tokio::test]
    async fn usage_history_keeps_the_most_recent_records() {
        let store = MemoryStore::new();
        let record = |minute: i64| UsageRecord {
            at: "2026-01-05T09:00:00Z".parse::<chrono::DateTime<chrono::Utc>>().unwrap()
                + chrono::Duration::minutes(minute),
            event: UsageEvent::Login,
        };

        let first: Vec<_> = (0..MAX_USAGE_RECORDS as i64).map(record).collect();
        store.append_usage("u", first).await.unwrap();
        store.append_usage("u", vec![record(-1), record(5000)]).await.unwrap();

        let usage = store.load_usage("u").await.unwrap();
        assert_eq!(usage.len(), MAX_USAGE_RECORDS);
        assert_eq!(usage[0], record(2));
        assert_eq!(usage.last(), Some(&record(5000)));
    }

    #[tokio::test]
    async fn file_store_missing_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested"));
        assert_eq!(store.load_document("nobody").await.unwrap(), UserDocument::default());
        assert!(matches!(
            store.load_document("../escape").await,
            Err(StoreError::InvalidUser(_))
        ));
    }

    #[tokio::test]
    async fn file_store_keeps_a_copy_of_unreadable_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("u.json"), b"{ not json").unwrap();

        let store = FileStore::new(dir.path());
        assert_eq!(store.load_document("u").await.unwrap(), UserDocument::default());
        assert!(dir.path().join("u.json.corrupt").exists());
    }

    #[tokio::test]
    async fn any_store_delegates() {
        let store = AnyStore::Memory(MemoryStore::new());
        store.save_tasks("u", Vec::new()).await.unwrap();
        store.save_day("u", "2026-01-05", day("a")).await.unwrap();
        assert_eq!(store.load_daily_log("u").await.unwrap().len(), 1);
    }

    #[test]
    fn damaged_records_are_dropped_individually() {
        let doc = document_from_value(json!({
            "tasks": [
                { "id": 1717000000000i64, "name": "stretch", "points": 5 },
                { "name": "no id" }
            ],
            "dailyData": {
                "2026-01-04": { "completed": [], "totalPoints": 0 },
                "2026-01-05": { "completed": "broken" },
                "2026-01-06": "not a day",
                "someday": { "completed": [] }
            },
            "streaks": { "current": "lots" },
            "usage": 3
        }));

        assert_eq!(doc.tasks.len(), 1);
        assert_eq!(doc.tasks[0].id.as_str(), "1717000000000");
        assert_eq!(
            doc.daily_data.keys().cloned().collect::<Vec<_>>(),
            vec!["2026-01-04", "2026-01-05"]
        );
        assert!(!doc.daily_data["2026-01-05"].is_active());
        assert_eq!(doc.streaks, StreakResult::default());
        assert!(doc.usage.is_empty());
    }

    #[test]
    fn non_object_document_is_empty() {
        assert_eq!(document_from_value(json!([1, 2])), UserDocument::default());
    }
}
