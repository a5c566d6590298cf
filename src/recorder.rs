use crate::celebrations::{CelebrationEvent, CelebrationKind, evaluate_celebrations};
use crate::clock::{Clock, date_key};
use crate::followups::{ValidationError, build_task, validate_responses};
use crate::models::{
    CompletionOutcome, CompletionRecord, Overview, StreakResult, Task, TaskDraft, TaskId,
    UsageEvent,
};
use crate::stats::build_today;
use crate::storage::{HabitStore, StoreError, validate_user};
use crate::streak::compute_streaks;
use crate::usage;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("unknown task '{0}'")]
    UnknownTask(TaskId),

    #[error("task '{0}' is already completed today")]
    AlreadyCompleted(TaskId),
}

type UserLocks = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Exclusive access to one user's data. The user's entry leaves the lock map
/// once nobody holds or waits for it.
struct UserGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    user: String,
    locks: &'a UserLocks,
}

impl Drop for UserGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Waiters clone the Arc under this same lock, so a count of one
        // means the map holds the only reference.
        if locks
            .get(&self.user)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.user);
        }
    }
}

/// Orchestrates completions and catalog edits against a [`HabitStore`].
///
/// Every mutating operation holds a per-user lock for its whole
/// read-modify-write, so two actions for the same user never interleave.
pub struct Recorder<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    user_locks: UserLocks,
}

impl<S: HabitStore> Recorder<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            user_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    async fn lock_user(&self, user: &str) -> Result<UserGuard<'_>, StoreError> {
        validate_user(user)?;
        let lock = {
            let mut locks = self.user_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(user.to_string()).or_default())
        };
        let mut guard = UserGuard {
            guard: None,
            user: user.to_string(),
            locks: &self.user_locks,
        };
        guard.guard = Some(lock.lock_owned().await);
        Ok(guard)
    }

    /// Marks `task_id` done for today and reports the new streak and any
    /// celebrations, most important first.
    pub async fn record_completion(
        &self,
        user: &str,
        task_id: &TaskId,
        raw_responses: &BTreeMap<usize, Value>,
    ) -> Result<CompletionOutcome, RecordError> {
        let _guard = self.lock_user(user).await?;
        let today = self.clock.today();
        let date = date_key(today);

        let catalog = self.store.load_tasks(user).await?;
        let task = catalog
            .iter()
            .find(|task| &task.id == task_id)
            .ok_or_else(|| RecordError::UnknownTask(task_id.clone()))?;
        let responses = validate_responses(task, raw_responses)?;

        let log = self.store.load_daily_log(user).await?;
        let mut day = log.get(&date).cloned().unwrap_or_default();
        if day.contains_task(task_id) {
            return Err(RecordError::AlreadyCompleted(task_id.clone()));
        }

        let has_follow_up_responses = !responses.is_empty();
        day.completed.push(CompletionRecord {
            task_id: task.id.clone(),
            completed_at: self.clock.now(),
            follow_up_responses: responses,
        });
        day.recompute_points(&catalog);
        self.store.save_day(user, &date, day.clone()).await?;

        // Streaks are derived from what the store now holds, not from local state.
        let log = self.store.load_daily_log(user).await?;
        let day = log.get(&date).cloned().unwrap_or(day);
        let streak = compute_streaks(&log, today);

        let mut celebrations = evaluate_celebrations(&day.completed, &catalog, &streak, &log);
        self.settle(user, &streak, &mut celebrations).await;

        info!(
            user,
            task = %task.id,
            date = %date,
            current = streak.current,
            best = streak.best,
            celebrations = celebrations.len(),
            "task completed"
        );

        let mut events = vec![UsageEvent::TaskCompleted {
            task_id: task.id.clone(),
            points: task.points,
            has_follow_up_responses,
        }];
        if let Some(shown) = celebrations.first() {
            events.push(UsageEvent::CelebrationShown {
                celebration: shown.kind,
                streak_count: shown.data.map(|data| data.streak_count),
            });
        }
        usage::track_all(self.store.as_ref(), self.clock(), user, events).await;

        Ok(CompletionOutcome {
            date,
            day,
            streak,
            celebrations,
        })
    }

    /// Recomputes everything shown after login from the stored log.
    pub async fn overview(&self, user: &str) -> Result<Overview, RecordError> {
        validate_user(user)?;
        let today = self.clock.today();
        let doc = self.store.load_document(user).await?;

        let streak = compute_streaks(&doc.daily_data, today);
        if streak != doc.streaks {
            self.cache_streak(user, &streak).await;
        }
        let day = doc.daily_data.get(&date_key(today)).cloned().unwrap_or_default();

        Ok(Overview {
            today: build_today(today, &day, &doc.tasks),
            streak,
            tasks: doc.tasks,
        })
    }

    pub async fn streak(&self, user: &str) -> Result<StreakResult, RecordError> {
        validate_user(user)?;
        let log = self.store.load_daily_log(user).await?;
        Ok(compute_streaks(&log, self.clock.today()))
    }

    pub async fn list_tasks(&self, user: &str) -> Result<Vec<Task>, RecordError> {
        validate_user(user)?;
        Ok(self.store.load_tasks(user).await?)
    }

    pub async fn create_task(&self, user: &str, draft: TaskDraft) -> Result<Task, RecordError> {
        let task = build_task(draft, TaskId::generate())?;
        let _guard = self.lock_user(user).await?;

        let stored = task.clone();
        self.store
            .update_document(user, move |doc| doc.tasks.push(stored))
            .await?;
        info!(user, task = %task.id, points = task.points, "task created");

        usage::track(
            self.store.as_ref(),
            self.clock(),
            user,
            UsageEvent::TaskCreated {
                task_id: task.id.clone(),
                points: task.points,
                follow_up_count: task.follow_ups.len(),
            },
        )
        .await;
        Ok(task)
    }

    /// Replaces a task in place, keeping its id. Today's point total is
    /// refreshed since it depends on task points.
    pub async fn update_task(
        &self,
        user: &str,
        task_id: &TaskId,
        draft: TaskDraft,
    ) -> Result<Task, RecordError> {
        let task = build_task(draft, task_id.clone())?;
        let _guard = self.lock_user(user).await?;
        let date = date_key(self.clock.today());

        let stored = task.clone();
        let replaced = self
            .store
            .update_document(user, move |doc| {
                let slot = doc.tasks.iter_mut().find(|existing| existing.id == stored.id);
                let Some(slot) = slot else {
                    return false;
                };
                *slot = stored;
                if let Some(day) = doc.daily_data.get_mut(&date) {
                    day.recompute_points(&doc.tasks);
                }
                true
            })
            .await?;
        if !replaced {
            return Err(RecordError::UnknownTask(task_id.clone()));
        }
        info!(user, task = %task.id, "task updated");

        usage::track(
            self.store.as_ref(),
            self.clock(),
            user,
            UsageEvent::TaskEdited {
                task_id: task.id.clone(),
                points: task.points,
            },
        )
        .await;
        Ok(task)
    }

    /// Removes a task and today's completion of it. Completions on earlier
    /// days stay in the log as orphans.
    pub async fn delete_task(&self, user: &str, task_id: &TaskId) -> Result<(), RecordError> {
        let _guard = self.lock_user(user).await?;
        let today = self.clock.today();
        let date = date_key(today);

        let target = task_id.clone();
        let removed = self
            .store
            .update_document(user, move |doc| {
                let before = doc.tasks.len();
                doc.tasks.retain(|task| task.id != target);
                if doc.tasks.len() == before {
                    return false;
                }
                if let Some(day) = doc.daily_data.get_mut(&date) {
                    day.completed.retain(|record| record.task_id != target);
                    day.recompute_points(&doc.tasks);
                }
                true
            })
            .await?;
        if !removed {
            return Err(RecordError::UnknownTask(task_id.clone()));
        }

        let log = self.store.load_daily_log(user).await?;
        self.cache_streak(user, &compute_streaks(&log, today)).await;
        info!(user, task = %task_id, "task deleted");

        usage::track(
            self.store.as_ref(),
            self.clock(),
            user,
            UsageEvent::TaskDeleted {
                task_id: task_id.clone(),
            },
        )
        .await;
        Ok(())
    }

    async fn cache_streak(&self, user: &str, streak: &StreakResult) {
        if let Err(err) = self.store.save_streak(user, streak.clone()).await {
            warn!(user, "failed to cache streak: {err}");
        }
    }

    // Caches the streak and remembers the first completion in one write. The
    // log-based first-task rule would fire again if history were wiped, so the
    // marker suppresses it from then on.
    async fn settle(
        &self,
        user: &str,
        streak: &StreakResult,
        celebrations: &mut Vec<CelebrationEvent>,
    ) {
        let now = self.clock.now();
        let cached = streak.clone();
        let settled = self
            .store
            .update_document(user, move |doc| {
                doc.streaks = cached;
                let seen_before = doc.achievements.first_completion_at.is_some();
                doc.achievements.first_completion_at.get_or_insert(now);
                seen_before
            })
            .await;

        match settled {
            Ok(true) => celebrations.retain(|event| event.kind != CelebrationKind::FirstTask),
            Ok(false) => {}
            Err(err) => warn!(user, "failed to save streak and achievements: {err}"),
        }
    }
}
