use crate::clock::Clock;
use crate::models::{UsageEvent, UsageRecord, UsageSummary};
use crate::storage::{HabitStore, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Returned by [`start_session`]; the caller hands its id back to
/// [`end_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHandle {
    pub id: String,
    pub user: String,
    pub started_at: DateTime<Utc>,
}

pub async fn start_session<S: HabitStore>(
    store: &S,
    clock: &dyn Clock,
    user: &str,
) -> SessionHandle {
    let handle = SessionHandle {
        id: ulid::Ulid::new().to_string(),
        user: user.to_string(),
        started_at: clock.now(),
    };

    let started = UsageEvent::SessionStarted {
        session_id: handle.id.clone(),
    };
    track_all(store, clock, user, vec![started, UsageEvent::Login]).await;
    info!(user, session = %handle.id, "session started");

    handle
}

/// Closes an open session of `user`. The duration is measured from the
/// stored start, so nothing the caller sends can stretch it. Returns `false`
/// when `user` has no open session with that id.
pub async fn end_session<S: HabitStore>(
    store: &S,
    clock: &dyn Clock,
    user: &str,
    session_id: &str,
) -> Result<bool, StoreError> {
    let records = store.load_usage(user).await?;
    let Some(started_at) = open_session_start(&records, session_id) else {
        warn!(user, session = session_id, "no open session to end");
        return Ok(false);
    };

    let duration_secs = (clock.now() - started_at).num_seconds().max(0);
    let ended = UsageEvent::SessionEnded {
        session_id: session_id.to_string(),
        duration_secs,
    };
    track(store, clock, user, ended).await;
    info!(user, session = session_id, duration_secs, "session ended");
    Ok(true)
}

fn open_session_start(records: &[UsageRecord], session_id: &str) -> Option<DateTime<Utc>> {
    let mut started_at = None;
    for record in records {
        match &record.event {
            UsageEvent::SessionStarted { session_id: id } if id == session_id => {
                started_at = Some(record.at);
            }
            UsageEvent::SessionEnded { session_id: id, .. } if id == session_id => {
                return None;
            }
            _ => {}
        }
    }
    started_at
}

/// Records a usage event. Failures are logged and otherwise ignored.
pub async fn track<S: HabitStore>(store: &S, clock: &dyn Clock, user: &str, event: UsageEvent) {
    track_all(store, clock, user, vec![event]).await;
}

/// Records several events with a single store write.
pub async fn track_all<S: HabitStore>(
    store: &S,
    clock: &dyn Clock,
    user: &str,
    events: Vec<UsageEvent>,
) {
    let at = clock.now();
    let names: Vec<&'static str> = events.iter().map(UsageEvent::name).collect();
    let records = events
        .into_iter()
        .map(|event| UsageRecord { at, event })
        .collect();
    if let Err(err) = store.append_usage(user, records).await {
        warn!(user, events = ?names, "failed to record usage events: {err}");
    }
}

pub fn summarize(records: &[UsageRecord]) -> UsageSummary {
    let mut summary = UsageSummary::default();
    for record in records {
        *summary
            .events
            .entry(record.event.name().to_string())
            .or_default() += 1;

        match &record.event {
            UsageEvent::SessionStarted { .. } => summary.sessions += 1,
            UsageEvent::SessionEnded { duration_secs, .. } => {
                summary.total_session_secs += duration_secs
            }
            _ => {}
        }

        summary.last_seen = summary.last_seen.max(Some(record.at));
    }
    summary
}
