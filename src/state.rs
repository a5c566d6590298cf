use crate::clock::Clock;
use crate::recorder::Recorder;
use crate::storage::AnyStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<Recorder<AnyStore>>,
    pub default_user: Arc<str>,
}

impl AppState {
    pub fn new(store: AnyStore, clock: Arc<dyn Clock>, default_user: impl Into<Arc<str>>) -> Self {
        Self {
            recorder: Arc::new(Recorder::new(Arc::new(store), clock)),
            default_user: default_user.into(),
        }
    }
}
