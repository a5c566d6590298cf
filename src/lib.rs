pub mod app;
pub mod celebrations;
pub mod clock;
pub mod config;
pub mod errors;
pub mod followups;
pub mod handlers;
pub mod models;
pub mod recorder;
pub mod stats;
pub mod storage;
pub mod streak;
pub mod usage;
pub mod state;

pub use app::router;
pub use celebrations::evaluate_celebrations;
pub use config::Config;
pub use recorder::Recorder;
pub use state::AppState;
pub use streak::compute_streaks;
