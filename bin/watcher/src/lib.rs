pub mod app;
pub mod config;
pub mod message;
pub mod metrics;
pub mod scheduler;
pub mod service;

pub use app::App;
pub use scheduler::{EvaluationReport, SchedulePolicy, Scheduler, TickReport};
pub use service::{ReminderOutcome, ReminderService, ServiceError};

use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins over the default `info`.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
