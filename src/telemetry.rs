use crate::errors::{AppError, AppResult};
use crate::settings::LogSettings;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

pub fn init_tracing(settings: &LogSettings) -> AppResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|error| AppError::Config(error.to_string()))?;

    let (writer, guard) = match &settings.directory {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)?;
            let file_appender = tracing_appender::rolling::daily(log_dir, "spans-metrics.log");
            tracing_appender::non_blocking(file_appender)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let _ = LOG_GUARD.set(guard);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    let result = if settings.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|error| AppError::Internal(error.to_string()))
}
