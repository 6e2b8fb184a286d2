use crate::config::LoggingConfig;
use crate::log_buffer::{LogBuffer, LogBufferLayer};
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging with the log buffer layer and optional file output
///
/// The returned guard flushes the file writer; keep it alive for the whole run.
pub fn init(config: &LoggingConfig, log_buffer: LogBuffer) -> Option<WorkerGuard> {
    // Default to info level for all modules; can be overridden via RUST_LOG env var
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(LogBufferLayer::new(log_buffer));

    if !config.enabled {
        subscriber.init();
        return None;
    }

    use std::fs;
    use tracing_appender::rolling;

    if let Err(e) = fs::create_dir_all(&config.directory) {
        eprintln!("Failed to create log directory {}: {}", config.directory, e);
    }

    cleanup_old_logs(config);

    let file_appender = match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.directory, &config.file_prefix),
        "never" => rolling::never(&config.directory, &config.file_prefix),
        _ => rolling::daily(&config.directory, &config.file_prefix), // default to daily
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    subscriber
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Some(guard)
}

/// Clean up old log files based on retention policy
pub fn cleanup_old_logs(logging_config: &LoggingConfig) {
    use std::fs;
    use std::time::SystemTime;

    // Skip cleanup if both max_files and max_age_days are 0 (unlimited)
    if logging_config.max_files == 0 && logging_config.max_age_days == 0 {
        return;
    }

    let log_dir = std::path::Path::new(&logging_config.directory);
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<_> = match fs::read_dir(log_dir) {
        Ok(entries) => entries
            .filter_map(|entry_res| {
                let entry = entry_res.ok()?;
                let metadata = entry.metadata().ok()?;

                if !metadata.is_file() {
                    return None;
                }

                let file_name = entry.file_name();
                let name = file_name.to_str()?;

                if !name.starts_with(&logging_config.file_prefix) {
                    return None;
                }

                let modified = metadata.modified().ok()?;
                Some((entry.path(), modified))
            })
            .collect(),
        Err(e) => {
            eprintln!("Failed to read log directory: {}", e);
            return;
        }
    };

    // Sort by modified time (newest first)
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    let now = SystemTime::now();
    let max_age_duration = Duration::from_secs((logging_config.max_age_days as u64) * 24 * 60 * 60);
    let mut deleted_count = 0;

    for (idx, (path, modified)) in log_files.iter().enumerate() {
        let over_count = logging_config.max_files > 0 && idx >= logging_config.max_files as usize;
        let over_age = logging_config.max_age_days > 0
            && now
                .duration_since(*modified)
                .map(|age| age > max_age_duration)
                .unwrap_or(false);

        if over_count || over_age {
            match fs::remove_file(path) {
                Ok(_) => deleted_count += 1,
                Err(e) => eprintln!("Failed to delete log file {:?}: {}", path, e),
            }
        }
    }

    if deleted_count > 0 {
        eprintln!("Cleaned up {} old log file(s)", deleted_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            std::fs::write(dir.path().join(format!("gym-bridge-server.{}", i)), "x").unwrap();
            std::thread::sleep(Duration::from_millis(20));
        }
        std::fs::write(dir.path().join("unrelated.txt"), "x").unwrap();

        let config = LoggingConfig {
            directory: dir.path().to_string_lossy().into_owned(),
            max_files: 2,
            max_age_days: 0,
            ..LoggingConfig::default()
        };
        cleanup_old_logs(&config);

        let mut remaining: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec!["gym-bridge-server.2", "gym-bridge-server.3", "unrelated.txt"]
        );
    }
}
