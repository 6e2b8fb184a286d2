use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Install the global subscriber: stdout always, a rolling file when enabled
///
/// Keep the returned guard alive for the whole run so file output is flushed.
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    // RUST_LOG wins; info otherwise
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if !config.enabled {
        subscriber.init();
        return None;
    }

    if let Err(e) = fs::create_dir_all(&config.directory) {
        eprintln!("Failed to create log directory {}: {}", config.directory, e);
    }
    prune_log_files(Path::new(&config.directory), &config.file_prefix, config.max_files);

    use tracing_appender::rolling;
    let file_appender = match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.directory, &config.file_prefix),
        "never" => rolling::never(&config.directory, &config.file_prefix),
        _ => rolling::daily(&config.directory, &config.file_prefix),
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

/// Delete the oldest `{prefix}*` files beyond `max_files`; returns how many were removed
pub fn prune_log_files(dir: &Path, prefix: &str, max_files: usize) -> usize {
    if max_files == 0 {
        return 0;
    }

    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let mut files: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some((entry.path(), metadata.modified().ok()?))
        })
        .collect();

    if files.len() <= max_files {
        return 0;
    }

    // Newest first
    files.sort_by(|a, b| b.1.cmp(&a.1));

    let mut removed = 0;
    for (path, _) in files.into_iter().skip(max_files) {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to remove old log file {:?}: {}", path, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_prune_keeps_newest_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            let path = dir.path().join(format!("gym-bridge-agent.2026-01-0{}", i + 1));
            fs::write(&path, "line").unwrap();
            let file = fs::File::options().write(true).open(&path).unwrap();
            file.set_modified(SystemTime::now() - Duration::from_secs(3600 * (4 - i)))
                .unwrap();
        }
        fs::write(dir.path().join("other.log"), "keep").unwrap();

        let removed = prune_log_files(dir.path(), "gym-bridge-agent", 2);

        assert_eq!(removed, 2);
        assert!(dir.path().join("gym-bridge-agent.2026-01-04").exists());
        assert!(dir.path().join("gym-bridge-agent.2026-01-03").exists());
        assert!(!dir.path().join("gym-bridge-agent.2026-01-01").exists());
        assert!(dir.path().join("other.log").exists());
    }

    #[test]
    fn test_prune_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("gym-bridge-agent.a"), "x").unwrap();
        assert_eq!(prune_log_files(dir.path(), "gym-bridge-agent", 0), 0);
    }
}
