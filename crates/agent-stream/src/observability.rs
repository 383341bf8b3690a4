use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "agent-stream.logs.jsonl";
/// Only this crate's events unless `AGENT_STREAM_LOG_LEVEL` or `RUST_LOG` widen it.
const DEFAULT_FILTER: &str = "agent_stream=info";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn logging_enabled() -> bool {
    std::env::var("AGENT_STREAM_OBSERVABILITY_ENABLED")
        .ok()
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true)
}

fn resolve_env_filter() -> tracing_subscriber::EnvFilter {
    if let Ok(level) = std::env::var("AGENT_STREAM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER))
}

fn json_log_path() -> Option<PathBuf> {
    std::env::var("AGENT_STREAM_JSON_LOG_PATH")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

/// Splits a JSON log path into the directory and file name for the appender.
fn split_log_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(DEFAULT_LOG_FILE)
        .to_string();
    (dir, file_name)
}

/// Installs the process-wide tracing subscriber once.
///
/// Embedding applications that install their own subscriber can skip this;
/// the supervisor only emits `tracing` events.
///
/// Environment variables:
/// - `AGENT_STREAM_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `AGENT_STREAM_LOG_LEVEL`: level/filter override (`info`, `debug`, etc.).
/// - `AGENT_STREAM_JSON_LOG_PATH`: when set, logs are written as JSONL to that
///   file; otherwise they go to stdout in a compact console format.
/// - `RUST_LOG`: fallback filter. Without either, only `agent_stream` events at
///   `info` and above are shown.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !logging_enabled() {
            return;
        }

        let json_layer = json_log_path().map(|path| {
            let (dir, file_name) = split_log_path(&path);
            let _ = std::fs::create_dir_all(&dir);
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(tracing_appender::rolling::never(dir, file_name))
        });
        let console_layer = json_layer.is_none().then(|| {
            tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout)
        });
        let _ = tracing_subscriber::registry()
            .with(resolve_env_filter())
            .with(json_layer)
            .with(console_layer)
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_flag_spellings() {
        assert_eq!(parse_bool_env(" ON "), Some(true));
        assert_eq!(parse_bool_env("disabled"), Some(false));
        assert_eq!(parse_bool_env("0"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn splits_log_paths() {
        assert_eq!(
            split_log_path(Path::new("logs/stream.jsonl")),
            (PathBuf::from("logs"), "stream.jsonl".to_string())
        );
        assert_eq!(
            split_log_path(Path::new("stream.jsonl")),
            (PathBuf::from("."), "stream.jsonl".to_string())
        );
    }

    #[test]
    fn default_filter_is_scoped_to_this_crate() {
        let filter = tracing_subscriber::EnvFilter::try_new(DEFAULT_FILTER).expect("filter");
        assert_eq!(filter.to_string(), "agent_stream=info");
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}
