//! Append-only JSON line log with per-process correlation ids.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use directories::ProjectDirs;
use pws_core::APP_NAME;
use serde_json::{Value, json};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::config::AppConfig;

pub const LOG_LEVEL_ENV: &str = "PWS_LOG";
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;
const REDACTED: &str = "[REDACTED]";

static LOG_CONTEXT: OnceLock<LogContext> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone)]
struct LogContext {
    level: LogLevel,
    correlation_id: String,
    log_path: PathBuf,
}

/// Logging is best effort: without a resolvable state directory every log
/// call becomes a no-op.
pub fn init_logging(config: &AppConfig, level_override: Option<String>) {
    if LOG_CONTEXT.get().is_some() {
        return;
    }

    let Some(project_dirs) = ProjectDirs::from("", "", APP_NAME) else {
        return;
    };
    let state_dir = project_dirs
        .state_dir()
        .unwrap_or_else(|| project_dirs.data_local_dir());
    if std::fs::create_dir_all(state_dir).is_err() {
        return;
    }

    let level_raw = level_override.unwrap_or_else(|| config.logging.level.clone());
    let context = LogContext {
        level: LogLevel::parse(&level_raw).unwrap_or(LogLevel::Info),
        correlation_id: Uuid::new_v4().to_string(),
        log_path: state_dir.join(format!("{APP_NAME}.log")),
    };
    let _ = rotate_log_if_needed(&context.log_path);
    let _ = LOG_CONTEXT.set(context);
}

pub fn audit_event(event: &str, fields: Value) {
    let mut object = serde_json::Map::new();
    object.insert("event".to_owned(), json!(event));
    if let Value::Object(extra) = fields {
        object.extend(extra);
    } else {
        object.insert("fields".to_owned(), fields);
    }
    log_json_line(LogLevel::Info, event, "audit", Value::Object(object));
}

pub fn log_json_line(level: LogLevel, msg: &str, module: &str, fields: Value) {
    let Some(context) = LOG_CONTEXT.get() else {
        return;
    };
    if level > context.level {
        return;
    }

    let Some(line) = format_line(level, msg, module, &context.correlation_id, fields) else {
        return;
    };

    let _ = rotate_log_if_needed(&context.log_path);
    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&context.log_path)
    else {
        return;
    };
    let _ = writeln!(file, "{line}");
}

fn format_line(
    level: LogLevel,
    msg: &str,
    module: &str,
    correlation_id: &str,
    fields: Value,
) -> Option<String> {
    let now = OffsetDateTime::now_utc();
    let ts = now
        .format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string());

    let mut object = serde_json::Map::new();
    object.insert("ts".to_owned(), json!(ts));
    object.insert("level".to_owned(), json!(level.as_str()));
    object.insert("msg".to_owned(), json!(msg));
    object.insert("correlation_id".to_owned(), json!(correlation_id));
    object.insert("module".to_owned(), json!(module));

    match scrub_log_value(fields) {
        Value::Object(extra) => object.extend(extra),
        other => {
            object.insert("fields".to_owned(), other);
        }
    }

    serde_json::to_string(&Value::Object(object))
        .ok()
        .filter(|line| !line.is_empty())
}

fn rotate_log_if_needed(path: &Path) -> Result<(), std::io::Error> {
    let metadata = match std::fs::metadata(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    if metadata.len() < LOG_ROTATE_BYTES {
        return Ok(());
    }

    let rotated = path.with_extension("log.1");
    if rotated.exists() {
        let _ = std::fs::remove_file(&rotated);
    }
    std::fs::rename(path, rotated)
}

pub fn scrub_log_value(value: Value) -> Value {
    match value {
        Value::Object(values) => Value::Object(
            values
                .into_iter()
                .map(|(key, value)| {
                    if is_sensitive_log_key(&key) {
                        (key, json!(REDACTED))
                    } else {
                        (key, scrub_log_value(value))
                    }
                })
                .collect(),
        ),
        Value::Array(values) => Value::Array(values.into_iter().map(scrub_log_value).collect()),
        other => other,
    }
}

fn is_sensitive_log_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    matches!(
        lowered.as_str(),
        "password" | "body" | "plaintext" | "otp_uri" | "code" | "api_key"
    ) || lowered.contains("secret")
}
