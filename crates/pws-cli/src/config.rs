use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use directories::{BaseDirs, ProjectDirs};
use pws_core::{APP_NAME, DEFAULT_ENDPOINT, DEFAULT_LENGTH, GenerationPolicy};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliExitCode, map_io_error};

pub const STORE_DIR_ENV: &str = "PASSWORD_STORE_DIR";
pub const EDITOR_ENV: &str = "EDITOR";
pub const API_KEY_ENV: &str = "HAVEIBEENPWND_API_KEY";

const DEFAULT_STORE_DIR_NAME: &str = ".password-store";
const MAX_GENERATED_LENGTH: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store_dir: Option<PathBuf>,
    pub editor: String,
    pub gpg_program: String,
    pub generator: GeneratorConfig,
    pub breach: BreachConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            editor: "vim".to_owned(),
            gpg_program: "gpg".to_owned(),
            generator: GeneratorConfig::default(),
            breach: BreachConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub length: usize,
    #[serde(flatten)]
    pub policy: GenerationPolicy,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            policy: GenerationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Zero keeps the HTTP client's default timeout.
    pub timeout_seconds: u64,
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            api_key: None,
            timeout_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub clipboard_timeout_seconds: u32,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            clipboard_timeout_seconds: 45,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}

impl AppConfig {
    /// Layers environment values over the file values. Empty values are
    /// ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = non_empty(STORE_DIR_ENV) {
            self.store_dir = Some(PathBuf::from(dir));
        }
        if let Some(editor) = non_empty(EDITOR_ENV) {
            self.editor = editor;
        }
        if let Some(api_key) = non_empty(API_KEY_ENV) {
            self.breach.api_key = Some(api_key);
        }
    }

    pub fn resolved_store_dir(&self) -> Result<PathBuf, CliError> {
        if let Some(dir) = &self.store_dir {
            return Ok(dir.clone());
        }
        let base_dirs = BaseDirs::new().ok_or_else(|| {
            CliError::general("home_dir_unavailable", "unable to resolve home directory")
        })?;
        Ok(base_dirs.home_dir().join(DEFAULT_STORE_DIR_NAME))
    }
}

pub fn load_config(config_override: Option<PathBuf>) -> Result<(AppConfig, PathBuf), CliError> {
    let config_path = match config_override {
        Some(path) => path,
        None => {
            let project_dirs = ProjectDirs::from("", "", APP_NAME).ok_or_else(|| {
                CliError::general("config_path_unavailable", "unable to resolve config path")
            })?;
            project_dirs.config_dir().join("config.toml")
        }
    };

    if !config_path.exists() {
        return Ok((AppConfig::default(), config_path));
    }

    let raw = std::fs::read_to_string(&config_path).map_err(map_io_error)?;
    let config = toml::from_str::<AppConfig>(&raw).map_err(|error| CliError {
        code: CliExitCode::CorruptOrParse,
        kind: "config_parse_failed",
        message: format!("failed to parse {}: {error}", config_path.display()),
    })?;
    Ok((config, config_path))
}

pub fn save_config(config: &AppConfig, path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(map_io_error)?;
    }
    let data = toml::to_string_pretty(config).map_err(|error| {
        CliError::general(
            "config_serialize_failed",
            format!("failed to serialize config: {error}"),
        )
    })?;
    std::fs::write(path, data).map_err(map_io_error)
}

pub fn is_sensitive_config_key(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    lowered.contains("api_key") || lowered.contains("secret")
}

pub fn config_get(config: &AppConfig, key: &str) -> Option<String> {
    match key {
        "store_dir" => Some(
            config
                .store_dir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        ),
        "editor" => Some(config.editor.clone()),
        "gpg_program" => Some(config.gpg_program.clone()),
        "generator.length" => Some(config.generator.length.to_string()),
        "generator.uppercase" => Some(config.generator.policy.uppercase.to_string()),
        "generator.digits" => Some(config.generator.policy.digits.to_string()),
        "generator.symbols" => Some(config.generator.policy.symbols.to_string()),
        "breach.endpoint" => Some(config.breach.endpoint.clone()),
        "breach.api_key" => Some(config.breach.api_key.clone().unwrap_or_default()),
        "breach.timeout_seconds" => Some(config.breach.timeout_seconds.to_string()),
        "security.clipboard_timeout_seconds" => {
            Some(config.security.clipboard_timeout_seconds.to_string())
        }
        "logging.level" => Some(config.logging.level.clone()),
        _ => None,
    }
}

pub fn config_set(config: &mut AppConfig, key: &str, value: &str) -> Result<(), CliError> {
    match key {
        "store_dir" => config.store_dir = Some(PathBuf::from(non_empty(key, value)?)),
        "editor" => config.editor = non_empty(key, value)?,
        "gpg_program" => config.gpg_program = non_empty(key, value)?,
        "generator.length" => {
            let parsed = parse_number::<usize>(key, value)?;
            validate_range(key, parsed, 1..=MAX_GENERATED_LENGTH)?;
            config.generator.length = parsed;
        }
        "generator.uppercase" => config.generator.policy.uppercase = parse_bool(key, value)?,
        "generator.digits" => config.generator.policy.digits = parse_bool(key, value)?,
        "generator.symbols" => config.generator.policy.symbols = parse_bool(key, value)?,
        "breach.endpoint" => {
            let endpoint = non_empty(key, value)?;
            if !endpoint.starts_with("https://") && !endpoint.starts_with("http://") {
                return Err(CliError::usage("breach.endpoint must be an http(s) URL"));
            }
            config.breach.endpoint = endpoint;
        }
        "breach.api_key" => {
            let trimmed = value.trim();
            config.breach.api_key = (!trimmed.is_empty()).then(|| trimmed.to_owned());
        }
        "breach.timeout_seconds" => {
            let parsed = parse_number::<u64>(key, value)?;
            if parsed != 0 {
                validate_range(key, parsed, 1..=300)?;
            }
            config.breach.timeout_seconds = parsed;
        }
        "security.clipboard_timeout_seconds" => {
            let parsed = parse_number::<u32>(key, value)?;
            if parsed != 0 {
                validate_range(key, parsed, 10..=600)?;
            }
            config.security.clipboard_timeout_seconds = parsed;
        }
        "logging.level" => match value.trim() {
            "error" | "warn" | "info" | "debug" => config.logging.level = value.trim().to_owned(),
            _ => return Err(CliError::usage("logging.level must be error|warn|info|debug")),
        },
        _ => return Err(CliError::usage("unknown config key")),
    }

    Ok(())
}

fn non_empty(key: &str, value: &str) -> Result<String, CliError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CliError::usage(format!("{key} cannot be empty")));
    }
    Ok(trimmed.to_owned())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CliError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| CliError::usage(format!("invalid number for {key}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CliError> {
    value
        .trim()
        .parse::<bool>()
        .map_err(|_| CliError::usage(format!("invalid bool value for {key}")))
}

fn validate_range<T>(key: &str, value: T, allowed: RangeInclusive<T>) -> Result<(), CliError>
where
    T: PartialOrd + std::fmt::Display,
{
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(CliError::usage(format!(
            "{key} out of bounds: {value} (expected {}..={})",
            allowed.start(),
            allowed.end()
        )))
    }
}
