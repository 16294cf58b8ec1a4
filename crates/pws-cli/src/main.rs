use std::io::Write;
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, ExitCode};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use pws_core::{
    BreachChecker, Clock, GenerationPolicy, HttpRangeSource, RangeSource, SecretName,
    SecretRecord, SystemClock, TotpDeriver, generate_password,
};
use pws_storage::{FileStore, GpgEncryptor, SecretStore, StorageError};
use serde::Serialize;
use serde_json::{Value, json};
use zeroize::Zeroizing;

mod clipboard;
mod config;
mod error;
mod logging;

use clipboard::{ClipboardSink, SystemClipboard};
use config::{AppConfig, config_get, config_set, is_sensitive_config_key, load_config, save_config};
use error::{
    CliError, CliExitCode, map_breach_error, map_codec_error, map_generate_error, map_io_error,
    map_name_error, map_storage_error, map_totp_error,
};
use logging::{LOG_LEVEL_ENV, LogLevel, audit_event, init_logging, log_json_line};

const JSON_SCHEMA_VERSION: u8 = 1;
const MASKED_VALUE: &str = "********";

#[derive(Debug)]
pub struct CommandOutput {
    message: String,
    payload: Value,
}

#[derive(Debug, Parser)]
#[command(name = "pws")]
#[command(about = "gpg-backed password store, compatible with pass", version)]
struct Cli {
    /// Print a JSON envelope instead of plain text.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Store root; overrides the config file and PASSWORD_STORE_DIR.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the effective store directory, editor and API key.
    Env(EnvArgs),
    /// List the secrets in the store.
    #[command(visible_alias = "ls")]
    List(ListArgs),
    /// Show the password of a secret, and its current OTP code if it has one.
    Pass(CodeArgs),
    /// Show the full body of a secret.
    Show(NameArgs),
    /// Generate a password and store it under a name.
    Generate(GenerateArgs),
    /// Edit a secret in $EDITOR.
    Edit(NameArgs),
    /// Securely delete a secret.
    #[command(visible_alias = "rm")]
    Remove(NameArgs),
    /// Print the values stored under a key.
    Get(GetArgs),
    /// Print the current one-time password of a secret.
    Otp(CodeArgs),
    /// Check the password of a secret against the breach corpus.
    Pwnd(NameArgs),
    /// Find secrets with a `key:value` pair match.
    Search(SearchArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    #[command(hide = true)]
    Internal {
        #[command(subcommand)]
        command: InternalCommand,
    },
}

impl Command {
    const fn name(&self) -> &'static str {
        match self {
            Self::Env(_) => "env",
            Self::List(_) => "list",
            Self::Pass(_) => "pass",
            Self::Show(_) => "show",
            Self::Generate(_) => "generate",
            Self::Edit(_) => "edit",
            Self::Remove(_) => "remove",
            Self::Get(_) => "get",
            Self::Otp(_) => "otp",
            Self::Pwnd(_) => "pwnd",
            Self::Search(_) => "search",
            Self::Config { .. } => "config",
            Self::Internal { .. } => "internal",
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Debug, Subcommand)]
enum InternalCommand {
    #[command(hide = true)]
    ClipboardClear(ClipboardClearArgs),
}

#[derive(Debug, Args)]
struct ClipboardClearArgs {
    #[arg(long)]
    after_seconds: u32,
    #[arg(long)]
    fingerprint: String,
}

#[derive(Debug, Args)]
struct EnvArgs {
    /// Show the API key instead of masking it.
    #[arg(long)]
    reveal: bool,
}

#[derive(Debug, Args)]
struct ListArgs {
    #[arg(default_value = "")]
    namespace: String,
}

#[derive(Debug, Args)]
struct NameArgs {
    name: String,
}

#[derive(Debug, Args)]
struct CodeArgs {
    name: String,
    /// Copy the value to the clipboard instead of printing it.
    #[arg(short = 'c', long = "copy")]
    copy: bool,
    /// Wait for a fresh code when the current one is about to expire.
    #[arg(short = 'w', long = "wait")]
    wait: bool,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    name: String,
    /// Use only lowercase letters.
    #[arg(short = 'l', long = "lowercase")]
    lowercase: bool,
    #[arg(short = 'n', long = "no-numbers")]
    no_numbers: bool,
    #[arg(short = 's', long = "no-symbols")]
    no_symbols: bool,
    /// Replace the password of an existing secret.
    #[arg(short = 'o', long = "overwrite")]
    overwrite: bool,
    #[arg(long)]
    length: Option<usize>,
}

#[derive(Debug, Args)]
struct GetArgs {
    name: String,
    key: String,
    #[arg(short = 'i', long = "case-insensitive")]
    case_insensitive: bool,
}

#[derive(Debug, Args)]
struct SearchArgs {
    /// `key:value`; the key matches case-insensitively, the value as a
    /// case-insensitive substring.
    query: String,
}

#[derive(Debug, Serialize)]
struct JsonEnvelope {
    schema_version: u8,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Debug, Serialize)]
struct JsonError {
    code: u8,
    kind: String,
    message: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(output) => {
            if cli.json {
                print_envelope(&JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: true,
                    result: Some(output.payload),
                    error: None,
                });
            } else if !output.message.is_empty() {
                println!("{}", output.message);
            }
            ExitCode::from(CliExitCode::Success as u8)
        }
        Err(error) => {
            log_json_line(
                LogLevel::Error,
                "command_failed",
                "cli",
                json!({
                    "command": cli.command.name(),
                    "kind": error.kind,
                    "exit_code": error.code as u8
                }),
            );
            if cli.json {
                print_envelope(&JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: false,
                    result: None,
                    error: Some(JsonError {
                        code: error.code as u8,
                        kind: error.kind.to_owned(),
                        message: error.message.clone(),
                    }),
                });
            } else {
                eprintln!("{}", error.message);
            }
            ExitCode::from(error.code as u8)
        }
    }
}

fn print_envelope(envelope: &JsonEnvelope) {
    match serde_json::to_string(envelope) {
        Ok(line) => println!("{line}"),
        Err(error) => eprintln!("failed to encode JSON output: {error}"),
    }
}

fn execute(cli: &Cli) -> Result<CommandOutput, CliError> {
    let (mut file_config, config_path) = load_config(cli.config.clone())?;
    let config = effective_config(&file_config, cli.store.clone());
    init_logging(&config, std::env::var(LOG_LEVEL_ENV).ok());
    log_json_line(
        LogLevel::Debug,
        "command_started",
        "cli",
        json!({ "command": cli.command.name() }),
    );

    match &cli.command {
        Command::Env(args) => handle_env(&config, args),
        Command::Config { command } => handle_config(command, &mut file_config, &config_path),
        Command::Internal { command } => handle_internal_command(command),
        command => {
            let store = FileStore::new(
                config.resolved_store_dir()?,
                GpgEncryptor::new(&config.gpg_program),
            );
            let deriver = TotpDeriver::new(SystemClock);
            let clipboard = SystemClipboard::new(config.security.clipboard_timeout_seconds);
            dispatch_store_command(command, &store, &config, &deriver, &clipboard)
        }
    }
}

/// Defaults, then the config file, then the environment, then `--store`.
fn effective_config(file_config: &AppConfig, store_override: Option<PathBuf>) -> AppConfig {
    let mut config = file_config.clone();
    config.apply_env(|key| std::env::var(key).ok());
    if let Some(store) = store_override {
        config.store_dir = Some(store);
    }
    config
}

fn dispatch_store_command<S, C, K>(
    command: &Command,
    store: &S,
    config: &AppConfig,
    deriver: &TotpDeriver<C>,
    clipboard: &K,
) -> Result<CommandOutput, CliError>
where
    S: SecretStore,
    C: Clock,
    K: ClipboardSink,
{
    match command {
        Command::List(args) => handle_list(store, &args.namespace),
        Command::Pass(args) => handle_pass(store, clipboard, deriver, args),
        Command::Show(args) => handle_show(store, &args.name),
        Command::Generate(args) => handle_generate(store, config, args),
        Command::Edit(args) => handle_edit(store, config, &args.name),
        Command::Remove(args) => handle_remove(store, &args.name),
        Command::Get(args) => handle_get(store, args),
        Command::Otp(args) => handle_otp(store, clipboard, deriver, args),
        Command::Pwnd(args) => {
            let timeout = (config.breach.timeout_seconds > 0)
                .then(|| Duration::from_secs(config.breach.timeout_seconds));
            let source = HttpRangeSource::new(
                &config.breach.endpoint,
                config.breach.api_key.clone(),
                timeout,
            )
            .map_err(map_breach_error)?;
            handle_pwnd(store, &BreachChecker::new(source), &args.name)
        }
        Command::Search(args) => handle_search(store, &args.query),
        Command::Env(_) | Command::Config { .. } | Command::Internal { .. } => Err(CliError::general(
            "unexpected_command",
            format!("`{}` does not operate on the store", command.name()),
        )),
    }
}

fn handle_env(config: &AppConfig, args: &EnvArgs) -> Result<CommandOutput, CliError> {
    let store_dir = config.resolved_store_dir()?.display().to_string();
    let api_key = match &config.breach.api_key {
        Some(key) if args.reveal => key.clone(),
        Some(_) => MASKED_VALUE.to_owned(),
        None => String::new(),
    };

    Ok(CommandOutput {
        message: format!(
            "PASSWORD_STORE_DIR={store_dir}\nEDITOR={}\nHAVEIBEENPWND_API_KEY={api_key}",
            config.editor
        ),
        payload: json!({
            "store_dir": store_dir,
            "editor": config.editor,
            "api_key": api_key,
            "api_key_set": config.breach.api_key.is_some()
        }),
    })
}

fn parse_name(raw: &str) -> Result<SecretName, CliError> {
    SecretName::parse(raw).map_err(map_name_error)
}

fn read_record<S: SecretStore>(
    store: &S,
    name: &SecretName,
) -> Result<SecretRecord, CliError> {
    let body = Zeroizing::new(store.read(name).map_err(map_storage_error)?);
    Ok(SecretRecord::decode(&body))
}

fn handle_list<S: SecretStore>(store: &S, namespace: &str) -> Result<CommandOutput, CliError> {
    let names = store.list(namespace).map_err(map_storage_error)?;
    Ok(CommandOutput {
        message: names
            .iter()
            .map(SecretName::as_str)
            .collect::<Vec<_>>()
            .join("\n"),
        payload: json!({
            "namespace": namespace.trim_matches('/'),
            "secrets": names
        }),
    })
}

/// A broken OTP line does not fail the command: the password has already
/// been shown or copied, so the OTP failure is reported next to it.
fn handle_pass<S, C, K>(
    store: &S,
    clipboard: &K,
    deriver: &TotpDeriver<C>,
    args: &CodeArgs,
) -> Result<CommandOutput, CliError>
where
    S: SecretStore,
    C: Clock,
    K: ClipboardSink,
{
    let name = parse_name(&args.name)?;
    let record = read_record(store, &name)?;
    let password = record.password_of().map_err(map_codec_error)?;

    let mut lines = Vec::new();
    let mut payload = serde_json::Map::new();
    payload.insert("name".to_owned(), json!(name));
    if args.copy {
        let timeout = clipboard.copy(password)?;
        lines.push(copied_message("password", timeout));
        payload.insert("copied".to_owned(), json!(true));
        payload.insert("clear_after_seconds".to_owned(), json!(timeout));
    } else {
        lines.push(password.to_owned());
        payload.insert("password".to_owned(), json!(password));
    }

    if let Some(uri) = &record.otp_uri {
        match deriver.current_code(uri, args.wait).map_err(map_totp_error) {
            Ok(code) => {
                lines.push(code_line(&code.code, code.remaining_seconds));
                payload.insert(
                    "otp".to_owned(),
                    json!({
                        "code": code.code,
                        "remaining_seconds": code.remaining_seconds
                    }),
                );
            }
            Err(error) => {
                log_json_line(
                    LogLevel::Warn,
                    "otp_unusable",
                    "cli",
                    json!({ "name": name, "kind": error.kind }),
                );
                lines.push(format!("invalid otp set up in secret '{name}': {}", error.message));
                payload.insert(
                    "otp_error".to_owned(),
                    json!({ "kind": error.kind, "message": error.message }),
                );
            }
        }
    }

    Ok(CommandOutput {
        message: lines.join("\n"),
        payload: Value::Object(payload),
    })
}

fn handle_show<S: SecretStore>(store: &S, raw_name: &str) -> Result<CommandOutput, CliError> {
    let name = parse_name(raw_name)?;
    let body = Zeroizing::new(store.read(&name).map_err(map_storage_error)?);
    Ok(CommandOutput {
        message: body.as_str().to_owned(),
        payload: json!({
            "name": name,
            "body": body.as_str()
        }),
    })
}

fn handle_generate<S: SecretStore>(
    store: &S,
    config: &AppConfig,
    args: &GenerateArgs,
) -> Result<CommandOutput, CliError> {
    let name = parse_name(&args.name)?;
    if store.exists(&name) && !args.overwrite {
        return Err(CliError::usage(format!(
            "secret '{name}' already exists, pass --overwrite to replace its password"
        )));
    }

    let policy = GenerationPolicy {
        uppercase: config.generator.policy.uppercase && !args.lowercase,
        digits: config.generator.policy.digits && !args.no_numbers,
        symbols: config.generator.policy.symbols && !args.no_symbols,
    };
    let length = args.length.unwrap_or(config.generator.length);
    let password =
        Zeroizing::new(generate_password(length, &policy).map_err(map_generate_error)?);
    audit_event(
        "password_generated",
        json!({
            "name": name,
            "length": length,
            "uppercase": policy.uppercase,
            "digits": policy.digits,
            "symbols": policy.symbols
        }),
    );

    pws_storage::set_password(store, &name, &password).map_err(map_storage_error)?;
    audit_event("secret_written", json!({ "name": name, "source": "generate" }));

    Ok(CommandOutput {
        message: password.as_str().to_owned(),
        payload: json!({
            "name": name,
            "password": password.as_str(),
            "length": length
        }),
    })
}

fn handle_edit<S: SecretStore>(
    store: &S,
    config: &AppConfig,
    raw_name: &str,
) -> Result<CommandOutput, CliError> {
    let name = parse_name(raw_name)?;
    let current = match store.read(&name) {
        Ok(body) => Zeroizing::new(body),
        Err(StorageError::NotFound(_)) => Zeroizing::new(String::new()),
        Err(error) => return Err(map_storage_error(error)),
    };

    let edited = edit_in_editor(&config.editor, &current)?;
    if *edited == *current {
        return Ok(CommandOutput {
            message: format!("secret '{name}' unchanged"),
            payload: json!({ "name": name, "changed": false }),
        });
    }

    store.write(&name, &edited).map_err(map_storage_error)?;
    audit_event("secret_written", json!({ "name": name, "source": "edit" }));
    Ok(CommandOutput {
        message: format!("secret '{name}' saved!"),
        payload: json!({ "name": name, "changed": true }),
    })
}

/// Runs `<editor> <file>` through `sh -c` on a private temp file holding
/// `content`, and returns what the editor left behind. The editor setting
/// may carry its own arguments; the path is always passed as one word.
fn edit_in_editor(editor: &str, content: &str) -> Result<Zeroizing<String>, CliError> {
    edit_in_editor_within(editor, content, &std::env::temp_dir())
}

fn edit_in_editor_within(
    editor: &str,
    content: &str,
    scratch_dir: &std::path::Path,
) -> Result<Zeroizing<String>, CliError> {
    let mut file = tempfile::Builder::new()
        .prefix("pws-")
        .tempfile_in(scratch_dir)
        .map_err(map_io_error)?;
    file.write_all(content.as_bytes()).map_err(map_io_error)?;
    file.flush().map_err(map_io_error)?;

    let status = ProcessCommand::new("sh")
        .arg("-c")
        .arg(format!("{editor} {}", shell_quote(&file.path().to_string_lossy())))
        .status()
        .map_err(map_io_error)?;
    if !status.success() {
        return Err(CliError::general(
            "editor_failed",
            format!("editor `{editor}` exited with {status}"),
        ));
    }

    let edited = std::fs::read_to_string(file.path()).map_err(map_io_error)?;
    Ok(Zeroizing::new(edited))
}

/// Single-quotes `word` for `sh`, closing and reopening the quotes around
/// any embedded `'`.
fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

fn handle_remove<S: SecretStore>(store: &S, raw_name: &str) -> Result<CommandOutput, CliError> {
    let name = parse_name(raw_name)?;
    store.remove(&name).map_err(map_storage_error)?;
    audit_event("secret_removed", json!({ "name": name }));
    Ok(CommandOutput {
        message: format!("secret '{name}' removed"),
        payload: json!({ "name": name, "removed": true }),
    })
}

fn handle_get<S: SecretStore>(store: &S, args: &GetArgs) -> Result<CommandOutput, CliError> {
    let name = parse_name(&args.name)?;
    if args.key.is_empty() {
        return Err(CliError::usage("no key provided"));
    }

    let record = read_record(store, &name)?;
    let values = record.lookup(&args.key, args.case_insensitive);
    if values.is_empty() {
        return Err(CliError {
            code: CliExitCode::NotFound,
            kind: "key_not_found",
            message: format!("key '{}' not found in secret '{name}'", args.key),
        });
    }

    Ok(CommandOutput {
        message: values.join("\n"),
        payload: json!({
            "name": name,
            "key": args.key,
            "values": values
        }),
    })
}

fn handle_otp<S, C, K>(
    store: &S,
    clipboard: &K,
    deriver: &TotpDeriver<C>,
    args: &CodeArgs,
) -> Result<CommandOutput, CliError>
where
    S: SecretStore,
    C: Clock,
    K: ClipboardSink,
{
    let name = parse_name(&args.name)?;
    let record = read_record(store, &name)?;
    let uri = record.otp_uri.as_deref().ok_or_else(|| CliError {
        code: CliExitCode::NotFound,
        kind: "otp_not_found",
        message: format!("no otp set up in secret '{name}'"),
    })?;

    let code = deriver
        .current_code(uri, args.wait)
        .map_err(map_totp_error)?;
    let mut lines = vec![code_line(&code.code, code.remaining_seconds)];
    let mut payload = json!({
        "name": name,
        "code": code.code,
        "remaining_seconds": code.remaining_seconds,
        "period": code.period
    });

    if args.copy {
        let timeout = clipboard.copy(&code.code)?;
        lines.push(copied_message("code", timeout));
        payload["copied"] = json!(true);
        payload["clear_after_seconds"] = json!(timeout);
    }

    Ok(CommandOutput {
        message: lines.join("\n"),
        payload,
    })
}

fn handle_pwnd<S, R>(
    store: &S,
    checker: &BreachChecker<R>,
    raw_name: &str,
) -> Result<CommandOutput, CliError>
where
    S: SecretStore,
    R: RangeSource,
{
    let name = parse_name(raw_name)?;
    let record = read_record(store, &name)?;
    let password = record.password_of().map_err(map_codec_error)?;

    let breached = checker.check(password).map_err(map_breach_error)?;
    audit_event(
        "breach_checked",
        json!({ "name": name, "breached": breached }),
    );

    let message = if breached {
        "this password has been pwnd, generate a new one"
    } else {
        "this password has not been pwnd!"
    };
    Ok(CommandOutput {
        message: message.to_owned(),
        payload: json!({ "name": name, "breached": breached }),
    })
}

fn handle_search<S: SecretStore>(store: &S, query: &str) -> Result<CommandOutput, CliError> {
    let (key, needle) = query
        .split_once(':')
        .ok_or_else(|| CliError::usage("search query must look like key:value"))?;
    if key.is_empty() {
        return Err(CliError::usage("search query must name a key"));
    }

    let mut lines = Vec::new();
    let mut matches = Vec::new();
    for name in store.list("").map_err(map_storage_error)? {
        let record = read_record(store, &name)?;
        for pair in record.search(key, needle) {
            let line = pair.to_line();
            lines.push(format!("match found in secret '{name}':\n{line}"));
            matches.push(json!({ "name": name, "key": pair.key, "value": pair.value }));
        }
    }

    if matches.is_empty() {
        return Err(CliError {
            code: CliExitCode::NotFound,
            kind: "no_match",
            message: "no match found".to_owned(),
        });
    }

    Ok(CommandOutput {
        message: lines.join("\n"),
        payload: json!({ "matches": matches }),
    })
}

fn code_line(code: &str, remaining_seconds: u64) -> String {
    format!("{code:<10} valid for another {remaining_seconds}s")
}

fn copied_message(what: &str, timeout: Option<u32>) -> String {
    match timeout {
        Some(seconds) => format!("{what} copied! clearing clipboard in {seconds}s"),
        None => format!("{what} copied!"),
    }
}

fn handle_config(
    command: &ConfigCommand,
    config: &mut AppConfig,
    config_path: &std::path::Path,
) -> Result<CommandOutput, CliError> {
    match command {
        ConfigCommand::Get { key } => {
            let value =
                config_get(config, key).ok_or_else(|| CliError::usage("unknown config key"))?;
            Ok(CommandOutput {
                message: value.clone(),
                payload: json!({ "key": key, "value": value }),
            })
        }
        ConfigCommand::Set { key, value } => {
            config_set(config, key, value)?;
            save_config(config, config_path)?;
            let value_for_log = if is_sensitive_config_key(key) {
                "[REDACTED]"
            } else {
                value.as_str()
            };
            audit_event(
                "config_changed",
                json!({ "key": key, "value": value_for_log }),
            );
            Ok(CommandOutput {
                message: format!("Updated {key}"),
                payload: json!({ "key": key, "value": value }),
            })
        }
        ConfigCommand::List => {
            let mut shown = config.clone();
            if shown.breach.api_key.is_some() {
                shown.breach.api_key = Some(MASKED_VALUE.to_owned());
            }
            let serialize_failed = |error: &dyn std::fmt::Display| {
                CliError::general(
                    "config_serialize_failed",
                    format!("failed to serialize config: {error}"),
                )
            };
            Ok(CommandOutput {
                message: toml::to_string_pretty(&shown).map_err(|error| serialize_failed(&error))?,
                payload: serde_json::to_value(&shown).map_err(|error| serialize_failed(&error))?,
            })
        }
    }
}

fn handle_internal_command(command: &InternalCommand) -> Result<CommandOutput, CliError> {
    match command {
        InternalCommand::ClipboardClear(args) => {
            clipboard::clear_if_unchanged(&args.fingerprint, args.after_seconds)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::time::Duration;

    use clap::Parser;
    use pws_core::{BreachChecker, BreachError, Clock, RangeSource, SecretName, TotpDeriver};
    use pws_storage::{MemoryStore, SecretStore};

    use super::{
        Cli, CodeArgs, Command, GenerateArgs, GetArgs, handle_generate, handle_get, handle_list,
        handle_otp, handle_pass, handle_pwnd, handle_remove, handle_search, handle_show,
        shell_quote,
    };
    use crate::clipboard::ClipboardSink;
    use crate::config::AppConfig;
    use crate::error::{CliError, CliExitCode};

    // RFC 6238 SHA-1 seed "12345678901234567890".
    const OTP_URI: &str = "otpauth://totp/Example:alice?secret=GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ&digits=8";

    struct FixedClock {
        now: Cell<u64>,
    }

    impl Clock for &FixedClock {
        fn unix_seconds(&self) -> u64 {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get() + duration.as_secs());
        }
    }

    /// Keeps every copied value instead of touching the system clipboard.
    #[derive(Default)]
    struct RecordingClipboard {
        copied: RefCell<Vec<String>>,
    }

    impl ClipboardSink for RecordingClipboard {
        fn copy(&self, value: &str) -> Result<Option<u32>, CliError> {
            self.copied.borrow_mut().push(value.to_owned());
            Ok(Some(45))
        }
    }

    struct StaticRange(String);

    impl RangeSource for StaticRange {
        fn fetch_range(&self, _prefix: &str) -> Result<String, BreachError> {
            Ok(self.0.clone())
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let seed = [
            ("web/mail", format!("hunter2\nuser: Alice\nurl: https://mail.example\n{OTP_URI}")),
            ("web/forum", "password\nuser: bob".to_owned()),
            ("bank", "s3cret\nUser: carol".to_owned()),
        ];
        for (name, body) in seed {
            let name = SecretName::parse(name).expect("valid name");
            store.write(&name, &body).expect("seed secret");
        }
        store
    }

    fn code_args(name: &str, wait: bool) -> CodeArgs {
        CodeArgs {
            name: name.to_owned(),
            copy: false,
            wait,
        }
    }

    #[test]
    fn cli_parses_aliases_and_short_flags() {
        let cli = Cli::try_parse_from(["pws", "--json", "ls", "web"]).expect("parse ls");
        assert!(cli.json);
        assert!(matches!(cli.command, Command::List(ref args) if args.namespace == "web"));

        let cli = Cli::try_parse_from(["pws", "generate", "-lns", "-o", "web/new", "--length", "24"])
            .expect("parse generate");
        match cli.command {
            Command::Generate(args) => {
                assert!(args.lowercase && args.no_numbers && args.no_symbols && args.overwrite);
                assert_eq!(args.length, Some(24));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["pws", "rm", "web/mail"]).expect("parse rm");
        assert!(matches!(cli.command, Command::Remove(_)));
    }

    #[test]
    fn list_filters_by_namespace() {
        let store = seeded_store();
        let output = handle_list(&store, "web/").expect("list");
        assert_eq!(output.message, "web/forum\nweb/mail");
        assert_eq!(handle_list(&store, "").expect("list").payload["secrets"][0], "bank");
    }

    #[test]
    fn pass_prints_password_and_current_code() {
        let store = seeded_store();
        let clock = FixedClock { now: Cell::new(59) };
        let deriver = TotpDeriver::new(&clock);
        let clipboard = RecordingClipboard::default();
        let output = handle_pass(&store, &clipboard, &deriver, &code_args("web/mail", false))
            .expect("pass");
        assert!(clipboard.copied.borrow().is_empty());

        assert_eq!(
            output.message,
            "hunter2\n94287082   valid for another 1s"
        );
        assert_eq!(output.payload["otp"]["code"], "94287082");
    }

    #[test]
    fn otp_waits_for_a_fresh_window_when_asked() {
        let store = seeded_store();
        let clock = FixedClock { now: Cell::new(59) };
        let deriver = TotpDeriver::new(&clock);
        let output = handle_otp(
            &store,
            &RecordingClipboard::default(),
            &deriver,
            &code_args("web/mail", true),
        )
        .expect("otp");

        assert_eq!(clock.now.get(), 61);
        assert_eq!(output.payload["remaining_seconds"], 29);
        assert_ne!(output.payload["code"], "94287082");
    }

    #[test]
    fn otp_without_uri_is_not_found() {
        let store = seeded_store();
        let clock = FixedClock { now: Cell::new(59) };
        let error = handle_otp(
            &store,
            &RecordingClipboard::default(),
            &TotpDeriver::new(&clock),
            &code_args("bank", false),
        )
        .expect_err("no otp");
        assert_eq!(error.code, CliExitCode::NotFound);
    }

    #[test]
    fn copy_flag_sends_password_to_clipboard_instead_of_output() {
        let store = seeded_store();
        let clock = FixedClock { now: Cell::new(59) };
        let clipboard = RecordingClipboard::default();
        let mut args = code_args("web/mail", false);
        args.copy = true;

        let output = handle_pass(&store, &clipboard, &TotpDeriver::new(&clock), &args)
            .expect("pass -c");
        assert_eq!(*clipboard.copied.borrow(), vec!["hunter2".to_owned()]);
        assert!(!output.message.contains("hunter2"));
        assert!(output.message.starts_with("password copied! clearing clipboard in 45s"));
        assert!(output.payload.get("password").is_none());
        assert_eq!(output.payload["clear_after_seconds"], 45);
    }

    #[test]
    fn otp_copy_flag_sends_code_to_clipboard() {
        let store = seeded_store();
        let clock = FixedClock { now: Cell::new(59) };
        let clipboard = RecordingClipboard::default();
        let mut args = code_args("web/mail", false);
        args.copy = true;

        let output = handle_otp(&store, &clipboard, &TotpDeriver::new(&clock), &args)
            .expect("otp -c");
        assert_eq!(*clipboard.copied.borrow(), vec!["94287082".to_owned()]);
        assert_eq!(output.payload["copied"], true);
    }

    #[test]
    fn broken_otp_line_still_delivers_the_password() {
        let store = seeded_store();
        let name = SecretName::parse("web/legacy").expect("valid name");
        store
            .write(&name, "letmein
otpauth://totp/Legacy?secret=not-base32!")
            .expect("seed secret");
        let clock = FixedClock { now: Cell::new(59) };
        let clipboard = RecordingClipboard::default();
        let mut args = code_args("web/legacy", false);
        args.copy = true;

        let output = handle_pass(&store, &clipboard, &TotpDeriver::new(&clock), &args)
            .expect("password survives a broken otp line");
        assert_eq!(*clipboard.copied.borrow(), vec!["letmein".to_owned()]);
        assert!(output.message.contains("invalid otp set up in secret 'web/legacy'"));
        assert_eq!(output.payload["otp_error"]["kind"], "invalid_otp_uri");
        assert!(output.payload.get("otp").is_none());

        args.copy = false;
        let output = handle_pass(&store, &clipboard, &TotpDeriver::new(&clock), &args)
            .expect("plain pass");
        assert!(output.message.starts_with("letmein\ninvalid otp"));
    }

    #[test]
    fn shell_quote_keeps_paths_as_one_word() {
        assert_eq!(shell_quote("/tmp/pws-abc"), "'/tmp/pws-abc'");
        assert_eq!(shell_quote("/tmp/my dir/x"), "'/tmp/my dir/x'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn editor_changes_are_read_back_from_a_spaced_scratch_dir() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let scratch = std::env::temp_dir().join(format!("pws edit 'dir' {nanos}"));
        std::fs::create_dir_all(&scratch).expect("create scratch dir");

        let edited = super::edit_in_editor_within("sed -i s/alpha/beta/", "alpha\nuser: a", &scratch)
            .expect("editor round trip");
        assert_eq!(edited.as_str(), "beta\nuser: a");
        assert_eq!(
            std::fs::read_dir(&scratch).expect("list scratch dir").count(),
            0,
            "scratch file must be removed"
        );

        let error = super::edit_in_editor_within("false", "alpha", &scratch)
            .expect_err("failing editor");
        assert_eq!(error.kind, "editor_failed");
        let _ = std::fs::remove_dir_all(&scratch);
    }

    #[test]
    fn show_returns_the_body_verbatim() {
        let store = seeded_store();
        let output = handle_show(&store, "web/forum").expect("show");
        assert_eq!(output.message, "password\nuser: bob");
    }

    #[test]
    fn get_honours_case_sensitivity() {
        let store = seeded_store();
        let mut args = GetArgs {
            name: "bank".to_owned(),
            key: "user".to_owned(),
            case_insensitive: false,
        };
        let error = handle_get(&store, &args).expect_err("case-sensitive miss");
        assert_eq!(error.kind, "key_not_found");

        args.case_insensitive = true;
        assert_eq!(handle_get(&store, &args).expect("get").message, "carol");
    }

    #[test]
    fn generate_refuses_to_overwrite_without_flag() {
        let store = seeded_store();
        let mut args = GenerateArgs {
            name: "web/forum".to_owned(),
            lowercase: true,
            no_numbers: true,
            no_symbols: true,
            overwrite: false,
            length: Some(12),
        };
        let error = handle_generate(&store, &AppConfig::default(), &args).expect_err("exists");
        assert_eq!(error.code, CliExitCode::Usage);

        args.overwrite = true;
        let output = handle_generate(&store, &AppConfig::default(), &args).expect("generate");
        let password = output.message;
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|ch| ch.is_ascii_lowercase()));

        let name = SecretName::parse("web/forum").expect("valid name");
        assert_eq!(
            store.read(&name).expect("read"),
            format!("{password}\nuser: bob")
        );
    }

    #[test]
    fn pwnd_reports_breached_passwords() {
        let store = seeded_store();
        // Suffix of SHA-1("password").
        let checker = BreachChecker::new(StaticRange(
            "1E4C9B93F3F0682250B6CF8331B7EE68FD8:3861493".to_owned(),
        ));
        let output = handle_pwnd(&store, &checker, "web/forum").expect("pwnd");
        assert_eq!(output.payload["breached"], true);

        let output = handle_pwnd(&store, &checker, "bank").expect("pwnd");
        assert_eq!(output.payload["breached"], false);
    }

    #[test]
    fn search_matches_key_and_value_substring() {
        let store = seeded_store();
        let output = handle_search(&store, "USER:ali").expect("search");
        assert_eq!(output.message, "match found in secret 'web/mail':\nuser: Alice");

        let error = handle_search(&store, "user:nobody").expect_err("no match");
        assert_eq!(error.kind, "no_match");
        assert!(handle_search(&store, "no-colon").is_err());
    }

    #[test]
    fn remove_deletes_and_reports_missing() {
        let store = seeded_store();
        handle_remove(&store, "bank").expect("remove");
        let error = handle_remove(&store, "bank").expect_err("already removed");
        assert_eq!(error.code, CliExitCode::NotFound);
    }
}
