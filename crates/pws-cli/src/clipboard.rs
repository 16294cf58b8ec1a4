//! Clipboard collaborator used by `pass -c` and `otp -c`.
//!
//! The system implementation keeps copies out of clipboard history where the
//! platform supports it and hands the clear to a detached `pws internal
//! clipboard-clear` process. That process only clears when the clipboard
//! still holds the copied value, identified by a salted SHA-256 fingerprint
//! so the value never appears on a command line.

use std::fmt;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::Duration;

use arboard::Clipboard;
use data_encoding::HEXLOWER;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::CommandOutput;
use crate::error::{CliError, map_io_error};

const SALT_LEN: usize = 16;

pub trait ClipboardSink {
    /// Places `value` on the clipboard. Returns the number of seconds after
    /// which it is cleared, `None` when it stays.
    fn copy(&self, value: &str) -> Result<Option<u32>, CliError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClipboard {
    clear_after_seconds: u32,
}

impl SystemClipboard {
    pub const fn new(clear_after_seconds: u32) -> Self {
        Self {
            clear_after_seconds,
        }
    }
}

impl ClipboardSink for SystemClipboard {
    fn copy(&self, value: &str) -> Result<Option<u32>, CliError> {
        let mut clipboard = Clipboard::new().map_err(clipboard_failure)?;
        put_private(&mut clipboard, value)?;

        if self.clear_after_seconds == 0 {
            return Ok(None);
        }
        let fingerprint = Fingerprint::of(value)?;
        spawn_delayed_clear(&fingerprint, self.clear_after_seconds)?;
        Ok(Some(self.clear_after_seconds))
    }
}

/// `salt:sha256(salt || value)`, both hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    salt: [u8; SALT_LEN],
    digest: Vec<u8>,
}

impl Fingerprint {
    fn of(value: &str) -> Result<Self, CliError> {
        let mut salt = [0u8; SALT_LEN];
        getrandom::fill(&mut salt).map_err(|error| {
            CliError::general("random_failed", format!("no randomness for clipboard salt: {error}"))
        })?;
        Ok(Self::with_salt(salt, value))
    }

    fn with_salt(salt: [u8; SALT_LEN], value: &str) -> Self {
        let digest = Sha256::new()
            .chain_update(salt)
            .chain_update(value.as_bytes())
            .finalize()
            .to_vec();
        Self { salt, digest }
    }

    fn matches(&self, value: &str) -> bool {
        Self::with_salt(self.salt, value) == *self
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", HEXLOWER.encode(&self.salt), HEXLOWER.encode(&self.digest))
    }
}

impl FromStr for Fingerprint {
    type Err = CliError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let malformed = || CliError::usage("malformed clipboard fingerprint");
        let (salt, digest) = raw.split_once(':').ok_or_else(malformed)?;
        let salt: [u8; SALT_LEN] = HEXLOWER
            .decode(salt.as_bytes())
            .ok()
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(malformed)?;
        let digest = HEXLOWER.decode(digest.as_bytes()).map_err(|_| malformed())?;
        if digest.len() != 32 {
            return Err(malformed());
        }
        Ok(Self { salt, digest })
    }
}

/// Body of the hidden `internal clipboard-clear` command.
pub fn clear_if_unchanged(fingerprint: &str, after_seconds: u32) -> Result<CommandOutput, CliError> {
    let fingerprint: Fingerprint = fingerprint.parse()?;
    if after_seconds == 0 {
        return Ok(left_alone("auto-clear is disabled"));
    }

    std::thread::sleep(Duration::from_secs(u64::from(after_seconds)));

    let mut clipboard = match Clipboard::new() {
        Ok(clipboard) => clipboard,
        Err(error) => return Ok(left_alone(&error.to_string())),
    };
    match clipboard.get_text() {
        Ok(current) if fingerprint.matches(&current) => {
            clipboard.clear().map_err(clipboard_failure)?;
            Ok(CommandOutput {
                message: "clipboard cleared".to_owned(),
                payload: json!({ "cleared": true }),
            })
        }
        Ok(_) => Ok(left_alone("it holds something newer")),
        Err(error) => Ok(left_alone(&error.to_string())),
    }
}

fn left_alone(reason: &str) -> CommandOutput {
    CommandOutput {
        message: format!("clipboard left alone: {reason}"),
        payload: json!({ "cleared": false, "reason": reason }),
    }
}

fn put_private(clipboard: &mut Clipboard, value: &str) -> Result<(), CliError> {
    let set = clipboard.set();
    #[cfg(target_os = "macos")]
    let set = arboard::SetExtApple::exclude_from_history(set);
    #[cfg(windows)]
    let set = arboard::SetExtWindows::exclude_from_monitoring(set);
    #[cfg(all(
        unix,
        not(any(target_os = "macos", target_os = "android", target_os = "emscripten"))
    ))]
    let set = arboard::SetExtLinux::exclude_from_history(set);
    set.text(value.to_owned()).map_err(clipboard_failure)
}

fn spawn_delayed_clear(fingerprint: &Fingerprint, after_seconds: u32) -> Result<(), CliError> {
    let exe = std::env::current_exe().map_err(map_io_error)?;
    Command::new(exe)
        .args(["internal", "clipboard-clear", "--after-seconds"])
        .arg(after_seconds.to_string())
        .arg("--fingerprint")
        .arg(fingerprint.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(map_io_error)?;
    Ok(())
}

fn clipboard_failure(error: arboard::Error) -> CliError {
    CliError::general("clipboard_unavailable", format!("clipboard: {error}"))
}

#[cfg(test)]
mod tests {
    use super::{Fingerprint, clear_if_unchanged};

    #[test]
    fn fingerprint_recognises_only_the_copied_value() {
        let fingerprint = Fingerprint::with_salt([3u8; 16], "hunter2");
        assert!(fingerprint.matches("hunter2"));
        assert!(!fingerprint.matches("hunter3"));
        assert_ne!(fingerprint, Fingerprint::with_salt([4u8; 16], "hunter2"));
    }

    #[test]
    fn fingerprint_survives_the_command_line() {
        let fingerprint = Fingerprint::of("correct horse").expect("salted fingerprint");
        let rendered = fingerprint.to_string();
        assert!(!rendered.contains("correct horse"));

        let parsed: Fingerprint = rendered.parse().expect("parse fingerprint");
        assert!(parsed.matches("correct horse"));
    }

    #[test]
    fn malformed_fingerprints_are_usage_errors() {
        let short_digest = format!("{}:{}", "ab".repeat(16), "cd".repeat(31));
        for raw in ["", "no-colon", "zz:00", "00:00", short_digest.as_str()] {
            let error = clear_if_unchanged(raw, 10).expect_err("must reject fingerprint");
            assert_eq!(error.kind, "invalid_usage", "accepted {raw:?}");
        }
    }

    #[test]
    fn zero_delay_leaves_clipboard_alone() {
        let fingerprint = Fingerprint::with_salt([1u8; 16], "pw").to_string();
        let output = clear_if_unchanged(&fingerprint, 0).expect("skip should succeed");
        assert_eq!(output.payload["cleared"], false);
    }
}
