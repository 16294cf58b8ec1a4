use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::thread::{self, JoinHandle};

use crate::{Encryptor, StorageError};

/// Runs the `gpg` binary as the encryption collaborator. Calls block until
/// the subprocess exits.
#[derive(Debug, Clone)]
pub struct GpgEncryptor {
    program: PathBuf,
}

impl Default for GpgEncryptor {
    fn default() -> Self {
        Self::new("gpg")
    }
}

impl GpgEncryptor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(["--quiet", "--batch"]);
        command
    }
}

impl Encryptor for GpgEncryptor {
    fn decrypt(&self, path: &Path) -> Result<Vec<u8>, StorageError> {
        let output = self
            .command()
            .arg("--decrypt")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|error| StorageError::Encryption(error.to_string()))?;
        into_stdout(output)
    }

    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
        let mut child = self
            .command()
            .args(["--yes", "--recipient", key_id, "--encrypt"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| StorageError::Encryption(error.to_string()))?;

        // gpg streams ciphertext while reading, so stdin is fed from its own
        // thread while wait_with_output drains stdout.
        let feeder = child.stdin.take().map(|mut stdin| {
            let plaintext = plaintext.to_vec();
            thread::spawn(move || stdin.write_all(&plaintext))
        });

        let output = child
            .wait_with_output()
            .map_err(|error| StorageError::Encryption(error.to_string()))?;
        let fed = match feeder.map(JoinHandle::join) {
            Some(Ok(result)) => result.map_err(|error| error.to_string()),
            Some(Err(_)) => Err("stdin writer panicked".to_owned()),
            None => Ok(()),
        };

        let ciphertext = into_stdout(output)?;
        fed.map_err(StorageError::Encryption)?;
        Ok(ciphertext)
    }
}

fn into_stdout(output: Output) -> Result<Vec<u8>, StorageError> {
    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    Err(StorageError::Encryption(if stderr.is_empty() {
        format!("gpg exited with {}", output.status)
    } else {
        stderr
    }))
}
