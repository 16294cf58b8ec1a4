//! Test helper: takes the advisory lock of one secret in another process.
//!
//! `lock_holder <store-root> <secret-name>` prints `locked <path>` once the
//! lock is held and releases it when stdin reads `release` or hits EOF.

use std::io::{self, BufRead, Write};

use pws_core::SecretName;
use pws_storage::{FileStore, GpgEncryptor, SecretStore, acquire_secret_lock};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(root), Some(raw_name)) = (args.next(), args.next()) else {
        return Err("usage: lock_holder <store-root> <secret-name>".into());
    };

    let name = SecretName::parse(&raw_name)?;
    let path = FileStore::new(root, GpgEncryptor::default()).resolve(&name);
    let lock = acquire_secret_lock(&path)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "locked {}", path.display())?;
    stdout.flush()?;

    for line in io::stdin().lock().lines() {
        if line?.trim() == "release" {
            break;
        }
    }
    drop(lock);
    Ok(())
}
