use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use pws_core::{CodecError, KEY_ID_FILE, SECRET_SUFFIX, SecretName};
use thiserror::Error;

mod gpg;
mod memory;

pub use gpg::GpgEncryptor;
pub use memory::MemoryStore;

const WIPE_FILLER: u8 = b'0';

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no secret found named '{0}'")]
    NotFound(String),
    #[error("cannot read .gpg-id file for secret '{0}'")]
    MissingKeyId(String),
    #[error("could not fully wipe secret '{name}': wrote {written} of {expected} bytes")]
    WipeIncomplete {
        name: String,
        written: u64,
        expected: u64,
    },
    #[error("secret '{0}' is locked by another process")]
    Locked(String),
    #[error("encryption tool failed: {0}")]
    Encryption(String),
    #[error("secret '{0}' does not decrypt to UTF-8 text")]
    InvalidPlaintext(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// External asymmetric-encryption capability.
pub trait Encryptor {
    fn decrypt(&self, path: &Path) -> Result<Vec<u8>, StorageError>;
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// Backend holding encrypted secrets by name.
pub trait SecretStore {
    fn resolve(&self, name: &SecretName) -> PathBuf;
    fn exists(&self, name: &SecretName) -> bool;
    fn read(&self, name: &SecretName) -> Result<String, StorageError>;
    fn write(&self, name: &SecretName, plaintext: &str) -> Result<(), StorageError>;
    fn list(&self, namespace: &str) -> Result<Vec<SecretName>, StorageError>;
    fn remove(&self, name: &SecretName) -> Result<(), StorageError>;
}

/// Replaces the password line of a secret, creating the secret when absent.
pub fn set_password<S>(store: &S, name: &SecretName, password: &str) -> Result<(), StorageError>
where
    S: SecretStore + ?Sized,
{
    let body = match store.read(name) {
        Ok(body) => body,
        Err(StorageError::NotFound(_)) => String::new(),
        Err(error) => return Err(error),
    };
    let updated = pws_core::set_password(&body, password)?;
    store.write(name, &updated)
}

#[derive(Debug)]
pub struct SecretLock {
    secret_path: PathBuf,
    lock_path: PathBuf,
    _lock_file: File,
}

impl SecretLock {
    pub fn path(&self) -> &Path {
        &self.secret_path
    }
}

pub fn acquire_secret_lock(path: &Path) -> Result<SecretLock, StorageError> {
    let lock_path = lock_file_path(path);
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&lock_path)?;
    match lock_file.try_lock_exclusive() {
        Ok(()) => Ok(SecretLock {
            secret_path: path.to_path_buf(),
            lock_path,
            _lock_file: lock_file,
        }),
        Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
            Err(StorageError::Locked(path.display().to_string()))
        }
        Err(error) => Err(StorageError::Io(error)),
    }
}

fn lock_file_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("secret");
    path.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".{file_name}.lock"))
}

/// Files the store itself leaves next to secrets: the recipient marker,
/// lock files and in-flight temp files from an atomic write.
fn is_store_artifact(file_name: &str) -> bool {
    if file_name == KEY_ID_FILE {
        return true;
    }
    let Some(rest) = file_name.strip_prefix('.') else {
        return false;
    };
    if rest.ends_with(&format!("{SECRET_SUFFIX}.lock")) {
        return true;
    }
    rest.strip_suffix(".tmp")
        .and_then(|stem| stem.rsplit_once('.'))
        .is_some_and(|(secret_file, counter)| {
            secret_file.ends_with(SECRET_SUFFIX)
                && !counter.is_empty()
                && counter.bytes().all(|byte| byte.is_ascii_digit())
        })
}

pub struct FileStore<E> {
    root: PathBuf,
    encryptor: E,
}

impl<E: Encryptor> FileStore<E> {
    pub fn new(root: impl Into<PathBuf>, encryptor: E) -> Self {
        Self {
            root: root.into(),
            encryptor,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Recipient from the `.gpg-id` marker nearest to `path`, searching
    /// upwards but never above the store root.
    fn key_id_for(&self, path: &Path, name: &SecretName) -> Result<String, StorageError> {
        let mut directory = path.parent();
        while let Some(current) = directory {
            if !current.starts_with(&self.root) {
                break;
            }
            if let Ok(raw) = fs::read_to_string(current.join(KEY_ID_FILE)) {
                let key_id = raw.lines().next().unwrap_or_default().trim();
                if !key_id.is_empty() {
                    return Ok(key_id.to_owned());
                }
            }
            if current == self.root {
                break;
            }
            directory = current.parent();
        }

        Err(StorageError::MissingKeyId(name.to_string()))
    }

    fn collect(&self, directory: &Path, names: &mut Vec<SecretName>) -> Result<(), StorageError> {
        for entry in fs::read_dir(directory)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                if !file_name.starts_with('.') {
                    self.collect(&path, names)?;
                }
                continue;
            }
            if !file_type.is_file() || is_store_artifact(file_name) {
                continue;
            }

            if let Some(name) = self.name_for(&path) {
                names.push(name);
            }
        }
        Ok(())
    }

    fn name_for(&self, path: &Path) -> Option<SecretName> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        SecretName::parse(&segments.join("/")).ok()
    }
}

impl<E: Encryptor> SecretStore for FileStore<E> {
    fn resolve(&self, name: &SecretName) -> PathBuf {
        let mut path = self.root.clone();
        for segment in name.as_str().split('/') {
            path.push(segment);
        }
        path.set_file_name(format!("{}{SECRET_SUFFIX}", name.bare()));
        path
    }

    fn exists(&self, name: &SecretName) -> bool {
        self.resolve(name).is_file()
    }

    fn read(&self, name: &SecretName) -> Result<String, StorageError> {
        let path = self.resolve(name);
        let not_found = || StorageError::NotFound(name.to_string());

        let file = File::open(&path).map_err(|_| not_found())?;
        let metadata = file.metadata().map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }
        drop(file);

        let plaintext = self.encryptor.decrypt(&path)?;
        String::from_utf8(plaintext).map_err(|_| StorageError::InvalidPlaintext(name.to_string()))
    }

    fn write(&self, name: &SecretName, plaintext: &str) -> Result<(), StorageError> {
        let path = self.resolve(name);
        let key_id = self.key_id_for(&path, name)?;
        let ciphertext = self.encryptor.encrypt(&key_id, plaintext.as_bytes())?;

        let lock = acquire_secret_lock(&path)?;
        write_secret_atomic(lock.path(), &ciphertext)
    }

    fn list(&self, namespace: &str) -> Result<Vec<SecretName>, StorageError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        self.collect(&self.root, &mut names)?;
        names.retain(|name| name.is_within(namespace));
        names.sort();
        Ok(names)
    }

    fn remove(&self, name: &SecretName) -> Result<(), StorageError> {
        let path = self.resolve(name);
        let not_found = || StorageError::NotFound(name.to_string());
        if !fs::metadata(&path).map_err(|_| not_found())?.is_file() {
            return Err(not_found());
        }

        let lock = acquire_secret_lock(&path)?;
        let file = OpenOptions::new()
            .write(true)
            .open(lock.path())
            .map_err(|_| not_found())?;
        let size = file.metadata()?.len();
        wipe_then_unlink(lock.path(), file, size, name)?;

        let lock_path = lock.lock_path.clone();
        drop(lock);
        let _ = fs::remove_file(lock_path);
        Ok(())
    }
}

/// Destination of a wipe: the filler must reach the disk before the
/// inode is released.
trait WipeTarget: Write {
    fn sync_to_disk(&mut self) -> std::io::Result<()>;
}

impl WipeTarget for File {
    fn sync_to_disk(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }
}

impl<T: WipeTarget + ?Sized> WipeTarget for &mut T {
    fn sync_to_disk(&mut self) -> std::io::Result<()> {
        (**self).sync_to_disk()
    }
}

/// Overwrites `size` bytes through `writer` in a single write, syncs them
/// and only unlinks `path` once the full length was written.
fn wipe_then_unlink<W: WipeTarget>(
    path: &Path,
    mut writer: W,
    size: u64,
    name: &SecretName,
) -> Result<(), StorageError> {
    let incomplete = |written: u64| StorageError::WipeIncomplete {
        name: name.to_string(),
        written,
        expected: size,
    };

    let length = usize::try_from(size).map_err(|_| incomplete(0))?;
    let filler = vec![WIPE_FILLER; length];
    let written = writer.write(&filler)?;
    if written as u64 != size {
        return Err(incomplete(written as u64));
    }
    writer.flush()?;
    writer.sync_to_disk()?;
    drop(writer);

    fs::remove_file(path)?;
    Ok(())
}

fn write_secret_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir)?;

    let temp_file = parent_dir.join(format!(
        ".{}.{}.tmp",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("secret"),
        unique_suffix()
    ));

    let mut handle = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_file)?;
    set_secure_permissions(&temp_file)?;
    if let Err(error) = handle.write_all(bytes).and_then(|()| handle.sync_all()) {
        drop(handle);
        let _ = fs::remove_file(&temp_file);
        return Err(error.into());
    }
    drop(handle);

    fs::rename(&temp_file, path)?;

    if let Ok(directory_handle) = OpenOptions::new().read(true).open(parent_dir) {
        let _ = directory_handle.sync_all();
    }

    Ok(())
}

fn unique_suffix() -> u128 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    (u128::from(std::process::id()) << 64) | nanos
}

fn set_secure_permissions(_path: &Path) -> Result<(), StorageError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(_path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
