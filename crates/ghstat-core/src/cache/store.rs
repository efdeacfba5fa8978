//! Durable blob stores for the persisted caches.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::sync::{Arc, Mutex};

use base64::{Engine, engine::general_purpose::STANDARD};
use camino::{Utf8Path, Utf8PathBuf};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use tracing::{debug, info, instrument, warn};

use super::CacheError;

/// Name of the key file inside the cache directory.
pub const KEY_FILE: &str = ".cache.key";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A named-blob store.
pub trait BlobStore: Send + Sync {
    /// Read a blob; `Ok(None)` when it does not exist.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Create or replace a blob.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError>;

    /// Delete a blob if present.
    fn remove(&self, name: &str) -> Result<(), CacheError>;

    /// Delete every blob. Returns how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;
}

impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        (**self).read(name)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        (**self).write(name, bytes)
    }

    fn remove(&self, name: &str) -> Result<(), CacheError> {
        (**self).remove(name)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        (**self).clear()
    }
}

/// Check a blob name is a plain file name with no path components.
///
/// Allowed: ASCII letters, digits, `_`, `-`, `.`, and space; must not start
/// with `.`.
pub fn validate_name(name: &str) -> Result<(), CacheError> {
    let ok = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '));
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidName(name.to_string()))
    }
}

/// Files under one directory, encrypted with ChaCha20-Poly1305.
///
/// The key is generated on first use and written to [`KEY_FILE`] with
/// owner-only permissions. Each blob is `nonce || ciphertext`. Writes go
/// through a temp file and rename, so concurrent runs end up with whichever
/// write landed last.
pub struct EncryptedFileStore {
    dir: Utf8PathBuf,
    cipher: ChaCha20Poly1305,
}

impl std::fmt::Debug for EncryptedFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedFileStore")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl EncryptedFileStore {
    /// Open (creating if needed) the store rooted at `dir`.
    #[instrument(skip_all)]
    pub fn open(dir: impl AsRef<Utf8Path>) -> Result<Self, CacheError> {
        let dir = dir.as_ref().to_path_buf();
        debug!(%dir, "opening encrypted cache store");
        create_private_dir(&dir)?;
        let key = load_or_create_key(&dir.join(KEY_FILE))?;
        Ok(Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(&key)),
            dir,
        })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<Utf8PathBuf, CacheError> {
        validate_name(name)?;
        Ok(self.dir.join(name))
    }
}

impl BlobStore for EncryptedFileStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(name)?;
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if data.len() < NONCE_LEN {
            return Err(CacheError::Corrupt(format!("{name}: truncated")));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CacheError::Corrupt(format!("{name}: authentication failed")))?;
        Ok(Some(plain))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        let path = self.path_for(name)?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, bytes)
            .map_err(|_| CacheError::Encryption(format!("{name}: encryption failed")))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&nonce)?;
        tmp.write_all(&ciphertext)?;
        tmp.persist(&path).map_err(|e| CacheError::Io(e.error))?;
        debug!(%path, bytes = bytes.len(), "cache blob written");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), CacheError> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name == KEY_FILE || validate_name(name).is_err() || !entry.file_type()?.is_file() {
                continue;
            }
            fs::remove_file(entry.path())?;
            removed += 1;
        }
        info!(removed, dir = %self.dir, "cache cleared");
        Ok(removed)
    }
}

fn create_private_dir(dir: &Utf8Path) -> Result<(), CacheError> {
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Load the key at `path`, generating one when it is missing or unusable.
///
/// A corrupt key file is replaced; blobs sealed with the old key then fail
/// authentication and read as misses.
fn load_or_create_key(path: &Utf8Path) -> Result<Vec<u8>, CacheError> {
    match read_key(path) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => create_key(path, false),
        Err(CacheError::Corrupt(reason)) => {
            warn!(%path, %reason, "cache key unusable; generating a new one");
            create_key(path, true)
        }
        Err(e) => Err(e),
    }
}

fn read_key(path: &Utf8Path) -> Result<Option<Vec<u8>>, CacheError> {
    let encoded = match fs::read_to_string(path) {
        Ok(encoded) => encoded,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(CacheError::Corrupt(format!("{path}: not valid UTF-8")));
        }
        Err(e) => return Err(e.into()),
    };
    let key = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CacheError::Corrupt(format!("{path}: {e}")))?;
    if key.len() != KEY_LEN {
        return Err(CacheError::Corrupt(format!(
            "{path}: expected {KEY_LEN}-byte key, found {}",
            key.len()
        )));
    }
    Ok(Some(key))
}

/// Write a fresh key through a temp file so `path` never holds a partial key.
///
/// With `replace` unset, a key that another run put in place first wins.
fn create_key(path: &Utf8Path, replace: bool) -> Result<Vec<u8>, CacheError> {
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let key = ChaCha20Poly1305::generate_key(&mut OsRng);

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    tmp.write_all(STANDARD.encode(key).as_bytes())?;
    tmp.as_file().sync_all()?;

    let persisted = if replace {
        tmp.persist(path)
    } else {
        tmp.persist_noclobber(path)
    };
    match persisted {
        Ok(_) => {
            info!(%path, "generated cache encryption key");
            Ok(key.to_vec())
        }
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => read_key(path)?
            .ok_or_else(|| CacheError::Corrupt(format!("{path}: key vanished while opening"))),
        Err(e) => Err(CacheError::Io(e.error)),
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>, CacheError> {
        self.blobs
            .lock()
            .map_err(|_| CacheError::Corrupt("memory store lock poisoned".into()))
    }
}

impl BlobStore for MemoryStore {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>, CacheError> {
        validate_name(name)?;
        Ok(self.lock()?.get(name).cloned())
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<(), CacheError> {
        validate_name(name)?;
        self.lock()?.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), CacheError> {
        self.lock()?.remove(name);
        Ok(())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut blobs = self.lock()?;
        let removed = blobs.len();
        blobs.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(tmp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(tmp.path().join("cache")).unwrap()
    }

    #[test]
    fn names_with_path_components_are_rejected() {
        for bad in ["", "../escape", "a/b", ".cache.key", "..", "x\\y"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_name("commits-abc123.bin").is_ok());
    }

    #[test]
    fn encrypted_round_trip() {
        let tmp = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(utf8(&tmp)).unwrap();
        store.write("entry.bin", b"hello").unwrap();
        assert_eq!(store.read("entry.bin").unwrap().as_deref(), Some(&b"hello"[..]));
        assert!(store.read("missing.bin").unwrap().is_none());
    }

    #[test]
    fn ciphertext_on_disk_is_not_plaintext() {
        let tmp = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(utf8(&tmp)).unwrap();
        store.write("entry.bin", b"very secret payload").unwrap();
        let raw = fs::read(store.dir().join("entry.bin")).unwrap();
        assert!(!raw.windows(6).any(|w| w == b"secret"));
    }

    #[test]
    fn key_is_reused_across_opens() {
        let tmp = TempDir::new().unwrap();
        let dir = utf8(&tmp);
        EncryptedFileStore::open(&dir).unwrap().write("entry.bin", b"v1").unwrap();
        let reopened = EncryptedFileStore::open(&dir).unwrap();
        assert_eq!(reopened.read("entry.bin").unwrap().as_deref(), Some(&b"v1"[..]));
    }

    #[cfg(unix)]
    #[test]
    fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(utf8(&tmp)).unwrap();
        let mode = fs::metadata(store.dir().join(KEY_FILE)).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn tampered_blob_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(utf8(&tmp)).unwrap();
        store.write("entry.bin", b"payload").unwrap();
        let path = store.dir().join("entry.bin");
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        fs::write(&path, raw).unwrap();
        assert!(matches!(store.read("entry.bin"), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn blob_from_another_key_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let dir = utf8(&tmp);
        EncryptedFileStore::open(&dir).unwrap().write("entry.bin", b"payload").unwrap();
        fs::remove_file(dir.join(KEY_FILE)).unwrap();
        let rekeyed = EncryptedFileStore::open(&dir).unwrap();
        assert!(matches!(rekeyed.read("entry.bin"), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn empty_key_file_is_regenerated() {
        let tmp = TempDir::new().unwrap();
        let dir = utf8(&tmp);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(KEY_FILE), b"").unwrap();

        let store = EncryptedFileStore::open(&dir).unwrap();
        store.write("entry.bin", b"payload").unwrap();
        assert_eq!(store.read("entry.bin").unwrap().as_deref(), Some(&b"payload"[..]));

        let encoded = fs::read_to_string(dir.join(KEY_FILE)).unwrap();
        assert_eq!(STANDARD.decode(encoded.trim()).unwrap().len(), KEY_LEN);
        let reopened = EncryptedFileStore::open(&dir).unwrap();
        assert_eq!(reopened.read("entry.bin").unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn garbled_key_file_turns_old_blobs_into_misses() {
        let tmp = TempDir::new().unwrap();
        let dir = utf8(&tmp);
        EncryptedFileStore::open(&dir).unwrap().write("entry.bin", b"payload").unwrap();
        fs::write(dir.join(KEY_FILE), "not base64 at all!").unwrap();

        let rekeyed = EncryptedFileStore::open(&dir).unwrap();
        assert!(matches!(rekeyed.read("entry.bin"), Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn short_key_is_corrupt_not_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = utf8(&tmp);
        fs::create_dir_all(&path).unwrap();
        let key_path = path.join(KEY_FILE);
        fs::write(&key_path, STANDARD.encode([7u8; 16])).unwrap();
        assert!(matches!(read_key(&key_path), Err(CacheError::Corrupt(_))));
        assert_eq!(load_or_create_key(&key_path).unwrap().len(), KEY_LEN);
    }

    #[test]
    fn clear_keeps_the_key() {
        let tmp = TempDir::new().unwrap();
        let store = EncryptedFileStore::open(utf8(&tmp)).unwrap();
        store.write("a.bin", b"1").unwrap();
        store.write("b.bin", b"2").unwrap();
        assert_eq!(store.clear().unwrap(), 2);
        assert!(store.dir().join(KEY_FILE).exists());
        assert!(store.read("a.bin").unwrap().is_none());
    }

    #[test]
    fn memory_store_basics() {
        let store = MemoryStore::new();
        store.write("x.bin", b"1").unwrap();
        assert_eq!(store.read("x.bin").unwrap(), Some(b"1".to_vec()));
        store.remove("x.bin").unwrap();
        assert!(store.read("x.bin").unwrap().is_none());
    }
}
