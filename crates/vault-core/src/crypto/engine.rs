//! The process-wide encryption engine
//!
//! Exactly one master key governs all ciphertext of an installation. The
//! engine is constructed explicitly and shared as `Arc<EncryptionEngine>`;
//! it must be initialized before the credential store is opened.
//!
//! Every encrypt/decrypt call captures an `Arc` to the key under a read lock
//! and works against that snapshot, so a concurrent `clear_master_key` either
//! lets the call finish with the captured key or makes it fail with
//! `NotInitialized`. Key bytes are zeroized when the last snapshot drops.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use super::encryption::{self, EncryptedBlob};
use super::key_derivation::{hash_secret, verify_secret, KdfParams};
use super::random;
use super::secure_memory::MasterKey;
use super::validation::{self, TokenKind};
use crate::error::{Result, VaultError};

/// Where the loaded master key lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Loaded from or written to the key file
    Persisted,
    /// The key file could not be used; data encrypted now is lost on restart
    Volatile,
}

struct LoadedKey {
    key: Arc<MasterKey>,
    source: KeySource,
}

/// Owner of the master key
pub struct EncryptionEngine {
    key_file: PathBuf,
    kdf: KdfParams,
    state: RwLock<Option<LoadedKey>>,
}

impl EncryptionEngine {
    /// Create an uninitialized engine bound to a key file
    pub fn new(key_file: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self {
            key_file: key_file.into(),
            kdf,
            state: RwLock::new(None),
        }
    }

    /// Path of the persisted master key
    pub fn key_file(&self) -> &Path {
        &self.key_file
    }

    /// Load the master key, generating and persisting one if absent.
    ///
    /// Idempotent. A key file that cannot be read or written leaves the engine
    /// running on an in-memory key. A key file that exists but is corrupt is
    /// refused rather than overwritten.
    pub fn initialize(&self) -> Result<KeySource> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(loaded) = state.as_ref() {
            return Ok(loaded.source);
        }

        let (key, source) = self.load_or_create()?;
        *state = Some(LoadedKey {
            key: Arc::new(key),
            source,
        });

        Ok(source)
    }

    fn load_or_create(&self) -> Result<(MasterKey, KeySource)> {
        match std::fs::read_to_string(&self.key_file) {
            Ok(contents) => {
                let key = MasterKey::from_hex(&contents)?;
                info!("Loaded master key from {:?}", self.key_file);
                Ok((key, KeySource::Persisted))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let key = MasterKey::generate()?;
                match persist_key(&self.key_file, &key) {
                    Ok(()) => {
                        info!("Generated new master key at {:?}", self.key_file);
                        Ok((key, KeySource::Persisted))
                    }
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                        // Another initializer linked its key first; the file is complete
                        debug!("Master key at {:?} created concurrently", self.key_file);
                        let contents = std::fs::read_to_string(&self.key_file)?;
                        Ok((MasterKey::from_hex(&contents)?, KeySource::Persisted))
                    }
                    Err(e) => {
                        warn!(
                            "Could not persist master key to {:?} ({}); using an in-memory key for this process",
                            self.key_file, e
                        );
                        Ok((key, KeySource::Volatile))
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Could not read master key from {:?} ({}); using an in-memory key for this process",
                    self.key_file, e
                );
                Ok((MasterKey::generate()?, KeySource::Volatile))
            }
        }
    }

    /// Whether a master key is loaded
    pub fn is_initialized(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Source of the loaded key, `None` when uninitialized
    pub fn key_source(&self) -> Option<KeySource> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|loaded| loaded.source)
    }

    fn current_key(&self) -> Result<Arc<MasterKey>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|loaded| Arc::clone(&loaded.key))
            .ok_or(VaultError::NotInitialized)
    }

    /// Encrypt a non-empty string under the master key
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedBlob> {
        let key = self.current_key()?;
        encryption::encrypt(plaintext, &key)
    }

    /// Decrypt and authenticate a blob produced by `encrypt`
    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<String> {
        let key = self.current_key()?;
        encryption::decrypt(blob, &key)
    }

    /// Argon2id hash of `secret`, PHC-encoded with its salt
    pub fn hash(&self, secret: &str, salt: Option<&str>) -> Result<String> {
        self.current_key()?;
        hash_secret(secret, salt, &self.kdf)
    }

    /// Check `secret` against a hash from `hash`. Never errors.
    pub fn verify_hash(&self, secret: &str, stored: &str) -> bool {
        if !self.is_initialized() {
            debug!("verify_hash called on an uninitialized engine");
            return false;
        }
        verify_secret(secret, stored)
    }

    /// URL-safe random secret of `byte_len` bytes
    pub fn generate_secure_key(&self, byte_len: usize) -> Result<String> {
        random::generate_secure_key(byte_len)
    }

    /// Structural validation of a token
    pub fn validate_token_format(&self, token: &str, kind: TokenKind) -> bool {
        validation::validate_token_format(token, kind)
    }

    /// Drop the in-memory key. Safe to call repeatedly.
    pub fn clear_master_key(&self) {
        let cleared = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if cleared.is_some() {
            info!("Master key cleared from memory");
        }
    }
}

impl std::fmt::Debug for EncryptionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionEngine")
            .field("key_file", &self.key_file)
            .field("key_source", &self.key_source())
            .finish()
    }
}

/// Write the key file with owner-only permissions. Never overwrites.
///
/// The key is written and synced to a sibling temp file first, then linked
/// into place, so `path` only ever appears with its full contents.
fn persist_key(path: &Path, key: &MasterKey) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "master.key".to_string());
    let temp_path = path.with_file_name(format!(
        ".{}.{}.tmp",
        file_name,
        uuid::Uuid::new_v4().simple()
    ));

    let result =
        write_temp_key(&temp_path, key).and_then(|()| std::fs::hard_link(&temp_path, path));

    if let Err(e) = std::fs::remove_file(&temp_path) {
        if e.kind() != ErrorKind::NotFound {
            debug!("Could not remove temp key file {:?}: {}", temp_path, e);
        }
    }

    result
}

fn write_temp_key(temp_path: &Path, key: &MasterKey) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(temp_path)?;
    file.write_all(key.to_hex().as_bytes())?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn fast_kdf() -> KdfParams {
        KdfParams {
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn engine_in(dir: &TempDir) -> EncryptionEngine {
        EncryptionEngine::new(dir.path().join("keys").join("master.key"), fast_kdf())
    }

    #[test]
    fn test_uninitialized_engine_refuses_work() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);

        assert!(!engine.is_initialized());
        assert_eq!(engine.key_source(), None);
        assert!(matches!(engine.encrypt("data"), Err(VaultError::NotInitialized)));
        assert!(matches!(
            engine.decrypt(&EncryptedBlob::default()),
            Err(VaultError::NotInitialized)
        ));
        assert!(matches!(engine.hash("data", None), Err(VaultError::NotInitialized)));
        assert!(!engine.verify_hash("data", "$argon2id$v=19$m=8192,t=1,p=1$x$y"));
    }

    #[test]
    fn test_initialize_generates_and_persists_key() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);

        assert_eq!(engine.initialize().unwrap(), KeySource::Persisted);
        assert!(engine.key_file().exists());

        let contents = std::fs::read_to_string(engine.key_file()).unwrap();
        assert_eq!(contents.trim().len(), 64);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(engine.key_file()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.initialize().unwrap();
        let blob = engine.encrypt("keep me").unwrap();

        engine.initialize().unwrap();
        assert_eq!(engine.decrypt(&blob).unwrap(), "keep me");
    }

    #[test]
    fn test_persisted_key_survives_new_engine() {
        let dir = TempDir::new().unwrap();

        let first = engine_in(&dir);
        first.initialize().unwrap();
        let blob = first.encrypt("across restarts").unwrap();
        drop(first);

        let second = engine_in(&dir);
        assert_eq!(second.initialize().unwrap(), KeySource::Persisted);
        assert_eq!(second.decrypt(&blob).unwrap(), "across restarts");
    }

    #[test]
    fn test_clear_and_reinitialize() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.initialize().unwrap();
        let blob = engine.encrypt("secret").unwrap();
        let stored = engine.hash("secret", None).unwrap();

        engine.clear_master_key();
        engine.clear_master_key();

        assert!(!engine.is_initialized());
        assert!(matches!(engine.encrypt("secret"), Err(VaultError::NotInitialized)));
        assert!(matches!(engine.decrypt(&blob), Err(VaultError::NotInitialized)));
        assert!(!engine.verify_hash("secret", &stored));

        engine.initialize().unwrap();
        assert_eq!(engine.decrypt(&blob).unwrap(), "secret");
        assert!(engine.verify_hash("secret", &stored));
    }

    #[test]
    fn test_unwritable_location_falls_back_to_memory() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let engine = EncryptionEngine::new(blocker.join("master.key"), fast_kdf());
        assert_eq!(engine.initialize().unwrap(), KeySource::Volatile);
        assert_eq!(engine.key_source(), Some(KeySource::Volatile));

        let blob = engine.encrypt("volatile").unwrap();
        assert_eq!(engine.decrypt(&blob).unwrap(), "volatile");
    }

    #[test]
    fn test_corrupt_key_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("master.key");
        std::fs::write(&path, "definitely not a key").unwrap();

        let engine = EncryptionEngine::new(&path, fast_kdf());
        assert!(matches!(engine.initialize(), Err(VaultError::KeyMaterial(_))));
        assert!(!engine.is_initialized());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "definitely not a key");
    }

    #[test]
    fn test_engine_hash_and_verify() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        engine.initialize().unwrap();

        let h1 = engine.hash("webhook-shared", None).unwrap();
        let h2 = engine.hash("webhook-shared", None).unwrap();
        assert_ne!(h1, h2);
        assert!(engine.verify_hash("webhook-shared", &h1));
        assert!(!engine.verify_hash("webhook-other", &h1));
        assert!(!engine.verify_hash("webhook-shared", "garbage"));
    }

    #[test]
    fn test_clear_during_concurrent_encryption() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine_in(&dir));
        engine.initialize().unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let stop = Arc::clone(&stop);
                std::thread::spawn(move || {
                    let mut outcomes = Vec::new();
                    while !stop.load(Ordering::Relaxed) {
                        outcomes.push(engine.encrypt("in flight").map(|_| ()));
                    }
                    outcomes
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(20));
        engine.clear_master_key();
        std::thread::sleep(std::time::Duration::from_millis(20));
        stop.store(true, Ordering::Relaxed);

        for worker in workers {
            for outcome in worker.join().unwrap() {
                assert!(matches!(outcome, Ok(()) | Err(VaultError::NotInitialized)));
            }
        }
        assert!(matches!(engine.encrypt("after"), Err(VaultError::NotInitialized)));
    }

    #[test]
    fn test_concurrent_first_initialize_agrees_on_one_key() {
        use std::sync::Barrier;

        const ROUNDS: usize = 50;
        const THREADS: usize = 4;

        for round in 0..ROUNDS {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("keys").join("master.key");
            let barrier = Arc::new(Barrier::new(THREADS));

            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let path = path.clone();
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        let engine = EncryptionEngine::new(path, fast_kdf());
                        barrier.wait();
                        let source = engine.initialize();
                        (engine, source)
                    })
                })
                .collect();

            let engines: Vec<EncryptionEngine> = handles
                .into_iter()
                .map(|handle| {
                    let (engine, source) = handle.join().unwrap();
                    match source {
                        Ok(source) => assert_eq!(source, KeySource::Persisted, "round {round}"),
                        Err(e) => panic!("round {round}: {e}"),
                    }
                    engine
                })
                .collect();

            let blob = engines[0].encrypt("shared").unwrap();
            for engine in &engines[1..] {
                assert_eq!(engine.decrypt(&blob).unwrap(), "shared", "round {round}");
            }

            let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
                .unwrap()
                .map(|entry| entry.unwrap().file_name())
                .collect();
            assert_eq!(leftovers, vec![std::ffi::OsString::from("master.key")], "round {round}");
        }
    }

    #[test]
    fn test_orphaned_temp_file_is_ignored() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir);
        let keys_dir = dir.path().join("keys");
        std::fs::create_dir_all(&keys_dir).unwrap();
        // A writer that died before linking leaves only its temp file behind
        std::fs::write(keys_dir.join(".master.key.deadbeef.tmp"), "").unwrap();

        assert_eq!(engine.initialize().unwrap(), KeySource::Persisted);
        let contents = std::fs::read_to_string(engine.key_file()).unwrap();
        assert_eq!(contents.trim().len(), 64);
    }
}
