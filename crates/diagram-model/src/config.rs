// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Repository configuration and the storage port it is loaded through.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Key under which [`RepositoryConfig`] is stored.
pub const REPOSITORY_CONFIG_KEY: &str = "diagram-model";

/// Replica id used when no configuration is present.
pub const DEFAULT_REPLICA_ID: &str = "local";

/// Where repository settings live between runs.
///
/// Implementations move opaque bytes; [`ConfigService`] owns the encoding.
pub trait ConfigStore {
    /// Bytes stored under `key`, or `None` if nothing was ever written there.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError>;
    /// Replaces whatever is stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError>;
}

/// Failures while reading or writing repository settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem failure.
    #[error("cannot access settings: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not valid settings JSON.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Settings name no replica.
    #[error("replica id must not be empty")]
    EmptyReplicaId,
    /// The backing store refused the request.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// JSON front end over a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Service writing through `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Gives the store back.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decodes the value under `key`. Absent and zero-length entries are `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        match self.store.read(key)? {
            Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(&bytes)?)),
            _ => {
                debug!(key, "no stored settings");
                Ok(None)
            }
        }
    }

    /// Encodes `value` as pretty JSON under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.store.write(key, &bytes)
    }
}

/// Settings consumed by [`crate::RootModelRepository::from_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Id of the local replica in every vector timestamp this process produces.
    pub replica_id: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            replica_id: DEFAULT_REPLICA_ID.to_owned(),
        }
    }
}

impl RepositoryConfig {
    /// Loads the config from `service`, falling back to defaults when absent.
    ///
    /// # Errors
    /// [`ConfigError::EmptyReplicaId`] if the stored replica id is empty, or
    /// whatever the store and decoder report.
    pub fn load<S: ConfigStore>(service: &ConfigService<S>) -> Result<Self, ConfigError> {
        let config: Self = service
            .load(REPOSITORY_CONFIG_KEY)?
            .unwrap_or_default();
        if config.replica_id.is_empty() {
            return Err(ConfigError::EmptyReplicaId);
        }
        Ok(config)
    }

    /// Persists the config through `service`.
    pub fn save<S: ConfigStore>(&self, service: &ConfigService<S>) -> Result<(), ConfigError> {
        service.save(REPOSITORY_CONFIG_KEY, self)
    }
}

/// In-memory [`ConfigStore`] that counts calls and can be told to fail.
#[derive(Clone, Default)]
pub struct MemoryConfigStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    data: BTreeMap<String, Vec<u8>>,
    loads: usize,
    saves: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut MemoryInner) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    /// Makes every subsequent read fail with [`ConfigError::Unavailable`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.with_inner(|i| i.fail_on_load = fail);
    }

    /// Makes every subsequent write fail with [`ConfigError::Unavailable`].
    pub fn set_fail_on_save(&self, fail: bool) {
        self.with_inner(|i| i.fail_on_save = fail);
    }

    /// Attempted loads, failures included.
    pub fn load_count(&self) -> usize {
        self.with_inner(|i| i.loads)
    }

    /// Attempted saves, failures included.
    pub fn save_count(&self) -> usize {
        self.with_inner(|i| i.saves)
    }

    /// Returns `true` if a blob is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.with_inner(|i| i.data.contains_key(key))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        self.with_inner(|i| {
            i.loads += 1;
            if i.fail_on_load {
                return Err(ConfigError::Unavailable(format!("read of {key} refused")));
            }
            Ok(i.data.get(key).cloned())
        })
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError> {
        self.with_inner(|i| {
            i.saves += 1;
            if i.fail_on_save {
                return Err(ConfigError::Unavailable(format!("write of {key} refused")));
            }
            i.data.insert(key.to_owned(), bytes.to_vec());
            Ok(())
        })
    }
}

/// [`ConfigStore`] keeping one `<key>.json` file per key under a base directory.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store rooted at `base`, created if missing.
    pub fn new(base: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), ConfigError> {
        fs::write(self.path_for(key), bytes)?;
        Ok(())
    }
}
