//! Content-addressed asset cache

use super::archive::{self, sha256_hex};
use super::fetch::Fetcher;
use crate::error::{AgentError, AssetError};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vigil_proto::Asset;

const PATH_SEPARATOR: &str = if cfg!(windows) { ";" } else { ":" };

/// Variables extended with every known asset, and the asset subdirectory each one points at
const ASSET_PATH_VARS: [(&str, &str); 3] = [("PATH", "bin"), ("LD_LIBRARY_PATH", "lib"), ("CPATH", "include")];

/// Process environment derived from the known assets
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: Vec<(String, String)>,
}

impl Environment {
    /// Create an environment from key/value pairs
    pub fn new(vars: Vec<(String, String)>) -> Self {
        Self { vars }
    }

    /// Value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// All variables
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Copy of the variables with `KEY=VALUE` overrides applied
    ///
    /// Entries without `=` are ignored.
    pub fn with_overrides(&self, overrides: &[String]) -> Vec<(String, String)> {
        let mut vars = self.vars.clone();
        for entry in overrides {
            if let Some((key, value)) = entry.split_once('=') {
                set_var(&mut vars, key, value.to_string());
            } else {
                debug!("Ignoring malformed environment entry: {}", entry);
            }
        }
        vars
    }
}

fn set_var(vars: &mut Vec<(String, String)>, key: &str, value: String) {
    match vars.iter_mut().find(|(k, _)| k == key) {
        Some(slot) => slot.1 = value,
        None => vars.push((key.to_string(), value)),
    }
}

struct State {
    known: Vec<Asset>,
    env: Arc<Environment>,
    dirty: bool,
    computations: u64,
}

struct Inner {
    cache_dir: PathBuf,
    fetcher: Arc<dyn Fetcher>,
    fetch_timeout: Duration,
    base_env: Vec<(String, String)>,
    state: Mutex<State>,
    installs: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Registry and installer of runtime assets
///
/// An asset is available once `<cache_dir>/deps/<hash>` exists as a
/// directory; that directory only ever appears complete. Installs of the
/// same hash within the process are serialised, different hashes run in
/// parallel.
#[derive(Clone)]
pub struct AssetManager {
    inner: Arc<Inner>,
}

impl AssetManager {
    /// Create a manager rooted at `cache_dir`, inheriting the process environment
    pub fn new(cache_dir: impl Into<PathBuf>, fetcher: Arc<dyn Fetcher>, fetch_timeout: Duration) -> Result<Self, AgentError> {
        Self::with_base_env(cache_dir, fetcher, fetch_timeout, std::env::vars().collect())
    }

    /// Create a manager whose derived environment starts from `base_env`
    pub fn with_base_env(
        cache_dir: impl Into<PathBuf>,
        fetcher: Arc<dyn Fetcher>,
        fetch_timeout: Duration,
        base_env: Vec<(String, String)>,
    ) -> Result<Self, AgentError> {
        let cache_dir = cache_dir.into();
        let deps = cache_dir.join("deps");
        std::fs::create_dir_all(&deps)
            .map_err(|e| AgentError::Config(format!("cannot create asset cache {}: {}", deps.display(), e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                cache_dir,
                fetcher,
                fetch_timeout,
                base_env,
                state: Mutex::new(State {
                    known: Vec::new(),
                    env: Arc::new(Environment::default()),
                    dirty: true,
                    computations: 0,
                }),
                installs: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Root of the cache
    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    fn deps_dir(&self) -> PathBuf {
        self.inner.cache_dir.join("deps")
    }

    /// Directory an asset with `hash` is installed into
    pub fn asset_dir(&self, hash: &str) -> PathBuf {
        self.deps_dir().join(hash)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, State> {
        // state stays consistent across a panic, so recover from poisoning
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register assets; hashes that are already known are skipped
    ///
    /// Returns the number of newly registered assets. Nothing is registered
    /// if any asset is invalid.
    pub fn merge(&self, assets: &[Asset]) -> Result<usize, AssetError> {
        for asset in assets {
            asset.validate()?;
        }

        let mut state = self.lock_state();
        let mut added = 0;
        for asset in assets {
            if state.known.iter().any(|known| known.hash == asset.hash) {
                continue;
            }
            debug!("Registered asset {} ({})", asset.name, asset.hash);
            state.known.push(asset.clone());
            added += 1;
        }
        if added > 0 {
            state.dirty = true;
        }
        Ok(added)
    }

    /// Registered assets in registration order
    pub fn known(&self) -> Vec<Asset> {
        self.lock_state().known.clone()
    }

    /// Environment for commands, with every known asset on the search paths
    ///
    /// Recomputed only after [`merge`](Self::merge) registered something new.
    pub fn env(&self) -> Arc<Environment> {
        let mut state = self.lock_state();
        if state.dirty {
            let env = derive_env(&self.inner.base_env, &self.deps_dir(), &state.known);
            state.env = Arc::new(env);
            state.dirty = false;
            state.computations += 1;
        }
        Arc::clone(&state.env)
    }

    fn install_lock(&self, hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut installs = self.inner.installs.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(installs.entry(hash.to_string()).or_default())
    }

    /// Make one asset available, downloading it if needed
    pub async fn install(&self, asset: &Asset) -> Result<PathBuf, AssetError> {
        asset.validate()?;
        let dir = self.asset_dir(&asset.hash);
        if is_cached(&dir)? {
            debug!("Asset {} already cached", asset.name);
            return Ok(dir);
        }

        let lock = self.install_lock(&asset.hash);
        let _guard = lock.lock().await;
        if is_cached(&dir)? {
            return Ok(dir);
        }

        info!("Installing asset {} from {}", asset.name, asset.url);
        let body = tokio::time::timeout(self.inner.fetch_timeout, self.inner.fetcher.fetch(&asset.url))
            .await
            .map_err(|_| AssetError::Timeout {
                name: asset.name.clone(),
                timeout: self.inner.fetch_timeout,
            })??;

        let actual = sha256_hex(&body);
        if actual != asset.hash {
            warn!("Checksum mismatch for asset {}: expected {}, got {}", asset.name, asset.hash, actual);
            return Err(AssetError::ChecksumMismatch {
                name: asset.name.clone(),
                expected: asset.hash.clone(),
                actual,
            });
        }

        let deps = self.deps_dir();
        let staged = asset.clone();
        tokio::task::spawn_blocking(move || archive::stage(&deps, &staged, &body))
            .await
            .map_err(|e| AssetError::Extract {
                name: asset.name.clone(),
                reason: e.to_string(),
            })??;

        info!("Installed asset {} into {}", asset.name, dir.display());
        Ok(dir)
    }

    /// Install `assets` concurrently
    ///
    /// Every install runs to completion; the first failure is returned.
    pub async fn install_assets(&self, assets: &[Asset]) -> Result<(), AssetError> {
        let mut tasks = JoinSet::new();
        for asset in assets {
            let manager = self.clone();
            let asset = asset.clone();
            tasks.spawn(async move {
                let result = manager.install(&asset).await;
                (asset, result)
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => {}
                Ok((asset, Err(e))) => {
                    warn!("Failed to install asset {}: {}", asset.name, e);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(AssetError::Extract {
                        name: "unknown".to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Install every registered asset that is not cached yet
    pub async fn install_all(&self) -> Result<(), AssetError> {
        let known = self.known();
        self.install_assets(&known).await
    }
}

fn is_cached(dir: &Path) -> Result<bool, AssetError> {
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(true),
        Ok(_) => Err(AssetError::CacheCollision { path: dir.to_path_buf() }),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AssetError::io(dir, e)),
    }
}

fn derive_env(base: &[(String, String)], deps: &Path, known: &[Asset]) -> Environment {
    let mut vars = base.to_vec();
    if known.is_empty() {
        return Environment::new(vars);
    }
    for (key, subdir) in ASSET_PATH_VARS {
        let mut parts: Vec<String> = known
            .iter()
            .map(|asset| deps.join(&asset.hash).join(subdir).display().to_string())
            .collect();
        if let Some((_, existing)) = vars.iter().find(|(k, _)| k == key) {
            if !existing.is_empty() {
                parts.push(existing.clone());
            }
        }
        set_var(&mut vars, key, parts.join(PATH_SEPARATOR));
    }
    Environment::new(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticFetcher {
        body: Bytes,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl StaticFetcher {
        fn new(body: &'static [u8]) -> Arc<Self> {
            Self::slow(body, Duration::ZERO)
        }

        fn slow(body: &'static [u8], delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                body: Bytes::from_static(body),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, _url: &str) -> Result<Bytes, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.body.clone())
        }
    }

    const BODY: &[u8] = b"#!/bin/sh\necho tool\n";

    fn tool() -> Asset {
        Asset::new("tool", "https://assets.example.com/tool", sha256_hex(BODY))
    }

    fn manager(dir: &Path, fetcher: Arc<StaticFetcher>) -> AssetManager {
        AssetManager::with_base_env(
            dir,
            fetcher,
            Duration::from_secs(5),
            vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_install_and_reuse_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(BODY);
        let assets = manager(dir.path(), fetcher.clone());

        let installed = assets.install(&tool()).await.unwrap();
        assert!(installed.join("bin/tool").is_file());
        assert_eq!(fetcher.calls(), 1);

        // a fresh manager over the same directory finds it on disk
        let second = StaticFetcher::new(BODY);
        let assets = manager(dir.path(), second.clone());
        assets.merge(&[tool()]).unwrap();
        assets.install_all().await.unwrap();
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_leaves_no_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(b"tampered");
        let assets = manager(dir.path(), fetcher);

        let err = assets.install(&tool()).await.unwrap_err();
        assert!(matches!(err, AssetError::ChecksumMismatch { .. }));
        assert!(err.is_integrity_error());
        assert!(!assets.asset_dir(&tool().hash).exists());
        assert_eq!(std::fs::read_dir(dir.path().join("deps")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_installs_download_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::slow(BODY, Duration::from_millis(100));
        let assets = manager(dir.path(), fetcher.clone());
        let tool = tool();
        assets.merge(&[tool.clone()]).unwrap();

        let (a, b, c) = tokio::join!(assets.install_all(), assets.install_all(), assets.install(&tool));
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_collision() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new(BODY);
        let assets = manager(dir.path(), fetcher.clone());
        let path = assets.asset_dir(&tool().hash);
        std::fs::write(&path, b"not a directory").unwrap();

        let err = assets.install(&tool()).await.unwrap_err();
        assert!(matches!(err, AssetError::CacheCollision { .. }));
        assert_eq!(std::fs::read(&path).unwrap(), b"not a directory");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::slow(BODY, Duration::from_secs(5));
        let assets =
            AssetManager::with_base_env(dir.path(), fetcher, Duration::from_millis(50), Vec::new()).unwrap();

        let err = assets.install(&tool()).await.unwrap_err();
        assert!(matches!(err, AssetError::Timeout { .. }));
    }

    #[test]
    fn test_merge_rejects_invalid_hash() {
        let dir = tempfile::tempdir().unwrap();
        let assets = manager(dir.path(), StaticFetcher::new(BODY));
        let bad = Asset::new("tool", "https://assets.example.com/tool", "ABC");

        assert!(assets.merge(&[tool(), bad]).is_err());
        assert!(assets.known().is_empty());
    }

    #[test]
    fn test_env_is_memoized() {
        let dir = tempfile::tempdir().unwrap();
        let assets = manager(dir.path(), StaticFetcher::new(BODY));
        let other = Asset::new("other", "https://assets.example.com/other", "b".repeat(64));

        assert_eq!(assets.merge(&[tool()]).unwrap(), 1);
        let first = assets.env();
        assert!(Arc::ptr_eq(&first, &assets.env()));

        assert_eq!(assets.merge(&[tool()]).unwrap(), 0);
        assert!(Arc::ptr_eq(&first, &assets.env()));
        assert_eq!(assets.lock_state().computations, 1);

        assert_eq!(assets.merge(&[other.clone()]).unwrap(), 1);
        let second = assets.env();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(assets.lock_state().computations, 2);

        let deps = dir.path().join("deps");
        let expected = format!(
            "{}:{}:/usr/bin:/bin",
            deps.join(&tool().hash).join("bin").display(),
            deps.join(&other.hash).join("bin").display()
        );
        assert_eq!(second.get("PATH"), Some(expected.as_str()));
        assert!(second.get("LD_LIBRARY_PATH").unwrap().ends_with("/lib"));
    }

    #[test]
    fn test_env_overrides() {
        let env = Environment::new(vec![("PATH".to_string(), "/bin".to_string())]);
        let vars = env.with_overrides(&["PATH=/opt/bin".to_string(), "LEVEL=3".to_string(), "junk".to_string()]);
        assert_eq!(
            vars,
            vec![
                ("PATH".to_string(), "/opt/bin".to_string()),
                ("LEVEL".to_string(), "3".to_string())
            ]
        );
    }
}
