//! Object storage with HMAC-signed expiring read URLs.
//!
//! Two [`ObjectStore`] implementations share one [`UrlSigner`]:
//!
//! - [`FilesystemObjectStore`]: atomic temp-file-then-rename writes under a
//!   base directory, with the content type kept in a `.meta` sidecar
//! - [`MemoryObjectStore`]: a map, for tests and development servers
//!
//! Signed URLs have the form
//! `{base_url}/blobs/{path}?expires={unix}&sig={hex}` where the signature is
//! HMAC-SHA256 over `"{path}\n{expires}"`. The API verifies them with
//! [`UrlSigner::verify`] before serving the object.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use atrium_core::{Error, ObjectStore, Result};

type HmacSha256 = Hmac<Sha256>;

const META_SUFFIX: &str = ".meta";

/// Reject absolute paths and parent traversal.
fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::InvalidInput("empty blob path".to_string()));
    }
    let safe = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || path.ends_with(META_SUFFIX) {
        return Err(Error::InvalidInput(format!("invalid blob path: {}", path)));
    }
    Ok(())
}

// =============================================================================
// URL SIGNING
// =============================================================================

/// Issues and verifies expiring signed read URLs.
#[derive(Clone)]
pub struct UrlSigner {
    secret: Arc<Vec<u8>>,
    base_url: String,
}

impl std::fmt::Debug for UrlSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UrlSigner {
    pub fn new(secret: impl AsRef<[u8]>, base_url: impl Into<String>) -> Result<Self> {
        let secret = secret.as_ref().to_vec();
        if secret.is_empty() {
            return Err(Error::Config("blob signing secret is empty".to_string()));
        }
        Ok(Self {
            secret: Arc::new(secret),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Config(format!("invalid signing key: {}", e)))
    }

    fn signature(&self, path: &str, expires: i64) -> Result<String> {
        let mut mac = self.mac()?;
        mac.update(format!("{}\n{}", path, expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build a URL for `path` valid for `ttl` from now.
    pub fn sign(&self, path: &str, ttl: Duration) -> Result<String> {
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let sig = self.signature(path, expires)?;
        Ok(format!(
            "{}/blobs/{}?expires={}&sig={}",
            self.base_url, path, expires, sig
        ))
    }

    /// Check a presented signature; expired or forged links are
    /// [`Error::Unauthorized`].
    pub fn verify(&self, path: &str, expires: i64, sig: &str) -> Result<()> {
        if Utc::now().timestamp() > expires {
            return Err(Error::Unauthorized("signed link expired".to_string()));
        }
        let presented = hex::decode(sig)
            .map_err(|_| Error::Unauthorized("malformed signature".to_string()))?;
        let mut mac = self.mac()?;
        mac.update(format!("{}\n{}", path, expires).as_bytes());
        mac.verify_slice(&presented)
            .map_err(|_| Error::Unauthorized("signature mismatch".to_string()))
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Filesystem object store rooted at a base directory.
pub struct FilesystemObjectStore {
    base_path: PathBuf,
    signer: UrlSigner,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>, signer: UrlSigner) -> Self {
        Self {
            base_path: base_path.into(),
            signer,
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    fn full_path(&self, path: &str) -> Result<PathBuf> {
        validate_path(path)?;
        Ok(self.base_path.join(path))
    }

    fn meta_path(full_path: &Path) -> PathBuf {
        let mut name = full_path.as_os_str().to_owned();
        name.push(META_SUFFIX);
        PathBuf::from(name)
    }

    /// Validate that the backend can write, read, and delete files.
    ///
    /// Run at startup to surface permission or mount problems early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join(".health-check");
        let test_file = test_dir.join("write-check.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await;

        Ok(())
    }

    async fn write_atomic(target: &Path, data: &[u8]) -> Result<()> {
        let mut temp_name = target.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "blob_storage: File::create failed");
            e
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, target).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %target.display(), error = %e, "blob_storage: rename failed");
            e
        })?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()> {
        let full_path = self.full_path(path)?;
        debug!(blob_path = %path, size = data.len(), content_type, "blob_storage: put");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Self::write_atomic(&full_path, data).await?;
        Self::write_atomic(&Self::meta_path(&full_path), content_type.as_bytes()).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, String)> {
        let full_path = self.full_path(path)?;
        let data = match fs::read(&full_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("blob", path))
            }
            Err(e) => return Err(e.into()),
        };
        let content_type = fs::read_to_string(Self::meta_path(&full_path))
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());
        Ok((data, content_type))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        Ok(fs::try_exists(full_path).await?)
    }

    async fn delete_if_exists(&self, path: &str) -> Result<bool> {
        let full_path = self.full_path(path)?;
        let existed = fs::try_exists(&full_path).await?;
        if existed {
            fs::remove_file(&full_path).await?;
        }
        let meta = Self::meta_path(&full_path);
        if fs::try_exists(&meta).await? {
            fs::remove_file(meta).await?;
        }
        debug!(blob_path = %path, existed, "blob_storage: delete");
        Ok(existed)
    }

    fn signed_read_url(&self, path: &str, ttl: Duration) -> Result<String> {
        validate_path(path)?;
        self.signer.sign(path, ttl)
    }
}

// =============================================================================
// MEMORY
// =============================================================================

/// In-memory object store.
#[derive(Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<HashMap<String, (Vec<u8>, String)>>>,
    signer: UrlSigner,
}

impl MemoryObjectStore {
    pub fn new(signer: UrlSigner) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            signer,
        }
    }

    pub fn signer(&self) -> &UrlSigner {
        &self.signer
    }

    /// Paths currently stored, sorted.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()> {
        validate_path(path)?;
        self.objects
            .write()
            .await
            .insert(path.to_string(), (data.to_vec(), content_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, String)> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found("blob", path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.read().await.contains_key(path))
    }

    async fn delete_if_exists(&self, path: &str) -> Result<bool> {
        Ok(self.objects.write().await.remove(path).is_some())
    }

    fn signed_read_url(&self, path: &str, ttl: Duration) -> Result<String> {
        validate_path(path)?;
        self.signer.sign(path, ttl)
    }
}
