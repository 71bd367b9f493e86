//! Server configuration.

use std::time::Duration;

use atrium_core::defaults;

/// Default request body limit for uploads (50 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// Backing store for entity documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStoreKind {
    Postgres,
    Memory,
}

/// Backing store for blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStoreKind {
    Filesystem,
    Memory,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub entity_store: EntityStoreKind,
    pub object_store: ObjectStoreKind,
    pub blob_storage_path: String,
    pub public_base_url: String,
    pub blob_signing_secret: String,
    /// Lifetime of secure content URLs handed to members.
    pub secure_url_ttl: Duration,
    pub max_body_bytes: usize,
    /// Allowed CORS origins; empty allows none.
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: "postgres://localhost/atrium".to_string(),
            entity_store: EntityStoreKind::Postgres,
            object_store: ObjectStoreKind::Filesystem,
            blob_storage_path: defaults::BLOB_STORAGE_PATH.to_string(),
            public_base_url: defaults::PUBLIC_BASE_URL.to_string(),
            blob_signing_secret: String::new(),
            secure_url_ttl: Duration::from_secs(defaults::SECURE_CONTENT_URL_TTL_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            entity_store: match std::env::var("ENTITY_STORE").as_deref() {
                Ok("memory") => EntityStoreKind::Memory,
                _ => EntityStoreKind::Postgres,
            },
            object_store: match std::env::var("OBJECT_STORE").as_deref() {
                Ok("memory") => ObjectStoreKind::Memory,
                _ => ObjectStoreKind::Filesystem,
            },
            blob_storage_path: std::env::var("BLOB_STORAGE_PATH")
                .unwrap_or(defaults.blob_storage_path),
            public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or(defaults.public_base_url),
            blob_signing_secret: std::env::var("BLOB_SIGNING_SECRET").unwrap_or_default(),
            secure_url_ttl: std::env::var("SECURE_CONTENT_URL_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.secure_url_ttl),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_body_bytes),
            cors_origins: std::env::var("ALLOWED_ORIGINS")
                .map(|v| parse_allowed_origins(&v))
                .unwrap_or_default(),
        }
    }

    pub fn with_secure_url_ttl(mut self, ttl: Duration) -> Self {
        self.secure_url_ttl = ttl;
        self
    }
}

/// Split a comma-separated origin list, dropping blanks.
pub fn parse_allowed_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
