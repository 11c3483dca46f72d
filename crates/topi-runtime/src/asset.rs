//! Dialogue assets
//!
//! Compiled dialogue is imported once into [`ByteData`]: the container
//! bytes plus the extern and bough tables the host needs before a VM
//! exists. Files that do not parse, or declare no boughs, are kept as
//! [`Asset::Uncompiled`] text instead of failing the import.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use topi_bytecode::{Container, FormatResult};
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// Imported compiled dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteData {
    bytes: Arc<[u8]>,
    externs: BTreeSet<String>,
    boughs: Vec<String>,
}

impl ByteData {
    /// Parse container bytes and capture their tables
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> FormatResult<Self> {
        let bytes = bytes.into();
        let container = Container::parse(bytes.clone())?;
        Ok(Self {
            externs: container.externs(),
            boughs: container
                .bough_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
            bytes: bytes.into(),
        })
    }

    /// Container bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Names the host may bind
    pub fn externs(&self) -> &BTreeSet<String> {
        &self.externs
    }

    /// Entry points in declaration order
    pub fn boughs(&self) -> &[String] {
        &self.boughs
    }

    /// Check for a bough
    pub fn has_bough(&self, name: &str) -> bool {
        self.boughs.iter().any(|b| b == name)
    }
}

/// Result of importing a dialogue file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    /// Usable bytecode
    Compiled(ByteData),
    /// Anything else, kept verbatim
    Uncompiled(Vec<u8>),
}

impl Asset {
    /// Import bytes, falling back to [`Asset::Uncompiled`]
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes = bytes.into();
        match ByteData::from_bytes(bytes.clone()) {
            Ok(data) if !data.boughs.is_empty() => Self::Compiled(data),
            Ok(_) => {
                debug!("container declares no boughs, importing as text");
                Self::Uncompiled(bytes)
            }
            Err(err) => {
                debug!(%err, "not compiled dialogue, importing as text");
                Self::Uncompiled(bytes)
            }
        }
    }

    /// Compiled data, if any
    pub fn compiled(&self) -> Option<&ByteData> {
        match self {
            Self::Compiled(data) => Some(data),
            Self::Uncompiled(_) => None,
        }
    }
}

/// Source of compiled dialogue by key
pub trait AssetLoader: Send + Sync {
    /// Load and import the asset named `key`
    fn load(&self, key: &str) -> impl Future<Output = RuntimeResult<ByteData>> + Send;
}

/// Loader over assets registered in memory
#[derive(Debug, Default)]
pub struct MemoryAssetLoader {
    assets: DashMap<String, ByteData>,
}

impl MemoryAssetLoader {
    /// Create an empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Register compiled data under `key`
    pub fn insert(&self, key: impl Into<String>, data: ByteData) {
        self.assets.insert(key.into(), data);
    }

    /// Import and register raw bytes; returns whether they were compiled
    pub fn insert_bytes(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> bool {
        match Asset::from_bytes(bytes) {
            Asset::Compiled(data) => {
                self.insert(key, data);
                true
            }
            Asset::Uncompiled(_) => false,
        }
    }

    /// Forget `key`
    pub fn remove(&self, key: &str) -> bool {
        self.assets.remove(key).is_some()
    }
}

impl AssetLoader for MemoryAssetLoader {
    async fn load(&self, key: &str) -> RuntimeResult<ByteData> {
        self.assets
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RuntimeError::AssetNotFound(key.to_string()))
    }
}

/// Loader reading files under a root directory
#[derive(Debug, Clone)]
pub struct FsAssetLoader {
    root: PathBuf,
    extension: Option<String>,
}

impl FsAssetLoader {
    /// Resolve keys relative to `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: None,
        }
    }

    /// Append a file extension to every key
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    fn path(&self, key: &str) -> PathBuf {
        let path = self.root.join(key);
        match &self.extension {
            Some(ext) => path.with_extension(ext),
            None => path,
        }
    }
}

impl AssetLoader for FsAssetLoader {
    async fn load(&self, key: &str) -> RuntimeResult<ByteData> {
        let path = self.path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RuntimeError::AssetNotFound(key.to_string()));
            }
            Err(e) => return Err(RuntimeError::io(path, e)),
        };
        match Asset::from_bytes(bytes) {
            Asset::Compiled(data) => Ok(data),
            Asset::Uncompiled(_) => Err(RuntimeError::NotCompiled(key.to_string())),
        }
    }
}
