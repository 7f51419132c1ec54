//! Durable registry of addressed content
//!
//! The registry is the source of truth for what content this node can seed.
//! Entries survive restarts through a JSON state file written atomically
//! (temp file then rename) so a crash mid-write never corrupts the registry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{ContentError, ContentId, ContentManifest};
use crate::config::StorageConfig;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Content not found: {content_id}")]
    NotFound { content_id: ContentId },

    #[error("Conflicting registration for {content_id}: {reason}")]
    Conflict { content_id: ContentId, reason: String },

    #[error("Registry state corrupted: {reason}")]
    Corrupted { reason: String },

    #[error("Registry I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Registered content entry with everything needed to seed it again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentDescriptor {
    /// Content identifier
    pub content_id: ContentId,
    /// Original file name as uploaded
    pub file_name: String,
    /// Where the content lives on disk
    pub stored_path: PathBuf,
    /// Content length in bytes
    pub size: u64,
    /// Declared media type
    pub media_type: String,
    /// Chunk size used during addressing
    pub chunk_size: u32,
    /// Hex-encoded chunk digests in order
    pub chunk_hashes: Vec<String>,
    /// Shareable locator string
    pub locator: String,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl ContentDescriptor {
    /// Rebuilds the addressing manifest from the stored entry.
    ///
    /// # Errors
    ///
    /// - `ContentError::InvalidId` - Stored chunk digests are not valid hex
    pub fn manifest(&self) -> Result<ContentManifest, ContentError> {
        let mut chunk_hashes = Vec::with_capacity(self.chunk_hashes.len());
        for encoded in &self.chunk_hashes {
            let bytes = hex::decode(encoded).map_err(|e| ContentError::InvalidId {
                reason: format!("invalid chunk digest in registry: {e}"),
            })?;
            if bytes.len() != 20 {
                return Err(ContentError::InvalidId {
                    reason: format!("chunk digest has {} bytes, expected 20", bytes.len()),
                });
            }
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&bytes);
            chunk_hashes.push(hash);
        }

        Ok(ContentManifest {
            content_id: self.content_id,
            total_length: self.size,
            chunk_size: self.chunk_size,
            chunk_hashes,
        })
    }
}

/// Durable content registry backed by a JSON state file.
pub struct ContentRegistry {
    state_path: PathBuf,
    temp_suffix: String,
    entries: RwLock<HashMap<ContentId, ContentDescriptor>>,
}

impl ContentRegistry {
    /// Loads the registry from the configured state file.
    ///
    /// A missing state file yields an empty registry. An unreadable or
    /// unparseable one is an error so stale state is never silently dropped.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Io` - State file exists but cannot be read
    /// - `RegistryError::Corrupted` - State file is not valid registry JSON
    pub async fn load(storage: &StorageConfig) -> Result<Self, RegistryError> {
        let state_path = storage.registry_path();
        let entries = match tokio::fs::read_to_string(&state_path).await {
            Ok(contents) => {
                let descriptors: Vec<ContentDescriptor> = serde_json::from_str(&contents)
                    .map_err(|e| RegistryError::Corrupted {
                        reason: format!("{}: {e}", state_path.display()),
                    })?;
                descriptors
                    .into_iter()
                    .map(|d| (d.content_id, d))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(RegistryError::Io(e)),
        };

        debug!(
            path = %state_path.display(),
            entries = entries.len(),
            "Loaded content registry"
        );

        Ok(Self {
            state_path,
            temp_suffix: storage.temp_file_suffix.to_string(),
            entries: RwLock::new(entries),
        })
    }

    /// Registers content, persisting before returning.
    ///
    /// Registering an id that already exists with the same size, media type
    /// and chunk size is a no-op returning the stored entry. The same id with
    /// differing attributes is a conflict.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Conflict` - Id registered with different attributes
    /// - `RegistryError::Io` / `RegistryError::Serialization` - Persist failed
    pub async fn register(
        &self,
        descriptor: ContentDescriptor,
    ) -> Result<ContentDescriptor, RegistryError> {
        let mut entries = self.entries.write().await;

        if let Some(existing) = entries.get(&descriptor.content_id) {
            if existing.size == descriptor.size
                && existing.media_type == descriptor.media_type
                && existing.chunk_size == descriptor.chunk_size
            {
                return Ok(existing.clone());
            }
            return Err(RegistryError::Conflict {
                content_id: descriptor.content_id,
                reason: format!(
                    "registered as {} ({} bytes), new registration is {} ({} bytes)",
                    existing.media_type, existing.size, descriptor.media_type, descriptor.size
                ),
            });
        }

        entries.insert(descriptor.content_id, descriptor.clone());
        self.persist(&entries).await?;

        Ok(descriptor)
    }

    /// Looks up a registered entry.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` - No entry for this id
    pub async fn lookup(&self, content_id: ContentId) -> Result<ContentDescriptor, RegistryError> {
        let entries = self.entries.read().await;
        entries
            .get(&content_id)
            .cloned()
            .ok_or(RegistryError::NotFound { content_id })
    }

    /// Whether an entry exists for this id.
    pub async fn contains(&self, content_id: ContentId) -> bool {
        self.entries.read().await.contains_key(&content_id)
    }

    /// All registered entries, oldest first.
    pub async fn list(&self) -> Vec<ContentDescriptor> {
        let entries = self.entries.read().await;
        let mut descriptors: Vec<ContentDescriptor> = entries.values().cloned().collect();
        descriptors.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });
        descriptors
    }

    /// Removes an entry, persisting before returning.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` - No entry for this id
    /// - `RegistryError::Io` / `RegistryError::Serialization` - Persist failed
    pub async fn remove(&self, content_id: ContentId) -> Result<ContentDescriptor, RegistryError> {
        let mut entries = self.entries.write().await;
        let removed = entries
            .remove(&content_id)
            .ok_or(RegistryError::NotFound { content_id })?;
        self.persist(&entries).await?;
        Ok(removed)
    }

    /// Number of registered entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the registry has no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Writes the state file atomically: temp file in the same directory,
    /// then rename over the target.
    async fn persist(
        &self,
        entries: &HashMap<ContentId, ContentDescriptor>,
    ) -> Result<(), RegistryError> {
        let mut descriptors: Vec<&ContentDescriptor> = entries.values().collect();
        descriptors.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.content_id.cmp(&b.content_id))
        });

        let contents = serde_json::to_string_pretty(&descriptors)?;

        if let Some(parent) = self.state_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_path_for(&self.state_path, &self.temp_suffix);
        tokio::fs::write(&temp_path, contents).await?;
        tokio::fs::rename(&temp_path, &self.state_path).await?;

        Ok(())
    }
}

fn temp_path_for(state_path: &Path, suffix: &str) -> PathBuf {
    let mut file_name = state_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "registry.json".to_string());
    file_name.push_str(suffix);
    state_path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn storage_for(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            state_dir: dir.path().join("state"),
            library_dir: dir.path().join("library"),
            ..Default::default()
        }
    }

    fn descriptor(id_byte: u8, file_name: &str) -> ContentDescriptor {
        let content_id = ContentId::new([id_byte; 20]);
        ContentDescriptor {
            content_id,
            file_name: file_name.to_string(),
            stored_path: PathBuf::from(format!("/library/{content_id}/{file_name}")),
            size: 1024,
            media_type: "video/mp4".to_string(),
            chunk_size: 256,
            chunk_hashes: vec!["aa".repeat(20); 4],
            locator: format!("magnet:?xt=urn:btih:{content_id}"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_registry_when_no_state_file() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();

        let desc = descriptor(1, "clip.mp4");
        registry.register(desc.clone()).await.unwrap();

        let found = registry.lookup(desc.content_id).await.unwrap();
        assert_eq!(found.file_name, "clip.mp4");
        assert_eq!(found.size, 1024);
    }

    #[tokio::test]
    async fn test_lookup_missing_entry() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();

        let result = registry.lookup(ContentId::new([9; 20])).await;
        assert!(matches!(result, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();

        let first = descriptor(1, "clip.mp4");
        registry.register(first.clone()).await.unwrap();

        // Same id and attributes under a different name keeps the original
        let mut second = descriptor(1, "copy-of-clip.mp4");
        second.created_at = first.created_at;
        let stored = registry.register(second).await.unwrap();

        assert_eq!(stored.file_name, "clip.mp4");
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_conflicting_registration_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();

        registry.register(descriptor(1, "clip.mp4")).await.unwrap();

        let mut conflicting = descriptor(1, "other.webm");
        conflicting.size = 2048;
        let result = registry.register(conflicting).await;

        assert!(matches!(result, Err(RegistryError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let storage = storage_for(&dir);

        {
            let registry = ContentRegistry::load(&storage).await.unwrap();
            registry.register(descriptor(1, "first.mp4")).await.unwrap();
            registry.register(descriptor(2, "second.mp4")).await.unwrap();
        }

        let reloaded = ContentRegistry::load(&storage).await.unwrap();
        assert_eq!(reloaded.len().await, 2);
        assert!(reloaded.contains(ContentId::new([1; 20])).await);
        assert!(reloaded.contains(ContentId::new([2; 20])).await);
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let dir = TempDir::new().unwrap();
        let storage = storage_for(&dir);

        let registry = ContentRegistry::load(&storage).await.unwrap();
        let desc = descriptor(1, "clip.mp4");
        registry.register(desc.clone()).await.unwrap();

        let removed = registry.remove(desc.content_id).await.unwrap();
        assert_eq!(removed.file_name, "clip.mp4");

        let reloaded = ContentRegistry::load(&storage).await.unwrap();
        assert!(reloaded.is_empty().await);
    }

    #[tokio::test]
    async fn test_corrupted_state_file_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = storage_for(&dir);

        tokio::fs::create_dir_all(&storage.state_dir).await.unwrap();
        tokio::fs::write(storage.registry_path(), "{ not json ]")
            .await
            .unwrap();

        let result = ContentRegistry::load(&storage).await;
        assert!(matches!(result, Err(RegistryError::Corrupted { .. })));
    }

    #[tokio::test]
    async fn test_list_ordered_by_registration_time() {
        let dir = TempDir::new().unwrap();
        let registry = ContentRegistry::load(&storage_for(&dir)).await.unwrap();

        let mut early = descriptor(2, "early.mp4");
        early.created_at = Utc::now() - chrono::Duration::hours(1);
        let late = descriptor(1, "late.mp4");

        registry.register(late).await.unwrap();
        registry.register(early).await.unwrap();

        let listed = registry.list().await;
        assert_eq!(listed[0].file_name, "early.mp4");
        assert_eq!(listed[1].file_name, "late.mp4");
    }

    #[test]
    fn test_manifest_round_trip() {
        let desc = descriptor(1, "clip.mp4");
        let manifest = desc.manifest().unwrap();
        assert_eq!(manifest.content_id, desc.content_id);
        assert_eq!(manifest.chunk_count(), 4);
        assert_eq!(manifest.chunk_hashes[0], [0xaa; 20]);
    }

    #[test]
    fn test_manifest_rejects_bad_digest() {
        let mut desc = descriptor(1, "clip.mp4");
        desc.chunk_hashes = vec!["zz".to_string()];
        assert!(desc.manifest().is_err());
    }
}
