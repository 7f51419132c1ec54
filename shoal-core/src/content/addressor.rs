//! Content addressing through chunk splitting and hashing
//!
//! Splits content into fixed-size chunks, hashes each chunk with SHA-1, and
//! derives a stable content id from the resulting layout. The id is a pure
//! function of the bytes and the chunking parameters.

use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{ContentError, ContentId};

/// Standard chunk size for content addressing (256 KiB)
pub const DEFAULT_CHUNK_SIZE: u32 = 262_144; // 256 * 1024

/// Domain tag mixed into the id derivation so ids cannot collide with
/// digests of raw content.
const CONTENT_ID_TAG: &[u8] = b"shoal content v1";

/// Complete addressing result for one content unit.
///
/// Carries everything needed to verify individual chunks later without
/// re-reading the whole content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentManifest {
    /// Derived content identifier
    pub content_id: ContentId,
    /// Total content length in bytes
    pub total_length: u64,
    /// Chunk size used during addressing
    pub chunk_size: u32,
    /// SHA-1 digest of each chunk in order
    pub chunk_hashes: Vec<[u8; 20]>,
}

impl ContentManifest {
    /// Number of chunks in the content.
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Length in bytes of the chunk at `index`.
    ///
    /// The final chunk may be shorter than the configured chunk size.
    /// Returns 0 for an out-of-range index.
    pub fn chunk_len(&self, index: u32) -> usize {
        let offset = u64::from(index) * u64::from(self.chunk_size);
        if offset >= self.total_length {
            return 0;
        }
        let remaining = self.total_length - offset;
        (remaining.min(u64::from(self.chunk_size))) as usize
    }

    /// Byte offset of the chunk at `index`.
    pub fn chunk_offset(&self, index: u32) -> u64 {
        u64::from(index) * u64::from(self.chunk_size)
    }

    /// Checks chunk bytes against the recorded digest.
    pub fn verify_chunk(&self, index: u32, data: &[u8]) -> bool {
        let Some(expected) = self.chunk_hashes.get(index as usize) else {
            return false;
        };
        if data.len() != self.chunk_len(index) {
            return false;
        }

        let mut hasher = Sha1::new();
        hasher.update(data);
        let digest = hasher.finalize();
        digest[..] == expected[..]
    }
}

/// Content addressor producing manifests from files or readers.
pub struct ContentAddressor {
    chunk_size: u32,
}

impl Default for ContentAddressor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentAddressor {
    /// Creates an addressor with the default chunk size (256 KiB).
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Creates an addressor with a custom chunk size.
    pub fn with_chunk_size(chunk_size: u32) -> Self {
        Self { chunk_size }
    }

    /// Addresses a file on disk.
    ///
    /// # Errors
    ///
    /// - `ContentError::EmptyContent` - File has zero length
    /// - `ContentError::Io` - File cannot be opened or read
    pub async fn address_file(&self, path: &Path) -> Result<ContentManifest, ContentError> {
        let mut file = File::open(path).await?;
        let total_length = file.metadata().await?.len();
        self.address_reader(&mut file, total_length).await
    }

    /// Addresses `total_length` bytes from a reader.
    ///
    /// # Errors
    ///
    /// - `ContentError::EmptyContent` - Declared length is zero
    /// - `ContentError::TruncatedContent` - Reader ended before `total_length` bytes
    /// - `ContentError::Io` - Read failure
    pub async fn address_reader<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        total_length: u64,
    ) -> Result<ContentManifest, ContentError> {
        if total_length == 0 {
            return Err(ContentError::EmptyContent);
        }

        let mut chunk_hashes = Vec::new();
        let mut buffer = vec![0u8; self.chunk_size as usize];
        let mut position = 0u64;

        while position < total_length {
            let remaining = total_length - position;
            let read_size = (remaining as usize).min(self.chunk_size as usize);

            if let Err(e) = reader.read_exact(&mut buffer[..read_size]).await {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    return Err(ContentError::TruncatedContent {
                        expected: total_length,
                        actual: position,
                    });
                }
                return Err(ContentError::Io(e));
            }

            let mut hasher = Sha1::new();
            hasher.update(&buffer[..read_size]);
            let digest = hasher.finalize();

            let mut hash = [0u8; 20];
            hash.copy_from_slice(&digest[..20]);
            chunk_hashes.push(hash);

            position += read_size as u64;
        }

        let content_id = derive_content_id(total_length, self.chunk_size, &chunk_hashes);

        Ok(ContentManifest {
            content_id,
            total_length,
            chunk_size: self.chunk_size,
            chunk_hashes,
        })
    }
}

/// Derives the content id from the canonical layout encoding.
///
/// The encoding covers the domain tag, total length, chunk size, and the
/// ordered chunk digests. Display names are deliberately excluded.
fn derive_content_id(total_length: u64, chunk_size: u32, chunk_hashes: &[[u8; 20]]) -> ContentId {
    let mut hasher = Sha1::new();
    hasher.update(CONTENT_ID_TAG);
    hasher.update(total_length.to_be_bytes());
    hasher.update(chunk_size.to_be_bytes());
    for hash in chunk_hashes {
        hasher.update(hash);
    }
    let digest = hasher.finalize();

    let mut hash = [0u8; 20];
    hash.copy_from_slice(&digest[..20]);
    ContentId::new(hash)
}
