use std::sync::Arc;

use tracing::debug;
use tracing::info;
use tracing::warn;

use super::CheckpointStore;
use crate::Result;

/// Decodes a persisted watermark.
///
/// The canonical form is an ASCII decimal `u64`. Anything else (including
/// signed or whitespace-padded values written by hand) restores as 0.
pub fn decode_watermark(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.parse::<u64>().ok()
}

pub fn encode_watermark(watermark: u64) -> Vec<u8> {
    watermark.to_string().into_bytes()
}

/// Watermark persistence for one watcher role
#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    key: String,
}

impl std::fmt::Debug for Checkpointer {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Checkpointer").field("key", &self.key).finish()
    }
}

impl Checkpointer {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        key: String,
    ) -> Self {
        Self { store, key }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the persisted watermark. Missing and unparseable values restore
    /// as 0 so a fresh deployment starts from scratch; a store that cannot be
    /// read is an error, never a reset.
    pub async fn restore(&self) -> Result<u64> {
        match self.store.get(&self.key).await? {
            Some(raw) => match decode_watermark(&raw) {
                Some(watermark) => {
                    info!(key = %self.key, watermark, "restoring watermark");
                    Ok(watermark)
                }
                None => {
                    warn!(key = %self.key, "unparseable watermark, starting from scratch");
                    Ok(0)
                }
            },
            None => {
                info!(key = %self.key, "no watermark restore point, starting from scratch");
                Ok(0)
            }
        }
    }

    pub async fn persist(
        &self,
        watermark: u64,
    ) -> Result<()> {
        debug!(key = %self.key, watermark, "writing watermark");
        self.store.put(&self.key, encode_watermark(watermark)).await
    }
}
