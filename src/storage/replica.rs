//! Local replica operations shared by the coordinator (for the local shard)
//! and the node-internal replica endpoint.

use anyhow::{Context, Result};
use bytes::Bytes;

use super::engine::{Entry, StorageEngine};
use super::envelope::StoredEnvelope;

/// The envelope stored locally for `key`, if any.
pub fn read_envelope(store: &dyn StorageEngine, key: &str) -> Result<Option<StoredEnvelope>> {
    let Some(entry) = store.get(key.as_bytes())? else {
        return Ok(None);
    };
    match entry.value {
        Some(bytes) => {
            let envelope = StoredEnvelope::decode(&bytes)
                .with_context(|| format!("Stored envelope for {} is corrupt", key))?;
            Ok(Some(envelope))
        }
        None => Ok(None),
    }
}

/// Stores `envelope` unless the local copy already supersedes it.
///
/// Returns whether the store was written. Re-applying the same envelope is a
/// no-op for the stored state.
pub fn apply_envelope(store: &dyn StorageEngine, key: &str, envelope: &StoredEnvelope) -> Result<bool> {
    match read_envelope(store, key) {
        Ok(Some(existing)) if existing.supersedes(envelope) => {
            tracing::debug!(
                "Keeping newer local version of {} (ts {} > {})",
                key,
                existing.timestamp,
                envelope.timestamp
            );
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!("Overwriting unreadable local copy: {:#}", e),
    }

    store.upsert(Entry {
        key: Bytes::copy_from_slice(key.as_bytes()),
        value: Some(Bytes::from(envelope.encode()?)),
    })?;
    Ok(true)
}
