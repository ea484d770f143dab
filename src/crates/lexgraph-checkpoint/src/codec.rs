//! Checkpoint encoding for byte-oriented storage backends.
//!
//! Backends persist checkpoints as opaque byte records; a
//! [`CheckpointCodec`] decides the encoding. The graph state inside a
//! checkpoint is an arbitrary `serde_json::Value`, so the format must be
//! self-describing: JSON is the format of record. Backends that compress
//! or encrypt at rest wrap the codec rather than the saver.

use crate::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::error::Result;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct RecordRef<'a> {
    checkpoint: &'a Checkpoint,
    metadata: &'a CheckpointMetadata,
}

#[derive(Deserialize)]
struct Record {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
}

/// Encodes checkpoint records to bytes and back.
pub trait CheckpointCodec: Send + Sync {
    /// Encode a checkpoint and its metadata into one storage record.
    fn encode(&self, checkpoint: &Checkpoint, metadata: &CheckpointMetadata) -> Result<Vec<u8>>;

    /// Decode a storage record.
    fn decode(&self, bytes: &[u8]) -> Result<(Checkpoint, CheckpointMetadata)>;
}

/// JSON checkpoint codec, the default encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCheckpointCodec;

impl JsonCheckpointCodec {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointCodec for JsonCheckpointCodec {
    fn encode(&self, checkpoint: &Checkpoint, metadata: &CheckpointMetadata) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&RecordRef {
            checkpoint,
            metadata,
        })?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(Checkpoint, CheckpointMetadata)> {
        let record: Record = serde_json::from_slice(bytes)?;
        Ok((record.checkpoint, record.metadata))
    }
}
