//! Checkpoint persistence for lexgraph analysis runs.
//!
//! A checkpoint is a snapshot of a graph's state at a cut-point, keyed by a
//! `thread_id` (one logical execution thread per case). Runs can be resumed
//! from their latest checkpoint after a crash, a restart, or a
//! human-in-the-loop suspension.
//!
//! The crate provides:
//!
//! - [`Checkpoint`], [`CheckpointConfig`], [`CheckpointMetadata`] and
//!   [`CheckpointTuple`] value types
//! - the async [`CheckpointSaver`] trait that storage backends implement
//! - [`InMemoryCheckpointSaver`], the reference backend used in tests and
//!   single-process deployments
//! - [`BlockingSaverAdapter`] for wrapping a synchronous backend so it can be
//!   used from the async runtime
//! - [`CheckpointCodec`], the byte encoding backends store records in
//!
//! Backends are expected to be idempotent on `(thread_id, checkpoint_id)`:
//! storing the same checkpoint twice must be indistinguishable from storing
//! it once.

pub mod checkpoint;
pub mod codec;
pub mod error;
pub mod memory;
pub mod traits;

pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointId, CheckpointMetadata, CheckpointSource,
    CheckpointTuple,
};
pub use codec::{CheckpointCodec, JsonCheckpointCodec};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use traits::{BlockingCheckpointSaver, BlockingSaverAdapter, CheckpointSaver};
