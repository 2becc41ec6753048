//! Transport abstraction for reaching the remote authority.

use crate::error::SyncResult;
use async_trait::async_trait;
use clinisync_protocol::{PushRequest, PushResponse};

/// Sends entities to the remote authority.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, a message queue, an in-memory remote for tests).
/// Implementations report transport and server failures as errors; a
/// processed push is either [`PushResponse::Accepted`] or a conflict.
///
/// The engine calls `push` concurrently for every entity of a batch and
/// applies its own per-request timeout.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Pushes one entity.
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse>;

    /// Releases transport resources. Called once at engine shutdown.
    async fn close(&self) -> SyncResult<()> {
        Ok(())
    }
}
