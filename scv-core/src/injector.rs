use async_trait::async_trait;

use crate::ids::{StreamId, TargetId};
use crate::stream::{MongoStatus, Stream};

/// Read-only snapshot of a stream the moment it finished transitioning to
/// Inactive, handed to the injector with no lock held. Safe to read without
/// synchronization because nothing else can mutate the stream until another
/// explicit operation is called on it.
#[derive(Debug, Clone)]
pub struct DeactivatedStream {
    pub stream_id: StreamId,
    pub target_id: TargetId,
    pub owner: String,
    pub frames: u64,
    pub error_count: u64,
    pub mongo_status: MongoStatus,
}

impl From<&Stream> for DeactivatedStream {
    fn from(s: &Stream) -> Self {
        Self {
            stream_id: s.stream_id.clone(),
            target_id: s.target_id.clone(),
            owner: s.owner.clone(),
            frames: s.frames,
            error_count: s.error_count,
            mongo_status: s.mongo_status,
        }
    }
}

/// External collaborator notified whenever the manager deactivates a stream.
/// Implementations persist whatever durable facts the deactivation implies
/// (frame counts, status flips) and must be safe to call from any thread;
/// the manager never holds a lock while calling this.
#[async_trait]
pub trait Injector: Send + Sync {
    async fn deactivate_stream_service(&self, stream: DeactivatedStream) -> anyhow::Result<()>;
}

/// Default injector for standalone operation and tests: records the event
/// at debug level and performs no persistence.
#[derive(Debug, Default)]
pub struct LoggingInjector;

#[async_trait]
impl Injector for LoggingInjector {
    async fn deactivate_stream_service(&self, stream: DeactivatedStream) -> anyhow::Result<()> {
        tracing::debug!(
            stream_id = %stream.stream_id,
            target_id = %stream.target_id,
            frames = stream.frames,
            error_count = stream.error_count,
            "stream deactivated"
        );
        Ok(())
    }
}
