use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::StreamResult;
use crate::stream::record::{ChangeRecord, StreamSpec};

/// Live feed for one subscription. An `Err` item or the end of the stream
/// means the transport dropped; dropping the feed unsubscribes.
pub type ChangeFeed = Pin<Box<dyn Stream<Item = StreamResult<ChangeRecord>> + Send>>;

#[async_trait]
pub trait ChangeStreamBackend: Send + Sync {
    fn backend_id(&self) -> &str;
    async fn subscribe(&self, spec: &StreamSpec) -> StreamResult<ChangeFeed>;
}
