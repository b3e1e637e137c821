use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::PublishStrategy;
use crate::ChangeItem;
use crate::OrchestratorApi;
use crate::ResourceKind;
use crate::Result;
use crate::Sink;

/// Fetches the full record for each changed item and publishes it keyed by ID
pub struct FullDocument {
    kind: ResourceKind,
    api: Arc<dyn OrchestratorApi>,
    sink: Arc<dyn Sink>,
}

impl FullDocument {
    pub fn new(
        kind: ResourceKind,
        api: Arc<dyn OrchestratorApi>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self { kind, api, sink }
    }
}

#[async_trait]
impl PublishStrategy for FullDocument {
    async fn handle(
        &self,
        item: ChangeItem,
    ) -> Result<()> {
        let record = self.api.info(self.kind, &item.id).await?;
        let payload = serde_json::to_vec(&record)?;
        debug!(kind = %self.kind, id = %item.id, modify_index = item.modify_index, "publishing record");
        self.sink.put(Some(item.id), payload).await
    }
}

/// Publishes the list entry as-is, no record lookup
pub struct ListStub {
    sink: Arc<dyn Sink>,
}

impl ListStub {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl PublishStrategy for ListStub {
    async fn handle(
        &self,
        item: ChangeItem,
    ) -> Result<()> {
        let payload = serde_json::to_vec(&item.stub)?;
        self.sink.put(Some(item.id), payload).await
    }
}
