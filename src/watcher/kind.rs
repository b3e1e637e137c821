use std::fmt;
use std::sync::Arc;

use super::AllocationEvents;
use super::EventClock;
use super::FullDocument;
use super::ListStub;
use super::PublishStrategy;
use crate::OrchestratorApi;
use crate::ResourceKind;
use crate::Sink;

/// One watcher role. Each role has its own checkpoint and lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirehoseKind {
    Allocations,
    Deployments,
    Evaluations,
    Jobs,
    JobListStubs,
    Nodes,
    NodeListStubs,
}

impl FirehoseKind {
    pub const ALL: [FirehoseKind; 7] = [
        FirehoseKind::Allocations,
        FirehoseKind::Deployments,
        FirehoseKind::Evaluations,
        FirehoseKind::Jobs,
        FirehoseKind::JobListStubs,
        FirehoseKind::Nodes,
        FirehoseKind::NodeListStubs,
    ];

    /// Role name used for the checkpoint key, lock key and session name
    pub fn name(&self) -> &'static str {
        match self {
            FirehoseKind::Allocations => "allocations",
            FirehoseKind::Deployments => "deployments",
            FirehoseKind::Evaluations => "evaluations",
            FirehoseKind::Jobs => "jobs",
            FirehoseKind::JobListStubs => "jobliststub",
            FirehoseKind::Nodes => "nodes",
            FirehoseKind::NodeListStubs => "nodeliststub",
        }
    }

    /// Whether the role checkpoints task event time next to its watermark
    pub fn tracks_event_time(&self) -> bool {
        matches!(self, FirehoseKind::Allocations)
    }

    /// Upstream list endpoint the role watches
    pub fn resource(&self) -> ResourceKind {
        match self {
            FirehoseKind::Allocations => ResourceKind::Allocations,
            FirehoseKind::Deployments => ResourceKind::Deployments,
            FirehoseKind::Evaluations => ResourceKind::Evaluations,
            FirehoseKind::Jobs | FirehoseKind::JobListStubs => ResourceKind::Jobs,
            FirehoseKind::Nodes | FirehoseKind::NodeListStubs => ResourceKind::Nodes,
        }
    }

    /// `clock` only matters to allocations, the one role that checkpoints
    /// task event time
    pub fn strategy(
        &self,
        api: Arc<dyn OrchestratorApi>,
        sink: Arc<dyn Sink>,
        clock: Arc<EventClock>,
    ) -> Arc<dyn PublishStrategy> {
        match self {
            FirehoseKind::Allocations => Arc::new(AllocationEvents::new(api, sink, clock)),
            FirehoseKind::JobListStubs | FirehoseKind::NodeListStubs => Arc::new(ListStub::new(sink)),
            FirehoseKind::Deployments | FirehoseKind::Evaluations | FirehoseKind::Jobs | FirehoseKind::Nodes => {
                Arc::new(FullDocument::new(self.resource(), api, sink))
            }
        }
    }
}

impl fmt::Display for FirehoseKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.name())
    }
}
