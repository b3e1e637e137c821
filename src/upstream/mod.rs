//! Orchestrator API seam.
//!
//! The watch loop only needs two calls from the cluster orchestrator: a
//! blocking list query that returns lightweight `{ID, ModifyIndex}` entries
//! plus the server's last index, and a single-record lookup. Everything past
//! the index fields is treated as an opaque JSON payload.

mod nomad;
pub use nomad::*;


use std::fmt;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;
use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Upstream record families that expose a blocking list endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Allocations,
    Deployments,
    Evaluations,
    Jobs,
    Nodes,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Allocations => "allocations",
            ResourceKind::Deployments => "deployments",
            ResourceKind::Evaluations => "evaluations",
            ResourceKind::Jobs => "jobs",
            ResourceKind::Nodes => "nodes",
        }
    }

    pub fn list_path(&self) -> &'static str {
        match self {
            ResourceKind::Allocations => "/v1/allocations",
            ResourceKind::Deployments => "/v1/deployments",
            ResourceKind::Evaluations => "/v1/evaluations",
            ResourceKind::Jobs => "/v1/jobs",
            ResourceKind::Nodes => "/v1/nodes",
        }
    }

    pub fn info_path(
        &self,
        id: &str,
    ) -> String {
        let singular = match self {
            ResourceKind::Allocations => "allocation",
            ResourceKind::Deployments => "deployment",
            ResourceKind::Evaluations => "evaluation",
            ResourceKind::Jobs => "job",
            ResourceKind::Nodes => "node",
        };
        format!("/v1/{singular}/{id}")
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blocking query parameters threaded between long-poll iterations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCursor {
    /// Return only once the server index exceeds this value (or the wait elapses)
    pub wait_index: u64,
    pub wait_time: Duration,
    pub allow_stale: bool,
}

impl QueryCursor {
    pub fn new(
        wait_index: u64,
        wait_time: Duration,
        allow_stale: bool,
    ) -> Self {
        Self {
            wait_index,
            wait_time,
            allow_stale,
        }
    }
}

/// One entry of a list response, reduced to what delta detection needs
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeItem {
    pub id: String,
    pub modify_index: u64,
    /// The list entry as returned by the server
    pub stub: Value,
}

impl ChangeItem {
    /// Projects a raw list entry. Entries without a string `ID` or a numeric
    /// `ModifyIndex` are not change items.
    pub fn from_stub(stub: Value) -> Option<Self> {
        let id = stub.get("ID")?.as_str()?.to_string();
        let modify_index = stub.get("ModifyIndex")?.as_u64()?;
        Some(Self {
            id,
            modify_index,
            stub,
        })
    }
}

/// Result of one blocking list query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub items: Vec<ChangeItem>,
    /// Index the server reported for this query
    pub last_index: u64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrchestratorApi: Send + Sync + 'static {
    /// Blocking list query honoring the cursor's wait index, wait time and
    /// staleness flag.
    async fn list(
        &self,
        kind: ResourceKind,
        cursor: &QueryCursor,
    ) -> Result<ListPage>;

    /// Full record lookup by ID.
    async fn info(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Value>;
}
