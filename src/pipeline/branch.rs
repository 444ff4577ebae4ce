//! Per-branch state of stream resolution.

use std::fmt;

use serde::Serialize;

use crate::error::ResolveError;
use crate::model::StreamDescriptor;

/// Where a branch stands. `Playable` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchState {
    /// Output of search or listing; no server yet.
    Discovered,
    /// Tagged with a server, ready for URL policy.
    SourceExpanded,
    /// Locator rewritten, redirector unwrapped, referer chosen.
    UrlRewritten,
    Playable,
    Failed(ResolveError),
}

impl BranchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BranchState::Playable | BranchState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            BranchState::Discovered => "discovered",
            BranchState::SourceExpanded => "source_expanded",
            BranchState::UrlRewritten => "url_rewritten",
            BranchState::Playable => "playable",
            BranchState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchState::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Final state of one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReport {
    /// Server name or locator, for logs.
    pub label: String,
    pub state: BranchState,
    pub streams: Vec<StreamDescriptor>,
}

impl BranchReport {
    pub fn playable(label: impl Into<String>, streams: Vec<StreamDescriptor>) -> Self {
        Self {
            label: label.into(),
            state: BranchState::Playable,
            streams,
        }
    }

    pub fn failed(label: impl Into<String>, reason: ResolveError) -> Self {
        Self {
            label: label.into(),
            state: BranchState::Failed(reason),
            streams: Vec::new(),
        }
    }

    pub fn failure(&self) -> Option<&ResolveError> {
        match &self.state {
            BranchState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of `resolve_streams`: streams in branch order, plus how every
/// branch ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub streams: Vec<StreamDescriptor>,
    #[serde(skip)]
    pub branches: Vec<BranchReport>,
}

impl Resolution {
    pub fn from_branches(branches: Vec<BranchReport>) -> Self {
        let streams = branches.iter().flat_map(|b| b.streams.iter().cloned()).collect();
        Self { streams, branches }
    }

    /// Single-branch failure before any fan-out.
    pub fn failed(label: impl Into<String>, reason: ResolveError) -> Self {
        Self::from_branches(vec![BranchReport::failed(label, reason)])
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResolveError> {
        self.branches.iter().filter_map(BranchReport::failure)
    }
}
