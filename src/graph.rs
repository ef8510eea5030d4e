//! Graph export of a finished session for the external renderer
//!
//! Elements are wrapped in `data` objects, the shape graph renderers such as
//! Cytoscape consume directly.

use serde::{Deserialize, Serialize};

use crate::session::SessionSnapshot;
use crate::types::ParticipantId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    pub id: ParticipantId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    /// `edge{n}`, never a participant id
    pub id: String,
    pub source: ParticipantId,
    pub target: ParticipantId,
    pub strength: f64,
    pub source_name: String,
    pub target_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element<T> {
    pub data: T,
}

/// Nodes and edges of one session's relationship graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<Element<NodeData>>,
    pub edges: Vec<Element<EdgeData>>,
}

impl GraphExport {
    /// One node per participant in registration order, one edge per recorded edge
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let name_of = |id: &ParticipantId| {
            snapshot
                .participant(id)
                .map(|p| p.display_name())
                .unwrap_or_else(|| id.to_string())
        };

        let nodes = snapshot
            .players
            .iter()
            .map(|id| Element {
                data: NodeData {
                    id: id.clone(),
                    name: name_of(id),
                },
            })
            .collect();

        let edges = snapshot
            .edges
            .iter()
            .enumerate()
            .map(|(index, edge)| Element {
                data: EdgeData {
                    id: format!("edge{index}"),
                    source: edge.asker.clone(),
                    target: edge.subject.clone(),
                    strength: edge.strength,
                    source_name: name_of(&edge.asker),
                    target_name: name_of(&edge.subject),
                },
            })
            .collect();

        Self { nodes, edges }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
