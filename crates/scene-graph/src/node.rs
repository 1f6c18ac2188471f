use serde::{Deserialize, Serialize};

use crate::attribute::Attribute;
use crate::geometry::Geometry;
use crate::id::Id;
use crate::pose::{Covariance, Pose, PoseHistory, PoseSample};
use crate::time::TimeStamp;

/// Wire discriminator of a node record (`@graphtype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GraphType {
    Node,
    Group,
    Transform,
    UncertainTransform,
    GeometricNode,
    Connection,
    RemoteRootNode,
}

impl GraphType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphType::Node => "Node",
            GraphType::Group => "Group",
            GraphType::Transform => "Transform",
            GraphType::UncertainTransform => "UncertainTransform",
            GraphType::GeometricNode => "GeometricNode",
            GraphType::Connection => "Connection",
            GraphType::RemoteRootNode => "RemoteRootNode",
        }
    }
}

/// Variant specific part of a node.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Leaf,
    Group {
        children: Vec<Id>,
    },
    Transform {
        children: Vec<Id>,
        history: PoseHistory,
    },
    UncertainTransform {
        children: Vec<Id>,
        history: PoseHistory,
    },
    Geometric {
        shape: Geometry,
        stamp: TimeStamp,
    },
    Connection {
        sources: Vec<Id>,
        targets: Vec<Id>,
        start: TimeStamp,
        end: TimeStamp,
    },
    /// Stand-in for the root of a foreign subgraph. Foreign nodes hang below it.
    RemoteRoot {
        children: Vec<Id>,
    },
}

impl NodeKind {
    pub fn graph_type(&self) -> GraphType {
        match self {
            NodeKind::Leaf => GraphType::Node,
            NodeKind::Group { .. } => GraphType::Group,
            NodeKind::Transform { .. } => GraphType::Transform,
            NodeKind::UncertainTransform { .. } => GraphType::UncertainTransform,
            NodeKind::Geometric { .. } => GraphType::GeometricNode,
            NodeKind::Connection { .. } => GraphType::Connection,
            NodeKind::RemoteRoot { .. } => GraphType::RemoteRootNode,
        }
    }
}

/// Creation payload: everything besides id, parent and attributes that a
/// new node needs.
#[derive(Debug, Clone, PartialEq)]
pub enum NodePayload {
    Node,
    Group,
    Transform {
        pose: Pose,
        stamp: TimeStamp,
    },
    UncertainTransform {
        pose: Pose,
        uncertainty: Covariance,
        stamp: TimeStamp,
    },
    Geometric {
        shape: Geometry,
        stamp: TimeStamp,
    },
    Connection {
        sources: Vec<Id>,
        targets: Vec<Id>,
        start: TimeStamp,
        end: TimeStamp,
    },
}

impl NodePayload {
    pub fn graph_type(&self) -> GraphType {
        match self {
            NodePayload::Node => GraphType::Node,
            NodePayload::Group => GraphType::Group,
            NodePayload::Transform { .. } => GraphType::Transform,
            NodePayload::UncertainTransform { .. } => GraphType::UncertainTransform,
            NodePayload::Geometric { .. } => GraphType::GeometricNode,
            NodePayload::Connection { .. } => GraphType::Connection,
        }
    }

    pub(crate) fn into_kind(self, retention_ms: f64) -> NodeKind {
        match self {
            NodePayload::Node => NodeKind::Leaf,
            NodePayload::Group => NodeKind::Group {
                children: Vec::new(),
            },
            NodePayload::Transform { pose, stamp } => {
                let mut history = PoseHistory::new(retention_ms);
                history.push(PoseSample {
                    stamp,
                    transform: pose,
                    uncertainty: None,
                });
                NodeKind::Transform {
                    children: Vec::new(),
                    history,
                }
            }
            NodePayload::UncertainTransform {
                pose,
                uncertainty,
                stamp,
            } => {
                let mut history = PoseHistory::new(retention_ms);
                history.push(PoseSample {
                    stamp,
                    transform: pose,
                    uncertainty: Some(uncertainty),
                });
                NodeKind::UncertainTransform {
                    children: Vec::new(),
                    history,
                }
            }
            NodePayload::Geometric { shape, stamp } => NodeKind::Geometric { shape, stamp },
            NodePayload::Connection {
                sources,
                targets,
                start,
                end,
            } => NodeKind::Connection {
                sources,
                targets,
                start,
                end,
            },
        }
    }
}

/// A vertex of the world model. Edges are stored as id lists on both ends.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub(crate) id: Id,
    pub(crate) attributes: Vec<Attribute>,
    pub(crate) attribute_stamp: Option<TimeStamp>,
    pub(crate) parents: Vec<Id>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn new(id: Id, attributes: Vec<Attribute>, kind: NodeKind) -> Self {
        Self {
            id,
            attributes,
            attribute_stamp: None,
            parents: Vec::new(),
            kind,
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Stamp of the last accepted attribute update, `None` before the first one.
    pub fn attribute_stamp(&self) -> Option<TimeStamp> {
        self.attribute_stamp
    }

    pub fn parents(&self) -> &[Id] {
        &self.parents
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn graph_type(&self) -> GraphType {
        self.kind.graph_type()
    }

    pub fn type_name(&self) -> &'static str {
        self.graph_type().as_str()
    }

    /// Children of group-like nodes. Leaves have none.
    pub fn children(&self) -> &[Id] {
        match &self.kind {
            NodeKind::Group { children }
            | NodeKind::Transform { children, .. }
            | NodeKind::UncertainTransform { children, .. }
            | NodeKind::RemoteRoot { children } => children,
            _ => &[],
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Id>> {
        match &mut self.kind {
            NodeKind::Group { children }
            | NodeKind::Transform { children, .. }
            | NodeKind::UncertainTransform { children, .. }
            | NodeKind::RemoteRoot { children } => Some(children),
            _ => None,
        }
    }

    pub fn is_group_like(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Group { .. }
                | NodeKind::Transform { .. }
                | NodeKind::UncertainTransform { .. }
                | NodeKind::RemoteRoot { .. }
        )
    }

    pub fn history(&self) -> Option<&PoseHistory> {
        match &self.kind {
            NodeKind::Transform { history, .. } | NodeKind::UncertainTransform { history, .. } => {
                Some(history)
            }
            _ => None,
        }
    }

    pub(crate) fn history_mut(&mut self) -> Option<&mut PoseHistory> {
        match &mut self.kind {
            NodeKind::Transform { history, .. } | NodeKind::UncertainTransform { history, .. } => {
                Some(history)
            }
            _ => None,
        }
    }

    pub fn geometry(&self) -> Option<(&Geometry, TimeStamp)> {
        match &self.kind {
            NodeKind::Geometric { shape, stamp } => Some((shape, *stamp)),
            _ => None,
        }
    }

    pub fn connection_sources(&self) -> Option<&[Id]> {
        match &self.kind {
            NodeKind::Connection { sources, .. } => Some(sources),
            _ => None,
        }
    }

    pub fn connection_targets(&self) -> Option<&[Id]> {
        match &self.kind {
            NodeKind::Connection { targets, .. } => Some(targets),
            _ => None,
        }
    }
}
