use serde::{Deserialize, Serialize};

use crate::attribute::{Attribute, UpdateMode};
use crate::error::SceneResult;
use crate::id::Id;
use crate::node::NodePayload;
use crate::pose::{Covariance, Pose, PoseSample};
use crate::store::GraphStore;
use crate::time::TimeStamp;

/// Operation tag of an update message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    UpdateAttributes,
    UpdateTransform,
    Delete,
    AddParent,
    RemoveParent,
    AddConnection,
    AddRemoteRoot,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Create,
        Operation::UpdateAttributes,
        Operation::UpdateTransform,
        Operation::Delete,
        Operation::AddParent,
        Operation::RemoveParent,
        Operation::AddConnection,
        Operation::AddRemoteRoot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::UpdateAttributes => "UPDATE_ATTRIBUTES",
            Operation::UpdateTransform => "UPDATE_TRANSFORM",
            Operation::Delete => "DELETE",
            Operation::AddParent => "ADD_PARENT",
            Operation::RemoveParent => "REMOVE_PARENT",
            Operation::AddConnection => "ADD_CONNECTION",
            Operation::AddRemoteRoot => "ADD_REMOTE_ROOT",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == token)
    }
}

/// A fully resolved mutation: generated ids and default stamps are already
/// filled in, so applying the same event to two stores gives the same result.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneEvent {
    Create {
        parent: Id,
        id: Id,
        attributes: Vec<Attribute>,
        attributes_stamp: Option<TimeStamp>,
        payload: NodePayload,
    },
    AddRemoteRoot {
        id: Id,
        attributes: Vec<Attribute>,
    },
    UpdateAttributes {
        id: Id,
        attributes: Vec<Attribute>,
        stamp: TimeStamp,
        mode: UpdateMode,
    },
    UpdateTransform {
        id: Id,
        pose: Pose,
        uncertainty: Option<Covariance>,
        stamp: TimeStamp,
    },
    Delete {
        id: Id,
    },
    AddParent {
        child: Id,
        parent: Id,
    },
    RemoveParent {
        child: Id,
        parent: Id,
    },
}

impl SceneEvent {
    pub fn operation(&self) -> Operation {
        match self {
            SceneEvent::Create {
                payload: NodePayload::Connection { .. },
                ..
            } => Operation::AddConnection,
            SceneEvent::Create { .. } => Operation::Create,
            SceneEvent::AddRemoteRoot { .. } => Operation::AddRemoteRoot,
            SceneEvent::UpdateAttributes { .. } => Operation::UpdateAttributes,
            SceneEvent::UpdateTransform { .. } => Operation::UpdateTransform,
            SceneEvent::Delete { .. } => Operation::Delete,
            SceneEvent::AddParent { .. } => Operation::AddParent,
            SceneEvent::RemoveParent { .. } => Operation::RemoveParent,
        }
    }

    /// The node the event is about. For edge events this is the child.
    pub fn node_id(&self) -> Id {
        match self {
            SceneEvent::Create { id, .. }
            | SceneEvent::AddRemoteRoot { id, .. }
            | SceneEvent::UpdateAttributes { id, .. }
            | SceneEvent::UpdateTransform { id, .. }
            | SceneEvent::Delete { id } => *id,
            SceneEvent::AddParent { child, .. } | SceneEvent::RemoveParent { child, .. } => *child,
        }
    }

    /// Attribute list carried by the event, if any.
    pub fn attributes(&self) -> Option<&[Attribute]> {
        match self {
            SceneEvent::Create { attributes, .. }
            | SceneEvent::AddRemoteRoot { attributes, .. }
            | SceneEvent::UpdateAttributes { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub(crate) fn attributes_mut(&mut self) -> Option<&mut Vec<Attribute>> {
        match self {
            SceneEvent::Create { attributes, .. }
            | SceneEvent::AddRemoteRoot { attributes, .. }
            | SceneEvent::UpdateAttributes { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub(crate) fn apply_to(&self, store: &mut GraphStore) -> SceneResult<()> {
        match self {
            SceneEvent::Create {
                parent,
                id,
                attributes,
                attributes_stamp,
                payload,
            } => store.insert(*parent, *id, attributes.clone(), *attributes_stamp, payload.clone()),
            SceneEvent::AddRemoteRoot { id, attributes } => {
                store.insert_remote_root(*id, attributes.clone())
            }
            SceneEvent::UpdateAttributes {
                id,
                attributes,
                stamp,
                mode,
            } => store.set_attributes(*id, attributes, *stamp, *mode),
            SceneEvent::UpdateTransform {
                id,
                pose,
                uncertainty,
                stamp,
            } => store.push_pose(
                *id,
                PoseSample {
                    stamp: *stamp,
                    transform: *pose,
                    uncertainty: *uncertainty,
                },
                uncertainty.is_some(),
            ),
            SceneEvent::Delete { id } => store.remove(*id).map(|_| ()),
            SceneEvent::AddParent { child, parent } => store.link(*child, *parent),
            SceneEvent::RemoveParent { child, parent } => store.unlink(*child, *parent).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_tokens_are_verbatim() {
        for op in Operation::ALL {
            let token = serde_json::to_value(op).unwrap();
            assert_eq!(token, serde_json::json!(op.as_str()));
            assert_eq!(Operation::from_token(op.as_str()), Some(op));
        }
        assert_eq!(Operation::from_token("UPSERT"), None);
    }

    #[test]
    fn connections_report_their_own_operation() {
        let event = SceneEvent::Create {
            parent: Id::from_u128(1),
            id: Id::from_u128(2),
            attributes: Vec::new(),
            attributes_stamp: None,
            payload: NodePayload::Connection {
                sources: Vec::new(),
                targets: Vec::new(),
                start: TimeStamp::ZERO,
                end: TimeStamp::ZERO,
            },
        };
        assert_eq!(event.operation(), Operation::AddConnection);
        assert_eq!(event.node_id(), Id::from_u128(2));
    }
}
