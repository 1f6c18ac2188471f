use thiserror::Error;

use crate::id::Id;
use crate::time::TimeStamp;

/// Failure of a single scene graph operation.
///
/// Every variant leaves the store exactly as it was before the call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SceneError {
    #[error("node {0} does not exist")]
    NotFound(Id),
    #[error("node {0} already exists")]
    AlreadyExists(Id),
    #[error("id {0} belonged to a deleted node and cannot be reused")]
    RetiredId(Id),
    #[error("adding {parent} as parent of {child} would create a cycle")]
    CycleDetected { child: Id, parent: Id },
    #[error("{parent} is already a parent of {child}")]
    EdgeExists { child: Id, parent: Id },
    #[error("{parent} is not a parent of {child}")]
    EdgeMissing { child: Id, parent: Id },
    #[error("node {id} is a {actual}, expected {expected}")]
    WrongNodeType {
        id: Id,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("the root node {0} cannot be deleted")]
    RootProtected(Id),
    #[error("update for {id} at {offered} is not newer than {stored}")]
    Stale {
        id: Id,
        stored: TimeStamp,
        offered: TimeStamp,
    },
    #[error("no path connects {node} and {reference}")]
    NoTransformPath { node: Id, reference: Id },
    #[error("transform {id} has no sample at or before {stamp}")]
    NoSample { id: Id, stamp: TimeStamp },
    #[error("Syntax error: {0}")]
    Syntax(String),
}

impl SceneError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::Syntax(message.into())
    }

    pub fn wrong_type(id: Id, expected: &'static str, actual: &'static str) -> Self {
        Self::WrongNodeType {
            id,
            expected,
            actual,
        }
    }

    /// Structural errors: missing or duplicate ids, cycles, wrong node types.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::AlreadyExists(_)
                | Self::RetiredId(_)
                | Self::CycleDetected { .. }
                | Self::EdgeExists { .. }
                | Self::EdgeMissing { .. }
                | Self::WrongNodeType { .. }
                | Self::RootProtected(_)
        )
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

pub type SceneResult<T> = Result<T, SceneError>;
