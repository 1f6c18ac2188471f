//! Replicated scene graph world model.
//!
//! A [`SceneGraph`] keeps an attribute-tagged DAG of groups, transforms,
//! geometry and connections. Mutations are fanned out to observers, which
//! encode them as JSON updates for other agents; a [`QueryRunner`] answers
//! JSON queries against a shared scene.

pub mod attribute;
pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod geometry;
pub mod id;
pub mod node;
pub mod observer;
pub mod pose;
pub mod query;
pub mod scene;
pub mod server;
pub mod store;
pub mod time;
pub mod transport;
pub mod traversal;
pub mod wire;

pub use attribute::{Attribute, UpdateMode};
pub use codec::{JsonDeserializer, JsonSerializer, UpdateTarget};
pub use config::WorldModelConfig;
pub use error::{SceneError, SceneResult};
pub use event::{Operation, SceneEvent};
pub use filter::NamespaceFilter;
pub use geometry::Geometry;
pub use id::{Id, IdGenerator, SeededIdGenerator, UuidGenerator};
pub use node::{GraphType, Node, NodeKind, NodePayload};
pub use observer::{ObserverBus, ObserverHandle, SceneGraphListener, SceneObserver};
pub use pose::{Covariance, Pose, PoseHistory, PoseSample};
pub use query::{QueryRunner, QueryType};
pub use scene::{lock_read, lock_write, SceneGraph, SharedScene};
pub use store::GraphStore;
pub use time::{Clock, ManualClock, SystemClock, TimeStamp};
pub use transport::{LoopbackBridge, NullTransport, RecordingTransport, Transport};
pub use traversal::{ContentHasher, DepthFirst, DotConfig, DotGraphGenerator, GraphExporter, Traverser};
