use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::attribute::{Attribute, UpdateMode};
use crate::config::WorldModelConfig;
use crate::error::{SceneError, SceneResult};
use crate::event::SceneEvent;
use crate::geometry::Geometry;
use crate::id::{Id, IdGenerator, SeededIdGenerator, UuidGenerator};
use crate::node::{Node, NodePayload};
use crate::observer::{ObserverBus, ObserverHandle, SceneObserver};
use crate::pose::{Covariance, Pose};
use crate::store::{GraphStore, DEFAULT_HISTORY_MS};
use crate::time::{Clock, SystemClock, TimeStamp};

/// A scene behind the single-writer / multi-reader lock.
pub type SharedScene = Arc<RwLock<SceneGraph>>;

pub fn lock_read(scene: &SharedScene) -> anyhow::Result<RwLockReadGuard<'_, SceneGraph>> {
    scene.read().map_err(|_| anyhow!("scene lock poisoned"))
}

pub fn lock_write(scene: &SharedScene) -> anyhow::Result<RwLockWriteGuard<'_, SceneGraph>> {
    scene.write().map_err(|_| anyhow!("scene lock poisoned"))
}

/// Mutation layer over a [`GraphStore`].
///
/// Every call is resolved into a [`SceneEvent`], applied to the store and then
/// fanned out to the attached observers before the call returns.
pub struct SceneGraph {
    store: GraphStore,
    observers: ObserverBus,
    ids: Box<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    notify_rejected: bool,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::with_parts(Box::new(UuidGenerator::new()), Arc::new(SystemClock), DEFAULT_HISTORY_MS)
    }

    pub fn with_root(root: Id) -> Self {
        Self::with_parts(
            Box::new(UuidGenerator::with_root(root)),
            Arc::new(SystemClock),
            DEFAULT_HISTORY_MS,
        )
    }

    pub fn with_parts(ids: Box<dyn IdGenerator>, clock: Arc<dyn Clock>, history_ms: f64) -> Self {
        let root = ids.root_id();
        info!(%root, "scene graph created");
        Self {
            store: GraphStore::new(root, history_ms),
            observers: ObserverBus::new(),
            ids,
            clock,
            notify_rejected: false,
        }
    }

    pub fn from_config(config: &WorldModelConfig) -> Self {
        let ids: Box<dyn IdGenerator> = match (config.id_seed, config.root_id) {
            (Some(seed), Some(root)) => Box::new(SeededIdGenerator::with_root(seed, root)),
            (Some(seed), None) => Box::new(SeededIdGenerator::new(seed)),
            (None, Some(root)) => Box::new(UuidGenerator::with_root(root)),
            (None, None) => Box::new(UuidGenerator::new()),
        };
        let mut scene = Self::with_parts(ids, Arc::new(SystemClock), config.history_ms);
        scene.notify_rejected = config.notify_rejected;
        scene
    }

    pub fn shared(self) -> SharedScene {
        Arc::new(RwLock::new(self))
    }

    pub fn set_notify_rejected(&mut self, notify: bool) {
        self.notify_rejected = notify;
    }

    pub fn attach(&mut self, observer: Box<dyn SceneObserver>) -> ObserverHandle {
        self.observers.attach(observer)
    }

    pub fn detach(&mut self, handle: ObserverHandle) -> Option<Box<dyn SceneObserver>> {
        self.observers.detach(handle)
    }

    pub fn now(&self) -> TimeStamp {
        self.clock.now()
    }

    pub fn mint_id(&mut self) -> Id {
        self.ids.next_id()
    }

    /// Applies a resolved event and notifies observers.
    pub fn apply(&mut self, event: SceneEvent) -> SceneResult<()> {
        let outcome = event.apply_to(&mut self.store);
        match &outcome {
            Ok(()) => {
                debug!(op = event.operation().as_str(), id = %event.node_id(), "mutation accepted");
                self.observers.notify(&event, true);
            }
            Err(e) => {
                warn!(op = event.operation().as_str(), id = %event.node_id(), error = %e, "mutation rejected");
                if self.notify_rejected {
                    self.observers.notify(&event, false);
                }
            }
        }
        outcome
    }

    /// Generic creation entry point behind all `add_*` calls.
    pub fn create_node(
        &mut self,
        parent: Id,
        id: Option<Id>,
        attributes: Vec<Attribute>,
        attributes_stamp: Option<TimeStamp>,
        payload: NodePayload,
    ) -> SceneResult<Id> {
        let id = id.unwrap_or_else(|| self.mint_id());
        self.apply(SceneEvent::Create {
            parent,
            id,
            attributes,
            attributes_stamp,
            payload,
        })?;
        Ok(id)
    }

    pub fn add_node(&mut self, parent: Id, id: Option<Id>, attributes: Vec<Attribute>) -> SceneResult<Id> {
        self.create_node(parent, id, attributes, None, NodePayload::Node)
    }

    pub fn add_group(&mut self, parent: Id, id: Option<Id>, attributes: Vec<Attribute>) -> SceneResult<Id> {
        self.create_node(parent, id, attributes, None, NodePayload::Group)
    }

    pub fn add_transform_node(
        &mut self,
        parent: Id,
        id: Option<Id>,
        attributes: Vec<Attribute>,
        pose: Pose,
        stamp: TimeStamp,
    ) -> SceneResult<Id> {
        self.create_node(parent, id, attributes, None, NodePayload::Transform { pose, stamp })
    }

    pub fn add_uncertain_transform_node(
        &mut self,
        parent: Id,
        id: Option<Id>,
        attributes: Vec<Attribute>,
        pose: Pose,
        uncertainty: Covariance,
        stamp: TimeStamp,
    ) -> SceneResult<Id> {
        self.create_node(
            parent,
            id,
            attributes,
            None,
            NodePayload::UncertainTransform {
                pose,
                uncertainty,
                stamp,
            },
        )
    }

    pub fn add_geometric_node(
        &mut self,
        parent: Id,
        id: Option<Id>,
        attributes: Vec<Attribute>,
        shape: Geometry,
        stamp: TimeStamp,
    ) -> SceneResult<Id> {
        self.create_node(parent, id, attributes, None, NodePayload::Geometric { shape, stamp })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_connection(
        &mut self,
        parent: Id,
        id: Option<Id>,
        attributes: Vec<Attribute>,
        sources: Vec<Id>,
        targets: Vec<Id>,
        start: TimeStamp,
        end: TimeStamp,
    ) -> SceneResult<Id> {
        self.create_node(
            parent,
            id,
            attributes,
            None,
            NodePayload::Connection {
                sources,
                targets,
                start,
                end,
            },
        )
    }

    pub fn add_remote_root_node(&mut self, id: Id, attributes: Vec<Attribute>) -> SceneResult<()> {
        self.apply(SceneEvent::AddRemoteRoot { id, attributes })
    }

    pub fn add_parent(&mut self, child: Id, parent: Id) -> SceneResult<()> {
        self.apply(SceneEvent::AddParent { child, parent })
    }

    /// Removing the last parent deletes the node and its exclusive subtree,
    /// unless the node is the root or a remote root.
    pub fn remove_parent(&mut self, child: Id, parent: Id) -> SceneResult<()> {
        self.apply(SceneEvent::RemoveParent { child, parent })
    }

    /// Stamp given to an attribute update that arrives without one:
    /// `max(now, stored + 1µs)`, so it is accepted here and on replicas.
    pub fn next_attribute_stamp(&self, id: Id) -> TimeStamp {
        let now = self.now();
        match self.store.get(id).and_then(Node::attribute_stamp) {
            Some(stored) => now.max(stored.successor()),
            None => now,
        }
    }

    pub fn set_node_attributes(
        &mut self,
        id: Id,
        attributes: Vec<Attribute>,
        stamp: Option<TimeStamp>,
        mode: UpdateMode,
    ) -> SceneResult<()> {
        let stamp = stamp.unwrap_or_else(|| self.next_attribute_stamp(id));
        self.apply(SceneEvent::UpdateAttributes {
            id,
            attributes,
            stamp,
            mode,
        })
    }

    pub fn set_transform(&mut self, id: Id, pose: Pose, stamp: TimeStamp) -> SceneResult<()> {
        self.apply(SceneEvent::UpdateTransform {
            id,
            pose,
            uncertainty: None,
            stamp,
        })
    }

    pub fn set_uncertain_transform(
        &mut self,
        id: Id,
        pose: Pose,
        uncertainty: Covariance,
        stamp: TimeStamp,
    ) -> SceneResult<()> {
        self.apply(SceneEvent::UpdateTransform {
            id,
            pose,
            uncertainty: Some(uncertainty),
            stamp,
        })
    }

    pub fn delete_node(&mut self, id: Id) -> SceneResult<()> {
        self.apply(SceneEvent::Delete { id })
    }

    pub fn get_transform_for_node(&self, id: Id, reference: Id, stamp: TimeStamp) -> SceneResult<Pose> {
        self.store.transform_for_node(id, reference, stamp)
    }

    /// Ids below `subgraph` (default: the root) carrying all `filter` attributes.
    pub fn get_nodes(&self, filter: &[Attribute], subgraph: Option<Id>) -> SceneResult<Vec<Id>> {
        self.store
            .get_nodes(filter, subgraph.unwrap_or_else(|| self.store.root_id()))
    }

    pub fn root_id(&self) -> Id {
        self.store.root_id()
    }

    pub fn remote_root_ids(&self) -> &[Id] {
        self.store.remote_root_ids()
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn node(&self, id: Id) -> SceneResult<&Node> {
        self.store.node(id)
    }

    pub fn attributes(&self, id: Id) -> SceneResult<&[Attribute]> {
        Ok(self.node(id)?.attributes())
    }

    pub fn parents(&self, id: Id) -> SceneResult<&[Id]> {
        Ok(self.node(id)?.parents())
    }

    pub fn children(&self, id: Id) -> SceneResult<&[Id]> {
        let node = self.node(id)?;
        if !node.is_group_like() {
            return Err(SceneError::wrong_type(id, "Group", node.type_name()));
        }
        Ok(node.children())
    }

    pub fn connection_sources(&self, id: Id) -> SceneResult<&[Id]> {
        let node = self.node(id)?;
        node.connection_sources()
            .ok_or_else(|| SceneError::wrong_type(id, "Connection", node.type_name()))
    }

    pub fn connection_targets(&self, id: Id) -> SceneResult<&[Id]> {
        let node = self.node(id)?;
        node.connection_targets()
            .ok_or_else(|| SceneError::wrong_type(id, "Connection", node.type_name()))
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}
