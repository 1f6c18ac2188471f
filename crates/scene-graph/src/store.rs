use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::attribute::{self, Attribute, UpdateMode};
use crate::error::{SceneError, SceneResult};
use crate::id::Id;
use crate::node::{Node, NodeKind, NodePayload};
use crate::pose::{Pose, PoseSample};
use crate::time::TimeStamp;

/// Default pose retention window behind the newest sample.
pub const DEFAULT_HISTORY_MS: f64 = 10_000.0;

/// In-memory DAG: the node arena plus the bookkeeping that keeps ids unique.
///
/// Every method validates completely before it touches anything, so a failed
/// call leaves the store unchanged.
#[derive(Debug, Clone)]
pub struct GraphStore {
    nodes: HashMap<Id, Node>,
    root_id: Id,
    remote_roots: Vec<Id>,
    retired: HashSet<Id>,
    retention_ms: f64,
}

impl GraphStore {
    pub fn new(root_id: Id, retention_ms: f64) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            root_id,
            Node::new(
                root_id,
                Vec::new(),
                NodeKind::Group {
                    children: Vec::new(),
                },
            ),
        );
        Self {
            nodes,
            root_id,
            remote_roots: Vec::new(),
            retired: HashSet::new(),
            retention_ms,
        }
    }

    pub fn root_id(&self) -> Id {
        self.root_id
    }

    pub fn remote_root_ids(&self) -> &[Id] {
        &self.remote_roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: Id) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn get(&self, id: Id) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: Id) -> SceneResult<&Node> {
        self.nodes.get(&id).ok_or(SceneError::NotFound(id))
    }

    fn check_fresh(&self, id: Id) -> SceneResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(SceneError::AlreadyExists(id));
        }
        if self.retired.contains(&id) {
            return Err(SceneError::RetiredId(id));
        }
        Ok(())
    }

    fn check_group(&self, id: Id) -> SceneResult<&Node> {
        let node = self.node(id)?;
        if !node.is_group_like() {
            return Err(SceneError::wrong_type(id, "Group", node.type_name()));
        }
        Ok(node)
    }

    /// Inserts a new node below `parent`.
    pub fn insert(
        &mut self,
        parent: Id,
        id: Id,
        attributes: Vec<Attribute>,
        attribute_stamp: Option<TimeStamp>,
        payload: NodePayload,
    ) -> SceneResult<()> {
        self.check_fresh(id)?;
        self.check_group(parent)?;
        if let NodePayload::Connection {
            sources, targets, ..
        } = &payload
        {
            if let Some(missing) = sources.iter().chain(targets).find(|e| !self.contains(**e)) {
                return Err(SceneError::NotFound(*missing));
            }
        }

        let mut node = Node::new(id, attributes, payload.into_kind(self.retention_ms));
        node.attribute_stamp = attribute_stamp;
        node.parents.push(parent);
        self.nodes.insert(id, node);
        if let Some(children) = self.nodes.get_mut(&parent).and_then(Node::children_mut) {
            children.push(id);
        }
        debug!(%id, %parent, "node inserted");
        Ok(())
    }

    /// Registers a parentless placeholder for the root of a foreign subgraph.
    pub fn insert_remote_root(&mut self, id: Id, attributes: Vec<Attribute>) -> SceneResult<()> {
        self.check_fresh(id)?;
        self.nodes.insert(
            id,
            Node::new(
                id,
                attributes,
                NodeKind::RemoteRoot {
                    children: Vec::new(),
                },
            ),
        );
        self.remote_roots.push(id);
        debug!(%id, "remote root registered");
        Ok(())
    }

    /// True if `to` can be reached from `from` along child edges (or is `from`).
    pub fn reaches(&self, from: Id, to: Id) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children().iter().copied());
            }
        }
        false
    }

    pub fn link(&mut self, child: Id, parent: Id) -> SceneResult<()> {
        self.node(child)?;
        self.check_group(parent)?;
        if self.node(child)?.parents().contains(&parent) {
            return Err(SceneError::EdgeExists { child, parent });
        }
        if self.reaches(child, parent) {
            return Err(SceneError::CycleDetected { child, parent });
        }

        if let Some(node) = self.nodes.get_mut(&child) {
            node.parents.push(parent);
        }
        if let Some(children) = self.nodes.get_mut(&parent).and_then(Node::children_mut) {
            children.push(child);
        }
        debug!(%child, %parent, "edge added");
        Ok(())
    }

    /// Removes one parent edge. A node left without parents is deleted
    /// together with everything it owned exclusively. Returns the removed ids.
    pub fn unlink(&mut self, child: Id, parent: Id) -> SceneResult<Vec<Id>> {
        let node = self.node(child)?;
        if !node.parents().contains(&parent) {
            return Err(SceneError::EdgeMissing { child, parent });
        }
        self.detach_edge(child, parent);
        debug!(%child, %parent, "edge removed");

        let orphaned = self
            .nodes
            .get(&child)
            .is_some_and(|n| n.parents.is_empty() && !self.outlives_parents(child));
        if orphaned {
            return Ok(self.remove_cascade(child));
        }
        Ok(Vec::new())
    }

    /// The root and remote roots stay in the store without any parent.
    fn outlives_parents(&self, id: Id) -> bool {
        id == self.root_id || self.remote_roots.contains(&id)
    }

    fn detach_edge(&mut self, child: Id, parent: Id) {
        if let Some(node) = self.nodes.get_mut(&child) {
            node.parents.retain(|p| *p != parent);
        }
        if let Some(children) = self.nodes.get_mut(&parent).and_then(Node::children_mut) {
            children.retain(|c| *c != child);
        }
    }

    /// Deletes a node and its exclusively owned subtree. The root is protected.
    pub fn remove(&mut self, id: Id) -> SceneResult<Vec<Id>> {
        if id == self.root_id {
            return Err(SceneError::RootProtected(id));
        }
        self.node(id)?;
        Ok(self.remove_cascade(id))
    }

    fn remove_cascade(&mut self, id: Id) -> Vec<Id> {
        let root = self.root_id;
        let mut removed = Vec::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(node) = self.nodes.remove(&current) else {
                continue;
            };
            self.retired.insert(current);
            self.remote_roots.retain(|r| *r != current);
            for parent in &node.parents {
                if let Some(children) = self.nodes.get_mut(parent).and_then(Node::children_mut) {
                    children.retain(|c| *c != current);
                }
            }
            for child in node.children() {
                if let Some(child_node) = self.nodes.get_mut(child) {
                    child_node.parents.retain(|p| *p != current);
                    if child_node.parents.is_empty() && *child != root && !self.remote_roots.contains(child) {
                        pending.push(*child);
                    }
                }
            }
            removed.push(current);
        }

        for node in self.nodes.values_mut() {
            if let NodeKind::Connection {
                sources, targets, ..
            } = &mut node.kind
            {
                sources.retain(|s| !removed.contains(s));
                targets.retain(|t| !removed.contains(t));
            }
        }
        debug!(root = %id, count = removed.len(), "subtree removed");
        removed
    }

    /// Merges an attribute batch. `stamp` must be strictly newer than the
    /// stored attribute stamp unless the node has never been updated.
    pub fn set_attributes(
        &mut self,
        id: Id,
        attributes: &[Attribute],
        stamp: TimeStamp,
        mode: UpdateMode,
    ) -> SceneResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(SceneError::NotFound(id))?;
        if let Some(stored) = node.attribute_stamp {
            if stamp <= stored {
                return Err(SceneError::Stale {
                    id,
                    stored,
                    offered: stamp,
                });
            }
        }
        node.attributes = attribute::merge(&node.attributes, attributes, mode);
        node.attribute_stamp = Some(stamp);
        debug!(%id, %stamp, ?mode, "attributes updated");
        Ok(())
    }

    /// Appends a pose sample to a transform node. `uncertain` selects which
    /// transform flavour the caller expects.
    pub fn push_pose(&mut self, id: Id, sample: PoseSample, uncertain: bool) -> SceneResult<()> {
        let node = self.nodes.get_mut(&id).ok_or(SceneError::NotFound(id))?;
        let expected = if uncertain {
            "UncertainTransform"
        } else {
            "Transform"
        };
        let matches_kind = match node.kind {
            NodeKind::Transform { .. } => !uncertain,
            NodeKind::UncertainTransform { .. } => uncertain,
            _ => false,
        };
        if !matches_kind {
            return Err(SceneError::wrong_type(id, expected, node.type_name()));
        }
        let Some(history) = node.history_mut() else {
            return Err(SceneError::wrong_type(id, expected, "Node"));
        };
        if let Some(stored) = history.latest_stamp() {
            if sample.stamp <= stored {
                return Err(SceneError::Stale {
                    id,
                    stored,
                    offered: sample.stamp,
                });
            }
        }
        let stamp = sample.stamp;
        history.push(sample);
        debug!(%id, %stamp, "pose appended");
        Ok(())
    }

    /// Ids below `subgraph` (itself included) carrying every attribute of
    /// `filter`, in depth-first pre-order.
    pub fn get_nodes(&self, filter: &[Attribute], subgraph: Id) -> SceneResult<Vec<Id>> {
        self.node(subgraph)?;
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![subgraph];
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            if attribute::contains_all(node.attributes(), filter) {
                found.push(current);
            }
            stack.extend(node.children().iter().rev().copied());
        }
        Ok(found)
    }

    fn ancestry(&self, id: Id) -> SceneResult<Vec<Id>> {
        let mut chain = vec![id];
        let mut current = self.node(id)?;
        while let Some(parent) = current.parents().first() {
            chain.push(*parent);
            current = self.node(*parent)?;
        }
        Ok(chain)
    }

    /// Pose of the chain below `ancestor` down to `chain[0]`, resolved at `stamp`.
    fn relative_pose(&self, chain: &[Id], stamp: TimeStamp) -> SceneResult<Pose> {
        let mut pose = Pose::identity();
        for id in chain.iter().rev() {
            let node = self.node(*id)?;
            if let Some(history) = node.history() {
                let sample = history
                    .at(stamp)
                    .ok_or(SceneError::NoSample { id: *id, stamp })?;
                pose = pose.compose(&sample.transform);
            }
        }
        Ok(pose)
    }

    /// Pose of `node` expressed in the frame of `reference` at time `stamp`.
    ///
    /// Both nodes are walked up along their first parents to the lowest common
    /// ancestor; every transform on the two branches is resolved at `stamp`.
    pub fn transform_for_node(&self, node: Id, reference: Id, stamp: TimeStamp) -> SceneResult<Pose> {
        let node_chain = self.ancestry(node)?;
        let reference_chain = self.ancestry(reference)?;
        let Some((node_pos, reference_pos)) = node_chain
            .iter()
            .enumerate()
            .find_map(|(i, id)| reference_chain.iter().position(|r| r == id).map(|j| (i, j)))
        else {
            return Err(SceneError::NoTransformPath { node, reference });
        };

        let node_pose = self.relative_pose(&node_chain[..node_pos], stamp)?;
        let reference_pose = self.relative_pose(&reference_chain[..reference_pos], stamp)?;
        Ok(reference_pose.inverse().compose(&node_pose))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}
