use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::attribute::UpdateMode;
use crate::error::SceneResult;
use crate::event::SceneEvent;
use crate::id::Id;
use crate::node::{Node, NodeKind, NodePayload};
use crate::store::GraphStore;
use crate::wire::{self, WireGraph, WireUpdate};

/// Callbacks of a depth-first walk.
///
/// `on_edge` fires for every parent/child link, including links to nodes
/// that were already visited; `on_node` and `on_leave` fire once per node.
pub trait Traverser {
    fn on_node(&mut self, node: &Node, via: Option<&Node>);

    fn on_edge(&mut self, _parent: &Node, _child: &Node) {}

    fn on_leave(&mut self, _node: &Node) {}
}

/// DAG-safe depth-first walk over a store. The visited set is shared between
/// runs, so several start nodes can be walked without repeats.
pub struct DepthFirst<'a> {
    store: &'a GraphStore,
    visited: HashSet<Id>,
}

impl<'a> DepthFirst<'a> {
    pub fn new(store: &'a GraphStore) -> Self {
        Self {
            store,
            visited: HashSet::new(),
        }
    }

    pub fn visited(&self, id: Id) -> bool {
        self.visited.contains(&id)
    }

    pub fn run<V: Traverser + ?Sized>(&mut self, start: Id, visitor: &mut V) -> SceneResult<()> {
        if self.visited.contains(&start) {
            return Ok(());
        }
        self.visit(start, None, visitor)
    }

    /// Walks the root and then every remote root not reached from it.
    pub fn run_all<V: Traverser + ?Sized>(&mut self, visitor: &mut V) -> SceneResult<()> {
        let store = self.store;
        self.run(store.root_id(), visitor)?;
        for remote in store.remote_root_ids() {
            self.run(*remote, visitor)?;
        }
        Ok(())
    }

    fn visit<V: Traverser + ?Sized>(&mut self, start: Id, via: Option<&'a Node>, visitor: &mut V) -> SceneResult<()> {
        let store = self.store;
        let node = store.node(start)?;
        self.enter(node, via, visitor)?;

        // Explicit stack of (node, index of the next child to descend into).
        let mut stack: Vec<(&'a Node, usize)> = vec![(node, 0)];
        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            match node.children().get(next) {
                Some(child_id) => {
                    frame.1 += 1;
                    if self.visited.contains(child_id) {
                        continue;
                    }
                    let child = store.node(*child_id)?;
                    self.enter(child, Some(node), visitor)?;
                    stack.push((child, 0));
                }
                None => {
                    visitor.on_leave(node);
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    fn enter<V: Traverser + ?Sized>(&mut self, node: &'a Node, via: Option<&'a Node>, visitor: &mut V) -> SceneResult<()> {
        self.visited.insert(node.id());
        visitor.on_node(node, via);
        for child_id in node.children() {
            visitor.on_edge(node, self.store.node(*child_id)?);
        }
        Ok(())
    }
}

/// Options of the dot export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotConfig {
    pub show_ids: bool,
    pub show_attributes: bool,
    pub abbreviate_ids: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            show_ids: true,
            show_attributes: true,
            abbreviate_ids: false,
        }
    }
}

/// Renders a graph in Graphviz dot syntax.
pub struct DotGraphGenerator {
    config: DotConfig,
    body: String,
}

impl DotGraphGenerator {
    pub fn new(config: DotConfig) -> Self {
        Self {
            config,
            body: String::new(),
        }
    }

    pub fn generate(mut self, store: &GraphStore) -> SceneResult<String> {
        DepthFirst::new(store).run_all(&mut self)?;
        Ok(format!("digraph {{\n{}}}\n", self.body))
    }

    fn label(&self, node: &Node) -> String {
        let mut label = node.type_name().to_string();
        if self.config.show_ids {
            let id = if self.config.abbreviate_ids {
                node.id().abbreviated()
            } else {
                node.id().to_string()
            };
            let _ = write!(label, "\\nID [{id}]");
        }
        if self.config.show_attributes {
            for attribute in node.attributes() {
                let _ = write!(label, "\\n{attribute}");
            }
        }
        label.replace('"', "\\\"")
    }
}

impl Traverser for DotGraphGenerator {
    fn on_node(&mut self, node: &Node, _via: Option<&Node>) {
        let label = self.label(node);
        let _ = writeln!(self.body, "\"{}\" [label = \"{}\"];", node.id(), label);
    }

    fn on_edge(&mut self, parent: &Node, child: &Node) {
        let _ = writeln!(self.body, "\"{}\" -> \"{}\";", parent.id(), child.id());
    }
}

/// Produces the update sequence that rebuilds a store from scratch.
///
/// Every node is created below its first stored parent, ancestors before
/// descendants, and the remaining parents follow as `ADD_PARENT` in stored
/// order, so parent lists (and with them first-parent transform chains) come
/// back unchanged. Connections are created after the nodes they reference.
#[derive(Default)]
pub struct GraphExporter {
    order: Vec<Id>,
}

impl GraphExporter {
    pub fn export(store: &GraphStore) -> SceneResult<WireGraph> {
        let mut exporter = GraphExporter::default();
        DepthFirst::new(store).run_all(&mut exporter)?;

        let mut updates = Vec::new();
        let mut created = HashSet::new();
        for id in store.remote_root_ids().iter().copied() {
            let node = store.node(id)?;
            updates.push(wire::encode_event(&SceneEvent::AddRemoteRoot {
                id,
                attributes: node.attributes().to_vec(),
            }));
            updates.extend(Self::stamped_attributes(node));
            created.insert(id);
        }
        let root = store.node(store.root_id())?;
        updates.extend(Self::stamped_attributes(root));
        created.insert(root.id());
        // Parentless at creation, so every stored parent is linked later.
        let preexisting = created.clone();

        let mut connections = Vec::new();
        for id in &exporter.order {
            let node = store.node(*id)?;
            if matches!(node.kind(), NodeKind::Connection { .. }) {
                connections.push(node);
                continue;
            }
            let mut chain = Vec::new();
            let mut current = node;
            while !created.contains(&current.id()) {
                chain.push(current);
                let Some(parent) = current.parents().first() else {
                    break;
                };
                current = store.node(*parent)?;
            }
            for pending in chain.into_iter().rev() {
                updates.extend(Self::create_update(pending));
                created.insert(pending.id());
            }
        }

        // Connections may reference connections; create referenced ones first.
        while !connections.is_empty() {
            let before = connections.len();
            connections.retain(|node| {
                let endpoints = node
                    .connection_sources()
                    .into_iter()
                    .chain(node.connection_targets())
                    .flatten();
                let ready = endpoints.into_iter().all(|e| created.contains(e));
                if ready {
                    updates.extend(Self::create_update(node));
                    created.insert(node.id());
                }
                !ready
            });
            if connections.len() == before {
                for node in connections.drain(..) {
                    updates.extend(Self::create_update(node));
                }
            }
        }

        for id in &exporter.order {
            let node = store.node(*id)?;
            let skip = usize::from(!preexisting.contains(id));
            for parent in node.parents().iter().skip(skip) {
                updates.push(wire::encode_event(&SceneEvent::AddParent {
                    child: *id,
                    parent: *parent,
                }));
            }
        }

        debug!(root = %store.root_id(), updates = updates.len(), "graph exported");
        Ok(WireGraph::new(store.root_id(), updates))
    }

    /// Overwrite that restores a stored attribute stamp, if there is one.
    fn stamped_attributes(node: &Node) -> Option<WireUpdate> {
        let stamp = node.attribute_stamp()?;
        Some(wire::encode_event(&SceneEvent::UpdateAttributes {
            id: node.id(),
            attributes: node.attributes().to_vec(),
            stamp,
            mode: UpdateMode::Overwrite,
        }))
    }

    fn create_update(node: &Node) -> Option<WireUpdate> {
        let parent = *node.parents().first()?;
        let payload = match node.kind() {
            NodeKind::Leaf => NodePayload::Node,
            NodeKind::Group { .. } => NodePayload::Group,
            NodeKind::Transform { history, .. } | NodeKind::UncertainTransform { history, .. } => {
                let first = history.samples().first()?;
                match first.uncertainty {
                    Some(uncertainty) => NodePayload::UncertainTransform {
                        pose: first.transform,
                        uncertainty,
                        stamp: first.stamp,
                    },
                    None => NodePayload::Transform {
                        pose: first.transform,
                        stamp: first.stamp,
                    },
                }
            }
            NodeKind::Geometric { shape, stamp } => NodePayload::Geometric {
                shape: shape.clone(),
                stamp: *stamp,
            },
            NodeKind::Connection {
                sources,
                targets,
                start,
                end,
            } => NodePayload::Connection {
                sources: sources.clone(),
                targets: targets.clone(),
                start: *start,
                end: *end,
            },
            NodeKind::RemoteRoot { .. } => return None,
        };
        let mut update = wire::encode_event(&SceneEvent::Create {
            parent,
            id: node.id(),
            attributes: node.attributes().to_vec(),
            attributes_stamp: node.attribute_stamp(),
            payload,
        });
        if let (Some(history), Some(record)) = (node.history(), update.node.as_mut()) {
            record.history = Some(history.samples().to_vec());
        }
        Some(update)
    }
}

impl Traverser for GraphExporter {
    fn on_node(&mut self, node: &Node, _via: Option<&Node>) {
        self.order.push(node.id());
    }
}

/// Merkle style fingerprint of observable graph state.
///
/// A node hashes its id, structural type, attributes and payload together
/// with the sorted hashes of its children. Remote roots hash like groups so a
/// mirrored subgraph matches its origin.
#[derive(Default)]
pub struct ContentHasher {
    hashes: HashMap<Id, [u8; 32]>,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hex digest of the subgraph below `start`.
    pub fn hash_subgraph(store: &GraphStore, start: Id) -> SceneResult<String> {
        let mut hasher = Self::new();
        DepthFirst::new(store).run(start, &mut hasher)?;
        Ok(hasher.hex(start).unwrap_or_default())
    }

    pub fn hash_store(store: &GraphStore) -> SceneResult<String> {
        Self::hash_subgraph(store, store.root_id())
    }

    pub fn digest(&self, id: Id) -> Option<[u8; 32]> {
        self.hashes.get(&id).copied()
    }

    pub fn hex(&self, id: Id) -> Option<String> {
        self.digest(id).map(|bytes| {
            bytes.iter().fold(String::with_capacity(64), |mut out, b| {
                let _ = write!(out, "{b:02x}");
                out
            })
        })
    }

    fn node_digest(&self, node: &Node) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(node.id().as_bytes());
        let tag = match node.kind() {
            NodeKind::RemoteRoot { .. } => "Group",
            _ => node.type_name(),
        };
        hasher.update(tag.as_bytes());

        for attribute in node.attributes() {
            hasher.update(attribute.key.as_bytes());
            hasher.update([0u8]);
            hasher.update(attribute.value.to_string().as_bytes());
            hasher.update([0u8]);
        }

        match node.kind() {
            NodeKind::Geometric { shape, stamp } => {
                hasher.update(shape.fingerprint());
                hasher.update(stamp.millis().to_le_bytes());
            }
            NodeKind::Transform { history, .. } | NodeKind::UncertainTransform { history, .. } => {
                for sample in history.samples() {
                    hasher.update(sample.stamp.millis().to_le_bytes());
                    hasher.update(sample.transform.hash_bytes());
                    if let Some(uncertainty) = &sample.uncertainty {
                        hasher.update(uncertainty.hash_bytes());
                    }
                }
            }
            NodeKind::Connection {
                sources,
                targets,
                start,
                end,
            } => {
                for id in sources {
                    hasher.update(id.as_bytes());
                }
                hasher.update(b"->");
                for id in targets {
                    hasher.update(id.as_bytes());
                }
                hasher.update(start.millis().to_le_bytes());
                hasher.update(end.millis().to_le_bytes());
            }
            _ => {}
        }

        let mut children: Vec<[u8; 32]> = node
            .children()
            .iter()
            .filter_map(|child| self.hashes.get(child).copied())
            .collect();
        children.sort_unstable();
        for child in &children {
            hasher.update(child);
        }
        hasher.finalize().into()
    }
}

impl Traverser for ContentHasher {
    fn on_node(&mut self, _node: &Node, _via: Option<&Node>) {}

    fn on_leave(&mut self, node: &Node) {
        let digest = self.node_digest(node);
        self.hashes.insert(node.id(), digest);
    }
}
