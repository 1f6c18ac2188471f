use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::attribute::UpdateMode;
use crate::event::SceneEvent;
use crate::id::Id;
use crate::observer::{ObserverBus, ObserverHandle, SceneObserver};

/// Inline observer that strips one attribute namespace before forwarding.
///
/// Attributes are removed one by one, so nodes are still replicated even
/// when nothing of their attribute set survives. Filters chain by attaching
/// one filter to another.
pub struct NamespaceFilter {
    namespace: String,
    tracked: HashSet<Id>,
    downstream: ObserverBus,
}

impl NamespaceFilter {
    /// `namespace` is given without the trailing colon, e.g. `"osm"`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            tracked: HashSet::new(),
            downstream: ObserverBus::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn attach(&mut self, observer: Box<dyn SceneObserver>) -> ObserverHandle {
        self.downstream.attach(observer)
    }

    pub fn detach(&mut self, handle: ObserverHandle) -> Option<Box<dyn SceneObserver>> {
        self.downstream.detach(handle)
    }

    /// True if the node has carried attributes of the filtered namespace.
    pub fn is_tracked(&self, id: Id) -> bool {
        self.tracked.contains(&id)
    }

    /// Filtered copy of `event`, or `None` if nothing is left to forward.
    ///
    /// Only an emptied merge on a tracked node is dropped. Any other later
    /// update of a tracked node is forwarded with the namespace stripped.
    pub fn filter(&mut self, event: &SceneEvent) -> Option<SceneEvent> {
        let mut event = event.clone();
        let id = event.node_id();

        if let Some(attributes) = event.attributes_mut() {
            let before = attributes.len();
            attributes.retain(|a| !a.in_namespace(&self.namespace));
            if attributes.len() != before {
                self.tracked.insert(id);
            }
        }

        match &event {
            // Merging an empty batch is a no-op downstream; the namespaced
            // entries it carried only exist upstream.
            SceneEvent::UpdateAttributes {
                attributes, mode, ..
            } if attributes.is_empty()
                && *mode != UpdateMode::Overwrite
                && self.tracked.contains(&id) =>
            {
                debug!(%id, namespace = %self.namespace, "update dropped by filter");
                return None;
            }
            SceneEvent::Delete { .. } => {
                self.tracked.remove(&id);
            }
            _ => {}
        }
        Some(event)
    }
}

impl SceneObserver for NamespaceFilter {
    fn on_update(&mut self, event: &SceneEvent, accepted: bool) -> Result<()> {
        if let Some(filtered) = self.filter(event) {
            self.downstream.notify(&filtered, accepted);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "namespace-filter"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::attribute::Attribute;
    use crate::node::NodePayload;
    use crate::time::TimeStamp;

    fn create(attributes: Vec<Attribute>) -> SceneEvent {
        SceneEvent::Create {
            parent: Id::from_u128(1),
            id: Id::from_u128(2),
            attributes,
            attributes_stamp: None,
            payload: NodePayload::Node,
        }
    }

    fn update(attributes: Vec<Attribute>, mode: UpdateMode) -> SceneEvent {
        SceneEvent::UpdateAttributes {
            id: Id::from_u128(2),
            attributes,
            stamp: TimeStamp::from_millis(1.0),
            mode,
        }
    }

    #[test]
    fn strips_only_the_namespace() {
        let mut filter = NamespaceFilter::new("osm");
        let out = filter
            .filter(&create(vec![
                Attribute::new("osm:highway", "primary"),
                Attribute::new("name", "street"),
            ]))
            .unwrap();
        assert_eq!(out.attributes(), Some(&[Attribute::new("name", "street")][..]));
        assert!(filter.is_tracked(Id::from_u128(2)));
    }

    #[test]
    fn fully_filtered_nodes_are_still_created() {
        let mut filter = NamespaceFilter::new("osm");
        let out = filter
            .filter(&create(vec![Attribute::new("osm:id", "42")]))
            .unwrap();
        assert_eq!(out.attributes(), Some(&[][..]));
    }

    #[test]
    fn empty_merges_on_tracked_nodes_are_dropped() {
        let mut filter = NamespaceFilter::new("osm");
        filter.filter(&create(vec![Attribute::new("osm:id", "42")]));
        assert!(filter
            .filter(&update(vec![Attribute::new("osm:id", "43")], UpdateMode::Append))
            .is_none());
        let overwrite = filter
            .filter(&update(vec![Attribute::new("osm:id", "43")], UpdateMode::Overwrite))
            .unwrap();
        assert_eq!(overwrite.attributes(), Some(&[][..]));

        filter.filter(&SceneEvent::Delete {
            id: Id::from_u128(2),
        });
        assert!(!filter.is_tracked(Id::from_u128(2)));
    }

    #[test]
    fn tracked_nodes_keep_forwarding_other_attributes() {
        let mut filter = NamespaceFilter::new("osm");
        filter.filter(&create(vec![Attribute::new("osm:id", "42")]));
        let merged = filter
            .filter(&update(
                vec![Attribute::new("osm:id", "43"), Attribute::new("name", "door")],
                UpdateMode::Append,
            ))
            .unwrap();
        assert_eq!(merged.attributes(), Some(&[Attribute::new("name", "door")][..]));
        assert!(filter.is_tracked(Id::from_u128(2)));
    }

    #[test]
    fn forwards_to_its_own_observers_in_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut inner = NamespaceFilter::new("tmp");
        inner.attach(Box::new(move |event: &SceneEvent, _: bool| -> Result<()> {
            sink.lock().unwrap().push(event.attributes().map(<[Attribute]>::to_vec));
            Ok(())
        }));
        let mut outer = NamespaceFilter::new("osm");
        outer.attach(Box::new(inner));

        outer
            .on_update(
                &create(vec![
                    Attribute::new("osm:id", "1"),
                    Attribute::new("tmp:seen", "yes"),
                    Attribute::new("name", "kept"),
                ]),
                true,
            )
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(vec![Attribute::new("name", "kept")])]
        );
    }
}
