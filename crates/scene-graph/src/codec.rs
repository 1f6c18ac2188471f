use anyhow::Result;
use serde_json::Value;
use tracing::{debug, warn};

use crate::backup::BackupLog;
use crate::error::SceneError;
use crate::event::SceneEvent;
use crate::id::Id;
use crate::observer::SceneObserver;
use crate::scene::{lock_write, SceneGraph, SharedScene};
use crate::time::TimeStamp;
use crate::transport::Transport;
use crate::wire::{self, DetachedContext, EventContext, MessageKind, WireGraph, WireUpdate};

impl EventContext for SceneGraph {
    fn mint_id(&mut self) -> Id {
        SceneGraph::mint_id(self)
    }

    fn next_attribute_stamp(&self, id: Id) -> TimeStamp {
        SceneGraph::next_attribute_stamp(self, id)
    }
}

/// Observer that turns accepted events into `RSGUpdate` messages and hands
/// them to a transport, optionally mirroring them into a backup log.
pub struct JsonSerializer<T: Transport> {
    transport: T,
    backup: Option<BackupLog>,
    sent: usize,
}

impl<T: Transport> JsonSerializer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            backup: None,
            sent: 0,
        }
    }

    pub fn with_backup(mut self, backup: BackupLog) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn encode(event: &SceneEvent) -> Result<String> {
        Ok(serde_json::to_string(&wire::encode_event(event))?)
    }
}

impl<T: Transport> SceneObserver for JsonSerializer<T> {
    fn on_update(&mut self, event: &SceneEvent, accepted: bool) -> Result<()> {
        if !accepted {
            return Ok(());
        }
        let message = Self::encode(event)?;
        if let Some(backup) = self.backup.as_mut() {
            backup.append(&message)?;
        }
        let reply = self.transport.send(message.as_bytes())?;
        self.sent += 1;

        if !reply.is_empty() {
            let reply: Value = serde_json::from_slice(&reply)?;
            if reply.get("updateSuccess") == Some(&Value::Bool(false)) {
                warn!(op = event.operation().as_str(), id = %event.node_id(), "peer rejected update");
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "json-serializer"
    }
}

/// Where decoded updates go.
pub enum UpdateTarget {
    /// Applied to a scene through its mutation layer.
    Scene(SharedScene),
    /// Handed to an observer chain, e.g. a namespace filter.
    Observer(Box<dyn SceneObserver>),
}

/// Decodes `RSGUpdate` (single, batched in an array, or wrapped in an
/// `RSGGraph`) and applies it to its target, answering with `RSGUpdateResult`.
pub struct JsonDeserializer {
    target: UpdateTarget,
    detached: DetachedContext,
}

impl JsonDeserializer {
    pub fn new(target: UpdateTarget) -> Self {
        Self {
            target,
            detached: DetachedContext::default(),
        }
    }

    pub fn for_scene(scene: SharedScene) -> Self {
        Self::new(UpdateTarget::Scene(scene))
    }

    pub fn for_observer(observer: Box<dyn SceneObserver>) -> Self {
        Self::new(UpdateTarget::Observer(observer))
    }

    /// Decodes and applies `message`. Returns the overall success flag and
    /// the serialized reply.
    pub fn write(&mut self, message: &str) -> (bool, String) {
        let (success, reply) = match serde_json::from_str::<Value>(message) {
            Ok(Value::Array(batch)) => {
                let mut all_ok = true;
                let replies: Vec<Value> = batch
                    .into_iter()
                    .map(|item| {
                        let (ok, reply) = self.handle_value(item);
                        all_ok &= ok;
                        reply
                    })
                    .collect();
                (all_ok, Value::Array(replies))
            }
            Ok(value) => self.handle_value(value),
            Err(e) => {
                debug!(error = %e, "unparseable input");
                (false, wire::unparseable())
            }
        };
        (success, reply.to_string())
    }

    pub fn write_bytes(&mut self, message: &[u8]) -> (bool, Vec<u8>) {
        let text = String::from_utf8_lossy(message);
        let (success, reply) = self.write(&text);
        (success, reply.into_bytes())
    }

    pub fn handle_value(&mut self, value: Value) -> (bool, Value) {
        match wire::classify(&value) {
            Ok(MessageKind::Update) => match serde_json::from_value::<WireUpdate>(value) {
                Ok(update) => {
                    let success = self.apply_update(&update);
                    (success, wire::update_result(success, update.query_id.as_deref()))
                }
                Err(e) => (false, wire::syntax_error(&SceneError::syntax(e.to_string()))),
            },
            Ok(MessageKind::Graph) => match serde_json::from_value::<WireGraph>(value) {
                Ok(graph) => {
                    let mut applied = 0;
                    for update in &graph.updates {
                        if self.apply_update(update) {
                            applied += 1;
                        }
                    }
                    let success = applied == graph.updates.len();
                    debug!(root = %graph.root_id, applied, total = graph.updates.len(), "graph replayed");
                    (success, wire::update_result(success, None))
                }
                Err(e) => (false, wire::syntax_error(&SceneError::syntax(e.to_string()))),
            },
            Ok(MessageKind::Query) => (
                false,
                wire::syntax_error(&SceneError::syntax(
                    "RSGQuery is not accepted by an update endpoint",
                )),
            ),
            Err(e) => (false, wire::syntax_error(&e)),
        }
    }

    fn apply_update(&mut self, update: &WireUpdate) -> bool {
        let outcome: Result<()> = match &mut self.target {
            UpdateTarget::Scene(scene) => lock_write(scene).and_then(|mut scene| {
                let events = wire::decode_update(update, &mut *scene)?;
                for event in events {
                    scene.apply(event)?;
                }
                Ok(())
            }),
            UpdateTarget::Observer(observer) => wire::decode_update(update, &mut self.detached)
                .map_err(anyhow::Error::from)
                .and_then(|events| {
                    for event in &events {
                        observer.on_update(event, true)?;
                    }
                    Ok(())
                }),
        };
        match outcome {
            Ok(()) => {
                debug!(op = update.operation.as_str(), "update applied");
                true
            }
            Err(e) => {
                warn!(op = update.operation.as_str(), error = %e, "update not applied");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::attribute::Attribute;
    use crate::scene::lock_read;

    fn replica() -> SharedScene {
        SceneGraph::with_root(Id::from_u128(1)).shared()
    }

    #[test]
    fn duplicate_create_is_reported_not_fatal() {
        let scene = replica();
        let mut deserializer = JsonDeserializer::for_scene(scene.clone());
        let message = json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "CREATE",
            "parentId": "00000000-0000-0000-0000-000000000001",
            "node": {"@graphtype": "Group", "id": "00000000-0000-0000-0000-000000000002"}
        })
        .to_string();
        assert!(deserializer.write(&message).0);
        let (ok, reply) = deserializer.write(&message);
        assert!(!ok);
        assert_eq!(
            serde_json::from_str::<Value>(&reply).unwrap(),
            json!({"@worldmodeltype": "RSGUpdateResult", "updateSuccess": false})
        );
        assert_eq!(lock_read(&scene).unwrap().store().len(), 2);
    }

    #[test]
    fn batches_answer_per_message() {
        let scene = replica();
        let mut deserializer = JsonDeserializer::for_scene(scene);
        let batch = json!([
            {"@worldmodeltype": "RSGUpdate", "operation": "CREATE",
             "parentId": "00000000-0000-0000-0000-000000000001",
             "node": {"@graphtype": "Node", "id": "00000000-0000-0000-0000-000000000003"}},
            {"@worldmodeltype": "RSGUpdate"}
        ]);
        let (ok, reply) = deserializer.write(&batch.to_string());
        assert!(!ok);
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply[0]["updateSuccess"], json!(true));
        assert_eq!(
            reply[1],
            json!({"error": {"message": "Syntax error: Mandatory operation field not set in RSGUpdate"}})
        );
    }

    #[test]
    fn malformed_input_never_mutates() {
        let scene = replica();
        let mut deserializer = JsonDeserializer::for_scene(scene.clone());
        let (ok, reply) = deserializer.write(r#"{"@worldmodeltype": "RSGUpdate", "operation": "CREATE", "#);
        assert!(!ok);
        assert_eq!(
            serde_json::from_str::<Value>(&reply).unwrap(),
            json!({"error": {"message": "Syntax error: Top level model type @worldmodeltype does not exist."}})
        );
        let (ok, _) = deserializer.write(
            &json!({
                "@worldmodeltype": "RSGUpdate", "operation": "CREATE",
                "parentId": "INVALID-ID",
                "node": {"@graphtype": "Node", "id": "00000000-0000-0000-0000-000000000003"}
            })
            .to_string(),
        );
        assert!(!ok);
        assert_eq!(lock_read(&scene).unwrap().store().len(), 1);
    }

    #[test]
    fn observer_target_receives_decoded_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut deserializer = JsonDeserializer::for_observer(Box::new(
            move |event: &SceneEvent, _: bool| -> Result<()> {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            },
        ));
        let (ok, _) = deserializer.write(
            &json!({
                "@worldmodeltype": "RSGUpdate", "operation": "UPDATE_ATTRIBUTES",
                "updateMode": "UPDATE",
                "node": {
                    "id": "00000000-0000-0000-0000-000000000001",
                    "attributes": [{"key": "name", "value": "x"}],
                    "attributesTimeStamp": {"@stamptype": "TimeStampUTCs", "stamp": 2.0}
                }
            })
            .to_string(),
        );
        assert!(ok);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].attributes(), Some(&[Attribute::new("name", "x")][..]));
    }
}
