use anyhow::Result;
use tracing::debug;

use crate::codec::JsonDeserializer;

/// Byte channel to a peer: one message out, the peer's reply back.
///
/// An empty reply means the transport does not return answers.
pub trait Transport: Send + Sync {
    fn send(&mut self, message: &[u8]) -> Result<Vec<u8>>;
}

/// In-process transport that feeds every message straight into a deserializer.
pub struct LoopbackBridge {
    remote: JsonDeserializer,
    delivered: usize,
}

impl LoopbackBridge {
    pub fn new(remote: JsonDeserializer) -> Self {
        Self {
            remote,
            delivered: 0,
        }
    }

    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl Transport for LoopbackBridge {
    fn send(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        let (success, reply) = self.remote.write_bytes(message);
        self.delivered += 1;
        debug!(success, bytes = message.len(), "loopback delivery");
        Ok(reply)
    }
}

/// Transport that drops every message. Used when only a backup log is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _message: &[u8]) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Transport that only records what it was asked to send.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    messages: Vec<Vec<u8>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }
}

impl Transport for RecordingTransport {
    fn send(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        self.messages.push(message.to_vec());
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::id::Id;
    use crate::scene::{lock_read, SceneGraph};

    #[test]
    fn loopback_returns_the_remote_answer() {
        let remote = SceneGraph::with_root(Id::from_u128(1)).shared();
        let mut bridge = LoopbackBridge::new(JsonDeserializer::for_scene(remote.clone()));
        let message = json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "CREATE",
            "parentId": "00000000-0000-0000-0000-000000000001",
            "queryId": "7",
            "node": {"@graphtype": "Node", "id": "00000000-0000-0000-0000-000000000002"}
        });
        let reply = bridge.send(message.to_string().as_bytes()).unwrap();
        let reply: Value = serde_json::from_slice(&reply).unwrap();
        assert_eq!(reply["updateSuccess"], json!(true));
        assert_eq!(reply["queryId"], json!("7"));
        assert_eq!(bridge.delivered(), 1);
        assert!(lock_read(&remote).unwrap().node(Id::from_u128(2)).is_ok());
    }
}
