//! JSON records exchanged between world model instances.
//!
//! Field names and enum tokens are the compatibility surface: `@worldmodeltype`,
//! `@graphtype`, `operation`, `parentId`, `childId`, `updateMode`, `queryId`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::attribute::{Attribute, UpdateMode};
use crate::error::{SceneError, SceneResult};
use crate::event::{Operation, SceneEvent};
use crate::geometry::Geometry;
use crate::id::{Id, IdGenerator, UuidGenerator};
use crate::node::{GraphType, NodePayload};
use crate::pose::PoseSample;
use crate::time::{Clock, SystemClock, TimeStamp};

pub const RSG_UPDATE: &str = "RSGUpdate";
pub const RSG_UPDATE_RESULT: &str = "RSGUpdateResult";
pub const RSG_QUERY: &str = "RSGQuery";
pub const RSG_QUERY_RESULT: &str = "RSGQueryResult";
pub const RSG_GRAPH: &str = "RSGGraph";

pub const WRONG_ID: &str = "Wrong or missing id.";
/// Reply to bodies that do not parse or carry no `@worldmodeltype` at all.
pub const NO_MODEL_TYPE: &str = "Top level model type @worldmodeltype does not exist.";
/// Reply to an `@worldmodeltype` value no endpoint understands.
pub const UNKNOWN_MODEL_TYPE: &str = "Mandatory @worldmodeltype field not set in RSGQuery or RSGFunctionBlock";

/// One node record inside an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireNode {
    #[serde(rename = "@graphtype", default, skip_serializing_if = "Option::is_none")]
    pub graph_type: Option<GraphType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes_time_stamp: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<PoseSample>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<TimeStamp>,
}

impl WireNode {
    fn with_id(id: Id) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::default()
        }
    }
}

/// `RSGUpdate` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireUpdate {
    #[serde(rename = "@worldmodeltype")]
    pub model_type: String,
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<WireNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_mode: Option<UpdateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

impl WireUpdate {
    fn new(operation: Operation) -> Self {
        Self {
            model_type: RSG_UPDATE.to_string(),
            operation,
            node: None,
            parent_id: None,
            child_id: None,
            update_mode: None,
            query_id: None,
        }
    }
}

/// Full-graph snapshot: replaying `updates` into a fresh store whose root is
/// `root_id` rebuilds the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireGraph {
    #[serde(rename = "@worldmodeltype")]
    pub model_type: String,
    pub root_id: Id,
    pub updates: Vec<WireUpdate>,
}

impl WireGraph {
    pub fn new(root_id: Id, updates: Vec<WireUpdate>) -> Self {
        Self {
            model_type: RSG_GRAPH.to_string(),
            root_id,
            updates,
        }
    }
}

/// Top level message classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Update,
    Query,
    Graph,
}

/// Checks the discriminators of a parsed message and reports the syntax
/// errors peers expect for missing or unknown ones.
pub fn classify(value: &Value) -> SceneResult<MessageKind> {
    let Some(model_type) = value.get("@worldmodeltype") else {
        return Err(SceneError::syntax(NO_MODEL_TYPE));
    };
    match model_type.as_str() {
        Some(RSG_UPDATE) => match value.get("operation") {
            None => Err(SceneError::syntax("Mandatory operation field not set in RSGUpdate")),
            Some(op) if op.as_str().and_then(Operation::from_token).is_some() => Ok(MessageKind::Update),
            Some(_) => Err(SceneError::syntax(
                "Mandatory operation field has unknown value in RSGUpdate",
            )),
        },
        Some(RSG_QUERY) => match value.get("query") {
            None => Err(SceneError::syntax("Mandatory query field not set in RSGQuery")),
            Some(query) if query.as_str().and_then(crate::query::QueryType::from_token).is_some() => {
                Ok(MessageKind::Query)
            }
            Some(_) => Err(SceneError::syntax("Mandatory query field has unknown value in RSGQuery")),
        },
        Some(RSG_GRAPH) => Ok(MessageKind::Graph),
        _ => Err(SceneError::syntax(UNKNOWN_MODEL_TYPE)),
    }
}

/// Syntax error reply for input that is not a JSON message at all.
pub fn unparseable() -> Value {
    syntax_error(&SceneError::syntax(NO_MODEL_TYPE))
}

/// Envelope for malformed input. It deliberately carries no `query` field.
pub fn syntax_error(error: &SceneError) -> Value {
    json!({ "error": { "message": error.to_string() } })
}

pub fn update_result(success: bool, query_id: Option<&str>) -> Value {
    let mut result = json!({
        "@worldmodeltype": RSG_UPDATE_RESULT,
        "updateSuccess": success,
    });
    if let Some(query_id) = query_id {
        result["queryId"] = json!(query_id);
    }
    result
}

pub fn parse_id(raw: Option<&str>) -> SceneResult<Id> {
    raw.and_then(|text| text.parse().ok())
        .ok_or_else(|| SceneError::syntax(WRONG_ID))
}

fn parse_ids(raw: Option<&Vec<String>>) -> SceneResult<Vec<Id>> {
    raw.map(|ids| ids.iter().map(|id| parse_id(Some(id))).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

fn ids_to_strings(ids: &[Id]) -> Vec<String> {
    ids.iter().map(Id::to_string).collect()
}

/// Encodes a resolved event as an `RSGUpdate`.
pub fn encode_event(event: &SceneEvent) -> WireUpdate {
    let mut update = WireUpdate::new(event.operation());
    match event {
        SceneEvent::Create {
            parent,
            id,
            attributes,
            attributes_stamp,
            payload,
        } => {
            let mut node = WireNode::with_id(*id);
            node.graph_type = Some(payload.graph_type());
            node.attributes = Some(attributes.clone());
            node.attributes_time_stamp = *attributes_stamp;
            match payload {
                NodePayload::Node | NodePayload::Group => {}
                NodePayload::Transform { pose, stamp } => {
                    node.history = Some(vec![PoseSample {
                        stamp: *stamp,
                        transform: *pose,
                        uncertainty: None,
                    }]);
                }
                NodePayload::UncertainTransform {
                    pose,
                    uncertainty,
                    stamp,
                } => {
                    node.history = Some(vec![PoseSample {
                        stamp: *stamp,
                        transform: *pose,
                        uncertainty: Some(*uncertainty),
                    }]);
                }
                NodePayload::Geometric { shape, stamp } => {
                    node.geometry = Some(shape.clone());
                    node.time_stamp = Some(*stamp);
                }
                NodePayload::Connection {
                    sources,
                    targets,
                    start,
                    end,
                } => {
                    node.source_ids = Some(ids_to_strings(sources));
                    node.target_ids = Some(ids_to_strings(targets));
                    node.start = Some(*start);
                    node.end = Some(*end);
                }
            }
            update.node = Some(node);
            update.parent_id = Some(parent.to_string());
        }
        SceneEvent::AddRemoteRoot { id, attributes } => {
            let mut node = WireNode::with_id(*id);
            node.graph_type = Some(GraphType::RemoteRootNode);
            node.attributes = Some(attributes.clone());
            update.node = Some(node);
        }
        SceneEvent::UpdateAttributes {
            id,
            attributes,
            stamp,
            mode,
        } => {
            let mut node = WireNode::with_id(*id);
            node.attributes = Some(attributes.clone());
            node.attributes_time_stamp = Some(*stamp);
            update.node = Some(node);
            update.update_mode = Some(*mode);
        }
        SceneEvent::UpdateTransform {
            id,
            pose,
            uncertainty,
            stamp,
        } => {
            let mut node = WireNode::with_id(*id);
            node.graph_type = Some(if uncertainty.is_some() {
                GraphType::UncertainTransform
            } else {
                GraphType::Transform
            });
            node.history = Some(vec![PoseSample {
                stamp: *stamp,
                transform: *pose,
                uncertainty: *uncertainty,
            }]);
            update.node = Some(node);
        }
        SceneEvent::Delete { id } => {
            update.node = Some(WireNode::with_id(*id));
        }
        SceneEvent::AddParent { child, parent } | SceneEvent::RemoveParent { child, parent } => {
            update.child_id = Some(child.to_string());
            update.parent_id = Some(parent.to_string());
        }
    }
    update
}

/// What a decoder needs from its target to resolve an update into events.
pub trait EventContext {
    fn mint_id(&mut self) -> Id;

    /// Stamp for an attribute update that arrived without one.
    fn next_attribute_stamp(&self, id: Id) -> TimeStamp;
}

/// Context for decoders that forward to observers instead of a store.
pub struct DetachedContext {
    ids: UuidGenerator,
    clock: SystemClock,
}

impl Default for DetachedContext {
    fn default() -> Self {
        Self {
            ids: UuidGenerator::new(),
            clock: SystemClock,
        }
    }
}

impl EventContext for DetachedContext {
    fn mint_id(&mut self) -> Id {
        self.ids.next_id()
    }

    fn next_attribute_stamp(&self, _id: Id) -> TimeStamp {
        self.clock.now()
    }
}

fn history_events(id: Id, samples: &[PoseSample], uncertain: bool) -> SceneResult<Vec<SceneEvent>> {
    if samples.windows(2).any(|pair| pair[1].stamp <= pair[0].stamp) {
        return Err(SceneError::syntax("Pose history is not ordered by time"));
    }
    if uncertain && samples.iter().any(|s| s.uncertainty.is_none()) {
        return Err(SceneError::syntax("UncertainTransform sample without covariance"));
    }
    Ok(samples
        .iter()
        .map(|sample| SceneEvent::UpdateTransform {
            id,
            pose: sample.transform,
            uncertainty: if uncertain { sample.uncertainty } else { None },
            stamp: sample.stamp,
        })
        .collect())
}

fn create_events(
    update: &WireUpdate,
    node: &WireNode,
    context: &mut dyn EventContext,
) -> SceneResult<Vec<SceneEvent>> {
    let parent = parse_id(update.parent_id.as_deref())?;
    let id = match &node.id {
        Some(raw) => parse_id(Some(raw))?,
        None => context.mint_id(),
    };
    let graph_type = node
        .graph_type
        .ok_or_else(|| SceneError::syntax("Mandatory @graphtype field not set in node"))?;
    if update.operation == Operation::AddConnection && graph_type != GraphType::Connection {
        return Err(SceneError::syntax("ADD_CONNECTION expects a Connection node"));
    }

    let mut trailing = Vec::new();
    let payload = match graph_type {
        GraphType::Node => NodePayload::Node,
        GraphType::Group => NodePayload::Group,
        GraphType::Transform | GraphType::UncertainTransform => {
            let uncertain = graph_type == GraphType::UncertainTransform;
            let samples = node.history.as_deref().unwrap_or_default();
            let mut events = history_events(id, samples, uncertain)?;
            if events.is_empty() {
                return Err(SceneError::syntax("Transform node without pose history"));
            }
            trailing = events.split_off(1);
            match events.remove(0) {
                SceneEvent::UpdateTransform {
                    pose,
                    uncertainty: Some(uncertainty),
                    stamp,
                    ..
                } => NodePayload::UncertainTransform {
                    pose,
                    uncertainty,
                    stamp,
                },
                SceneEvent::UpdateTransform { pose, stamp, .. } => NodePayload::Transform { pose, stamp },
                _ => return Err(SceneError::syntax("Transform node without pose history")),
            }
        }
        GraphType::GeometricNode => NodePayload::Geometric {
            shape: node
                .geometry
                .clone()
                .ok_or_else(|| SceneError::syntax("GeometricNode without geometry"))?,
            stamp: node.time_stamp.unwrap_or(TimeStamp::ZERO),
        },
        GraphType::Connection => NodePayload::Connection {
            sources: parse_ids(node.source_ids.as_ref())?,
            targets: parse_ids(node.target_ids.as_ref())?,
            start: node.start.unwrap_or(TimeStamp::ZERO),
            end: node.end.unwrap_or(TimeStamp::ZERO),
        },
        GraphType::RemoteRootNode => {
            return Err(SceneError::syntax(
                "RemoteRootNode records are created with ADD_REMOTE_ROOT",
            ))
        }
    };

    let mut events = vec![SceneEvent::Create {
        parent,
        id,
        attributes: node.attributes.clone().unwrap_or_default(),
        attributes_stamp: node.attributes_time_stamp,
        payload,
    }];
    events.extend(trailing);
    Ok(events)
}

/// Resolves an `RSGUpdate` into events. Fails before producing anything if
/// the message is incomplete.
pub fn decode_update(update: &WireUpdate, context: &mut dyn EventContext) -> SceneResult<Vec<SceneEvent>> {
    let node = update.node.as_ref();
    let node_id = || parse_id(node.and_then(|n| n.id.as_deref()));
    match update.operation {
        Operation::Create | Operation::AddConnection => {
            let node = node.ok_or_else(|| SceneError::syntax("Mandatory node field not set in RSGUpdate"))?;
            create_events(update, node, context)
        }
        Operation::AddRemoteRoot => Ok(vec![SceneEvent::AddRemoteRoot {
            id: node_id()?,
            attributes: node.and_then(|n| n.attributes.clone()).unwrap_or_default(),
        }]),
        Operation::UpdateAttributes => {
            let id = node_id()?;
            let stamp = match node.and_then(|n| n.attributes_time_stamp) {
                Some(stamp) => stamp,
                None => context.next_attribute_stamp(id),
            };
            Ok(vec![SceneEvent::UpdateAttributes {
                id,
                attributes: node.and_then(|n| n.attributes.clone()).unwrap_or_default(),
                stamp,
                mode: update.update_mode.unwrap_or_default(),
            }])
        }
        Operation::UpdateTransform => {
            let id = node_id()?;
            let samples = node.and_then(|n| n.history.as_deref()).unwrap_or_default();
            if samples.is_empty() {
                return Err(SceneError::syntax("UPDATE_TRANSFORM without pose history"));
            }
            let uncertain = node.and_then(|n| n.graph_type) == Some(GraphType::UncertainTransform)
                || samples.iter().all(|s| s.uncertainty.is_some());
            history_events(id, samples, uncertain)
        }
        Operation::Delete => Ok(vec![SceneEvent::Delete { id: node_id()? }]),
        Operation::AddParent | Operation::RemoveParent => {
            let child = parse_id(update.child_id.as_deref())?;
            let parent = parse_id(update.parent_id.as_deref())?;
            Ok(vec![if update.operation == Operation::AddParent {
                SceneEvent::AddParent { child, parent }
            } else {
                SceneEvent::RemoveParent { child, parent }
            }])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Pose;

    struct FixedContext(u128);

    impl EventContext for FixedContext {
        fn mint_id(&mut self) -> Id {
            self.0 += 1;
            Id::from_u128(self.0)
        }

        fn next_attribute_stamp(&self, _id: Id) -> TimeStamp {
            TimeStamp::from_millis(42.0)
        }
    }

    #[test]
    fn classify_reports_exact_messages() {
        let message = |value: Value| match classify(&value) {
            Err(SceneError::Syntax(m)) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(
            message(json!({"query": "GET_NODE_ATTRIBUTES"})),
            "Top level model type @worldmodeltype does not exist."
        );
        assert_eq!(
            message(json!("just a string")),
            "Top level model type @worldmodeltype does not exist."
        );
        assert_eq!(
            message(json!({"@worldmodeltype": "RSGQueryINVALID"})),
            "Mandatory @worldmodeltype field not set in RSGQuery or RSGFunctionBlock"
        );
        assert_eq!(
            message(json!({"@worldmodeltype": "RSGUpdate"})),
            "Mandatory operation field not set in RSGUpdate"
        );
        assert_eq!(
            message(json!({"@worldmodeltype": "RSGUpdate", "operation": "UPSERT"})),
            "Mandatory operation field has unknown value in RSGUpdate"
        );
        assert_eq!(
            message(json!({"@worldmodeltype": "RSGQuery"})),
            "Mandatory query field not set in RSGQuery"
        );
        assert_eq!(
            message(json!({"@worldmodeltype": "RSGQuery", "query": "GET_EVERYTHING"})),
            "Mandatory query field has unknown value in RSGQuery"
        );
        assert_eq!(
            classify(&json!({"@worldmodeltype": "RSGQuery", "query": "GET_ROOT_NODE"})),
            Ok(MessageKind::Query)
        );
    }

    #[test]
    fn create_event_encodes_verbatim_fields() {
        let event = SceneEvent::Create {
            parent: Id::from_u128(1),
            id: Id::from_u128(2),
            attributes: vec![Attribute::new("name", "tf")],
            attributes_stamp: None,
            payload: NodePayload::Transform {
                pose: Pose::identity(),
                stamp: TimeStamp::from_millis(1.0),
            },
        };
        let value = serde_json::to_value(encode_event(&event)).unwrap();
        assert_eq!(value["@worldmodeltype"], "RSGUpdate");
        assert_eq!(value["operation"], "CREATE");
        assert_eq!(value["parentId"], "00000000-0000-0000-0000-000000000001");
        assert_eq!(value["node"]["@graphtype"], "Transform");
        assert_eq!(value["node"]["id"], "00000000-0000-0000-0000-000000000002");
        assert_eq!(value["node"]["history"][0]["stamp"]["@stamptype"], "TimeStampUTCms");
        assert!(value["node"].get("attributesTimeStamp").is_none());

        let update: WireUpdate = serde_json::from_value(value).unwrap();
        let decoded = decode_update(&update, &mut FixedContext(100)).unwrap();
        assert_eq!(decoded, vec![event]);
    }

    #[test]
    fn create_without_id_mints_one() {
        let update: WireUpdate = serde_json::from_value(json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "CREATE",
            "parentId": "00000000-0000-0000-0000-000000000001",
            "node": {"@graphtype": "Group", "attributes": [{"key": "name", "value": "g"}]}
        }))
        .unwrap();
        let events = decode_update(&update, &mut FixedContext(100)).unwrap();
        assert_eq!(events[0].node_id(), Id::from_u128(101));
    }

    #[test]
    fn multi_sample_history_becomes_create_plus_updates() {
        let update: WireUpdate = serde_json::from_value(json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "CREATE",
            "parentId": "00000000-0000-0000-0000-000000000001",
            "node": {
                "@graphtype": "Transform",
                "id": "00000000-0000-0000-0000-000000000002",
                "history": [
                    {"stamp": {"@stamptype": "TimeStampUTCms", "stamp": 1.0}, "transform": {"type": "HomogeneousMatrix44", "matrix": [[1,0,0,0],[0,1,0,0],[0,0,1,0],[0,0,0,1]]}},
                    {"stamp": {"@stamptype": "TimeStampUTCms", "stamp": 2.0}, "transform": {"type": "HomogeneousMatrix44", "matrix": [[1,0,0,5],[0,1,0,0],[0,0,1,0],[0,0,0,1]]}}
                ]
            }
        }))
        .unwrap();
        let events = decode_update(&update, &mut FixedContext(0)).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].operation(), Operation::UpdateTransform);
    }

    #[test]
    fn bad_ids_and_missing_stamps() {
        let update: WireUpdate = serde_json::from_value(json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "ADD_PARENT",
            "childId": "INVALID-ID",
            "parentId": "00000000-0000-0000-0000-000000000001"
        }))
        .unwrap();
        assert_eq!(
            decode_update(&update, &mut FixedContext(0)),
            Err(SceneError::syntax(WRONG_ID))
        );

        let update: WireUpdate = serde_json::from_value(json!({
            "@worldmodeltype": "RSGUpdate",
            "operation": "UPDATE_ATTRIBUTES",
            "updateMode": "APPEND",
            "node": {"id": "00000000-0000-0000-0000-000000000001", "attributes": []}
        }))
        .unwrap();
        let events = decode_update(&update, &mut FixedContext(0)).unwrap();
        assert_eq!(
            events,
            vec![SceneEvent::UpdateAttributes {
                id: Id::from_u128(1),
                attributes: Vec::new(),
                stamp: TimeStamp::from_millis(42.0),
                mode: UpdateMode::Append,
            }]
        );
    }

    #[test]
    fn result_envelope_echoes_query_id() {
        assert_eq!(
            update_result(false, Some("q-7")),
            json!({"@worldmodeltype": "RSGUpdateResult", "updateSuccess": false, "queryId": "q-7"})
        );
        assert_eq!(
            syntax_error(&SceneError::syntax(WRONG_ID)),
            json!({"error": {"message": "Syntax error: Wrong or missing id."}})
        );
    }
}
