use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::attribute::Attribute;
use crate::codec::JsonDeserializer;
use crate::error::{SceneError, SceneResult};
use crate::id::Id;
use crate::scene::{lock_read, SceneGraph, SharedScene};
use crate::time::TimeStamp;
use crate::wire::{self, MessageKind, RSG_QUERY_RESULT};

/// `query` tokens of an `RSGQuery`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    GetNodes,
    GetNodeAttributes,
    GetNodeParents,
    GetGroupChildren,
    GetRootNode,
    GetRemoteRootNodes,
    GetTransform,
    GetGeometry,
    GetConnectionSourceIds,
    GetConnectionTargetIds,
}

impl QueryType {
    pub const ALL: [QueryType; 10] = [
        QueryType::GetNodes,
        QueryType::GetNodeAttributes,
        QueryType::GetNodeParents,
        QueryType::GetGroupChildren,
        QueryType::GetRootNode,
        QueryType::GetRemoteRootNodes,
        QueryType::GetTransform,
        QueryType::GetGeometry,
        QueryType::GetConnectionSourceIds,
        QueryType::GetConnectionTargetIds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::GetNodes => "GET_NODES",
            QueryType::GetNodeAttributes => "GET_NODE_ATTRIBUTES",
            QueryType::GetNodeParents => "GET_NODE_PARENTS",
            QueryType::GetGroupChildren => "GET_GROUP_CHILDREN",
            QueryType::GetRootNode => "GET_ROOT_NODE",
            QueryType::GetRemoteRootNodes => "GET_REMOTE_ROOT_NODES",
            QueryType::GetTransform => "GET_TRANSFORM",
            QueryType::GetGeometry => "GET_GEOMETRY",
            QueryType::GetConnectionSourceIds => "GET_CONNECTION_SOURCE_IDS",
            QueryType::GetConnectionTargetIds => "GET_CONNECTION_TARGET_IDS",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|q| q.as_str() == token)
    }

    /// Queries answered with an `ids` list.
    fn returns_ids(&self) -> bool {
        matches!(
            self,
            QueryType::GetNodes
                | QueryType::GetNodeParents
                | QueryType::GetGroupChildren
                | QueryType::GetRemoteRootNodes
                | QueryType::GetConnectionSourceIds
                | QueryType::GetConnectionTargetIds
        )
    }
}

/// `RSGQuery` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQuery {
    #[serde(rename = "@worldmodeltype")]
    pub model_type: String,
    pub query: QueryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_reference_node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subgraph_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<TimeStamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
}

fn ids_json(ids: &[Id]) -> Value {
    json!(ids.iter().map(Id::to_string).collect::<Vec<_>>())
}

/// Type specific fields of a successful answer. `Err(Syntax)` means the
/// query itself was incomplete; other errors are semantic failures.
fn answer_fields(scene: &SceneGraph, query: &WireQuery) -> SceneResult<Value> {
    let target = || wire::parse_id(query.id.as_deref());
    match query.query {
        QueryType::GetNodes => {
            let subgraph = match &query.subgraph_id {
                Some(raw) => Some(wire::parse_id(Some(raw))?),
                None => None,
            };
            let filter = query.attributes.clone().unwrap_or_default();
            Ok(json!({ "ids": ids_json(&scene.get_nodes(&filter, subgraph)?) }))
        }
        QueryType::GetNodeAttributes => {
            let node = scene.node(target()?)?;
            Ok(json!({
                "attributes": node.attributes(),
                "timeStamp": node.attribute_stamp().unwrap_or(TimeStamp::ZERO),
            }))
        }
        QueryType::GetNodeParents => Ok(json!({ "ids": ids_json(scene.parents(target()?)?) })),
        QueryType::GetGroupChildren => Ok(json!({ "ids": ids_json(scene.children(target()?)?) })),
        QueryType::GetRootNode => Ok(json!({ "rootId": scene.root_id() })),
        QueryType::GetRemoteRootNodes => Ok(json!({ "ids": ids_json(scene.remote_root_ids()) })),
        QueryType::GetTransform => {
            let id = target()?;
            let reference = wire::parse_id(query.id_reference_node.as_deref())?;
            let stamp = query.time_stamp.unwrap_or_else(|| scene.now());
            let pose = scene.get_transform_for_node(id, reference, stamp)?;
            Ok(json!({ "transform": pose, "timeStamp": stamp }))
        }
        QueryType::GetGeometry => {
            let id = target()?;
            let node = scene.node(id)?;
            let (shape, stamp) = node
                .geometry()
                .ok_or_else(|| SceneError::wrong_type(id, "GeometricNode", node.type_name()))?;
            Ok(json!({ "geometry": shape, "timeStamp": stamp }))
        }
        QueryType::GetConnectionSourceIds => {
            Ok(json!({ "ids": ids_json(scene.connection_sources(target()?)?) }))
        }
        QueryType::GetConnectionTargetIds => {
            Ok(json!({ "ids": ids_json(scene.connection_targets(target()?)?) }))
        }
    }
}

/// Answers one parsed `RSGQuery` against a scene.
pub fn answer(scene: &SceneGraph, value: Value) -> (bool, Value) {
    let query: WireQuery = match serde_json::from_value(value) {
        Ok(query) => query,
        Err(e) => return (false, wire::syntax_error(&SceneError::syntax(e.to_string()))),
    };

    let mut result = json!({
        "@worldmodeltype": RSG_QUERY_RESULT,
        "query": query.query.as_str(),
    });
    let success = match answer_fields(scene, &query) {
        Ok(Value::Object(fields)) => {
            for (key, value) in fields {
                result[key.as_str()] = value;
            }
            true
        }
        Ok(_) => true,
        Err(e @ SceneError::Syntax(_)) => return (false, wire::syntax_error(&e)),
        Err(e) => {
            warn!(query = query.query.as_str(), error = %e, "query failed");
            if query.query.returns_ids() {
                result["ids"] = json!([]);
            }
            false
        }
    };
    result["querySuccess"] = json!(success);
    if let Some(query_id) = &query.query_id {
        result["queryId"] = json!(query_id);
    }
    debug!(query = query.query.as_str(), success, "query answered");
    (success, result)
}

/// Request/response front end of a scene: answers `RSGQuery` messages and
/// applies `RSGUpdate`/`RSGGraph` messages.
pub struct QueryRunner {
    scene: SharedScene,
    updates: JsonDeserializer,
}

impl QueryRunner {
    pub fn new(scene: SharedScene) -> Self {
        Self {
            updates: JsonDeserializer::for_scene(scene.clone()),
            scene,
        }
    }

    pub fn scene(&self) -> &SharedScene {
        &self.scene
    }

    /// Handles one request. Returns the success flag and the serialized reply.
    pub fn query(&mut self, request: &str) -> (bool, String) {
        let (success, reply) = match serde_json::from_str::<Value>(request) {
            Ok(value) => self.handle_value(value),
            Err(e) => {
                debug!(error = %e, "unparseable input");
                (false, wire::unparseable())
            }
        };
        (success, reply.to_string())
    }

    pub fn handle_value(&mut self, value: Value) -> (bool, Value) {
        match wire::classify(&value) {
            Ok(MessageKind::Query) => match lock_read(&self.scene) {
                Ok(scene) => answer(&scene, value),
                Err(e) => (false, json!({ "error": { "message": e.to_string() } })),
            },
            Ok(MessageKind::Update | MessageKind::Graph) => self.updates.handle_value(value),
            Err(e) => (false, wire::syntax_error(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::pose::Pose;

    fn runner() -> QueryRunner {
        let mut scene = SceneGraph::with_root(Id::from_u128(1));
        scene
            .add_group(Id::from_u128(1), Some(Id::from_u128(2)), vec![Attribute::new("name", "g")])
            .unwrap();
        scene
            .add_geometric_node(
                Id::from_u128(2),
                Some(Id::from_u128(3)),
                Vec::new(),
                Geometry::Sphere { radius: 2.0 },
                TimeStamp::from_millis(5.0),
            )
            .unwrap();
        scene
            .add_transform_node(
                Id::from_u128(1),
                Some(Id::from_u128(4)),
                Vec::new(),
                Pose::from_translation(1.0, 0.0, 0.0),
                TimeStamp::from_millis(1.0),
            )
            .unwrap();
        QueryRunner::new(scene.shared())
    }

    fn ask(runner: &mut QueryRunner, request: Value) -> (bool, Value) {
        let (ok, reply) = runner.query(&request.to_string());
        (ok, serde_json::from_str(&reply).unwrap())
    }

    #[test]
    fn root_and_attributes() {
        let mut runner = runner();
        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_ROOT_NODE", "queryId": "q1"}),
        );
        assert!(ok);
        assert_eq!(
            reply,
            json!({
                "@worldmodeltype": "RSGQueryResult",
                "query": "GET_ROOT_NODE",
                "querySuccess": true,
                "rootId": "00000000-0000-0000-0000-000000000001",
                "queryId": "q1"
            })
        );

        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_NODE_ATTRIBUTES", "id": "00000000-0000-0000-0000-000000000002"}),
        );
        assert!(ok);
        assert_eq!(reply["attributes"], json!([{"key": "name", "value": "g"}]));
        assert_eq!(reply["timeStamp"]["stamp"], json!(0.0));
    }

    #[test]
    fn semantic_failures_keep_the_envelope() {
        let mut runner = runner();
        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_NODE_PARENTS", "id": "00000000-0000-0000-0000-0000000000ff", "queryId": "x"}),
        );
        assert!(!ok);
        assert_eq!(
            reply,
            json!({
                "@worldmodeltype": "RSGQueryResult",
                "query": "GET_NODE_PARENTS",
                "querySuccess": false,
                "ids": [],
                "queryId": "x"
            })
        );

        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_GEOMETRY", "id": "00000000-0000-0000-0000-000000000002"}),
        );
        assert!(!ok);
        assert_eq!(reply["querySuccess"], json!(false));
    }

    #[test]
    fn syntax_errors_have_no_query_field() {
        let mut runner = runner();
        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_NODE_PARENTS"}),
        );
        assert!(!ok);
        assert_eq!(reply, json!({"error": {"message": "Syntax error: Wrong or missing id."}}));

        let top_level = json!({"error": {"message": "Syntax error: Top level model type @worldmodeltype does not exist."}});
        for garbage in ["", "{not json", "xdkvmsdpj0 vrs8ameg+9vw4 "] {
            let (ok, reply) = runner.query(garbage);
            assert!(!ok);
            assert_eq!(serde_json::from_str::<Value>(&reply).unwrap(), top_level);
        }
        let (_, reply) = ask(&mut runner, json!({"query": "GET_NODE_ATTRIBUTES", "id": "00000000-0000-0000-0000-000000000002"}));
        assert_eq!(reply, top_level);
        let (ok, reply) = ask(&mut runner, json!({"@worldmodeltype": "RSGQueryINVALID"}));
        assert!(!ok);
        assert_eq!(
            reply,
            json!({"error": {"message": "Syntax error: Mandatory @worldmodeltype field not set in RSGQuery or RSGFunctionBlock"}})
        );
    }

    #[test]
    fn geometry_transform_and_id_lists() {
        let mut runner = runner();
        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_GEOMETRY", "id": "00000000-0000-0000-0000-000000000003"}),
        );
        assert!(ok);
        assert_eq!(reply["geometry"], json!({"@geometrytype": "Sphere", "radius": 2.0}));

        let (ok, reply) = ask(
            &mut runner,
            json!({
                "@worldmodeltype": "RSGQuery",
                "query": "GET_TRANSFORM",
                "id": "00000000-0000-0000-0000-000000000004",
                "idReferenceNode": "00000000-0000-0000-0000-000000000001",
                "timeStamp": {"@stamptype": "TimeStampUTCms", "stamp": 3.0}
            }),
        );
        assert!(ok);
        assert_eq!(reply["transform"]["matrix"][0][3], json!(1.0));

        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_NODES", "attributes": [{"key": "name", "value": "g"}]}),
        );
        assert!(ok);
        assert_eq!(reply["ids"], json!(["00000000-0000-0000-0000-000000000002"]));

        let (ok, reply) = ask(
            &mut runner,
            json!({"@worldmodeltype": "RSGQuery", "query": "GET_GROUP_CHILDREN", "id": "00000000-0000-0000-0000-000000000001"}),
        );
        assert!(ok);
        assert_eq!(reply["ids"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn updates_are_applied_through_the_runner() {
        let mut runner = runner();
        let (ok, reply) = ask(
            &mut runner,
            json!({
                "@worldmodeltype": "RSGUpdate",
                "operation": "CREATE",
                "parentId": "00000000-0000-0000-0000-000000000002",
                "queryId": "u1",
                "node": {"@graphtype": "Node", "id": "00000000-0000-0000-0000-000000000010"}
            }),
        );
        assert!(ok);
        assert_eq!(
            reply,
            json!({"@worldmodeltype": "RSGUpdateResult", "updateSuccess": true, "queryId": "u1"})
        );
        let scene = lock_read(runner.scene()).unwrap();
        assert!(scene.node(Id::from_u128(0x10)).is_ok());
    }
}
