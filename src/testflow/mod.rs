pub mod chain;
pub mod decoder;
pub mod expression;
pub mod graph;
pub mod history;
pub mod lenient_json;
pub mod registry;
pub mod runner;
pub mod template;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Node type that carries an executable request.
pub const REQUEST_BLOCK: &str = "requestBlock";

/// Node ids are strings on the wire but double as numeric graph vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(deserialize_with = "lossy_string")]
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeData>,
}

impl Node {
    /// Numeric vertex id. Ids that don't parse map to `None` and never take part in traversal.
    pub fn vertex(&self) -> Option<usize> {
        parse_vertex(&self.id)
    }

    /// The request descriptor, if this node is an executable request block.
    pub fn request(&self) -> Option<&RequestData> {
        if self.node_type != REQUEST_BLOCK {
            return None;
        }
        self.data.as_ref()?.request_data.as_ref()
    }

    /// Block name used as the second chain alias, falling back to the node id.
    pub fn block_name(&self) -> &str {
        self.data
            .as_ref()
            .and_then(|d| d.block_name.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.id)
    }
}

pub(crate) fn parse_vertex(id: &str) -> Option<usize> {
    id.trim().parse().ok()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_data: Option<RequestData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lossy_string")]
    pub source: String,
    #[serde(deserialize_with = "lossy_string")]
    pub target: String,
}

/// Environment variable. Only `checked` entries are substituted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variable {
    #[serde(deserialize_with = "lossy_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub checked: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(default, deserialize_with = "lossy_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub checked: bool,
}

/// Abstract description of one request, as authored in the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestData {
    #[serde(default, deserialize_with = "lossy_string")]
    pub name: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub method: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Vec<KeyValue>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub query_params: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_request_body_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_request_auth_type: Option<AuthType>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub urlencoded: Vec<KeyValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formdata: Option<FormData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormData {
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: Vec<KeyValue>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub file: Vec<FileField>,
}

/// A multipart file entry; `base` holds a base64 data URI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileField {
    #[serde(default, deserialize_with = "lossy_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub value: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub base: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthType {
    #[serde(rename = "No Auth")]
    NoAuth,
    #[serde(rename = "Inherit Auth")]
    InheritAuth,
    #[serde(rename = "API Key")]
    ApiKey,
    #[serde(rename = "Bearer Token")]
    BearerToken,
    #[serde(rename = "Basic Auth")]
    BasicAuth,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicAuth {
    #[serde(default, deserialize_with = "lossy_string")]
    pub username: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    #[serde(default, deserialize_with = "lossy_string")]
    pub auth_key: String,
    #[serde(default, deserialize_with = "lossy_string")]
    pub auth_value: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub add_to: AddTo,
}

/// Where an API key goes. A missing or unrecognized target adds the key nowhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddTo {
    Header,
    #[serde(rename = "Query Parameter", alias = "Query")]
    QueryParameter,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Input of one testflow run. `nodes` and `edges` are optional on the wire so
/// their absence can be reported as a rejected run rather than a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[serde(default)]
    pub nodes: Option<Vec<Node>>,
    #[serde(default)]
    pub edges: Option<Vec<Edge>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub variables: Vec<Variable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// Accepts any JSON scalar where the client is loose about types.
/// `null` becomes the empty string, numbers and booleans their JSON text.
fn lossy_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// `null` reads as the field's default, the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_node_deserializes_from_client_shape() {
        let node: Node = serde_json::from_value(json!({
            "id": "1",
            "type": "requestBlock",
            "position": {"x": 10, "y": 20},
            "data": {
                "blockName": "n1",
                "requestData": {
                    "method": "GET",
                    "url": "http://example.com",
                    "name": "Req1",
                    "headers": [{"key": "X-Num", "value": 5, "checked": true}],
                    "selectedRequestAuthType": "Bearer Token",
                    "auth": {"bearerToken": "abc"}
                }
            }
        }))
        .unwrap();

        assert_eq!(node.vertex(), Some(1));
        assert_eq!(node.block_name(), "n1");
        let request = node.request().unwrap();
        assert_eq!(request.name, "Req1");
        assert_eq!(request.headers[0].value, "5");
        assert!(request.headers[0].checked);
        assert_eq!(request.selected_request_auth_type, Some(AuthType::BearerToken));
    }

    #[test]
    fn test_non_request_block_has_no_request() {
        let node: Node = serde_json::from_value(json!({
            "id": "1",
            "type": "startBlock",
            "data": {"blockName": "start", "requestData": {"url": "x"}}
        }))
        .unwrap();
        assert!(node.request().is_none());
    }

    #[test]
    fn test_block_name_falls_back_to_id() {
        let node: Node = serde_json::from_value(json!({"id": "7", "type": "requestBlock"})).unwrap();
        assert_eq!(node.block_name(), "7");
        assert!(node.request().is_none());
    }

    #[test]
    fn test_unknown_auth_type_and_query_alias() {
        let data: RequestData = serde_json::from_value(json!({
            "selectedRequestAuthType": "OAuth 2.0",
            "auth": {"apiKey": {"authKey": "k", "authValue": "v", "addTo": "Query"}}
        }))
        .unwrap();
        assert_eq!(data.selected_request_auth_type, Some(AuthType::Unknown));
        assert_eq!(data.auth.unwrap().api_key.unwrap().add_to, AddTo::QueryParameter);
    }

    #[test]
    fn test_run_request_missing_fields_stay_none() {
        let req: RunRequest = serde_json::from_value(json!({"variables": []})).unwrap();
        assert!(req.nodes.is_none());
        assert!(req.edges.is_none());
    }

    #[test]
    fn test_variable_null_value_is_empty() {
        let var: Variable = serde_json::from_value(json!({"key": "a", "value": null, "checked": true})).unwrap();
        assert_eq!(var.value, "");
    }

    #[test]
    fn test_api_key_without_known_target_adds_nowhere() {
        let auth: Auth = serde_json::from_value(json!({"apiKey": {"authKey": "k", "authValue": "v"}})).unwrap();
        assert_eq!(auth.api_key.unwrap().add_to, AddTo::Unknown);

        let auth: Auth =
            serde_json::from_value(json!({"apiKey": {"authKey": "k", "authValue": "v", "addTo": "Cookie"}})).unwrap();
        assert_eq!(auth.api_key.unwrap().add_to, AddTo::Unknown);

        let auth: Auth =
            serde_json::from_value(json!({"apiKey": {"authKey": "k", "authValue": "v", "addTo": null}})).unwrap();
        assert_eq!(auth.api_key.unwrap().add_to, AddTo::Unknown);
    }

    #[test]
    fn test_null_collections_read_as_empty() {
        let data: RequestData = serde_json::from_value(json!({
            "name": null,
            "url": "http://h",
            "headers": null,
            "queryParams": null,
            "body": {"raw": "{}", "urlencoded": null, "formdata": {"text": null, "file": null}}
        }))
        .unwrap();
        assert!(data.headers.is_empty());
        assert!(data.query_params.is_empty());
        assert_eq!(data.name, "");
        let body = data.body.unwrap();
        assert!(body.urlencoded.is_empty());
        let form = body.formdata.unwrap();
        assert!(form.text.is_empty() && form.file.is_empty());

        let req: RunRequest =
            serde_json::from_value(json!({"nodes": [], "edges": [], "variables": null})).unwrap();
        assert!(req.variables.is_empty());
    }

    #[test]
    fn test_numeric_ids_and_keys_accepted() {
        let req: RunRequest = serde_json::from_value(json!({
            "nodes": [{"id": 1, "type": "requestBlock"}, {"id": 2, "type": "requestBlock"}],
            "edges": [{"id": "e1", "source": 1, "target": 2}],
            "variables": [{"key": 42, "value": 7, "checked": null}]
        }))
        .unwrap();
        let nodes = req.nodes.unwrap();
        assert_eq!(nodes[0].id, "1");
        assert_eq!(nodes[1].vertex(), Some(2));
        let edge = &req.edges.unwrap()[0];
        assert_eq!((edge.source.as_str(), edge.target.as_str()), ("1", "2"));
        assert_eq!(req.variables[0].key, "42");
        assert_eq!(req.variables[0].value, "7");
        assert!(!req.variables[0].checked);
    }
}
