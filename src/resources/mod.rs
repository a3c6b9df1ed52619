//! Client for the platform's resource endpoints
//!
//! Every request is authenticated with the bearer token obtained from a
//! [`TokenAccessor`]; without a signed-in user nothing is sent.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::adapters::http_client::HttpClient;
use crate::auth::service::TokenAccessor;
use crate::error::{Result, SessionError};

/// Kind of a stored resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    SceneAsset,
    MeshAsset,
    Assembly,
    Data,
    /// A kind this client does not know about
    #[serde(other)]
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::SceneAsset => "SceneAsset",
            ResourceType::MeshAsset => "MeshAsset",
            ResourceType::Assembly => "Assembly",
            ResourceType::Data => "Data",
            ResourceType::Other => "Other",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceType {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SceneAsset" => Ok(ResourceType::SceneAsset),
            "MeshAsset" => Ok(ResourceType::MeshAsset),
            "Assembly" => Ok(ResourceType::Assembly),
            "Data" => Ok(ResourceType::Data),
            other => Err(SessionError::Configuration(format!(
                "Unknown resource type: {}",
                other
            ))),
        }
    }
}

/// Resource metadata as returned by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub resource_keys: Vec<String>,
    #[serde(default, rename = "resourceMD5Hashes")]
    pub resource_md5_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_parent: Option<String>,
    #[serde(default)]
    pub published_resources: Vec<String>,
}

#[derive(Debug, Serialize)]
struct CreateResource<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: ResourceType,
}

/// A fetched thumbnail image
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub content_type: String,
    pub data: Bytes,
}

impl Thumbnail {
    /// `data:` URI suitable for an image source
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.data))
    }
}

/// Authenticated client for `/core/resource`
pub struct ResourceClient {
    http: Arc<dyn HttpClient>,
    base_url: Url,
    tokens: Arc<dyn TokenAccessor>,
}

impl ResourceClient {
    pub fn new(http: Arc<dyn HttpClient>, mut base_url: Url, tokens: Arc<dyn TokenAccessor>) -> Self {
        // Relative joins replace the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            http,
            base_url,
            tokens,
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn auth_headers(&self) -> Result<HashMap<String, String>> {
        let token = self
            .tokens
            .bearer_token()
            .await
            .ok_or(SessionError::MissingBearerToken)?;

        let mut headers = HashMap::new();
        headers.insert("authorization".to_string(), format!("Bearer {}", token));
        Ok(headers)
    }

    /// List resources, optionally filtered by kind
    pub async fn list_resources(&self, kind: Option<ResourceType>) -> Result<Vec<Resource>> {
        let mut url = self.endpoint("core/resource")?;
        if let Some(kind) = kind {
            url.query_pairs_mut().append_pair("type", kind.as_str());
        }

        let headers = self.auth_headers().await?;
        debug!(url = %url, "Listing resources");

        let response = self
            .http
            .get(url.as_str(), headers)
            .await?
            .ensure_success("list resources")?;
        response.json()
    }

    pub async fn create_resource(&self, name: &str, kind: ResourceType) -> Result<Resource> {
        let url = self.endpoint("core/resource")?;
        let mut headers = self.auth_headers().await?;
        headers.insert("content-type".to_string(), "application/json".to_string());

        let body = serde_json::to_string(&CreateResource { name, kind })?;
        debug!(name, kind = %kind, "Creating resource");

        let response = self
            .http
            .post(url.as_str(), headers, body)
            .await?
            .ensure_success("create resource")?;
        response.json()
    }

    /// Fetch a resource thumbnail. A non-success response yields `None`.
    pub async fn thumbnail(&self, id: &str) -> Result<Option<Thumbnail>> {
        let url = self.endpoint(&format!("core/resource/{}/thumb.png", id))?;
        let headers = self.auth_headers().await?;

        let response = self.http.get(url.as_str(), headers).await?;
        if !response.is_success() {
            warn!(id, status = response.status(), "Thumbnail not available");
            return Ok(None);
        }

        let content_type = response
            .header("content-type")
            .unwrap_or("image/png")
            .to_string();
        Ok(Some(Thumbnail {
            content_type,
            data: response.bytes(),
        }))
    }

    pub async fn thumbnail_data_uri(&self, id: &str) -> Result<Option<String>> {
        Ok(self.thumbnail(id).await?.map(|thumb| thumb.to_data_uri()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::http_client::{MockHttpClient, SimpleHttpResponse};
    use async_trait::async_trait;
    use serde_json::json;

    struct FixedToken(Option<&'static str>);

    #[async_trait]
    impl TokenAccessor for FixedToken {
        async fn bearer_token(&self) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    fn client(http: &MockHttpClient, token: Option<&'static str>) -> ResourceClient {
        ResourceClient::new(
            Arc::new(http.clone()),
            Url::parse("https://api.vertx.test").unwrap(),
            Arc::new(FixedToken(token)),
        )
    }

    fn scene_json(id: &str, name: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "type": "SceneAsset",
            "created": "2024-05-01T10:00:00Z",
            "modified": "2024-05-02T10:00:00Z",
            "tags": ["demo"],
            "resourceKeys": [],
            "resourceMD5Hashes": [],
            "publishedResources": []
        })
    }

    #[tokio::test]
    async fn test_list_resources_sends_bearer_and_type() {
        let http = MockHttpClient::new();
        http.mock_json(
            "https://api.vertx.test/core/resource?type=SceneAsset",
            200,
            &json!([scene_json("a1", "Lobby"), scene_json("b2", "Gallery")]),
        )
        .unwrap();

        let resources = client(&http, Some("tok-123"))
            .list_resources(Some(ResourceType::SceneAsset))
            .await
            .unwrap();

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "Lobby");
        assert_eq!(resources[0].kind, ResourceType::SceneAsset);
        assert_eq!(resources[0].tags, vec!["demo".to_string()]);

        let requests = http.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer tok-123")
        );
    }

    #[tokio::test]
    async fn test_missing_token_sends_nothing() {
        let http = MockHttpClient::new();
        let result = client(&http, None).list_resources(None).await;

        assert!(matches!(result, Err(SessionError::MissingBearerToken)));
        assert!(http.requests().is_empty());
    }

    #[tokio::test]
    async fn test_create_resource_posts_name_and_type() {
        let http = MockHttpClient::new();
        http.mock_json(
            "https://api.vertx.test/core/resource",
            200,
            &scene_json("c3", "New space"),
        )
        .unwrap();

        let created = client(&http, Some("tok"))
            .create_resource("New space", ResourceType::SceneAsset)
            .await
            .unwrap();
        assert_eq!(created.id, "c3");

        let requests = http.requests();
        let body: serde_json::Value =
            serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"name": "New space", "type": "SceneAsset"}));
    }

    #[tokio::test]
    async fn test_create_resource_failure_is_http_error() {
        let http = MockHttpClient::new();
        http.mock_response("https://api.vertx.test/core/resource", 403, "forbidden");

        let err = client(&http, Some("tok"))
            .create_resource("x", ResourceType::Data)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Http { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_thumbnail_data_uri() {
        let http = MockHttpClient::new();
        http.mock_raw(
            "https://api.vertx.test/core/resource/a1/thumb.png",
            SimpleHttpResponse::new(200, vec![0x89u8, b'P', b'N', b'G'])
                .with_header("Content-Type", "image/png"),
        );
        http.mock_response("https://api.vertx.test/core/resource/zz/thumb.png", 404, "");

        let client = client(&http, Some("tok"));
        let uri = client.thumbnail_data_uri("a1").await.unwrap().unwrap();
        assert_eq!(uri, "data:image/png;base64,iVBORw==");

        assert!(client.thumbnail_data_uri("zz").await.unwrap().is_none());
    }

    #[test]
    fn test_base_url_with_path_keeps_prefix() {
        let client = ResourceClient::new(
            Arc::new(MockHttpClient::new()),
            Url::parse("https://host.test/vertex").unwrap(),
            Arc::new(FixedToken(None)),
        );
        assert_eq!(client.base_url().as_str(), "https://host.test/vertex/");
        assert_eq!(
            client.endpoint("core/resource").unwrap().as_str(),
            "https://host.test/vertex/core/resource"
        );
    }

    #[test]
    fn test_unknown_resource_type_deserializes() {
        let resource: Resource = serde_json::from_value(json!({
            "id": "x", "name": "n", "type": "Hologram"
        }))
        .unwrap();
        assert_eq!(resource.kind, ResourceType::Other);
    }
}
