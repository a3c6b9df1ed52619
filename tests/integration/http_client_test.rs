//! The reqwest-backed client against a local mock server
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use mockito::Matcher;
use url::Url;

use vertex_session::{HttpClient, ReqwestHttpClient, ResourceClient, ResourceType, TokenAccessor};

struct StaticToken(&'static str);

#[async_trait]
impl TokenAccessor for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[tokio::test]
async fn test_get_forwards_headers_and_status() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/ping")
        .match_header("x-request-source", "1")
        .with_status(418)
        .with_header("content-type", "text/plain")
        .with_body("teapot")
        .create_async()
        .await;

    let client = ReqwestHttpClient::new();
    let mut headers = HashMap::new();
    headers.insert("x-request-source".to_string(), "1".to_string());

    let response = client.get(&format!("{}/ping", server.url()), headers).await?;
    assert_eq!(response.status(), 418);
    assert!(!response.is_success());
    assert_eq!(response.header("Content-Type"), Some("text/plain"));
    assert_eq!(response.text(), "teapot");

    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_post_sends_body() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/connect/token")
        .match_body(Matcher::Regex("code=abc".into()))
        .with_status(200)
        .with_body(r#"{"access_token":"t"}"#)
        .create_async()
        .await;

    let client = ReqwestHttpClient::new();
    let response = client
        .post(
            &format!("{}/connect/token", server.url()),
            HashMap::new(),
            "grant_type=authorization_code&code=abc".to_string(),
        )
        .await?
        .ensure_success("token")?;
    let body: serde_json::Value = response.json()?;
    assert_eq!(body["access_token"], "t");

    mock.assert_async().await;
    Ok(())
}

#[tokio::test]
async fn test_resource_client_over_http() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let list = server
        .mock("GET", "/core/resource")
        .match_query(Matcher::UrlEncoded("type".into(), "SceneAsset".into()))
        .match_header("authorization", "Bearer live-token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"id":"r1","name":"Atrium","type":"SceneAsset","tags":[]}]"#)
        .create_async()
        .await;
    let thumb = server
        .mock("GET", "/core/resource/r1/thumb.png")
        .match_header("authorization", "Bearer live-token")
        .with_status(200)
        .with_header("content-type", "image/png")
        .with_body([1u8, 2, 3])
        .create_async()
        .await;

    let client = ResourceClient::new(
        Arc::new(ReqwestHttpClient::new()),
        Url::parse(&server.url())?,
        Arc::new(StaticToken("live-token")),
    );

    let resources = client.list_resources(Some(ResourceType::SceneAsset)).await?;
    assert_eq!(resources.len(), 1);
    assert_eq!(resources[0].name, "Atrium");

    let uri = client.thumbnail_data_uri("r1").await?;
    assert_eq!(uri.as_deref(), Some("data:image/png;base64,AQID"));

    // No mock for this id: mockito answers 501, rendered as "no thumbnail"
    assert!(client.thumbnail("missing").await?.is_none());

    list.assert_async().await;
    thumb.assert_async().await;
    Ok(())
}
