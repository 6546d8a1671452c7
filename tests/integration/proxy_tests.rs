//! Proxy provider sync and the HTTP renderer against mock servers

use crate::support::test_store;
use std::time::Duration;
use sumi_relay::config::ProxyProviderConfig;
use sumi_relay::crawler::{HttpRenderer, PageRenderer, ProxyConfig, RenderError};
use sumi_relay::proxy::{sync_proxies, WebshareProvider};
use sumi_relay::storage::{lock_store, JobStore};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_config(server: &MockServer) -> ProxyProviderConfig {
    ProxyProviderConfig {
        api_url: format!("{}/api/v2/proxy/list/", server.uri()),
        api_key: "secret".to_string(),
        page_size: 2,
        countries: vec![],
    }
}

#[tokio::test]
async fn test_sync_follows_pages_and_upserts() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/v2/proxy/list/"))
        .and(query_param("page", "1"))
        .and(header("Authorization", "Token secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next": "page-2",
            "results": [
                {"proxy_address": "1.1.1.1", "port": 8000, "username": "u", "password": "p", "country_code": "us"},
                {"proxy_address": "2.2.2.2", "port": 8000, "username": "u", "password": "p", "country_code": "DE"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/v2/proxy/list/"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "next": null,
            "results": [
                {"proxy_address": "3.3.3.3", "port": 9000, "username": "u", "password": "p", "country_code": "FR"},
                {"port": 9000}
            ]
        })))
        .mount(&server)
        .await;

    let store = test_store();
    let provider = WebshareProvider::new(provider_config(&server)).unwrap();

    assert_eq!(sync_proxies(&provider, &store).await.unwrap(), 3);
    // Re-syncing updates in place
    assert_eq!(sync_proxies(&provider, &store).await.unwrap(), 3);

    let guard = lock_store(&store).unwrap();
    assert_eq!(guard.list_proxies().unwrap().len(), 3);
    assert_eq!(
        guard.list_proxy_countries().unwrap(),
        vec!["DE", "FR", "US"]
    );
}

#[tokio::test]
async fn test_failed_sync_yields_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store = test_store();
    let provider = WebshareProvider::new(provider_config(&server)).unwrap();

    assert_eq!(sync_proxies(&provider, &store).await.unwrap(), 0);
    assert!(lock_store(&store).unwrap().list_proxies().unwrap().is_empty());
}

fn proxy_for(server: &MockServer) -> ProxyConfig {
    ProxyConfig {
        server: server.uri(),
        username: "user".to_string(),
        password: "pass".to_string(),
    }
}

#[tokio::test]
async fn test_http_renderer_goes_through_proxy() {
    // The mock server is both the proxy and the origin
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>Proxied</title></head><body>ok</body></html>"),
        )
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new("test-agent");
    let url = format!("{}/page", server.uri());
    let page = renderer
        .render(&url, Duration::from_secs(5), &proxy_for(&server))
        .await
        .unwrap();

    assert_eq!(page.status_code, 200);
    assert!(page.body.contains("Proxied"));
    assert_eq!(renderer.extract_structured(&page).title, "Proxied");
    assert!(renderer.screenshot(&page).await.unwrap().is_none());
}

#[tokio::test]
async fn test_http_renderer_reports_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let renderer = HttpRenderer::new("test-agent");
    let url = format!("{}/slow", server.uri());
    let err = renderer
        .render(&url, Duration::from_millis(200), &proxy_for(&server))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::Timeout(_)));
    assert!(err.is_timeout());
}
