//! Integration tests for the deal relay
//!
//! These tests run the real HTTP server on an ephemeral port against a
//! mocked WPPConnect Server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::{json, Value};

use deal_relay::integrations::WppConnectClient;
use deal_relay::qr::FileQrSink;
use deal_relay::session::SessionProvider;
use deal_relay::{bootstrap, server, AppContext, Config, Readiness};

const DEAL: &str = r#"{
    "deal": {
        "title": "Lanterna Tática",
        "original_price": "89,90",
        "price": "49,90",
        "discount": 44,
        "rating": 4.6,
        "link": "https://example.com/lanterna"
    }
}"#;

fn wpp_client(server: &MockServer) -> WppConnectClient {
    WppConnectClient::new(&server.base_url(), "alfa-ofertas", Duration::from_secs(5))
        .unwrap()
        .with_token("tok")
        .with_polling(Duration::from_millis(10), Duration::from_millis(300))
}

async fn start_relay(ctx: Arc<AppContext>) -> SocketAddr {
    let (addr, _handle) = server::spawn_server("127.0.0.1:0".parse().unwrap(), ctx)
        .await
        .expect("bind relay");
    addr
}

async fn post_deal(addr: SocketAddr, body: &str) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{}/send-deal", addr))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .expect("relay reachable");
    let status = response.status().as_u16();
    (status, response.json().await.expect("json body"))
}

#[tokio::test]
async fn relay_answers_503_before_session() {
    let ctx = Arc::new(AppContext::from_config(&Config::defaults()));
    let addr = start_relay(ctx).await;

    let (status, body) = post_deal(addr, DEAL).await;

    assert_eq!(status, 503);
    assert_eq!(body, json!({ "error": "WhatsApp not ready" }));
}

#[tokio::test]
async fn bootstrap_join_then_relay_to_target_group() {
    let wpp = MockServer::start_async().await;
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/start-session");
        then.status(200).json_body(json!({ "status": "CONNECTED" }));
    });
    wpp.mock(|when, then| {
        when.method(GET).path("/api/alfa-ofertas/status-session");
        then.status(200).json_body(json!({ "status": "CONNECTED" }));
    });
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/join-code");
        then.status(201).json_body(json!({
            "status": "success",
            "response": { "id": { "_serialized": "120363111@g.us" } }
        }));
    });
    let send_mock = wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/send-message");
        then.status(201).json_body(json!({ "status": "success" }));
    });
    let chats_mock = wpp.mock(|when, then| {
        when.method(GET).path("/api/alfa-ofertas/all-chats");
        then.status(200).json_body(json!({ "status": "success", "response": [] }));
    });

    let ctx = Arc::new(AppContext::from_config(&Config::defaults()));
    let temp = tempfile::tempdir().unwrap();
    let sink = FileQrSink::new(temp.path().join("qr.png"));
    let provider = wpp_client(&wpp);

    bootstrap::run(&ctx, &provider, &sink, "EOwarEsjc6bIWnIQptnglz")
        .await
        .unwrap();
    assert_eq!(ctx.readiness(), Readiness::Ready);
    assert_eq!(ctx.target_group().await.as_deref(), Some("120363111@g.us"));

    let addr = start_relay(ctx).await;
    let (status, body) = post_deal(addr, DEAL).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "sent_to": ["Target Group"] }));
    send_mock.assert_calls(1);
    chats_mock.assert_calls(0);
}

#[tokio::test]
async fn join_failure_falls_back_to_group_discovery() {
    let wpp = MockServer::start_async().await;
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/start-session");
        then.status(200).json_body(json!({ "status": "CONNECTED" }));
    });
    wpp.mock(|when, then| {
        when.method(GET).path("/api/alfa-ofertas/status-session");
        then.status(200).json_body(json!({ "status": "CONNECTED" }));
    });
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/join-code");
        then.status(500).json_body(json!({ "status": "error", "message": "already joined" }));
    });
    wpp.mock(|when, then| {
        when.method(GET).path("/api/alfa-ofertas/all-chats");
        then.status(200).json_body(json!({
            "status": "success",
            "response": [
                { "id": { "_serialized": "1@g.us" }, "name": "Random Group", "isGroup": true },
                { "id": { "_serialized": "2@g.us" }, "name": "Alfa Ofertas Diárias", "isGroup": true }
            ]
        }));
    });
    let image_mock = wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/send-image");
        then.status(201).json_body(json!({ "status": "success" }));
    });

    let ctx = Arc::new(AppContext::from_config(&Config::defaults()));
    let temp = tempfile::tempdir().unwrap();
    let provider = wpp_client(&wpp);
    bootstrap::run(&ctx, &provider, &FileQrSink::new(temp.path().join("qr.png")), "X")
        .await
        .unwrap();
    assert!(ctx.target_group().await.is_none());

    let addr = start_relay(ctx).await;
    let body = r#"{"deal":{"title":"Drone","price":"999","image":"https://cdn.example.com/d.jpg"}}"#;
    let (status, body) = post_deal(addr, body).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({ "success": true, "sent_to": ["Alfa Ofertas Diárias"] }));
    image_mock.assert_calls(1);
}

#[tokio::test]
async fn provider_send_error_surfaces_as_500() {
    let wpp = MockServer::start_async().await;
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/send-message");
        then.status(500).body("browser closed");
    });

    let provider = wpp_client(&wpp);
    let ctx = Arc::new(AppContext::from_config(&Config::defaults()).with_session(Arc::new(provider)));
    ctx.set_target_group("1@g.us").await;

    let addr = start_relay(ctx).await;
    let (status, body) = post_deal(addr, DEAL).await;

    assert_eq!(status, 500);
    assert!(body["error"].as_str().unwrap().contains("browser closed"));
}

#[tokio::test]
async fn qr_code_is_written_while_waiting_for_scan() {
    let wpp = MockServer::start_async().await;
    wpp.mock(|when, then| {
        when.method(POST).path("/api/alfa-ofertas/start-session");
        then.status(200).json_body(json!({ "status": "QRCODE" }));
    });
    wpp.mock(|when, then| {
        when.method(GET).path("/api/alfa-ofertas/status-session");
        then.status(200).json_body(json!({
            "status": "QRCODE",
            "qrcode": "data:image/png;base64,cXItaW1hZ2U=",
            "urlcode": "2@pairing,ref"
        }));
    });

    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("static").join("whatsapp_qr.png");
    let ctx = Arc::new(AppContext::from_config(&Config::defaults()));
    let provider = wpp_client(&wpp);

    let result = bootstrap::run(&ctx, &provider, &FileQrSink::new(&path), "X").await;

    assert!(result.is_err());
    assert_eq!(std::fs::read(&path).unwrap(), b"qr-image");
    assert_eq!(ctx.readiness().as_str(), "failed");

    // The relay keeps serving and reports the failure.
    let addr = start_relay(ctx).await;
    let health: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "failed");
}

#[tokio::test]
async fn provider_trait_object_is_usable() {
    let wpp = MockServer::start_async().await;
    let provider: Arc<dyn SessionProvider> = Arc::new(wpp_client(&wpp));
    let ctx = Arc::new(AppContext::from_config(&Config::defaults()));
    let sink: Arc<dyn deal_relay::qr::QrSink> = Arc::new(deal_relay::qr::LogQrSink);

    // No mocks: start-session answers 404, so the bootstrapper records a failure.
    bootstrap::spawn(ctx.clone(), provider, sink, "X".into())
        .await
        .unwrap();

    assert!(ctx.session().await.is_none());
    assert!(ctx.readiness().error().unwrap().contains("start-session failed (404)"));
}
