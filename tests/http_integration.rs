//! Guard behavior over real HTTP.

mod common;

use serde_json::{json, Value};

use common::{spawn_server, test_config, ADMIN_KEY};

#[tokio::test]
async fn login_limit_returns_429_details() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    for _ in 0..5 {
        let res = client
            .post(server.url("/api/user/login"))
            .json(&json!({ "email": "a@example.com", "password": "pw" }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert!(res.headers().contains_key("ratelimit-remaining"));
    }

    let res = client
        .post(server.url("/api/user/login"))
        .json(&json!({ "email": "a@example.com", "password": "pw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 429);
    assert!(res.headers().contains_key("retry-after"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["details"]["limit"], 5);
    assert_eq!(body["details"]["window"], "15 minutes");
    assert!(body["details"]["retryAfterHuman"].is_string());
    assert!(body["details"]["suggestion"].is_string());
}

#[tokio::test]
async fn handler_receives_sanitized_body() {
    let server = spawn_server(test_config()).await;

    let res = reqwest::Client::new()
        .post(server.url("/api/cart/update"))
        .json(&json!({ "cartItems": { "sku-1": 2, "$where": "sleep(100)" }, "note": "<img src=x>ok" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-frame-options"], "DENY");
    assert!(res.headers().contains_key("x-request-id"));

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["data"]["body"]["cartItems"], json!({ "sku-1": 2 }));
    assert_eq!(body["data"]["body"]["note"], "ok");
}

#[tokio::test]
async fn injection_in_url_rejected() {
    let server = spawn_server(test_config()).await;

    let res = reqwest::get(server.url("/api/product/search?q=1%20union%20select%20password"))
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid request detected");
}

#[tokio::test]
async fn outbound_url_parameter_rejected() {
    let server = spawn_server(test_config()).await;

    let res = reqwest::Client::new()
        .post(server.url("/api/order/stripe"))
        .json(&json!({ "success_url": "file:///etc/passwd" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["parameter"], "success_url");
}

#[tokio::test]
async fn suspicious_client_blocked_then_cleared() {
    let mut config = test_config();
    config.monitoring.block_suspicious = Some(true);
    let server = spawn_server(config).await;
    let client = reqwest::Client::new();

    for i in 0..10 {
        let res = client
            .get(server.url(&format!("/api/product/list?file=../../etc/passwd{i}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 400);
    }

    let res = client.get(server.url("/api/product/list")).send().await.unwrap();
    assert_eq!(res.status(), 403);

    let stats = server.pipeline.events().stats();
    assert_eq!(stats.total_suspicious_clients, 1);
    assert_eq!(stats.suspicious_clients, vec!["127.0.0.1".to_string()]);

    // Admin routes sit behind the same guard.
    let res = client
        .get(server.url("/admin/security/stats"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);

    assert!(server.pipeline.events().clear() > 0);
    let res = client.get(server.url("/api/product/list")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn admin_stats_and_clear() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(server.url("/api/product/list?file=../../etc/passwd"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let stats: Value = client
        .get(server.url("/admin/security/stats"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["success"], true);
    assert_eq!(stats["stats"]["eventsByType"]["injection_attempt"], 1);
    assert_eq!(stats["stats"]["totalSuspiciousClients"], 0);

    let cleared: Value = client
        .post(server.url("/admin/security/clear"))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(cleared["clearedEvents"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn admin_requires_key() {
    let server = spawn_server(test_config()).await;

    let res = reqwest::get(server.url("/admin/security/stats")).await.unwrap();
    assert_eq!(res.status(), 401);

    let res = reqwest::Client::new()
        .get(server.url("/admin/security/stats"))
        .bearer_auth("wrong-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);
}

#[tokio::test]
async fn admin_key_guessing_is_rate_limited() {
    let server = spawn_server(test_config()).await;
    let client = reqwest::Client::new();

    let mut statuses = Vec::new();
    for i in 0..6 {
        let res = client
            .get(server.url("/admin/security/stats"))
            .bearer_auth(format!("guess-{i}"))
            .send()
            .await
            .unwrap();
        statuses.push(res.status().as_u16());
    }
    assert_eq!(statuses, vec![401, 401, 401, 401, 401, 429]);
}
