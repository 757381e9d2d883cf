//! Integration tests for the HTTP control surface.

use gridgate_proxy::{api, AppState, LocalCluster};
use serde_json::{json, Value};

/// Serve one of the cluster's nodes on an ephemeral port.
async fn spawn_server(cluster: &LocalCluster, index: usize) -> String {
    let node = cluster.node(index).clone();
    let state = AppState::new(
        cluster.registry().clone(),
        node.clone(),
        node.logger().clone(),
        node.limiter().clone(),
        cluster.acl().clone(),
        cluster.config().clone(),
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_discovery_endpoint() {
    let cluster = LocalCluster::start(2).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    for (name, request, expected) in [
        ("defaults", json!({}), vec!["proxy-0:9013", "proxy-1:9013"]),
        (
            "explicit_address_type",
            json!({"address_type": "internal_rpc"}),
            vec!["proxy-0:9013", "proxy-1:9013"],
        ),
        (
            "explicit_params",
            json!({"address_type": "internal_rpc", "network_name": "default"}),
            vec!["proxy-0:9013", "proxy-1:9013"],
        ),
        (
            "monitoring_addresses",
            json!({"address_type": "monitoring_http", "network_name": "default"}),
            vec!["proxy-0:9014", "proxy-1:9014"],
        ),
    ] {
        let response = http
            .post(format!("{base}/v1/discovery"))
            .json(&request)
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success(), "{name}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["proxies"], json!(expected), "{name}");
    }
}

#[tokio::test]
async fn test_discovery_rejects_unknown_address_type() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/discovery"))
        .json(&json!({"address_type": "invalid"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "invalid_address_type");
}

#[tokio::test]
async fn test_discovery_unmatched_network_is_empty() {
    let cluster = LocalCluster::start(2).await;
    let base = spawn_server(&cluster, 0).await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/discovery"))
        .json(&json!({"network_name": "invalid"}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["proxies"], json!([]));
}

#[tokio::test]
async fn test_call_and_ban_round_trip() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    let call = json!({
        "method": "set",
        "user": "root",
        "params": {"path": "//tmp/x", "value": 42}
    });
    let response = http
        .post(format!("{base}/v1/call"))
        .json(&call)
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Ban the proxy through the admin surface; calls now fail 503 with
    // the taxonomy error in the body.
    let response = http
        .put(format!("{base}/v1/proxies/proxy-0:9013/banned"))
        .json(&json!({"banned": true, "message": "maintenance"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = http
        .post(format!("{base}/v1/call"))
        .json(&call)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "proxy_banned");

    // Banning an unknown proxy is a 404.
    let response = http
        .put(format!("{base}/v1/proxies/nowhere:1/banned"))
        .json(&json!({"banned": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_barrier_and_log_query_over_http() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    let barrier = |response: Value| response["barrier"].as_u64().unwrap();

    let b1: Value = http
        .post(format!("{base}/v1/log/barrier"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let b1 = barrier(b1);

    http.post(format!("{base}/v1/call"))
        .json(&json!({"method": "exists", "user": "root", "params": {"path": "//"}}))
        .send()
        .await
        .unwrap();

    let b2: Value = http
        .post(format!("{base}/v1/log/barrier"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let b2 = barrier(b2);

    let body: Value = http
        .get(format!("{base}/v1/log?from={b1}&to={b2}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["method"], "exists");

    // The interval after b2 is empty.
    let body: Value = http
        .get(format!("{base}/v1/log?from={b2}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["entries"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_config_round_trip() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    let body: Value = http
        .get(format!("{base}/v1/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["access_checker"]["enabled"], json!(true));

    let mut updated = body.clone();
    updated["access_checker"]["enabled"] = json!(false);
    let response = http
        .put(format!("{base}/v1/config"))
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    assert!(!cluster.config().load().access_checker.enabled);
}

#[tokio::test]
async fn test_queue_limit_and_role_admin_endpoints() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    let response = http
        .put(format!("{base}/v1/users/u/queue-limit"))
        .json(&json!({"limit": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = http
        .put(format!("{base}/v1/roles/r1/acl"))
        .json(&json!([{"action": "deny", "subjects": ["u"]}]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = http
        .put(format!("{base}/v1/proxies/proxy-0:9013/role"))
        .json(&json!({"role": "r1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    // The denied user bounces off the call path with 403.
    let response = http
        .post(format!("{base}/v1/call"))
        .json(&json!({"method": "exists", "user": "u", "params": {"path": "//"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);

    let body: Value = http
        .get(format!("{base}/v1/proxies"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body[0]["role"], "r1");
}

#[tokio::test]
async fn test_streams_over_http() {
    let cluster = LocalCluster::start(1).await;
    let base = spawn_server(&cluster, 0).await;
    let http = reqwest::Client::new();

    let envelope =
        json!({"method": "write_file", "user": "root", "params": {"path": "//tmp/f"}}).to_string();
    let payload = vec![9u8; 2048];
    let response = http
        .post(format!("{base}/v1/streams/write"))
        .header("x-gridgate-request", envelope)
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let response = http
        .post(format!("{base}/v1/streams/read"))
        .json(&json!({"method": "read_file", "user": "root", "params": {"path": "//tmp/f"}}))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(response.bytes().await.unwrap().to_vec(), payload);
}
