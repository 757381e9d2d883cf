//! End-to-end happy path over real HTTP.
//!
//! Spawns gateway proxies on ephemeral ports around a shared registry,
//! then drives a `GatewayClient` through the HTTP seams:
//!
//! 1. Discovery over HTTP
//! 2. Plain calls and a sticky session
//! 3. Streaming upload/download
//! 4. Barrier-scoped structured-log queries
//! 5. A ban/retry cycle across two proxies
//!
//! ## Running
//!
//! ```bash
//! cargo test -p gridgate-e2e --test happy_path
//! ```

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream;
use gridgate_client::http::{HttpChannel, HttpDiscoverySource};
use gridgate_client::{ByteStream, ClientConfig, GatewayClient};
use gridgate_proxy::{
    api, AccessChecker, AppState, ClusterBackend, MemoryBackend, ProxyAnnouncement, ProxyNode,
    ProxyRegistry, RequestQueueLimiter, RoleAclStore, StructuredLogger,
};
use gridgate_proxy::dynconfig::ConfigHandle;
use gridgate_types::{ApiRequest, GatewayError};
use serde_json::{json, Value};

struct SharedCluster {
    config: ConfigHandle,
    registry: Arc<ProxyRegistry>,
    acl: Arc<RoleAclStore>,
    backend: Arc<MemoryBackend>,
}

impl SharedCluster {
    fn new() -> Self {
        let config = ConfigHandle::default();
        Self {
            registry: Arc::new(ProxyRegistry::new(config.clone())),
            acl: Arc::new(RoleAclStore::new()),
            backend: Arc::new(MemoryBackend::new()),
            config,
        }
    }

    /// Bind a listener, register the proxy under its real address, and
    /// serve the API. Returns the announced address.
    async fn spawn_proxy(&self) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        self.registry
            .register(ProxyAnnouncement::standard(&address, Some(&address)))
            .await;

        let logger = Arc::new(StructuredLogger::new(self.config.clone()));
        let limiter = Arc::new(RequestQueueLimiter::new(self.config.clone()));
        let node = Arc::new(ProxyNode::new(
            &address,
            Arc::clone(&self.registry),
            Arc::new(AccessChecker::new(
                Arc::clone(&self.acl),
                self.config.clone(),
            )),
            Arc::clone(&limiter),
            Arc::clone(&logger),
            Arc::clone(&self.backend) as Arc<dyn ClusterBackend>,
        ));

        let state = AppState::new(
            Arc::clone(&self.registry),
            node,
            logger,
            limiter,
            Arc::clone(&self.acl),
            self.config.clone(),
        );
        let app = api::create_router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        address
    }
}

fn client_for(discovery_base: &str) -> GatewayClient {
    let config = ClientConfig {
        proxy_list_update_period_ms: 100,
        proxy_list_retry_period_ms: 50,
        ..ClientConfig::default()
    };
    GatewayClient::new(
        config,
        Arc::new(HttpDiscoverySource::new(discovery_base.to_string())),
        Arc::new(HttpChannel::new()),
    )
}

fn byte_stream(payload: &[u8]) -> ByteStream {
    let chunks: Vec<Result<Bytes, GatewayError>> = payload
        .chunks(512)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    Box::pin(stream::iter(chunks))
}

#[tokio::test]
async fn happy_path() {
    let cluster = SharedCluster::new();
    let first = cluster.spawn_proxy().await;
    let base = format!("http://{first}");
    let http = reqwest::Client::new();

    // 1. Discovery over HTTP sees the proxy under its real address.
    let client = client_for(&base);
    client.directory().refresh().await.unwrap();
    assert_eq!(client.directory().snapshot().addresses, vec![first.clone()]);

    // 2. Plain calls round-trip, and a sticky session pins to the proxy.
    client
        .execute(
            ApiRequest::new("set", "root").with_params(json!({"path": "//tmp/x", "value": 42})),
        )
        .await
        .unwrap();
    let response = client
        .execute(ApiRequest::new("get", "root").with_params(json!({"path": "//tmp/x"})))
        .await
        .unwrap();
    assert_eq!(response.value, json!(42));

    let session = client.start_session();
    client
        .execute(ApiRequest::new("ping_transaction", "root").with_session(session))
        .await
        .unwrap();
    assert_eq!(client.sessions().lookup(session).unwrap(), first);

    // 3. Streaming upload/download, byte-for-byte.
    let payload = vec![7u8; 4096];
    client
        .upload(
            ApiRequest::new("write_file", "root").with_params(json!({"path": "//tmp/file"})),
            byte_stream(&payload),
        )
        .await
        .unwrap();
    let downloaded = client
        .download(ApiRequest::new("read_file", "root").with_params(json!({"path": "//tmp/file"})))
        .await
        .unwrap();
    assert_eq!(downloaded, payload);

    // 4. Barrier-scoped log query over the admin surface.
    let b1: Value = http
        .post(format!("{base}/v1/log/barrier"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    client
        .execute(ApiRequest::new("exists", "root").with_params(json!({"path": "//tmp/x"})))
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

    let body: Value = http
        .get(format!(
            "{base}/v1/log?from={}&to={}",
            b1["barrier"], b2["barrier"]
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["method"], "exists");

    // 5. A second proxy joins; banning the first reroutes non-sticky
    // calls without surfacing an error.
    let second = cluster.spawn_proxy().await;
    client.directory().refresh().await.unwrap();
    assert_eq!(client.directory().snapshot().addresses.len(), 2);

    let response = http
        .put(format!("{base}/v1/proxies/{first}/banned"))
        .json(&json!({"banned": true, "message": "drained for the test"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    client.directory().refresh().await.unwrap();
    assert_eq!(
        client.directory().snapshot().addresses,
        vec![second.clone()]
    );

    for _ in 0..3 {
        client
            .execute(ApiRequest::new("exists", "root").with_params(json!({"path": "//tmp/x"})))
            .await
            .unwrap();
    }

    // The sticky session was pinned to the banned proxy: its next call
    // fails fast instead of migrating.
    let error = client
        .execute(ApiRequest::new("ping_transaction", "root").with_session(session))
        .await
        .unwrap_err();
    assert_eq!(
        error.as_gateway().map(|e| e.code),
        Some(gridgate_types::ErrorCode::ProxyBanned)
    );

    // Unbanning heals the session without re-binding.
    http.put(format!("{base}/v1/proxies/{first}/banned"))
        .json(&json!({"banned": false}))
        .send()
        .await
        .unwrap();
    client
        .execute(ApiRequest::new("ping_transaction", "root").with_session(session))
        .await
        .unwrap();
    assert_eq!(client.sessions().lookup(session).unwrap(), first);
    client.end_session(session);
}
