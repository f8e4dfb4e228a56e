//! End-to-end sessions over an in-memory stream.
//!
//! Each test plays the extension: it writes raw `dds` frames into one end of
//! a duplex pipe while a [`Client`] serves the other end.

use std::io::Write;
use std::time::Duration;

use appsec_engine::metrics;
use appsec_helper::{Broker, Client, ServiceCache, StreamTransport};
use appsec_proto::{
    value, ClientInit, Codec, EngineSettings, Header, InitStatus, RemoteConfigSettings, Request,
    RequestInit, RequestShutdown, Response, ServiceIdentity, Value, Verdict, HEADER_SIZE,
};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const FIVE_RULES: &str = r#"{
    "version": "2.1",
    "metadata": {"rules_version": "1.2.0"},
    "rules": [
        {
            "id": "blk-001-001",
            "name": "Block IP addresses",
            "tags": {"type": "block_ip", "category": "security_response"},
            "conditions": [{"operator": "ip_match", "parameters": {
                "inputs": [{"address": "http.client_ip"}],
                "list": ["192.168.1.1"]
            }}],
            "on_match": ["block"]
        },
        {
            "id": "ua0-600-55x",
            "name": "Nikto",
            "tags": {"type": "security_scanner", "category": "attack_attempt"},
            "conditions": [{"operator": "match_regex", "parameters": {
                "inputs": [{"address": "server.request.headers.no_cookies", "key_path": ["user-agent"]}],
                "regex": "nikto"
            }}]
        },
        {
            "id": "crs-930-100",
            "name": "Path traversal",
            "tags": {"type": "lfi", "category": "attack_attempt"},
            "conditions": [{"operator": "phrase_match", "parameters": {
                "inputs": [{"address": "server.request.uri.raw"}],
                "list": ["../"]
            }}]
        },
        {
            "id": "crs-942-100",
            "name": "SQL injection",
            "tags": {"type": "sql_injection", "category": "attack_attempt"},
            "conditions": [{"operator": "match_regex", "parameters": {
                "inputs": [{"address": "server.request.query"}],
                "regex": "union\\s+select"
            }}]
        },
        {
            "id": "crs-941-100",
            "name": "XSS",
            "tags": {"type": "xss", "category": "attack_attempt"},
            "conditions": [{"operator": "match_regex", "parameters": {
                "inputs": [{"address": "server.request.body"}],
                "regex": "<script"
            }}]
        }
    ]
}"#;

struct Peer {
    stream: DuplexStream,
    codec: Codec,
}

impl Peer {
    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    async fn call(&mut self, request: &Request) -> Response {
        let frame = self.codec.encode_request(request).unwrap().to_vec();
        self.send_raw(&frame).await;
        self.response().await
    }

    async fn response(&mut self) -> Response {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await.unwrap();
        let header = Header::decode(&header).unwrap();
        let mut body = vec![0u8; header.body_size as usize];
        self.stream.read_exact(&mut body).await.unwrap();
        let mut responses = self.codec.decode_responses(&body).unwrap();
        assert_eq!(responses.len(), 1);
        responses.remove(0)
    }

    /// True once the helper has closed its end.
    async fn closed(&mut self) -> bool {
        let mut buf = [0u8; 1];
        matches!(self.stream.read(&mut buf).await, Ok(0))
    }
}

fn start(cache: ServiceCache) -> (Peer, JoinHandle<()>, CancellationToken) {
    let (ours, theirs) = tokio::io::duplex(128 * 1024);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move {
        let mut broker = Broker::new(StreamTransport::new(theirs));
        let mut client = Client::new(cache, Duration::from_millis(500));
        client.run(&mut broker, token).await;
    });
    let peer = Peer {
        stream: ours,
        codec: Codec::new(),
    };
    (peer, handle, cancel)
}

fn rules_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn client_init(rules: Option<&NamedTempFile>) -> Request {
    Request::ClientInit(Box::new(ClientInit {
        pid: 1234,
        client_version: "1.2.3".to_owned(),
        runtime_version: "8.3.4".to_owned(),
        enabled_configuration: Some(true),
        engine_settings: EngineSettings {
            rules_file: rules.map(|f| f.path().to_string_lossy().into_owned()),
            ..EngineSettings::default()
        },
        rc_settings: RemoteConfigSettings::default(),
        service_identity: ServiceIdentity::new("shop", "prod", Vec::new()),
    }))
}

fn request_init(entries: &[(&str, &str)]) -> Request {
    Request::RequestInit(RequestInit {
        data: entries.iter().map(|(k, v)| (*k, Value::from(*v))).collect(),
    })
}

#[tokio::test]
async fn blocking_scenario() {
    let rules = rules_file(FIVE_RULES);
    let (mut peer, handle, _cancel) = start(ServiceCache::default());

    let Response::ClientInit(init) = peer.call(&client_init(Some(&rules))).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Ok);
    assert_eq!(init.version, appsec_helper::VERSION);
    assert_eq!(init.metrics[metrics::EVENT_RULES_LOADED], 5.0);
    assert_eq!(init.metrics[metrics::EVENT_RULES_FAILED], 0.0);

    assert_eq!(peer.call(&client_init(Some(&rules))).await, Response::Error);

    let Response::RequestInit(response) =
        peer.call(&request_init(&[("http.client_ip", "192.168.1.1")])).await
    else {
        panic!("expected request_init response");
    };
    assert_eq!(response.triggers.len(), 1);
    assert_eq!(response.actions.len(), 1);
    assert_eq!(response.actions[0].verdict, Verdict::Block);
    assert_eq!(response.actions[0].parameters["type"], "auto");
    assert_eq!(response.actions[0].parameters["status_code"], "403");
    assert!(response.force_keep);

    let shutdown = Request::RequestShutdown(RequestShutdown {
        data: [("server.response.status", Value::from("403"))]
            .into_iter()
            .collect(),
        api_sec_samp_key: None,
    });
    let Response::RequestShutdown(response) = peer.call(&shutdown).await else {
        panic!("expected request_shutdown response");
    };
    assert_eq!(response.response.actions[0].verdict, Verdict::Ok);
    assert_eq!(response.meta[metrics::EVENT_RULES_VERSION], "1.2.0");
    assert!(response.metrics.contains_key(metrics::WAF_DURATION));

    drop(peer);
    handle.await.unwrap();
}

#[tokio::test]
async fn missing_rules_file_fails_init_then_retry_succeeds() {
    let (mut peer, _handle, _cancel) = start(ServiceCache::default());

    let missing = Request::ClientInit(Box::new(ClientInit {
        engine_settings: EngineSettings {
            rules_file: Some("/nonexistent/appsec/rules.json".to_owned()),
            ..EngineSettings::default()
        },
        ..match client_init(None) {
            Request::ClientInit(init) => *init,
            _ => unreachable!(),
        }
    }));
    let Response::ClientInit(init) = peer.call(&missing).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Fail);
    assert!(!init.errors.is_empty());

    assert_eq!(peer.call(&request_init(&[])).await, Response::Error);

    let Response::ClientInit(init) = peer.call(&client_init(None)).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Ok);
}

#[tokio::test]
async fn malformed_body_is_answered_and_session_continues() {
    let (mut peer, _handle, _cancel) = start(ServiceCache::default());

    let body = value::to_vec(&Value::Array(vec![
        Value::from("no_such_method"),
        Value::Array(vec![]),
    ]))
    .unwrap();
    let mut frame = Header::new(body.len() as u32).encode().to_vec();
    frame.extend_from_slice(&body);
    peer.send_raw(&frame).await;
    assert_eq!(peer.response().await, Response::Error);

    let Response::ClientInit(init) = peer.call(&client_init(None)).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Ok);
}

#[tokio::test]
async fn oversized_body_is_discarded() {
    let (mut peer, _handle, _cancel) = start(ServiceCache::default());

    let size = 70_000usize;
    let mut frame = Header::new(size as u32).encode().to_vec();
    frame.resize(HEADER_SIZE + size, 0xc0);
    peer.send_raw(&frame).await;
    assert_eq!(peer.response().await, Response::Error);

    // Still framed.
    let Response::ClientInit(init) = peer.call(&client_init(None)).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Ok);
}

#[tokio::test]
async fn bad_magic_closes_the_session() {
    let (mut peer, handle, _cancel) = start(ServiceCache::default());

    peer.send_raw(b"xyz\0\0\0\0\0").await;
    assert!(peer.closed().await);
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn silent_peer_times_out_before_init() {
    let (mut peer, handle, _cancel) = start(ServiceCache::default());

    handle.await.unwrap();
    assert!(peer.closed().await);
}

#[tokio::test]
async fn cancellation_ends_the_session() {
    let (mut peer, handle, cancel) = start(ServiceCache::default());

    let Response::ClientInit(_) = peer.call(&client_init(None)).await else {
        panic!("expected client_init response");
    };
    cancel.cancel();
    handle.await.unwrap();
    assert!(peer.closed().await);
}

#[tokio::test]
async fn sessions_share_a_service() {
    let cache = ServiceCache::default();
    let (mut first, _h1, _c1) = start(cache.clone());
    let (mut second, _h2, _c2) = start(cache.clone());

    assert!(matches!(first.call(&client_init(None)).await, Response::ClientInit(_)));
    assert!(matches!(second.call(&client_init(None)).await, Response::ClientInit(_)));
    assert_eq!(cache.len(), 1);
}
