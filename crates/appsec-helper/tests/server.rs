//! The socket server over a real Unix socket.

use std::path::Path;

use appsec_helper::{HelperConfig, Server, ServerError};
use appsec_proto::{
    ClientInit, Codec, EngineSettings, Header, InitStatus, RemoteConfigSettings, Request, Response,
    ServiceIdentity, HEADER_SIZE,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

fn config(dir: &Path) -> HelperConfig {
    HelperConfig {
        socket_path: dir.join("sock/helper.sock"),
        lock_path: dir.join("helper.lock"),
        ..HelperConfig::default()
    }
}

async fn call(stream: &mut UnixStream, request: &Request) -> Response {
    let mut codec = Codec::new();
    let frame = codec.encode_request(request).unwrap().to_vec();
    stream.write_all(&frame).await.unwrap();

    let mut header = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header).await.unwrap();
    let header = Header::decode(&header).unwrap();
    let mut body = vec![0u8; header.body_size as usize];
    stream.read_exact(&mut body).await.unwrap();
    codec.decode_responses(&body).unwrap().remove(0)
}

fn client_init() -> Request {
    Request::ClientInit(Box::new(ClientInit {
        pid: 99,
        client_version: "1.0.0".to_owned(),
        runtime_version: "8.2.0".to_owned(),
        enabled_configuration: None,
        engine_settings: EngineSettings::default(),
        rc_settings: RemoteConfigSettings::default(),
        service_identity: ServiceIdentity::new("api", "staging", Vec::new()),
    }))
}

#[tokio::test]
async fn serves_sessions_until_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let server = Server::bind(&config).unwrap();
    let socket = server.socket_path().to_path_buf();
    assert!(socket.exists());

    let cancel = CancellationToken::new();
    let serving = tokio::spawn(server.serve(cancel.clone()));

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    let Response::ClientInit(init) = call(&mut stream, &client_init()).await else {
        panic!("expected client_init response");
    };
    assert_eq!(init.status, InitStatus::Ok);

    // Unset locally and remotely: disabled.
    let sync = Request::ConfigSync(appsec_proto::ConfigSync { rem_cfg_path: None });
    assert_eq!(call(&mut stream, &sync).await, Response::ConfigSync);

    cancel.cancel();
    serving.await.unwrap().unwrap();
    assert!(!socket.exists());
}

#[tokio::test]
async fn second_instance_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());

    let _first = Server::bind(&config).unwrap();
    let err = Server::bind(&config).unwrap_err();
    assert!(matches!(err, ServerError::AlreadyRunning(_)));
}

#[tokio::test]
async fn connection_cap_drops_extra_peers() {
    let dir = tempfile::tempdir().unwrap();
    let config = HelperConfig {
        max_connections: 1,
        ..config(dir.path())
    };

    let server = Server::bind(&config).unwrap();
    let socket = server.socket_path().to_path_buf();
    let cancel = CancellationToken::new();
    let serving = tokio::spawn(server.serve(cancel.clone()));

    let mut first = UnixStream::connect(&socket).await.unwrap();
    assert!(matches!(
        call(&mut first, &client_init()).await,
        Response::ClientInit(_)
    ));

    let mut second = UnixStream::connect(&socket).await.unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(second.read(&mut buf).await.unwrap(), 0);

    cancel.cancel();
    serving.await.unwrap().unwrap();
}
