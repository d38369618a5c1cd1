//! Bridge integration tests: the same backend reached over native gRPC,
//! gRPC-Web (binary and text) and the in-process client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use grpc_bridge::backend::echo::{echo_table, ECHO, FAIL, SPLIT};
use grpc_bridge::backend::Backend;
use grpc_bridge::client::{InProcessClient, NativeClient, WebClient};
use grpc_bridge::codec::WebMode;
use grpc_bridge::{Bridge, Config, Error};
use tonic::Code;

fn backend() -> Arc<dyn Backend> {
    Arc::new(echo_table().unwrap())
}

fn test_config() -> Config {
    let mut config = Config::ephemeral();
    config.listener.drain_timeout = Duration::from_millis(500);
    config
}

async fn start_test_bridge() -> Bridge {
    Bridge::start(test_config(), backend()).await.unwrap()
}

/// A loopback port nobody is listening on right now.
fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn code_of(err: &Error) -> Code {
    err.as_status()
        .map(|s| s.code())
        .unwrap_or_else(|| panic!("expected an application error, got {err}"))
}

#[tokio::test]
async fn test_unary_is_identical_on_every_path() {
    let bridge = start_test_bridge().await;
    let request = Bytes::from_static(b"\x08\x96\x01 payload");

    let mut native = NativeClient::connect(bridge.native_addr()).await.unwrap();
    let binary = WebClient::new(bridge.web_addr(), WebMode::Binary);
    let text = WebClient::new(bridge.web_addr(), WebMode::Text);
    let in_process = bridge.in_process_client();

    let replies = vec![
        native.unary(ECHO, request.clone()).await.unwrap(),
        binary.unary(ECHO, request.clone()).await.unwrap(),
        text.unary(ECHO, request.clone()).await.unwrap(),
        in_process.unary_request(ECHO, request.clone()).await.unwrap(),
    ];
    for reply in replies {
        assert_eq!(reply, request);
    }

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_request_and_reply() {
    let bridge = start_test_bridge().await;

    let mut native = NativeClient::connect(bridge.native_addr()).await.unwrap();
    assert!(native.unary(ECHO, Bytes::new()).await.unwrap().is_empty());
    for mode in [WebMode::Binary, WebMode::Text] {
        let web = WebClient::new(bridge.web_addr(), mode);
        assert!(web.unary(ECHO, Bytes::new()).await.unwrap().is_empty());
    }

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_server_streaming_order_on_every_path() {
    let bridge = start_test_bridge().await;
    let expected: Vec<Bytes> = b"stream"
        .iter()
        .map(|b| Bytes::copy_from_slice(&[*b]))
        .collect();

    let mut native = NativeClient::connect(bridge.native_addr()).await.unwrap();
    assert_eq!(
        native.server_streaming(SPLIT, &b"stream"[..]).await.unwrap(),
        expected
    );

    for mode in [WebMode::Binary, WebMode::Text] {
        let web = WebClient::new(bridge.web_addr(), mode);
        let response = web
            .call(SPLIT, &[Bytes::from_static(b"stream")])
            .await
            .unwrap();
        assert_eq!(response.status.code(), Code::Ok);
        assert_eq!(response.messages, expected);
    }

    let reply = bridge
        .in_process_client()
        .call(grpc_bridge::backend::Call::unary(SPLIT, &b"stream"[..]))
        .await
        .unwrap();
    assert_eq!(reply.messages, expected);

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_application_error_is_identical_on_every_path() {
    let bridge = start_test_bridge().await;

    let mut native = NativeClient::connect(bridge.native_addr()).await.unwrap();
    let binary = WebClient::new(bridge.web_addr(), WebMode::Binary);
    let text = WebClient::new(bridge.web_addr(), WebMode::Text);
    let in_process = bridge.in_process_client();

    let errors = vec![
        native.unary(FAIL, &b"out of cheese"[..]).await.unwrap_err(),
        binary.unary(FAIL, &b"out of cheese"[..]).await.unwrap_err(),
        text.unary(FAIL, &b"out of cheese"[..]).await.unwrap_err(),
        in_process
            .unary_request(FAIL, &b"out of cheese"[..])
            .await
            .unwrap_err(),
    ];
    for err in &errors {
        assert_eq!(code_of(err), Code::FailedPrecondition);
        assert_eq!(err.as_status().unwrap().message(), "out of cheese");
    }

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_method() {
    let bridge = start_test_bridge().await;
    let method = "/grpc.bridge.v1.EchoService/Missing";

    let err = bridge
        .in_process_client()
        .unary_request(method, Bytes::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    let mut native = NativeClient::connect(bridge.native_addr()).await.unwrap();
    let err = native.unary(method, Bytes::new()).await.unwrap_err();
    assert_eq!(code_of(&err), Code::Unimplemented);

    let web = WebClient::new(bridge.web_addr(), WebMode::Binary);
    let err = web.unary(method, Bytes::new()).await.unwrap_err();
    assert_eq!(code_of(&err), Code::Unimplemented);

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_content_type_is_415() {
    let bridge = start_test_bridge().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}{}", bridge.web_addr(), ECHO))
        .header("content-type", "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::UNSUPPORTED_MEDIA_TYPE);

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_framing_error_is_invalid_argument() {
    let bridge = start_test_bridge().await;

    // Preamble promises 16 bytes, body carries 3.
    let response = reqwest::Client::new()
        .post(format!("http://{}{}", bridge.web_addr(), ECHO))
        .header("content-type", "application/grpc-web+proto")
        .body(vec![0u8, 0, 0, 0, 16, 1, 2, 3])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.headers()["grpc-status"], "3");

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_cors_preflight() {
    let bridge = start_test_bridge().await;

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::OPTIONS,
            format!("http://{}{}", bridge.web_addr(), ECHO),
        )
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type,x-grpc-web")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://localhost:3000"
    );

    bridge.close().await.unwrap();
}

#[tokio::test]
async fn test_close_releases_both_ports() {
    let bridge = start_test_bridge().await;
    let native_addr = bridge.native_addr();
    let web_addr = bridge.web_addr();

    // An open HTTP/2 connection must not keep the bridge from closing.
    let mut native = NativeClient::connect(native_addr).await.unwrap();
    native.unary(ECHO, &b"warm"[..]).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), bridge.close())
        .await
        .unwrap()
        .unwrap();

    let config = Config {
        native_addr: native_addr.to_string(),
        web_addr: web_addr.to_string(),
        ..test_config()
    };
    let again = Bridge::start(config, backend()).await.unwrap();
    assert_eq!(again.native_addr(), native_addr);
    assert_eq!(again.web_addr(), web_addr);
    again.close().await.unwrap();
}

#[tokio::test]
async fn test_web_bind_failure_releases_native_port() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let native_addr = free_addr();
    let config = Config {
        native_addr: native_addr.to_string(),
        web_addr: taken.local_addr().unwrap().to_string(),
        ..test_config()
    };

    let err = Bridge::start(config, backend()).await.unwrap_err();
    assert!(matches!(err, Error::Startup { listener: "web", .. }));

    // The native listener was stopped again, so its port is free.
    let rebound = std::net::TcpListener::bind(native_addr);
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn test_in_process_client_matches_direct_backend_calls() {
    let backend = backend();
    let bridge = Bridge::start(test_config(), backend.clone()).await.unwrap();
    let via_bridge = bridge.in_process_client();
    let direct = InProcessClient::new(backend);

    assert_eq!(
        via_bridge.unary_request(ECHO, &b"a"[..]).await.unwrap(),
        direct.unary_request(ECHO, &b"a"[..]).await.unwrap()
    );
    bridge.close().await.unwrap();
}
