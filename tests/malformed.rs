//! Requests that never reach a stub.

use stub_server::{ServerConfig, StubServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

async fn exchange(server: &StubServer, raw: &[u8]) -> String {
    let mut stream = TcpStream::connect(server.address()).await.unwrap();
    stream.write_all(raw).await.unwrap();
    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn test_unparseable_request_is_400() {
    let server = StubServer::start(ServerConfig::default()).await.unwrap();
    let response = exchange(&server, b"this is not http\r\n\r\n").await;
    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
}

#[tokio::test]
async fn test_non_utf8_header_is_400() {
    let server = StubServer::start(ServerConfig::default()).await.unwrap();
    let response = exchange(
        &server,
        b"GET /x HTTP/1.1\r\nHost: localhost\r\nX-Bad: \xff\xfe\r\nConnection: close\r\n\r\n",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
    assert!(response.contains("malformed_request"));
}

#[tokio::test]
async fn test_oversized_body_is_400() {
    let mut config = ServerConfig::default();
    config.settings.max_body_bytes = 8;
    let server = StubServer::start(config).await.unwrap();
    let response = exchange(
        &server,
        b"POST /x HTTP/1.1\r\nHost: localhost\r\nContent-Length: 32\r\nConnection: close\r\n\r\n0123456789abcdef0123456789abcdef",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400"), "got {response:?}");
    assert!(response.contains("exceeds 8 bytes"));
}
