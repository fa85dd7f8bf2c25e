use std::time::Duration;

use presto_lib::push::SubscriptionKeys;
use presto_lib::{BackendAuth, BackendClient, PrestoError, PushBackend, Subscription};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug)]
struct Recorded {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Recorded {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body is JSON")
    }
}

/// Accept one connection, record the request, and answer with `status` and `body`.
async fn serve_once(
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
) -> (String, JoinHandle<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let base = format!("http://{}/api", listener.local_addr().expect("addr"));

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.expect("read");
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
        let mut lines = head.split("\r\n");
        let mut request_line = lines.next().unwrap_or_default().split(' ');
        let method = request_line.next().unwrap_or_default().to_string();
        let path = request_line.next().unwrap_or_default().to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        let length = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < header_end + length {
            let n = socket.read(&mut chunk).await.expect("read body");
            assert!(n > 0, "client closed before sending body");
            buf.extend_from_slice(&chunk[..n]);
        }
        let request_body = buf[header_end..header_end + length].to_vec();

        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let head = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.expect("write head");
        socket.write_all(&body).await.expect("write body");
        socket.shutdown().await.ok();

        Recorded {
            method,
            path,
            headers,
            body: request_body,
        }
    });

    (base, handle)
}

fn client(base: &str) -> BackendClient {
    BackendClient::with_timeout(
        base,
        BackendAuth::Bearer("session-token".to_string()),
        Duration::from_secs(5),
    )
    .expect("client")
}

fn subscription() -> Subscription {
    Subscription {
        endpoint: "https://push.example/send/xyz".to_string(),
        expiration_time: None,
        keys: SubscriptionKeys {
            p256dh: "BOr".to_string(),
            auth: "k9Q".to_string(),
        },
    }
}

#[tokio::test]
async fn fetches_vapid_key_with_bearer_auth() {
    let (base, server) = serve_once(
        200,
        "application/json",
        br#"{"publicKey":"BEl62iUYgUivxIkv69yViEuiBIa"}"#.to_vec(),
    )
    .await;

    let key = client(&base).vapid_public_key().await.expect("key");
    let request = server.await.expect("server");

    assert_eq!(key, "BEl62iUYgUivxIkv69yViEuiBIa");
    assert_eq!(request.method, "GET");
    assert_eq!(request.path, "/api/push/vapid-public-key");
    assert_eq!(request.header("authorization"), Some("Bearer session-token"));
}

#[tokio::test]
async fn posts_subscription_wrapped_in_envelope() {
    let (base, server) = serve_once(201, "application/json", br#"{"ok":true}"#.to_vec()).await;

    client(&base)
        .register_subscription(&subscription())
        .await
        .expect("subscribe");
    let request = server.await.expect("server");

    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/push/subscribe");
    let body = request.json();
    assert_eq!(body["subscription"]["endpoint"], "https://push.example/send/xyz");
    assert_eq!(body["subscription"]["keys"]["p256dh"], "BOr");
    assert!(body["subscription"].get("expirationTime").is_some());
}

#[tokio::test]
async fn unsubscribe_uses_delete() {
    let (base, server) = serve_once(200, "application/json", b"{}".to_vec()).await;

    client(&base)
        .remove_subscription(&subscription())
        .await
        .expect("unsubscribe");
    let request = server.await.expect("server");

    assert_eq!(request.method, "DELETE");
    assert_eq!(request.path, "/api/push/unsubscribe");
    assert_eq!(request.json()["endpoint"], "https://push.example/send/xyz");
}

#[tokio::test]
async fn test_push_is_a_post() {
    let (base, server) = serve_once(200, "application/json", b"{}".to_vec()).await;

    client(&base).send_test().await.expect("test push");
    let request = server.await.expect("server");

    assert_eq!(request.method, "POST");
    assert_eq!(request.path, "/api/push/test");
}

#[tokio::test]
async fn error_body_becomes_backend_error() {
    let (base, server) = serve_once(
        401,
        "application/json",
        r#"{"error":"Token inválido"}"#.as_bytes().to_vec(),
    )
    .await;

    let err = client(&base).vapid_public_key().await.unwrap_err();
    server.await.expect("server");

    match err {
        PrestoError::Backend { status, message } => {
            assert_eq!(status, Some(StatusCode::UNAUTHORIZED));
            assert_eq!(message, "Token inválido");
        }
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[tokio::test]
async fn budget_pdf_returns_raw_bytes() {
    let pdf = b"%PDF-1.7\n%binary\x00\xff\n%%EOF\n".to_vec();
    let (base, server) = serve_once(200, "application/pdf", pdf.clone()).await;

    let document: presto_lib::BudgetDocument = serde_json::from_value(serde_json::json!({
        "cliente": {"nombre": "Juan Pérez"},
        "vehiculo": {"marca": "Toyota", "modelo": "Hilux", "precio": 48000000.0},
        "cuotas": [{"plazo": 12, "valorCuota": 4100000.0}]
    }))
    .expect("document");

    let bytes = client(&base)
        .generate_budget_pdf(&document)
        .await
        .expect("pdf");
    let request = server.await.expect("server");

    assert_eq!(bytes, pdf);
    assert_eq!(request.path, "/api/presupuestos/generar-pdf");
    assert_eq!(request.json()["vehiculo"]["modelo"], "Hilux");
}

#[tokio::test]
async fn non_pdf_budget_response_is_rejected() {
    let (base, server) =
        serve_once(200, "text/html", b"<html>login</html>".to_vec()).await;

    let document: presto_lib::BudgetDocument = serde_json::from_value(serde_json::json!({
        "cliente": {"nombre": "Ana"},
        "vehiculo": {"marca": "Ford", "modelo": "Ka", "precio": 1.0}
    }))
    .expect("document");

    let err = client(&base).generate_budget_pdf(&document).await.unwrap_err();
    server.await.expect("server");

    assert!(matches!(err, PrestoError::Backend { status: None, .. }));
}
