use paper_ingest::config::Config;
use paper_ingest::transport::http::http_error_message;
use paper_ingest::transport::{HttpTransport, Transport};
use paper_ingest::types::Credentials;
use reqwest::StatusCode;
use std::time::Duration;

#[test]
fn prefers_detail_from_json_body() {
    let msg = http_error_message(
        StatusCode::UNPROCESSABLE_ENTITY,
        r#"{"detail":"Only PDF files are supported"}"#,
    );
    assert_eq!(msg, "Only PDF files are supported");

    let msg = http_error_message(StatusCode::BAD_REQUEST, r#"{"message":"bad url"}"#);
    assert_eq!(msg, "bad url");
}

#[test]
fn falls_back_to_status_line() {
    assert_eq!(
        http_error_message(StatusCode::BAD_GATEWAY, "<html>upstream down</html>"),
        "HTTP error 502 Bad Gateway"
    );
    assert_eq!(
        http_error_message(StatusCode::INTERNAL_SERVER_ERROR, r#"{"detail":""}"#),
        "HTTP error 500 Internal Server Error"
    );
}

#[test]
fn rejects_unusable_base_url() {
    let mut cfg = Config::default();
    cfg.server.base_url = "not a url".into();
    assert!(HttpTransport::new(&cfg).is_err());

    cfg.server.base_url = "http://localhost:8000/".into();
    assert!(HttpTransport::new(&cfg).is_ok());
}

#[tokio::test]
async fn remote_cancel_gives_up_on_a_silent_server() {
    // Accepts connections through the backlog but never answers.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    let mut cfg = Config::default();
    cfg.server.base_url = format!("http://{addr}");
    cfg.server.cancel_timeout_ms = 200;
    let transport = HttpTransport::new(&cfg).expect("transport");

    let creds = Credentials::new("sk", "mineru");
    let out = tokio::time::timeout(
        Duration::from_secs(5),
        transport.cancel_task("task-1", &creds),
    )
    .await
    .expect("cancel_task returned within its own timeout");
    assert!(out.is_err());
    drop(listener);
}
