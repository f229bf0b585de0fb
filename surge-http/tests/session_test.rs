//! HTTP session behaviour against a mock server

use std::time::Duration;
use surge_config::{HttpConfig, RetryConfig};
use surge_http::{HttpClient, HttpRequest, HttpSession};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_config() -> HttpConfig {
    HttpConfig {
        timeout: Duration::from_secs(2),
        retry: RetryConfig {
            backoff_factor: 0.01,
            ..RetryConfig::default()
        },
        ..HttpConfig::default()
    }
}

#[tokio::test]
async fn test_get_reports_status_and_length() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/suche"))
        .and(query_param("q", "yoga"))
        .respond_with(ResponseTemplate::new(200).set_body_string("results"))
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let response = session.send(&HttpRequest::get("/suche?q=yoga")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body_len, "results".len());
    assert_eq!(response.attempts, 1);
    assert!(response.is_success());
}

#[tokio::test]
async fn test_retries_on_service_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let response = session.send(&HttpRequest::get("/")).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.attempts, 3);
}

#[tokio::test]
async fn test_gives_up_after_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let response = session.send(&HttpRequest::get("/kontakt")).await.unwrap();

    assert_eq!(response.status, 502);
    assert_eq!(response.attempts, 4);
    assert!(!response.is_success());
}

#[tokio::test]
async fn test_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let response = session.send(&HttpRequest::get("/missing")).await.unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.attempts, 1);
}

#[tokio::test]
async fn test_per_request_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("user-agent", "MobileBrowser/1.0"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let response = session
        .send(&HttpRequest::get("/").with_user_agent("MobileBrowser/1.0"))
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_timeout_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let config = HttpConfig {
        timeout: Duration::from_millis(200),
        retry: RetryConfig::disabled(),
        ..HttpConfig::default()
    };
    let session = HttpSession::new(&config, &server.uri()).unwrap();
    let err = session.send(&HttpRequest::get("/")).await.unwrap_err();
    assert_eq!(err.kind(), "timeout");
}

#[tokio::test]
async fn test_body_is_kept_only_when_asked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>12 Kurse</p>"))
        .mount(&server)
        .await;

    let session = HttpSession::new(&fast_config(), &server.uri()).unwrap();
    let plain = session.send(&HttpRequest::get("/suche?q=a")).await.unwrap();
    assert_eq!(plain.body, None);
    assert_eq!(plain.body_len, 15);

    let captured = session
        .send(&HttpRequest::get("/suche?q=a").with_body())
        .await
        .unwrap();
    assert_eq!(captured.body.as_deref(), Some("<p>12 Kurse</p>"));
    assert_eq!(captured.body_len, 15);
}

#[tokio::test]
async fn test_elapsed_excludes_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    // Two retries sleep 0.4s + 0.8s before the final attempt.
    let config = HttpConfig {
        retry: RetryConfig {
            backoff_factor: 0.4,
            ..RetryConfig::default()
        },
        ..fast_config()
    };
    let session = HttpSession::new(&config, &server.uri()).unwrap();
    let started = std::time::Instant::now();
    let response = session.send(&HttpRequest::get("/")).await.unwrap();

    assert_eq!(response.attempts, 3);
    assert!(started.elapsed() >= Duration::from_millis(1200));
    assert!(response.elapsed < Duration::from_millis(400));
}

#[tokio::test]
async fn test_shutdown_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = HttpConfig {
        retry: RetryConfig {
            backoff_factor: 30.0,
            ..RetryConfig::default()
        },
        ..fast_config()
    };
    let token = CancellationToken::new();
    let session = HttpSession::new(&config, &server.uri())
        .unwrap()
        .with_shutdown(token.clone());

    // Already cancelled: one attempt, no backoff.
    token.cancel();
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        session.send(&HttpRequest::get("/")),
    )
    .await
    .expect("no backoff sleep after shutdown")
    .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.attempts, 1);
}

#[tokio::test]
async fn test_shutdown_cuts_backoff_short() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = HttpConfig {
        retry: RetryConfig {
            backoff_factor: 30.0,
            ..RetryConfig::default()
        },
        ..fast_config()
    };
    let token = CancellationToken::new();
    let session = HttpSession::new(&config, &server.uri())
        .unwrap()
        .with_shutdown(token.clone());

    let canceller = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });
    let response = tokio::time::timeout(
        Duration::from_secs(5),
        session.send(&HttpRequest::get("/")),
    )
    .await
    .expect("backoff interrupted by shutdown")
    .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(response.attempts, 1);
}
