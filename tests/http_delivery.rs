use courier::store::InMemoryStore;
use courier::transport::Transport;
use courier::{DrainErrorKind, RequestQueue};
use reqwest::StatusCode;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount(server: &MockServer, route: &str, status: u16) {
    Mock::given(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn received_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_owned())
        .collect()
}

#[tokio::test]
async fn delivers_queued_requests_in_order_over_http() {
    let server = MockServer::start().await;
    mount(&server, "/notes/1", 204).await;
    mount(&server, "/notes/2", 201).await;

    let client = reqwest::Client::new();
    let store = InMemoryStore::new();
    let queue = RequestQueue::builder(store.clone(), Transport::new(client.clone())).build();

    let first = client
        .put(format!("{}/notes/1", server.uri()))
        .header("x-revision", "7")
        .body("one")
        .build()
        .unwrap();
    let second = client
        .post(format!("{}/notes/2", server.uri()))
        .body("two")
        .build()
        .unwrap();

    let ack = queue.submit(&first).await.unwrap();
    assert_eq!(ack.status(), StatusCode::ACCEPTED);
    queue.submit(&second).await.unwrap();
    queue.sync_requests().await.unwrap();

    assert!(store.is_empty().await);
    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);
    assert_eq!(received[0].method.as_str(), "PUT");
    assert_eq!(received[0].url.path(), "/notes/1");
    assert_eq!(received[0].body, b"one");
    assert_eq!(
        received[0]
            .headers
            .get("x-revision")
            .and_then(|v| v.to_str().ok()),
        Some("7")
    );
    assert_eq!(received[1].method.as_str(), "POST");
    assert_eq!(received[1].body, b"two");
}

#[tokio::test]
async fn server_error_stops_the_drain_and_keeps_the_rest_queued() {
    let server = MockServer::start().await;
    mount(&server, "/a", 204).await;
    mount(&server, "/b", 503).await;
    mount(&server, "/c", 204).await;

    let client = reqwest::Client::new();
    let queue = RequestQueue::builder(InMemoryStore::new(), Transport::new(client.clone())).build();

    for route in ["/a", "/b", "/c"] {
        let request = client
            .post(format!("{}{route}", server.uri()))
            .body("x")
            .build()
            .unwrap();
        queue.submit(&request).await.unwrap();
    }

    let err = queue.sync_requests().await.unwrap_err();
    let drain = err.drain_error().expect("drain failure");
    assert!(matches!(drain.kind(), DrainErrorKind::Server(StatusCode::SERVICE_UNAVAILABLE)));
    assert!(drain.is_retryable());

    let queued: Vec<_> = queue
        .list_queued()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url().path().to_owned())
        .collect();
    assert_eq!(queued, vec!["/b", "/c"]);

    let received = received_paths(&server).await;
    assert_eq!(received.first().map(String::as_str), Some("/a"));
    assert!(!received.iter().any(|p| p == "/c"));
}

#[tokio::test]
async fn rejected_requests_are_dropped_and_do_not_block_the_queue() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount(&server, "/next", 200).await;

    let client = reqwest::Client::new();
    let store = InMemoryStore::new();
    let queue = RequestQueue::builder(store.clone(), Transport::new(client.clone())).build();

    let delete = client
        .delete(format!("{}/gone", server.uri()))
        .build()
        .unwrap();
    let next = client
        .patch(format!("{}/next", server.uri()))
        .body("x")
        .build()
        .unwrap();
    queue.submit(&delete).await.unwrap();
    queue.submit(&next).await.unwrap();
    queue.sync_requests().await.unwrap();

    assert!(store.is_empty().await);
    assert_eq!(received_paths(&server).await, vec!["/gone", "/next"]);
}
