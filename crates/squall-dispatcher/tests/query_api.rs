//! End-to-end dispatcher tests against scripted in-process workers.

use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};
use squall_dispatcher::client::WorkerClient;
use squall_dispatcher::metrics::Metrics;
use squall_dispatcher::{app, AppState};
use tokio::net::TcpListener;
use tower::ServiceExt;

/// Scripted stand-in for one worker process. Records every statement it
/// receives and answers from the reply function.
#[derive(Clone)]
struct StubWorker {
    seen: Arc<Mutex<Vec<String>>>,
    reply: Arc<dyn Fn(&str) -> (StatusCode, String) + Send + Sync>,
}

impl StubWorker {
    fn new(reply: impl Fn(&str) -> (StatusCode, String) + Send + Sync + 'static) -> Self {
        StubWorker {
            seen: Arc::new(Mutex::new(Vec::new())),
            reply: Arc::new(reply),
        }
    }

    /// Stub that answers every statement with the same row set.
    fn rows(rows: Value) -> Self {
        let body = json!({ "rows": rows }).to_string();
        Self::new(move |_| (StatusCode::OK, body.clone()))
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

/// Serves the stub on an ephemeral port and returns its execute URL.
async fn spawn_worker(stub: StubWorker) -> String {
    let router = Router::new().route(
        "/execute",
        post(move |body: Bytes| {
            let stub = stub.clone();
            async move {
                let sql = serde_json::from_slice::<Value>(&body)
                    .ok()
                    .and_then(|request| request["sql"].as_str().map(str::to_string))
                    .unwrap_or_default();
                stub.seen.lock().unwrap().push(sql.clone());
                (stub.reply)(&sql)
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/execute")
}

fn dispatcher(urls: Vec<String>, max_parts: usize) -> Router {
    app(AppState {
        client: WorkerClient::new(urls),
        max_parts,
        metrics: Metrics::new().unwrap(),
    })
}

async fn post_query(app: Router, body: &str) -> (StatusCode, Bytes) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/query")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body)
}

fn parse(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn unsplittable_statement_is_relayed_verbatim_to_one_worker() {
    let stub = StubWorker::rows(json!([{ "a": 1, "b": "x" }]));
    let url = spawn_worker(stub.clone()).await;
    let app = dispatcher(vec![url], 4);

    let sql = "SELECT a, b FROM t1 JOIN t2 ON t1.id = t2.id";
    let (status, body) = post_query(app, &json!({ "sql": sql }).to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["rows"], json!([{ "a": 1, "b": "x" }]));
    assert_eq!(stub.seen(), vec![sql.to_string()]);
}

#[tokio::test]
async fn split_count_sums_partials_from_all_parts() {
    let stub = StubWorker::rows(json!([{ "c": 2500 }]));
    let url = spawn_worker(stub.clone()).await;
    let app = dispatcher(vec![url], 4);

    let (status, body) = post_query(
        app,
        &json!({ "sql": "SELECT COUNT(*) AS c FROM numbers WHERE id BETWEEN 1 AND 100000" })
            .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["rows"], json!([{ "c": 10000 }]));

    let seen = stub.seen();
    assert_eq!(seen.len(), 4);
    for range in [
        "BETWEEN 1 AND 25000",
        "BETWEEN 25001 AND 50000",
        "BETWEEN 50001 AND 75000",
        "BETWEEN 75001 AND 100000",
    ] {
        assert!(
            seen.iter().any(|sql| sql.contains(range)),
            "no sub-query covered {range}: {seen:?}"
        );
    }
}

#[tokio::test]
async fn grouped_rows_merge_and_having_filters_after_the_merge() {
    let stub = StubWorker::new(|_| {
        let rows: Vec<Value> = (0..10).map(|m| json!({ "m": m, "c": 2500 })).collect();
        (StatusCode::OK, json!({ "rows": rows }).to_string())
    });
    let url = spawn_worker(stub.clone()).await;
    let app = dispatcher(vec![url], 4);

    let (status, body) = post_query(
        app.clone(),
        &json!({
            "sql": "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
                    WHERE id BETWEEN 1 AND 100000 GROUP BY m HAVING c > 5000"
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let rows = parse(&body)["rows"].as_array().unwrap().clone();
    assert_eq!(rows.len(), 10);
    for row in &rows {
        assert_eq!(row["c"], json!(10000));
    }

    // The predicate must never reach a worker.
    for sql in stub.seen() {
        assert!(!sql.to_uppercase().contains("HAVING"), "leaked: {sql}");
    }

    let (status, body) = post_query(
        app,
        &json!({
            "sql": "SELECT id % 10 AS m, COUNT(*) AS c FROM numbers \
                    WHERE id BETWEEN 1 AND 100000 GROUP BY m HAVING c > 99999"
        })
        .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["rows"], json!([]));
}

#[tokio::test]
async fn avg_travels_as_sum_and_count_and_recombines() {
    let stub = StubWorker::new(|sql| {
        let (sum, count) = if sql.contains("BETWEEN 1 AND 50") {
            (10, 4)
        } else {
            (6, 4)
        };
        (
            StatusCode::OK,
            json!({ "rows": [{ "__part_sum_0": sum, "__part_cnt_0": count }] }).to_string(),
        )
    });
    let url = spawn_worker(stub.clone()).await;
    let app = dispatcher(vec![url], 2);

    let (status, body) = post_query(
        app,
        &json!({ "sql": "SELECT AVG(amount) AS a FROM numbers WHERE id BETWEEN 1 AND 100" })
            .to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["rows"], json!([{ "a": 2.0 }]));
    for sql in stub.seen() {
        assert!(!sql.to_uppercase().contains("AVG"), "leaked: {sql}");
    }
}

#[tokio::test]
async fn worker_failure_surfaces_as_502_with_the_worker_text() {
    let stub = StubWorker::new(|_| {
        (
            StatusCode::BAD_GATEWAY,
            "relation \"nope\" does not exist".to_string(),
        )
    });
    let url = spawn_worker(stub).await;
    let app = dispatcher(vec![url], 4);

    let (status, body) = post_query(app, &json!({ "sql": "SELECT * FROM nope" }).to_string()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(
        parse(&body)["error"],
        json!("worker error: relation \"nope\" does not exist")
    );
}

#[tokio::test]
async fn empty_worker_error_body_falls_back_to_the_status_code() {
    let stub = StubWorker::new(|_| (StatusCode::INTERNAL_SERVER_ERROR, String::new()));
    let url = spawn_worker(stub).await;
    let app = dispatcher(vec![url], 4);

    let (status, body) = post_query(app, &json!({ "sql": "SELECT * FROM nope" }).to_string()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(parse(&body)["error"], json!("worker error: HTTP 500"));
}

#[tokio::test]
async fn undecodable_body_is_400_without_contacting_workers() {
    // Nothing listens on this port; the request must fail before any dial.
    let app = dispatcher(vec!["http://127.0.0.1:9/execute".to_string()], 4);

    let (status, body) = post_query(app.clone(), "{ not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(&body[..], br#"{"error":"bad json"}"#);

    let (status, _) = post_query(app.clone(), r#"{"sql": 42}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_query(app, r#"{"query": "SELECT 1"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn parts_rotate_across_the_worker_fleet() {
    let first = StubWorker::rows(json!([{ "x": 1 }]));
    let second = StubWorker::rows(json!([{ "x": 2 }]));
    let urls = vec![
        spawn_worker(first.clone()).await,
        spawn_worker(second.clone()).await,
    ];
    let app = dispatcher(urls, 4);

    let (status, body) = post_query(
        app,
        &json!({ "sql": "SELECT x FROM numbers WHERE id BETWEEN 1 AND 4" }).to_string(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    // Part order survives the merge even though parts run concurrently.
    assert_eq!(
        parse(&body)["rows"],
        json!([{ "x": 1 }, { "x": 2 }, { "x": 1 }, { "x": 2 }])
    );
    assert_eq!(first.seen().len(), 2);
    assert_eq!(second.seen().len(), 2);
}

#[tokio::test]
async fn health_route_reports_ok() {
    let app = dispatcher(vec!["http://127.0.0.1:9/execute".to_string()], 4);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let parsed = parse(&body);
    assert_eq!(parsed["status"], json!("ok"));
    assert!(parsed["version"].is_string());
}

#[tokio::test]
async fn metrics_count_requests_and_created_subqueries() {
    let stub = StubWorker::rows(json!([{ "n": 1 }]));
    let url = spawn_worker(stub).await;
    let app = dispatcher(vec![url], 4);

    post_query(app.clone(), "{ not json").await;
    post_query(
        app.clone(),
        &json!({ "sql": "SELECT n FROM t1 JOIN t2 ON t1.id = t2.id" }).to_string(),
    )
    .await;
    post_query(
        app.clone(),
        &json!({ "sql": "SELECT n FROM numbers WHERE id BETWEEN 1 AND 100" }).to_string(),
    )
    .await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    // Three requests in; the join relays as one sub-query, the range
    // splits into four.
    assert!(text.contains("dispatcher_requests_total 3"), "{text}");
    assert!(text.contains("dispatcher_splits_total 5"), "{text}");
}

#[tokio::test]
async fn preflight_is_allowed_for_any_origin() {
    let app = dispatcher(vec!["http://127.0.0.1:9/execute".to_string()], 4);

    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/query")
                .header("origin", "https://dash.example")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .map(|value| value.as_bytes()),
        Some(&b"*"[..])
    );
}
