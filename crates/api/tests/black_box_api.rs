use std::collections::HashMap;
use std::sync::Arc;

use liftride_api::app::services::{AppServices, build_in_memory_services};
use liftride_infra::PipelineConfig;
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(env: &[(&str, &str)]) -> Self {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = PipelineConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        // Same router as prod, in-memory pipeline, ephemeral port.
        let services = Arc::new(build_in_memory_services(&config).unwrap());
        let app = liftride_api::app::build_app(Arc::clone(&services));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn published(&self) -> u64 {
        self.services
            .in_memory_broker()
            .unwrap()
            .published_count("liftRideQueue")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.services.shutdown();
    }
}

/// Flush every ride straight through so reads see it promptly.
const UNBATCHED: &[(&str, &str)] = &[("BATCH_SIZE", "1"), ("NUMBER_OF_CHANNEL", "2"), ("NUMBER_OF_THREAD", "2")];

async fn get_json_eventually(
    client: &reqwest::Client,
    url: &str,
    done: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    // The write path is asynchronous (queue → consumer → buffer → store).
    for _ in 0..100 {
        let res = client.get(url).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if done(&body) {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    panic!("{url} did not reach the expected state within timeout");
}

#[tokio::test(flavor = "multi_thread")]
async fn health_is_ok() {
    let srv = TestServer::spawn(&[]).await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn valid_ride_is_accepted_and_published() {
    let srv = TestServer::spawn(&[]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/skiers/3/seasons/2024/days/1/skiers/123", srv.base_url))
        .json(&json!({ "liftID": 5, "time": 120 }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["ride"]["skierID"], 123);
    assert_eq!(body["ride"]["resortID"], 3);
    assert_eq!(body["ride"]["liftID"], 5);
    assert_eq!(body["ride"]["seasonID"], "2024");
    assert_eq!(body["ride"]["dayID"], "1");
    assert_eq!(body["ride"]["time"], 120);
    assert_eq!(srv.published(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_day_is_rejected_and_never_published() {
    let srv = TestServer::spawn(&[]).await;

    let client = reqwest::Client::new();
    let res = client
        .post(format!("{}/skiers/3/seasons/2024/days/9/skiers/123", srv.base_url))
        .json(&json!({ "liftID": 5, "time": 120 }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_url");
    assert_eq!(body["field"], "dayID");
    assert_eq!(srv.published(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_bodies_are_reported_as_body_errors() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();
    let url = format!("{}/skiers/3/seasons/2024/days/1/skiers/123", srv.base_url);

    let res = client.post(&url).body("not json").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");

    let res = client
        .post(&url)
        .json(&json!({ "liftID": 41, "time": 120 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_body");
    assert_eq!(body["field"], "liftID");

    assert_eq!(srv.published(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn posted_rides_show_up_in_vertical_and_resort_queries() {
    let srv = TestServer::spawn(UNBATCHED).await;
    let client = reqwest::Client::new();

    for (skier, lift, time) in [(123, 5, 120), (123, 7, 130), (456, 2, 10)] {
        let res = client
            .post(format!("{}/skiers/3/seasons/2024/days/1/skiers/{skier}", srv.base_url))
            .json(&json!({ "liftID": lift, "time": time }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let total = get_json_eventually(&client, &format!("{}/skiers/123", srv.base_url), |b| {
        b["totalVertical"] == 120
    })
    .await;
    assert_eq!(total["skierID"], 123);

    let day = get_json_eventually(
        &client,
        &format!("{}/skiers/3/seasons/2024/days/1/skiers/123", srv.base_url),
        |b| b["vertical"] == 120,
    )
    .await;
    assert_eq!(day["dayID"], "1");

    let resort = get_json_eventually(
        &client,
        &format!("{}/resorts/3/seasons/2024/days/1/skiers", srv.base_url),
        |b| b["numSkiers"] == 2,
    )
    .await;
    assert_eq!(resort["resortID"], 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn read_routes_validate_their_paths() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("{}/skiers/abc", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["field"], "skierID");

    let res = client
        .get(format!("{}/resorts/3/seasons/2024/day/1/skiers", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_url");
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_routes_return_json_404() {
    let srv = TestServer::spawn(&[]).await;

    let res = reqwest::get(format!("{}/lifts/7?season=2024", srv.base_url))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["path"], "/lifts/7");
    assert_eq!(body["queryParams"], "season=2024");
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_flushes_rides_below_batch_size() {
    let srv = TestServer::spawn(&[]).await;
    let client = reqwest::Client::new();

    for skier in 1..=3 {
        let res = client
            .post(format!("{}/skiers/1/seasons/2024/days/2/skiers/{skier}", srv.base_url))
            .json(&json!({ "liftID": 1, "time": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    // Give the in-process consumer time to pull all three off the queue.
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;

    let services = Arc::clone(&srv.services);
    let report = tokio::task::spawn_blocking(move || services.shutdown())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.committed_total, 3);
    assert_eq!(srv.services.store().query_skier("2").unwrap().len(), 1);
}
