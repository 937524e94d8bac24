use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use axum::http::StatusCode;
use pitwall_contracts::SessionDescriptor;
use pitwall_e2e_smoke::{MockFeed, TestGateway};
use serde_json::{Value, json};

async fn get_json(client: &reqwest::Client, url: &str) -> (StatusCode, Value) {
    let response = client.get(url).send().await.expect("request should succeed");
    let status = StatusCode::from_u16(response.status().as_u16()).expect("valid status");
    let body = response.json::<Value>().await.expect("body should be json");
    (status, body)
}

async fn start(feed: &MockFeed) -> TestGateway {
    TestGateway::start(feed, &[])
        .await
        .expect("gateway should start")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn positions_are_reduced_to_latest_and_rank_sorted() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set(
        "position",
        json!([
            {"driver_number": 1, "date": "2023-09-16T13:00:10Z", "position": 2, "session_key": 9158},
            {"driver_number": 1, "date": "2023-09-16T13:00:20Z", "position": 1, "session_key": 9158},
            {"driver_number": 2, "date": "2023-09-16T13:00:15Z", "position": 2, "session_key": 9158},
        ]),
    );
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, &gateway.url("/api/positions?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);

    let rows = body.as_array().expect("positions should be an array");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["driver_number"], 1);
    assert_eq!(rows[0]["date"], "2023-09-16T13:00:20Z");
    assert_eq!(rows[0]["position"], 1);
    assert_eq!(rows[0]["leader"], true);
    assert_eq!(rows[1]["driver_number"], 2);
    assert_eq!(rows[1]["position"], 2);
    assert_eq!(rows[1]["leader"], false);
    assert!(rows.iter().all(|r| r["interval"].is_null()));

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn locations_are_downsampled_per_driver_and_keep_the_final_sample() {
    let feed = MockFeed::start().await.expect("feed should start");
    // Served newest first so ordering has to come from the timestamps.
    let samples = (0..120)
        .rev()
        .map(|i| {
            json!({
                "driver_number": 7,
                "date": format!("2023-09-16T13:{:02}:{:02}Z", i / 60, i % 60),
                "x": i,
                "y": -i,
                "z": 0,
            })
        })
        .collect::<Vec<_>>();
    // Keyed with the fetch limit, so a request without it finds no fixture.
    feed.set("location?limit=1000&session_key=9158", Value::Array(samples));
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, &gateway.url("/api/locations?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);

    let rows = body.as_array().expect("locations should be an array");
    assert!(rows.len() <= 51, "got {} samples", rows.len());
    assert!(rows.len() >= 2);

    let dates = rows
        .iter()
        .map(|r| r["date"].as_str().expect("date should be a string").to_string())
        .collect::<Vec<_>>();
    assert!(dates.windows(2).all(|w| w[0] < w[1]), "dates must strictly increase");
    assert_eq!(dates.first().map(String::as_str), Some("2023-09-16T13:00:00Z"));
    assert_eq!(dates.last().map(String::as_str), Some("2023-09-16T13:01:59Z"));
    assert_eq!(feed.calls("location"), 1);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn car_data_without_driver_is_rejected_before_any_upstream_call() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set("car_data", json!([]));
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, &gateway.url("/api/car_data?session_key=9158")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "ERR_INVALID_PARAMS");
    assert_eq!(body["retryable"], false);

    let (status, _) = get_json(
        &client,
        &gateway.url("/api/car_data?session_key=9158&driver_number=abc"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(feed.total_calls(), 0);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn car_data_returns_latest_sample_or_null() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set(
        "car_data?driver_number=44&session_key=9158",
        json!([
            {"driver_number": 44, "date": "2023-09-16T13:00:01.100000+00:00", "speed": 290, "n_gear": 7},
            {"driver_number": 44, "date": "2023-09-16T13:00:01.300000+00:00", "speed": 295, "n_gear": 8},
            {"driver_number": 44, "date": "not a date", "speed": 0},
        ]),
    );
    feed.set("car_data", json!([]));
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(
        &client,
        &gateway.url("/api/car_data?session_key=9158&driver_number=44"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["speed"], 295);
    assert_eq!(body["n_gear"], 8);

    let (status, body) = get_json(
        &client,
        &gateway.url("/api/car_data?session_key=9158&driver_number=1"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_null());

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repeated_query_is_served_from_cache_until_ttl_expires() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set(
        "position",
        json!([{"driver_number": 16, "date": "2023-09-16T13:00:00Z", "position": 1}]),
    );
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    // Same query spelled two ways resolves to one signature.
    let (status, first) = get_json(&client, &gateway.url("/api/positions?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) =
        get_json(&client, &gateway.url("/api/positions?session_key=%209158%20")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);
    assert_eq!(feed.calls("position"), 1);

    // A different session is a different signature.
    let _ = get_json(&client, &gateway.url("/api/positions?session_key=9159")).await;
    assert_eq!(feed.calls("position"), 2);

    gateway.clock.advance(Duration::from_secs(11));
    let (status, _) = get_json(&client, &gateway.url("/api/positions?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(feed.calls("position"), 3);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn upstream_failure_is_surfaced_and_never_cached() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set_status(
        "laps",
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({"detail": "boom"}),
    );
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, &gateway.url("/api/laps?session_key=9158")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "ERR_SOURCE_UNAVAILABLE");
    assert_eq!(body["retryable"], true);
    assert!(gateway.state.cache().is_empty());

    feed.set(
        "laps",
        json!([
            {"driver_number": 1, "lap_number": 1, "lap_duration": 91.2},
            {"driver_number": 1, "lap_number": 2, "lap_duration": 90.4},
        ]),
    );
    let (status, body) = get_json(&client, &gateway.url("/api/laps?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));
    assert_eq!(feed.calls("laps"), 2);

    let _ = get_json(&client, &gateway.url("/api/laps?session_key=9158")).await;
    assert_eq!(feed.calls("laps"), 2);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn truncated_feed_body_is_unavailable_and_never_cached() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set_raw(
        "position",
        StatusCode::OK,
        r#"[{"driver_number":1,"date":"2023-09-16T13:00:00Z","position":1},{"driver_number":"#,
    );
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let (status, body) =
            get_json(&client, &gateway.url("/api/positions?session_key=9158")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "ERR_SOURCE_UNAVAILABLE");
    }
    assert!(gateway.state.cache().is_empty());
    assert_eq!(feed.calls("position"), 2);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_feed_is_an_empty_success() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set("intervals", json!([]));
    feed.set("team_radio", json!([]));
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    for path in ["/api/intervals", "/api/team_radio"] {
        let (status, body) = get_json(&client, &gateway.url(path)).await;
        assert_eq!(status, StatusCode::OK, "{}", path);
        assert_eq!(body, json!([]), "{}", path);
    }

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn drivers_are_enriched_with_reference_data_and_running_order() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set(
        "drivers",
        json!([
            {"driver_number": 44, "full_name": "Lewis HAMILTON", "session_key": 9158},
            {"driver_number": 1, "full_name": "Max VERSTAPPEN", "session_key": 9158},
            {"driver_number": 99, "full_name": "Test DRIVER", "session_key": 9158},
        ]),
    );
    feed.set(
        "position",
        json!([
            {"driver_number": 1, "date": "2023-09-16T13:00:00Z", "position": 1},
            {"driver_number": 44, "date": "2023-09-16T13:00:00Z", "position": 1},
            {"driver_number": 1, "date": "2023-09-16T13:05:00Z", "position": 2},
        ]),
    );
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, &gateway.url("/api/drivers?session_key=9158")).await;
    assert_eq!(status, StatusCode::OK);

    let rows = body.as_array().expect("drivers should be an array");
    let order = rows
        .iter()
        .map(|r| r["driver_number"].as_u64())
        .collect::<Vec<_>>();
    assert_eq!(order, vec![Some(44), Some(1), Some(99)]);
    assert_eq!(rows[0]["team_name"], "Mercedes");
    assert_eq!(rows[0]["team_colour"], "00D2BE");
    assert_eq!(rows[1]["position"], 2);
    assert_eq!(rows[2]["team_name"], "Unknown Team");
    assert_eq!(rows[2]["team_colour"], "CCCCCC");
    assert!(rows[2]["position"].is_null());

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sessions_come_from_the_most_recent_meetings() {
    let feed = MockFeed::start().await.expect("feed should start");
    feed.set(
        "meetings",
        json!([
            {"meeting_key": 1217, "meeting_name": "Dutch Grand Prix", "country_name": "Netherlands",
             "circuit_short_name": "Zandvoort", "date_start": "2023-08-25T10:30:00+00:00"},
            {"meeting_key": 1219, "meeting_name": "Singapore Grand Prix", "country_name": "Singapore",
             "circuit_short_name": "Singapore", "date_start": "2023-09-15T09:30:00+00:00"},
            {"meeting_key": 1218, "meeting_name": "Italian Grand Prix", "country_name": "Italy",
             "circuit_short_name": "Monza", "date_start": "2023-09-01T11:30:00+00:00"},
            {"meeting_key": 1216, "meeting_name": "Belgian Grand Prix", "country_name": "Belgium",
             "circuit_short_name": "Spa-Francorchamps", "date_start": "2023-07-28T11:30:00+00:00"},
        ]),
    );
    for (meeting_key, session_key, session_name, date_start) in [
        (1219, 9158, "Race", "2023-09-17T12:00:00+00:00"),
        (1218, 9157, "Race", "2023-09-03T13:00:00+00:00"),
        (1217, 9156, "Race", "2023-08-27T13:00:00+00:00"),
        (1216, 9155, "Race", "2023-07-30T13:00:00+00:00"),
    ] {
        feed.set(
            &format!("sessions?meeting_key={}", meeting_key),
            json!([{
                "session_key": session_key,
                "meeting_key": meeting_key,
                "session_name": session_name,
                "session_type": "Race",
                "date_start": date_start,
            }]),
        );
    }
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    // Sessions are not scoped to a session, so the parameter is ignored.
    let (status, body) = get_json(&client, &gateway.url("/api/sessions?session_key=abc")).await;
    assert_eq!(status, StatusCode::OK);

    let sessions = serde_json::from_value::<Vec<SessionDescriptor>>(body)
        .expect("sessions should match the descriptor shape");
    let keys = sessions.iter().map(|s| s.session_key).collect::<Vec<_>>();
    assert_eq!(keys, vec![9158, 9157, 9156]);
    assert_eq!(sessions[0].meeting_name, "Singapore Grand Prix");
    assert_eq!(sessions[1].circuit_short_name, "Monza");
    assert_eq!(feed.calls("meetings"), 1);
    assert_eq!(feed.calls("sessions"), 3);

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_queries_are_logged_with_request_id() {
    let log_buf = init_test_tracing();
    let request_id = "req_smoke_logs_01";

    let feed = MockFeed::start().await.expect("feed should start");
    feed.set("team_radio", json!([{"driver_number": 1, "recording_url": "https://example.invalid/a.mp3"}]));
    let gateway = start(&feed).await;
    let client = reqwest::Client::new();

    let response = client
        .get(gateway.url("/api/team_radio?session_key=9158"))
        .header("x-pitwall-request-id", request_id)
        .send()
        .await
        .expect("request should succeed");
    assert!(response.status().is_success());

    let logs = String::from_utf8(
        log_buf
            .lock()
            .expect("log lock should be available")
            .clone(),
    )
    .expect("logs should be valid utf-8");
    assert!(
        logs.lines()
            .any(|line| line.contains(request_id) && line.contains("feed.query_served")),
        "expected a feed.query_served line for {}; logs:\n{}",
        request_id,
        logs
    );

    let metrics = client
        .get(gateway.url("/metrics"))
        .send()
        .await
        .expect("metrics should respond")
        .text()
        .await
        .expect("metrics should be text");
    assert!(metrics.contains("pitwall_gateway_http_requests_total"));
    assert!(metrics.contains("pitwall_gateway_upstream_calls_total"));

    gateway.shutdown().await;
    feed.shutdown().await;
}

#[derive(Clone)]
struct TestWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut lock = self
            .buf
            .lock()
            .map_err(|_| std::io::Error::other("log mutex poisoned"))?;
        lock.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_test_tracing() -> Arc<Mutex<Vec<u8>>> {
    static LOG_BUF: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

    LOG_BUF
        .get_or_init(|| {
            let buf = Arc::new(Mutex::new(Vec::new()));
            let make_writer = {
                let buf = buf.clone();
                move || TestWriter { buf: buf.clone() }
            };

            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info"))
                .with_ansi(false)
                .with_writer(make_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber)
                .expect("global tracing subscriber should be set once");

            buf
        })
        .clone()
}
