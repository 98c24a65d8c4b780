mod common;

use common::{
    EXPIRED, FakeTokenEndpoint, NEEDS_SECRET, NO_TOKEN, UNAVAILABLE, read_json, write_json,
};
use credential_keeper::oauth::TokenEndpoint;
use credential_keeper::report::{RefreshReport, read_report};
use credential_keeper::service::refresher::Refresher;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn refresher(endpoint: &FakeTokenEndpoint, dir: &TempDir) -> Refresher {
    Refresher::new(
        TokenEndpoint::new(reqwest::Client::new(), &endpoint.url).unwrap(),
        dir.path().join("accounts.json"),
        dir.path().join("refresh_report.json"),
        Duration::ZERO,
    )
}

#[tokio::test]
async fn refresh_pass_rotates_good_tokens_and_reports_the_rest() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("accounts.json");
    write_json(
        &store_path,
        &json!({
            "alice@example.com": {
                "refresh_token": "good-alice",
                "client_id": "cid-a",
                "status": "active",
                "tags": ["team-a", "primary"],
                "note": "kept verbatim"
            },
            "bob@example.com": { "refresh_token": "good-bob", "client_id": "cid-b" },
            "carol@example.com": { "refresh_token": NEEDS_SECRET, "client_id": "cid-c" },
            "dave@example.com": { "refresh_token": EXPIRED, "client_id": "cid-d" },
            "erin@example.com": { "refresh_token": NO_TOKEN, "client_id": "cid-e" },
            "frank@example.com": { "refresh_token": "good-frank" }
        }),
    );

    let report = refresher(&endpoint, &dir).run().await.unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.success, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed.len(), 3);
    assert_eq!(report.success + report.failed.len() + report.skipped, report.total);
    assert!(report.error.is_none());
    // the incomplete entry never reaches the provider
    assert_eq!(endpoint.call_count(), 5);

    let reason_for = |identity: &str| {
        report
            .failed
            .iter()
            .find(|f| f.identity == identity)
            .map(|f| f.reason.clone())
            .unwrap()
    };
    assert!(reason_for("carol@example.com").contains("AADSTS70002"));
    assert!(reason_for("dave@example.com").contains("AADSTS70000"));
    assert_eq!(reason_for("erin@example.com"), "no token returned");

    let on_disk: RefreshReport = read_report(&dir.path().join("refresh_report.json")).unwrap();
    assert_eq!(on_disk, report);

    let store = read_json(&store_path);
    let alice = &store["alice@example.com"];
    assert_eq!(alice["refresh_token"], "good-alice-rotated");
    assert_eq!(alice["tags"], json!(["team-a", "primary"]));
    assert_eq!(alice["note"], "kept verbatim");
    assert!(alice["last_refreshed_at"].is_string());
    assert_eq!(store["bob@example.com"]["refresh_token"], "good-bob-rotated");
    assert_eq!(store["carol@example.com"]["refresh_token"], NEEDS_SECRET);
    assert_eq!(store["dave@example.com"]["refresh_token"], EXPIRED);
    assert_eq!(store["erin@example.com"]["refresh_token"], NO_TOKEN);
    assert_eq!(
        store["frank@example.com"],
        json!({ "refresh_token": "good-frank" })
    );
}

#[tokio::test]
async fn public_client_refresh_sends_client_id_without_secret() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();
    write_json(
        &dir.path().join("accounts.json"),
        &json!({ "a@example.com": { "refresh_token": "good-a", "client_id": "cid-a" } }),
    );

    refresher(&endpoint, &dir).run().await.unwrap();

    let calls = endpoint.calls.lock().unwrap();
    let form = &calls[0];
    assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(form.get("client_id").map(String::as_str), Some("cid-a"));
    assert!(!form.contains_key("client_secret"));
}

#[tokio::test]
async fn generic_provider_failures_record_the_http_status() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();
    write_json(
        &dir.path().join("accounts.json"),
        &json!({
            "busy@example.com": { "refresh_token": UNAVAILABLE, "client_id": "c" },
            "broken@example.com": { "refresh_token": "garbage", "client_id": "c" }
        }),
    );

    let report = refresher(&endpoint, &dir).run().await.unwrap();

    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].identity, "busy@example.com");
    assert_eq!(
        report.failed[0].reason,
        "provider rejected refresh: HTTP 503: temporarily_unavailable"
    );
    assert_eq!(report.failed[1].identity, "broken@example.com");
    assert!(report.failed[1].reason.contains("HTTP 500"));
    assert!(report.failed[1].reason.contains("upstream exploded"));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_failure() {
    let dir = TempDir::new().unwrap();
    write_json(
        &dir.path().join("accounts.json"),
        &json!({ "a@example.com": { "refresh_token": "good-a", "client_id": "c" } }),
    );
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = url::Url::parse(&format!("http://{}/token", listener.local_addr().unwrap())).unwrap();
    drop(listener);
    let refresher = Refresher::new(
        TokenEndpoint::new(reqwest::Client::new(), &closed).unwrap(),
        dir.path().join("accounts.json"),
        dir.path().join("refresh_report.json"),
        Duration::ZERO,
    );

    let report = refresher.run().await.unwrap();

    let reason = &report.failed[0].reason;
    assert!(reason.starts_with("request failed: "));
    assert_eq!(reason.matches("request failed").count(), 1);
}

#[tokio::test]
async fn store_is_left_untouched_when_nothing_refreshes() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();
    let store_path = dir.path().join("accounts.json");
    let original = r#"{"x@example.com":{"client_id":"c","refresh_token":"expired"}}"#;
    std::fs::write(&store_path, original).unwrap();

    let report = refresher(&endpoint, &dir).run().await.unwrap();

    assert_eq!(report.success, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(std::fs::read_to_string(&store_path).unwrap(), original);
}

#[tokio::test]
async fn unreadable_store_writes_a_fatal_report() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();

    let result = refresher(&endpoint, &dir).run().await;

    assert!(result.is_err());
    assert_eq!(endpoint.call_count(), 0);
    let report: RefreshReport = read_report(&dir.path().join("refresh_report.json")).unwrap();
    assert_eq!(report.total, 0);
    assert!(report.error.unwrap().contains("cannot read credential store"));
}

#[tokio::test]
async fn empty_store_is_a_successful_no_op() {
    let endpoint = FakeTokenEndpoint::start().await;
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("accounts.json"), "{}").unwrap();

    let report = refresher(&endpoint, &dir).run().await.unwrap();

    assert_eq!(report, RefreshReport::default());
    assert_eq!(endpoint.call_count(), 0);
}
