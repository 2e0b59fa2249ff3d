use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proxy_harvest::cycle::{Harvester, PollOutcome, RefreshOutcome};
use proxy_harvest::database::ProxyDatabase;
use proxy_harvest::models::{ProxyRecord, Subscription, SubscriptionKind};
use proxy_harvest::proxy::ProxyParser;
use proxy_harvest::Config;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ss_entry(host: &str) -> String {
    format!("ss://{}@{}:8388#{}", STANDARD.encode("chacha20-ietf-poly1305:pw"), host, host)
}

fn canonical(host: &str) -> String {
    ProxyParser::canonical_url(&ss_entry(host)).unwrap()
}

fn config(server: &MockServer) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        oracle_url: format!("{}/v1/test", server.uri()),
        country_api_url: format!("{}/alpha", server.uri()),
        connectivity_url: format!("{}/generate_204", server.uri()),
        workers: 8,
        feed_timeout: Duration::from_secs(5),
        oracle_timeout: Duration::from_secs(5),
        lookup_timeout: Duration::from_secs(5),
        connectivity_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

async fn harvester(server: &MockServer) -> (Harvester, ProxyDatabase) {
    let config = config(server);
    let db = ProxyDatabase::new(&config.database_url).await.unwrap();
    (Harvester::new(config, db.clone()).unwrap(), db)
}

async fn mount_self_check(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn mount_reachable(server: &MockServer, host: &str, location: &str, code: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/test"))
        .and(body_string_contains(host))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "YourFuckingIPAddress": host,
            "YourFuckingLocation": location,
            "YourFuckingCountryCode": code
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn refresh_is_skipped_when_self_check_fails() {
    let server = MockServer::start().await;
    mount_self_check(&server, 500).await;
    Mock::given(method("POST"))
        .and(path("/v1/test"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (harvester, db) = harvester(&server).await;
    let proxy = ProxyRecord::new(canonical("10.9.0.1"));
    db.insert_proxy(&proxy).await.unwrap();

    assert_eq!(harvester.run_status_refresh().await, RefreshOutcome::Skipped);

    let stored = db.get_proxy_by_url(&proxy.url).await.unwrap().unwrap();
    assert_eq!(stored.times_checked, 0);
    assert!(stored.last_checked.is_none());
}

#[tokio::test]
async fn refresh_updates_every_stored_proxy() {
    let server = MockServer::start().await;
    mount_self_check(&server, 204).await;
    mount_reachable(&server, "10.9.0.1", "Madrid, ES", "ES").await;
    Mock::given(method("POST"))
        .and(path("/v1/test"))
        .and(body_string_contains("10.9.0.2"))
        .respond_with(ResponseTemplate::new(504))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/alpha/es"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([{"name": {"common": "Spain"}}])),
        )
        .mount(&server)
        .await;

    let (harvester, db) = harvester(&server).await;
    let mut up = ProxyRecord::new(canonical("10.9.0.1"));
    up.times_checked = 3;
    up.times_check_succeeded = 1;
    let mut down = ProxyRecord::new(canonical("10.9.0.2"));
    down.is_active = true;
    down.location = "Lisbon, PT".to_string();
    db.insert_proxy(&up).await.unwrap();
    db.insert_proxy(&down).await.unwrap();

    let outcome = harvester.run_status_refresh().await;
    let RefreshOutcome::Completed { summary, persisted } = outcome else {
        panic!("refresh did not complete: {:?}", outcome);
    };
    assert_eq!((summary.checked, summary.active, summary.inactive), (2, 1, 1));
    assert_eq!(persisted.saved, 2);

    let up = db.get_proxy_by_url(&up.url).await.unwrap().unwrap();
    assert!(up.is_active);
    assert_eq!(up.location, "Madrid, ES");
    assert_eq!(up.location_country, "Spain");
    assert_eq!((up.times_checked, up.times_check_succeeded), (4, 2));

    let down = db.get_proxy_by_url(&down.url).await.unwrap().unwrap();
    assert!(!down.is_active);
    assert_eq!(down.location, "unknown");
    assert_eq!((down.times_checked, down.times_check_succeeded), (1, 0));
}

#[tokio::test]
async fn poll_discovers_new_proxies_and_isolates_failing_feeds() {
    let server = MockServer::start().await;
    mount_reachable(&server, "10.8.0.1", "Oslo, NO", "NO").await;
    mount_reachable(&server, "10.8.0.2", "Riga, LV", "LV").await;
    mount_reachable(&server, "10.8.0.9", "Rome, IT", "IT").await;

    let plain_body = format!("{}\n\nvless://not-shadowsocks@10.8.0.7:443\n{}\n", ss_entry("10.8.0.1"), ss_entry("10.8.0.9"));
    Mock::given(method("GET"))
        .and(path("/feeds/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string(plain_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feeds/b64"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            "{}\r\n%%%\r\n",
            STANDARD.encode(ss_entry("10.8.0.2"))
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feeds/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let (harvester, db) = harvester(&server).await;
    let known = ProxyRecord::new(canonical("10.8.0.9"));
    db.insert_proxy(&known).await.unwrap();

    let plain = Subscription::new(format!("{}/feeds/plain", server.uri()), SubscriptionKind::Plain);
    let b64 = Subscription::new(format!("{}/feeds/b64", server.uri()), SubscriptionKind::Base64);
    let broken = Subscription::new(format!("{}/feeds/broken", server.uri()), SubscriptionKind::Plain);
    let mut disabled = Subscription::new(format!("{}/feeds/disabled", server.uri()), SubscriptionKind::Plain);
    disabled.enabled = false;
    for subscription in [&plain, &b64, &broken, &disabled] {
        db.insert_subscription(subscription).await.unwrap();
    }

    let outcome = harvester.run_subscription_poll().await;
    let PollOutcome::Completed {
        feeds_alive,
        feeds_failed,
        discovered,
        persisted,
    } = outcome
    else {
        panic!("poll did not complete: {:?}", outcome);
    };
    assert_eq!((feeds_alive, feeds_failed), (2, 1));
    assert_eq!(discovered, 2);
    assert_eq!(persisted.saved, 2);

    let urls = db.get_proxy_urls().await.unwrap();
    assert_eq!(urls.len(), 3);
    assert!(urls.contains(&canonical("10.8.0.1")));
    assert!(urls.contains(&canonical("10.8.0.2")));

    let found = db.get_proxy_by_url(&canonical("10.8.0.2")).await.unwrap().unwrap();
    assert!(found.is_active);
    assert_eq!(found.location, "Riga, LV");
    assert_eq!((found.times_checked, found.times_check_succeeded), (1, 1));

    for url in [&plain.url, &b64.url] {
        let subscription = db.get_subscription_by_url(url).await.unwrap().unwrap();
        assert!(subscription.alive);
        assert!(subscription.error_message.is_empty());
        assert!(subscription.alive_timestamp.is_some());
    }

    let broken = db.get_subscription_by_url(&broken.url).await.unwrap().unwrap();
    assert!(!broken.alive);
    assert!(broken.error_message.contains("500 upstream down"));
    assert!(broken.alive_timestamp.is_none());

    let disabled = db.get_subscription_by_url(&disabled.url).await.unwrap().unwrap();
    assert!(disabled.alive_timestamp.is_none());

    // Neither the known proxy nor the non-Shadowsocks entry reached the oracle
    let requests = server.received_requests().await.unwrap();
    let oracle_bodies: Vec<String> = requests
        .iter()
        .filter(|r| r.url.path() == "/v1/test")
        .map(|r| String::from_utf8_lossy(&r.body).into_owned())
        .collect();
    assert_eq!(oracle_bodies.len(), 2);
    assert!(!oracle_bodies.iter().any(|b| b.contains("10.8.0.9") || b.contains("10.8.0.7")));
}

#[tokio::test]
async fn poll_with_no_subscriptions_completes() {
    let server = MockServer::start().await;
    let (harvester, _db) = harvester(&server).await;

    let outcome = harvester.run_subscription_poll().await;
    assert!(matches!(
        outcome,
        PollOutcome::Completed {
            feeds_alive: 0,
            feeds_failed: 0,
            discovered: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn both_cycles_run_on_spawned_tasks() {
    let server = MockServer::start().await;
    mount_self_check(&server, 204).await;
    mount_reachable(&server, "10.7.0.1", "Vienna, AT", "AT").await;
    Mock::given(method("GET"))
        .and(path("/feeds/spawned"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ss_entry("10.7.0.1")))
        .mount(&server)
        .await;

    let (harvester, db) = harvester(&server).await;
    let subscription = Subscription::new(format!("{}/feeds/spawned", server.uri()), SubscriptionKind::Plain);
    db.insert_subscription(&subscription).await.unwrap();
    let harvester = Arc::new(harvester);

    let poller = Arc::clone(&harvester);
    let poll = tokio::spawn(async move { poller.run_subscription_poll().await })
        .await
        .unwrap();
    assert!(matches!(poll, PollOutcome::Completed { discovered: 1, .. }));

    let refresher = Arc::clone(&harvester);
    let refresh = tokio::spawn(async move { refresher.run_status_refresh().await })
        .await
        .unwrap();
    let RefreshOutcome::Completed { summary, .. } = refresh else {
        panic!("refresh did not complete: {:?}", refresh);
    };
    assert_eq!((summary.checked, summary.active), (1, 1));

    let stored = db.get_proxy_by_url(&canonical("10.7.0.1")).await.unwrap().unwrap();
    assert_eq!((stored.times_checked, stored.times_check_succeeded), (2, 2));
}

#[tokio::test]
async fn selected_refresh_checks_repeated_url_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/test"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let (harvester, db) = harvester(&server).await;
    let proxy = ProxyRecord::new(canonical("10.6.0.1"));
    db.insert_proxy(&proxy).await.unwrap();

    let summary = harvester
        .refresh_selected(&[proxy.url.clone(), proxy.url.clone()])
        .await
        .unwrap();

    assert_eq!(summary.checked, 1);
    let stored = db.get_proxy_by_url(&proxy.url).await.unwrap().unwrap();
    assert_eq!(stored.times_checked, 1);
}
