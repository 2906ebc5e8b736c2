mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockSource, RecordingSink, config, notification, star};
use github_watcher::core::polling_engine::MAX_POLL_PERIOD;
use github_watcher::{AlertRoute, PollingEngine, WatchOptions};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

fn engine(source: &Arc<MockSource>, sink: &Arc<RecordingSink>) -> PollingEngine {
    PollingEngine::new(
        source.clone(),
        sink.clone(),
        WatchOptions::default(),
        AlertRoute::Instance(1),
    )
}

#[tokio::test]
async fn baseline_never_dispatches() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    source.set_notifications(vec![notification("n1"), notification("n2")]);
    source.set_repositories(&["octo/hello"]);
    source.set_stargazers("octo/hello", vec![star("octo/hello", "mona")]);

    let mut engine = engine(&source, &sink);
    let report = engine.baseline(&config(60, true)).await;

    assert_eq!(report.dispatched(), 0);
    assert_eq!(report.absorbed, 3);
    assert_eq!(sink.count(), 0);
    assert_eq!(engine.seen().notification_count(), 2);
    assert_eq!(engine.seen().star_count(), 1);
}

#[tokio::test]
async fn only_novel_notifications_dispatch_once() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);
    source.set_notifications(vec![notification("N1")]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    source.set_notifications(vec![notification("N1"), notification("N2")]);
    let first = engine.tick(&config).await;
    assert_eq!(first.notifications_dispatched, 1);
    assert_eq!(sink.titles(), vec!["[Issue] Subject N2"]);

    let second = engine.tick(&config).await;
    assert_eq!(second.dispatched(), 0);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn dispatched_identities_never_repeat() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    let mut listing = Vec::new();
    for i in 0..10 {
        listing.insert(0, notification(&format!("n{}", i)));
        source.set_notifications(listing.clone());
        let report = engine.tick(&config).await;
        assert_eq!(report.notifications_dispatched, 1);
    }

    let mut titles = sink.titles();
    assert_eq!(titles.len(), 10);
    titles.sort();
    titles.dedup();
    assert_eq!(titles.len(), 10);
}

#[tokio::test]
async fn duplicate_ids_within_one_listing_dispatch_once() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    source.set_notifications(vec![notification("n1"), notification("n1")]);
    engine.tick(&config).await;
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn novel_items_dispatch_in_listing_order() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_repositories(&["octo/hello"]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    source.set_notifications(vec![notification("b"), notification("a"), notification("c")]);
    source.set_stargazers(
        "octo/hello",
        vec![star("octo/hello", "zed"), star("octo/hello", "amy")],
    );
    engine.tick(&config).await;

    assert_eq!(
        sink.titles(),
        vec![
            "[Issue] Subject b",
            "[Issue] Subject a",
            "[Issue] Subject c",
            "New star on octo/hello",
            "New star on octo/hello",
        ]
    );
    let bodies: Vec<String> = sink.alerts().into_iter().skip(3).map(|a| a.body).collect();
    assert_eq!(bodies, vec!["zed starred octo/hello", "amy starred octo/hello"]);
}

#[tokio::test]
async fn stars_are_keyed_by_repository_and_user() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_repositories(&["octo/a", "octo/b"]);
    source.set_stargazers("octo/a", vec![star("octo/a", "mona")]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    // Same user starring a different repository is a new event.
    source.set_stargazers("octo/b", vec![star("octo/b", "mona")]);
    let report = engine.tick(&config).await;
    assert_eq!(report.stars_dispatched, 1);
    assert_eq!(sink.alerts()[0].body, "mona starred octo/b");

    let report = engine.tick(&config).await;
    assert_eq!(report.stars_dispatched, 0);
}

#[tokio::test]
async fn stars_are_never_fetched_when_not_watched() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);
    source.set_repositories(&["octo/hello"]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;
    for _ in 0..5 {
        engine.tick(&config).await;
    }

    assert_eq!(source.notification_calls(), 6);
    assert_eq!(source.repository_calls(), 0);
    assert_eq!(source.stargazer_calls(), 0);
}

#[tokio::test]
async fn failed_notification_fetch_does_not_stop_star_check() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_repositories(&["octo/hello"]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    source.fail_notifications(true);
    source.set_stargazers("octo/hello", vec![star("octo/hello", "mona")]);
    let report = engine.tick(&config).await;

    assert_eq!(report.failed_fetches, 1);
    assert_eq!(report.stars_dispatched, 1);
    assert_eq!(source.stargazer_calls(), 2);
}

#[tokio::test]
async fn failed_repository_does_not_block_the_others() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_repositories(&["octo/a", "octo/b", "octo/c"]);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    source.fail_stargazers_of("octo/b", true);
    source.set_stargazers("octo/a", vec![star("octo/a", "mona")]);
    source.set_stargazers("octo/c", vec![star("octo/c", "hubot")]);
    let report = engine.tick(&config).await;

    assert_eq!(report.failed_fetches, 1);
    assert_eq!(report.stars_dispatched, 2);
}

#[tokio::test]
async fn resource_missed_at_baseline_is_primed_silently() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_notifications(vec![notification("old")]);
    source.set_repositories(&["octo/hello"]);
    source.set_stargazers("octo/hello", vec![star("octo/hello", "mona")]);
    source.fail_notifications(true);
    source.fail_stargazers_of("octo/hello", true);

    let mut engine = engine(&source, &sink);
    let baseline = engine.baseline(&config).await;
    assert_eq!(baseline.failed_fetches, 2);

    source.fail_notifications(false);
    source.fail_stargazers_of("octo/hello", false);
    let report = engine.tick(&config).await;
    assert_eq!(report.dispatched(), 0);
    assert_eq!(report.absorbed, 2);

    source.set_notifications(vec![notification("new"), notification("old")]);
    let report = engine.tick(&config).await;
    assert_eq!(report.notifications_dispatched, 1);
    assert_eq!(sink.titles(), vec!["[Issue] Subject new"]);
}

#[tokio::test]
async fn rejected_alert_stays_seen() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);

    let mut engine = engine(&source, &sink);
    engine.baseline(&config).await;

    sink.reject(true);
    source.set_notifications(vec![notification("n1")]);
    let report = engine.tick(&config).await;
    assert_eq!(report.notifications_dispatched, 1);

    sink.reject(false);
    let report = engine.tick(&config).await;
    assert_eq!(report.notifications_dispatched, 0);
    assert_eq!(sink.count(), 1);
}

#[tokio::test]
async fn alerts_carry_the_route() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);

    let mut engine = PollingEngine::new(
        source.clone(),
        sink.clone(),
        WatchOptions::default(),
        AlertRoute::Delegate("AppToken".to_string()),
    );
    engine.baseline(&config).await;
    source.set_notifications(vec![notification("n1")]);
    engine.tick(&config).await;

    assert_eq!(
        sink.alerts()[0].route,
        AlertRoute::Delegate("AppToken".to_string())
    );
}

#[tokio::test]
async fn bounded_seen_state_never_resends_unchanged_stars() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, true);
    source.set_repositories(&["octo/a"]);
    source.set_stargazers(
        "octo/a",
        ["u1", "u2", "u3", "u4"].iter().map(|u| star("octo/a", u)).collect(),
    );

    let mut engine = PollingEngine::new(
        source.clone(),
        sink.clone(),
        WatchOptions {
            seen_capacity: Some(3),
            ..WatchOptions::default()
        },
        AlertRoute::Instance(1),
    );
    engine.baseline(&config).await;
    for _ in 0..3 {
        engine.tick(&config).await;
    }
    assert_eq!(sink.count(), 0);

    source.set_stargazers(
        "octo/a",
        ["u1", "u2", "u3", "u4", "u5"].iter().map(|u| star("octo/a", u)).collect(),
    );
    engine.tick(&config).await;
    engine.tick(&config).await;
    assert_eq!(sink.titles(), vec!["New star on octo/a"]);
    assert_eq!(sink.alerts()[0].body, "u5 starred octo/a");
}

#[tokio::test]
async fn bounded_seen_state_never_resends_listed_notifications() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let config = config(60, false);
    source.set_notifications(vec![notification("n1"), notification("n2"), notification("n3")]);

    let mut engine = PollingEngine::new(
        source.clone(),
        sink.clone(),
        WatchOptions {
            seen_capacity: Some(2),
            ..WatchOptions::default()
        },
        AlertRoute::Instance(1),
    );
    engine.baseline(&config).await;

    source.set_notifications(vec![
        notification("n4"),
        notification("n1"),
        notification("n2"),
        notification("n3"),
    ]);
    engine.tick(&config).await;
    engine.tick(&config).await;

    assert_eq!(sink.titles(), vec!["[Issue] Subject n4"]);
}

#[tokio::test(start_paused = true)]
async fn oversized_interval_keeps_the_loop_alive() {
    let source = Arc::new(MockSource::new());
    let sink = Arc::new(RecordingSink::new());
    let (_config_tx, config_rx) = watch::channel(config(i64::MAX, false));
    let cancel = CancellationToken::new();

    let task = tokio::spawn(engine(&source, &sink).run(config_rx, cancel.clone()));
    tokio::time::sleep(MAX_POLL_PERIOD + Duration::from_secs(1)).await;
    assert_eq!(source.notification_calls(), 1);

    cancel.cancel();
    assert!(task.await.is_ok());
}
