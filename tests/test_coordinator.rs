mod common;
use common::*;
use voltronic_bridge::prelude::*;

use std::sync::Arc;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn starts_only_active_inverters() {
    common_setup();
    let mut disabled = Factory::inverter("spare");
    disabled.enabled = false;
    let mut unplugged = Factory::inverter("nowhere");
    unplugged.port = String::new();

    let config = Factory::config(vec![Factory::inverter("one"), disabled, unplugged]);
    let connector = Arc::new(MockConnector::new(&[("one", Behaviour::Normal)]));
    let mut coordinator = Coordinator::new(config, Channels::new(), connector);

    assert_eq!(coordinator.start(), 1);
    assert_eq!(coordinator.inverter_names(), vec!["one"]);
    assert!(coordinator.is_running("one"));
    assert!(!coordinator.is_running("spare"));
    assert!(!coordinator.is_running("nowhere"));

    // already running
    assert_eq!(coordinator.start(), 0);
    assert_eq!(coordinator.inverter_names().len(), 1);

    coordinator.stop().await;
    assert!(coordinator.inverter_names().is_empty());
    assert!(!coordinator.is_running("one"));
}

#[tokio::test]
async fn caps_inverter_count() {
    common_setup();
    // only the first three entries count, even when one of them is disabled
    let mut inverters: Vec<config::Inverter> =
        ["a", "b", "c", "d"].iter().map(|n| Factory::inverter(n)).collect();
    inverters[1].enabled = false;
    let config = Factory::config(inverters);
    let connector = Arc::new(MockConnector::new(&[]));
    let mut coordinator = Coordinator::new(config, Channels::new(), connector);

    assert_eq!(coordinator.start(), 2);
    assert_eq!(coordinator.inverter_names(), vec!["a", "c"]);
    assert!(!coordinator.is_running("d"));

    coordinator.stop().await;
}

#[tokio::test]
async fn failing_inverter_does_not_affect_others() {
    common_setup();
    let channels = Channels::new();
    let config = Factory::config_for(&["bad", "good", "mute"]);
    let connector = Arc::new(MockConnector::new(&[
        ("bad", Behaviour::Unplugged),
        ("good", Behaviour::Normal),
        ("mute", Behaviour::Silent),
    ]));
    let mut rx = channels.to_mqtt.subscribe();

    let mut coordinator = Coordinator::new(config, channels, connector.clone());
    assert_eq!(coordinator.start(), 3);

    let messages = collect_until(&mut rx, LIMIT, |m| {
        count(m, "good/state") >= 3 && count(m, "bad/last_error") >= 2 && count(m, "mute/state") >= 1
    })
    .await;

    for json in states(&messages, "good") {
        assert_eq!(json["ok"], true);
        assert_eq!(json["battery_capacity_pct"], 90);
    }
    assert_eq!(payloads(&messages, "good/availability"), vec!["online"]);
    assert_eq!(count(&messages, "good/last_error"), 0);

    assert_eq!(count(&messages, "bad/state"), 0);
    assert!(payloads(&messages, "bad/availability").iter().all(|p| *p == "offline"));

    assert_eq!(states(&messages, "mute")[0]["ok"], false);

    assert!(coordinator.is_running("bad"));
    assert!(coordinator.is_running("good"));
    assert_eq!(connector.opens("good"), 1);

    // let the monitor catch up before reading the counters
    tokio::time::sleep(Duration::from_millis(50)).await;
    {
        let stats = coordinator.stats.lock().unwrap();
        assert!(stats.inverters["good"].polls >= 3);
        assert_eq!(stats.inverters["good"].failed_polls, 0);
        assert_eq!(stats.inverters["good"].connects, 1);
        assert!(stats.inverters["bad"].disconnections >= 2);
        assert!(stats.inverters["bad"]
            .last_error
            .as_deref()
            .unwrap()
            .contains("/dev/ttybad"));
    }

    coordinator.stop().await;
}
