//! Polling loop against a scripted CloudWatcher.
//!
//! Covers publishing, per-error retry delays, gust tracking and shutdown.

mod common;

use std::time::Duration;

use aag_weather::{
    AagError, Config, CycleResult, PollStatus, SkyCondition, WeatherStore, WindCondition,
};
use aag_weather::protocol::encode_block;
use common::{answer, clear_night, scripted_poller, set_answer, ScriptedConnector};
use std::sync::atomic::Ordering;
use tokio::sync::Mutex;

#[tokio::test]
async fn poll_once_publishes_reading() {
    let connector = ScriptedConnector::new(clear_night());
    let config = Config::default();
    let (mut poller, query) = scripted_poller(&connector, &config);

    let (result, delay) = poller.poll_once().await;
    let CycleResult::Published(reading) = result else {
        panic!("expected a reading, got {:?}", result);
    };
    assert_eq!(delay, Duration::from_secs(60));
    assert_eq!(reading.sky_temp_c, -18.5);
    assert_eq!(reading.ambient_temp_c, 12.3);
    assert_eq!(reading.conditions.sky, SkyCondition::Clear);
    assert!(reading.conditions.safe);

    let snap = query.snapshot().await;
    assert_eq!(snap.status, PollStatus::Idle);
    assert!(!snap.stale);
    assert!(snap.last_error.is_none());
    assert_eq!(snap.device.unwrap().serial_number, "0042");
    assert_eq!(snap.reading.unwrap(), *reading);
}

#[tokio::test]
async fn unplugged_device_backs_off_then_recovers() {
    let connector = ScriptedConnector::new(clear_night());
    connector.unplug(true);
    let config = Config::default();
    let (poller, query) = scripted_poller(&connector, &config);
    let mut poller = poller.with_interval(Duration::from_secs(10), Duration::from_secs(30));

    let (result, delay) = poller.poll_once().await;
    assert!(matches!(result, CycleResult::Failed(AagError::Connection(_))));
    assert_eq!(delay, Duration::from_secs(10));

    let (_, delay) = poller.poll_once().await;
    assert_eq!(delay, Duration::from_secs(20));
    let (_, delay) = poller.poll_once().await;
    assert_eq!(delay, Duration::from_secs(30));

    let snap = query.snapshot().await;
    assert_eq!(snap.consecutive_failures, 3);
    assert_eq!(snap.last_error.as_ref().unwrap().kind, "connection");
    assert!(snap.reading.is_none());
    assert!(snap.stale);
    assert!(snap.device.is_none());

    connector.unplug(false);
    let (result, delay) = poller.poll_once().await;
    assert!(matches!(result, CycleResult::Published(_)));
    assert_eq!(delay, Duration::from_secs(10));

    let snap = query.snapshot().await;
    assert_eq!(snap.consecutive_failures, 0);
    assert!(snap.last_error.is_none());
    assert_eq!(snap.last_outcome, Some(PollStatus::Updated));
}

#[tokio::test]
async fn corrupt_frame_keeps_previous_reading() {
    let connector = ScriptedConnector::new(clear_night());
    let config = Config::default();
    let (mut poller, query) = scripted_poller(&connector, &config);

    assert!(matches!(poller.poll_once().await.0, CycleResult::Published(_)));

    set_answer(&connector.answers, "E!", answer(&[("R", "12x4")]));
    let (result, delay) = poller.poll_once().await;
    assert!(matches!(result, CycleResult::Failed(AagError::Decode(_))));
    assert_eq!(delay, Duration::from_secs(60));

    let snap = query.snapshot().await;
    assert_eq!(snap.status, PollStatus::Idle);
    assert_eq!(snap.last_outcome, Some(PollStatus::Failed));
    assert_eq!(snap.last_error.unwrap().kind, "decode");
    assert_eq!(snap.reading.unwrap().rain_frequency, 2600);
    assert_eq!(snap.consecutive_failures, 1);
}

#[tokio::test]
async fn implausible_value_is_validation_error() {
    let connector = ScriptedConnector::new(clear_night());
    set_answer(&connector.answers, "S!", answer(&[("1", "-20000")]));
    let config = Config::default();
    let (mut poller, query) = scripted_poller(&connector, &config);

    let (result, _) = poller.poll_once().await;
    assert!(matches!(
        result,
        CycleResult::Failed(AagError::Validation { field: "sky_temp_c", .. })
    ));
    assert_eq!(query.snapshot().await.last_error.unwrap().kind, "validation");
}

#[tokio::test]
async fn gust_carries_over_recent_readings() {
    let connector = ScriptedConnector::new(clear_night());
    set_answer(&connector.answers, "V!", answer(&[("w", "50")]));
    let config = Config::default();
    let (mut poller, _query) = scripted_poller(&connector, &config);

    let CycleResult::Published(strong) = poller.poll_once().await.0 else {
        panic!("expected a reading");
    };
    assert_eq!(strong.conditions.wind, WindCondition::VeryWindy);

    set_answer(&connector.answers, "V!", answer(&[("w", "12")]));
    let CycleResult::Published(calm) = poller.poll_once().await.0 else {
        panic!("expected a reading");
    };
    assert!((calm.wind_speed_kph.unwrap() - 13.08).abs() < 1e-9);
    assert!((calm.conditions.gust_kph.unwrap() - 45.0).abs() < 1e-9);
    assert_eq!(calm.conditions.wind, WindCondition::Gusty);
}

#[tokio::test]
async fn single_reading_gust_window_ignores_history() {
    let connector = ScriptedConnector::new(clear_night());
    set_answer(&connector.answers, "V!", answer(&[("w", "50")]));
    let mut config = Config::default();
    config.poll.gust_window = 1;
    let (mut poller, _query) = scripted_poller(&connector, &config);

    assert!(matches!(poller.poll_once().await.0, CycleResult::Published(_)));

    set_answer(&connector.answers, "V!", answer(&[("w", "12")]));
    let CycleResult::Published(calm) = poller.poll_once().await.0 else {
        panic!("expected a reading");
    };
    assert!((calm.conditions.gust_kph.unwrap() - 13.08).abs() < 1e-9);
    assert_eq!(calm.conditions.wind, WindCondition::Calm);
}

#[tokio::test]
async fn runaway_response_resyncs_next_cycle() {
    let connector = ScriptedConnector::new(clear_night());
    let mut flood = Vec::new();
    for _ in 0..9 {
        flood.extend_from_slice(&encode_block("1", "0"));
    }
    set_answer(&connector.answers, "S!", flood);
    let config = Config::default();
    let (mut poller, query) = scripted_poller(&connector, &config);

    let (result, _) = poller.poll_once().await;
    assert!(matches!(result, CycleResult::Failed(AagError::Decode(_))));

    set_answer(&connector.answers, "S!", answer(&[("1", "-1850")]));
    let (result, _) = poller.poll_once().await;
    let CycleResult::Published(reading) = result else {
        panic!("expected a reading, got {:?}", result);
    };
    assert_eq!(reading.sky_temp_c, -18.5);
    assert!(query.snapshot().await.last_error.is_none());
}

#[tokio::test]
async fn published_readings_are_stored() {
    let connector = ScriptedConnector::new(clear_night());
    let config = Config::default();
    let store = std::sync::Arc::new(Mutex::new(WeatherStore::open_in_memory().unwrap()));
    let (poller, _query) = scripted_poller(&connector, &config);
    let mut poller = poller.with_store(store.clone());

    poller.poll_once().await;
    set_answer(&connector.answers, "E!", answer(&[("R", "oops")]));
    poller.poll_once().await;

    assert_eq!(store.lock().await.count().unwrap(), 1);
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let connector = ScriptedConnector::new(clear_night());
    let config = Config::default();
    let (poller, query) = scripted_poller(&connector, &config);
    let poller = poller.with_interval(Duration::from_secs(3600), Duration::from_secs(3600));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let task = tokio::spawn(poller.run(shutdown_rx));

    // First cycle runs immediately.
    for _ in 0..100 {
        if query.latest().await.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(query.latest().await.is_some());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("poller did not stop")
        .unwrap();
}

#[tokio::test]
async fn shutdown_mid_cycle_returns_to_idle() {
    let connector = ScriptedConnector::new(clear_night());
    connector.open_delay_ms.store(300, Ordering::SeqCst);
    let config = Config::default();
    let (poller, query) = scripted_poller(&connector, &config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(());
    let task = tokio::spawn(poller.run(shutdown_rx));

    for _ in 0..100 {
        if query.snapshot().await.status == PollStatus::Polling {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(query.snapshot().await.status, PollStatus::Polling);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("poller did not stop")
        .unwrap();
    assert_eq!(query.snapshot().await.status, PollStatus::Idle);
}
