//! End-to-end tests for the Zenoh sink.
//!
//! Zenoh requires a multi-thread tokio runtime. Each test uses a unique key
//! prefix and a session with scouting disabled so tests stay local.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cecsight_bridge_framework::{Qos, Sink, ZenohSink};

/// Generate a unique test prefix to avoid test interference.
fn unique_prefix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("test_{}", nanos)
}

async fn local_session() -> Arc<zenoh::Session> {
    let mut config = zenoh::Config::default();
    config
        .insert_json5("scouting/multicast/enabled", "false")
        .expect("Failed to disable scouting");
    Arc::new(
        zenoh::open(config)
            .await
            .expect("Failed to open Zenoh session"),
    )
}

/// Wait until `received` holds `count` values or the deadline passes.
async fn wait_for(received: &Mutex<Vec<u32>>, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while received.lock().unwrap().len() < count && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_publishes_to_a_key_arrive_in_order() {
    const COUNT: u32 = 2000;

    let session = local_session().await;
    let key = format!("{}/living_room/power", unique_prefix());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_received = received.clone();
    let subscriber = session
        .declare_subscriber(&key)
        .callback(move |sample| {
            let text = String::from_utf8_lossy(&sample.payload().to_bytes()).into_owned();
            if let Ok(value) = text.parse::<u32>() {
                sink_received.lock().unwrap().push(value);
            }
        })
        .await
        .expect("Failed to create subscriber");

    let sink = ZenohSink::new(session.clone()).expect("Failed to create sink");
    for value in 0..COUNT {
        sink.publish_text(&key, Qos::AtLeastOnce, false, &value.to_string());
    }
    sink.close().await;

    wait_for(&received, COUNT as usize).await;
    let received = received.lock().unwrap().clone();

    assert_eq!(received.len(), COUNT as usize);
    assert!(
        received.windows(2).all(|pair| pair[0] < pair[1]),
        "publishes were reordered"
    );
    assert_eq!(received.last(), Some(&(COUNT - 1)));

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_retained_publishes_keep_the_last_value() {
    let session = local_session().await;
    let key = format!("{}/player/is_active_source", unique_prefix());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_received = received.clone();
    let subscriber = session
        .declare_subscriber(&key)
        .callback(move |sample| {
            let text = String::from_utf8_lossy(&sample.payload().to_bytes()).into_owned();
            if let Ok(value) = text.parse::<u32>() {
                sink_received.lock().unwrap().push(value);
            }
        })
        .await
        .expect("Failed to create subscriber");

    let sink = ZenohSink::new(session.clone()).expect("Failed to create sink");
    for value in 0..200u32 {
        sink.publish_text(&key, Qos::AtLeastOnce, true, &value.to_string());
    }
    // Flush before the writer drops the retained publishers
    sink.close().await;

    wait_for(&received, 200).await;
    let received = received.lock().unwrap().clone();

    assert_eq!(received, (0..200).collect::<Vec<_>>());

    drop(subscriber);
    session.close().await.expect("Failed to close session");
}
