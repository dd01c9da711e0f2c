//! Publish fan-out vs. broadcast fallback.

use bamboo::testing::LoopbackTransport;
use bamboo::Runtime;
use bamboo_core::config::RuntimeConfig;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn fast_runtime(network: &str, peer: &str) -> Runtime<std::sync::Arc<LoopbackTransport>> {
    let transport = LoopbackTransport::new(network, peer);
    Runtime::new(peer, transport, RuntimeConfig::fast_test())
}

#[compio::test]
async fn publish_fans_out_to_every_subscriber() {
    let a = fast_runtime("net-fanout", "A");
    let b = fast_runtime("net-fanout", "B");
    let c = fast_runtime("net-fanout", "C");

    let a_count = Arc::new(AtomicUsize::new(0));
    let c_count = Arc::new(AtomicUsize::new(0));
    let a_clone = a_count.clone();
    let c_clone = c_count.clone();

    a.listen("demo", move |_msg| {
        let counter = a_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await
    .unwrap();

    c.listen("demo", move |_msg| {
        let counter = c_clone.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await
    .unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();
    c.start().await.unwrap();

    // Give B's dispatcher time to record both SUBSCRIBEs.
    compio::time::sleep(Duration::from_millis(30)).await;

    let recipients = b.publish("demo", Map::new()).await.unwrap();
    assert_eq!(recipients, 2);

    compio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(a_count.load(Ordering::SeqCst), 1);
    assert_eq!(c_count.load(Ordering::SeqCst), 1);

    a.stop().await.unwrap();
    b.stop().await.unwrap();
    c.stop().await.unwrap();
}

#[compio::test]
async fn publish_falls_back_to_broadcast_with_no_subscribers() {
    let b = fast_runtime("net-broadcast-fallback", "B");
    b.start().await.unwrap();

    let recipients = b.publish("demo", Map::new()).await.unwrap();
    assert_eq!(recipients, 0);

    b.stop().await.unwrap();
}

#[compio::test]
async fn payload_is_delivered_to_handler() {
    let a = fast_runtime("net-payload", "A");
    let b = fast_runtime("net-payload", "B");

    let received: Arc<std::sync::Mutex<Option<Value>>> = Arc::new(std::sync::Mutex::new(None));
    let received_clone = received.clone();

    a.listen("demo", move |msg| {
        let received = received_clone.clone();
        async move {
            *received.lock().unwrap() = Some(Value::Object(msg.envelope.payload));
            Ok(())
        }
    })
    .await
    .unwrap();

    a.start().await.unwrap();
    b.start().await.unwrap();
    compio::time::sleep(Duration::from_millis(30)).await;

    let mut payload = Map::new();
    payload.insert("n".to_string(), Value::from(1));
    b.publish("demo", payload).await.unwrap();

    compio::time::sleep(Duration::from_millis(30)).await;
    let got = received.lock().unwrap().clone().unwrap();
    assert_eq!(got["n"], Value::from(1));

    a.stop().await.unwrap();
    b.stop().await.unwrap();
}
