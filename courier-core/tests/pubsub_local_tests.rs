//! Tests for local publish/dispatch behavior

use courier_core::config::BackpressurePolicy;
use courier_core::pubsub::{
    diagnostics_channel, Bus, BusBuilder, DiagnosticEvent, DispatchState, FaultKind,
    HandlerResult, InboundMessage, MessageHandler, PubSubError, SubscriptionId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

type Received = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

fn collector<C: Send + Sync + 'static>(received: &Received) -> impl MessageHandler<C> {
    let received = received.clone();
    move |msg: &InboundMessage, _: &C| -> HandlerResult {
        received
            .lock()
            .unwrap()
            .push((msg.channel.clone(), msg.payload.clone()));
        Ok(())
    }
}

fn channels(received: &Received) -> Vec<String> {
    received.lock().unwrap().iter().map(|(c, _)| c.clone()).collect()
}

fn payloads(received: &Received) -> Vec<Vec<u8>> {
    received.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
}

fn started_bus() -> Bus {
    let bus = Bus::new();
    bus.start().unwrap();
    bus
}

async fn flush(bus: &Bus) {
    timeout(Duration::from_secs(2), bus.flush())
        .await
        .expect("flush timed out")
        .unwrap();
}

#[tokio::test]
async fn test_literal_subscription_receives_payload() {
    let bus = started_bus();
    let received = Received::default();
    bus.subscribe("odom", false, collector(&received), ()).unwrap();

    bus.publish("odom", &[0x01, 0x02]).await.unwrap();
    flush(&bus).await;

    assert_eq!(*received.lock().unwrap(), vec![("odom".to_string(), vec![0x01, 0x02])]);
    bus.stop().await;
}

#[tokio::test]
async fn test_literal_match_is_exact() {
    let bus = started_bus();
    let received = Received::default();
    bus.subscribe("odom", false, collector(&received), ()).unwrap();

    for channel in ["ODOM", "odom2", "odo", "xodom"] {
        bus.publish(channel, b"x").await.unwrap();
    }
    bus.publish("odom", b"x").await.unwrap();
    flush(&bus).await;

    assert_eq!(channels(&received), vec!["odom"]);
    bus.stop().await;
}

#[tokio::test]
async fn test_regex_subscription_full_match() {
    let bus = started_bus();
    let sensors = Received::default();
    let letters = Received::default();
    bus.subscribe("sensor\\..*", true, collector(&sensors), ()).unwrap();
    bus.subscribe("A.*", true, collector(&letters), ()).unwrap();

    for channel in ["sensor.temp", "sensors", "ABC", "xABC"] {
        bus.publish(channel, b"").await.unwrap();
    }
    flush(&bus).await;

    assert_eq!(channels(&sensors), vec!["sensor.temp"]);
    assert_eq!(channels(&letters), vec!["ABC"]);
    bus.stop().await;
}

#[tokio::test]
async fn test_invalid_regex_rejected_at_subscribe() {
    let bus: Bus = Bus::new();
    let received = Received::default();

    let result = bus.subscribe("sensor(", true, collector(&received), ());
    assert!(matches!(result, Err(PubSubError::InvalidPattern { .. })));

    let long = "p".repeat(33);
    let result = bus.subscribe(&long, false, collector(&received), ());
    assert!(matches!(result, Err(PubSubError::PatternTooLong { len: 33, max: 32 })));

    assert!(bus.subscriptions().is_empty());
}

#[tokio::test]
async fn test_subscribers_invoked_in_registration_order() {
    let bus: Bus<&'static str> = Bus::new();
    bus.start().unwrap();

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order = order.clone();
        bus.subscribe(
            "odom",
            false,
            move |_: &InboundMessage, ctx: &&'static str| -> HandlerResult {
                order.lock().unwrap().push(*ctx);
                Ok(())
            },
            name,
        )
        .unwrap();
    }

    bus.publish("odom", b"x").await.unwrap();
    timeout(Duration::from_secs(2), bus.flush()).await.unwrap().unwrap();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    bus.stop().await;
}

#[tokio::test]
async fn test_unsubscribe_before_publish() {
    let bus = started_bus();
    let a = Received::default();
    let b = Received::default();
    let id_a = bus.subscribe("odom", false, collector(&a), ()).unwrap();
    bus.subscribe("odom", false, collector(&b), ()).unwrap();

    bus.unsubscribe(id_a).unwrap();
    bus.publish("odom", b"x").await.unwrap();
    flush(&bus).await;

    assert!(a.lock().unwrap().is_empty());
    assert_eq!(b.lock().unwrap().len(), 1);
    assert!(matches!(bus.unsubscribe(id_a), Err(PubSubError::NotFound(_))));
    bus.stop().await;
}

#[tokio::test]
async fn test_foreign_handle_not_found() {
    let bus_a: Bus = Bus::new();
    let bus_b: Bus = Bus::new();
    let received = Received::default();

    let id: SubscriptionId = bus_a.subscribe("odom", false, collector(&received), ()).unwrap();
    assert!(matches!(bus_b.unsubscribe(id), Err(PubSubError::NotFound(_))));
    assert_eq!(bus_a.subscriptions().len(), 1);
}

#[tokio::test]
async fn test_messages_delivered_in_order() {
    let bus = started_bus();
    let received = Received::default();
    bus.subscribe("seq", false, collector(&received), ()).unwrap();

    let expected: Vec<Vec<u8>> = (0..100u32).map(|i| i.to_be_bytes().to_vec()).collect();
    for payload in &expected {
        bus.publish("seq", payload).await.unwrap();
    }
    flush(&bus).await;

    assert_eq!(payloads(&received), expected);
    let stats = bus.stats();
    assert_eq!(stats.published, 100);
    assert_eq!(stats.dispatched, 100);
    assert_eq!(stats.delivered, 100);
    bus.stop().await;
}

#[tokio::test]
async fn test_drop_newest_when_full() {
    let bus: Bus = BusBuilder::new()
        .queue_capacity(2)
        .backpressure(BackpressurePolicy::DropNewest)
        .build()
        .unwrap();
    let received = Received::default();
    bus.subscribe("c", false, collector(&received), ()).unwrap();

    for payload in [b"1", b"2", b"3"] {
        // Loopback drops are not errors
        bus.publish("c", payload).await.unwrap();
    }
    assert_eq!(bus.dropped_message_count(), 1);
    assert_eq!(bus.stats().queued, 2);

    bus.start().unwrap();
    flush(&bus).await;

    assert_eq!(payloads(&received), vec![b"1".to_vec(), b"2".to_vec()]);
    assert_eq!(bus.stats().dropped, 1);
    bus.stop().await;
}

#[tokio::test]
async fn test_drop_oldest_when_full() {
    let bus: Bus = BusBuilder::new()
        .queue_capacity(2)
        .backpressure(BackpressurePolicy::DropOldest)
        .build()
        .unwrap();
    let received = Received::default();
    bus.subscribe("c", false, collector(&received), ()).unwrap();

    for payload in [b"1", b"2", b"3"] {
        bus.publish("c", payload).await.unwrap();
    }
    assert_eq!(bus.dropped_message_count(), 1);

    bus.start().unwrap();
    flush(&bus).await;

    assert_eq!(payloads(&received), vec![b"2".to_vec(), b"3".to_vec()]);
    bus.stop().await;
}

#[tokio::test]
async fn test_block_policy_waits_for_room() {
    let bus: Bus = BusBuilder::new()
        .queue_capacity(1)
        .backpressure(BackpressurePolicy::Block)
        .build()
        .unwrap();
    let received = Received::default();
    bus.subscribe("c", false, collector(&received), ()).unwrap();

    bus.publish("c", b"1").await.unwrap();

    let publisher = bus.clone();
    let mut blocked = tokio::spawn(async move { publisher.publish("c", b"2").await });
    assert!(timeout(Duration::from_millis(50), &mut blocked).await.is_err());

    // try_publish never waits; under Block a full queue drops
    bus.try_publish("c", b"x").unwrap();
    assert_eq!(bus.dropped_message_count(), 1);

    bus.start().unwrap();
    timeout(Duration::from_secs(2), blocked).await.unwrap().unwrap().unwrap();
    flush(&bus).await;

    assert_eq!(payloads(&received), vec![b"1".to_vec(), b"2".to_vec()]);
    bus.stop().await;
}

#[tokio::test]
async fn test_faulting_callback_does_not_block_others() {
    let (sink, mut events) = diagnostics_channel(16);
    let bus: Bus = BusBuilder::new().diagnostics(sink).build().unwrap();
    bus.start().unwrap();

    let received = Received::default();
    let failing = bus
        .subscribe(
            "c",
            false,
            |_: &InboundMessage, _: &()| -> HandlerResult { Err("decode failed".into()) },
            (),
        )
        .unwrap();
    let panicking = bus
        .subscribe(
            "c",
            false,
            |_: &InboundMessage, _: &()| -> HandlerResult { panic!("handler bug") },
            (),
        )
        .unwrap();
    bus.subscribe("c", false, collector(&received), ()).unwrap();

    bus.publish("c", b"1").await.unwrap();
    bus.publish("c", b"2").await.unwrap();
    flush(&bus).await;

    assert_eq!(payloads(&received), vec![b"1".to_vec(), b"2".to_vec()]);
    let stats = bus.stats();
    assert_eq!(stats.callback_faults, 4);
    assert_eq!(stats.delivered, 2);
    assert_ne!(bus.state(), DispatchState::Stopped);

    let mut faults = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DiagnosticEvent::CallbackFault(fault) = event {
            faults.push((fault.subscription, fault.kind));
        }
    }
    assert_eq!(faults.len(), 4);
    assert_eq!(faults[0], (failing, FaultKind::Error("decode failed".to_string())));
    assert_eq!(faults[1], (panicking, FaultKind::Panic("handler bug".to_string())));
    bus.stop().await;
}

#[tokio::test]
async fn test_callbacks_can_reenter_the_bus() {
    let bus = started_bus();
    let echoes = Received::default();
    let own_id: Arc<Mutex<Option<SubscriptionId>>> = Arc::default();

    let weak = bus.downgrade();
    let own = own_id.clone();
    let echo_sink = echoes.clone();
    let id = bus
        .subscribe(
            "trigger",
            false,
            move |_: &InboundMessage, _: &()| -> HandlerResult {
                let bus = weak.upgrade().ok_or("bus gone")?;
                bus.subscribe("echo", false, collector(&echo_sink), ())?;
                if let Some(id) = own.lock().unwrap().take() {
                    bus.unsubscribe(id)?;
                }
                bus.try_publish("echo", b"hi")?;
                Ok(())
            },
            (),
        )
        .unwrap();
    *own_id.lock().unwrap() = Some(id);

    bus.publish("trigger", b"").await.unwrap();
    flush(&bus).await;
    // The echo was enqueued during dispatch; flush again to cover it
    flush(&bus).await;

    bus.publish("trigger", b"").await.unwrap();
    flush(&bus).await;

    assert_eq!(*echoes.lock().unwrap(), vec![("echo".to_string(), b"hi".to_vec())]);
    assert_eq!(bus.subscriptions().len(), 1);
    assert_eq!(bus.stats().callback_faults, 0);
    bus.stop().await;
}

#[tokio::test]
async fn test_pause_and_resume() {
    let bus = started_bus();
    let received = Received::default();
    bus.subscribe("c", false, collector(&received), ()).unwrap();

    bus.pause();
    assert!(bus.is_paused());
    bus.publish("c", b"1").await.unwrap();
    bus.publish("c", b"2").await.unwrap();

    assert!(timeout(Duration::from_millis(50), bus.flush()).await.is_err());
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(bus.state(), DispatchState::Paused);

    bus.resume();
    flush(&bus).await;
    assert_eq!(payloads(&received), vec![b"1".to_vec(), b"2".to_vec()]);
    bus.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_in_flight_dispatch_finish() {
    let bus = started_bus();
    let started = Arc::new(tokio::sync::Notify::new());
    let finished = Arc::new(Mutex::new(false));
    let received = Received::default();

    let (started_tx, finished_tx) = (started.clone(), finished.clone());
    bus.subscribe(
        "slow",
        false,
        move |_: &InboundMessage, _: &()| -> HandlerResult {
            started_tx.notify_one();
            std::thread::sleep(Duration::from_millis(100));
            *finished_tx.lock().unwrap() = true;
            Ok(())
        },
        (),
    )
    .unwrap();
    bus.subscribe("later", false, collector(&received), ()).unwrap();

    bus.publish("slow", b"").await.unwrap();
    bus.publish("later", b"").await.unwrap();
    timeout(Duration::from_secs(2), started.notified()).await.unwrap();

    timeout(Duration::from_secs(2), bus.stop()).await.unwrap();

    assert!(*finished.lock().unwrap());
    assert!(received.lock().unwrap().is_empty());
    assert_eq!(bus.state(), DispatchState::Stopped);
    assert!(matches!(bus.publish("later", b"").await, Err(PubSubError::Closed)));
}
