//! Example: Local Pub/Sub
//!
//! This example demonstrates a single in-process bus:
//! - Literal and regex subscriptions with per-subscription context
//! - A faulting callback that does not disturb other subscribers
//! - Backpressure statistics

use courier_core::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-subscription state handed back on every delivery
#[derive(Debug, Default)]
struct Tally {
    name: &'static str,
    messages: AtomicU64,
    bytes: AtomicU64,
}

fn tally(msg: &InboundMessage, tally: &Arc<Tally>) -> HandlerResult {
    tally.messages.fetch_add(1, Ordering::Relaxed);
    tally.bytes.fetch_add(msg.size() as u64, Ordering::Relaxed);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,courier_core=info")),
        )
        .init();

    let bus: Bus<Arc<Tally>> = Bus::builder()
        .queue_capacity(64)
        .backpressure(BackpressurePolicy::DropOldest)
        .build()?;
    bus.start()?;

    let odom = Arc::new(Tally {
        name: "odom",
        ..Default::default()
    });
    let sensors = Arc::new(Tally {
        name: "sensors",
        ..Default::default()
    });

    bus.subscribe("odom", false, tally, odom.clone())?;
    bus.subscribe("sensor\\..*", true, tally, sensors.clone())?;
    bus.subscribe(
        "sensor\\.temp",
        true,
        |msg: &InboundMessage, _: &Arc<Tally>| -> HandlerResult {
            let text = std::str::from_utf8(&msg.payload)?;
            let celsius: f32 = text.parse()?;
            println!("temperature: {celsius:.1}°C");
            Ok(())
        },
        Arc::default(),
    )?;

    for i in 0..10u8 {
        bus.publish("odom", &[i, i + 1]).await?;
    }
    bus.publish("sensor.temp", b"21.5").await?;
    bus.publish("sensor.temp", b"not a number").await?;
    bus.publish("sensor.humidity", b"40").await?;
    bus.publish("sensors", b"ignored").await?;

    bus.flush().await?;

    for t in [&odom, &sensors] {
        println!(
            "{}: {} messages, {} bytes",
            t.name,
            t.messages.load(Ordering::Relaxed),
            t.bytes.load(Ordering::Relaxed)
        );
    }
    println!("{}", serde_json::to_string_pretty(&bus.stats())?);

    bus.stop().await;
    Ok(())
}
