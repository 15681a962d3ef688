//! Example: Several Buses on One Hub
//!
//! Three buses share an in-process hub. Each publication reaches the
//! publisher's own subscribers through loopback and every other bus through
//! the hub, exactly once.

use courier_core::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let hub = MemoryHub::new();
    let mut nodes: Vec<Bus<String>> = Vec::new();

    for name in ["planner", "controller", "logger"] {
        let bus: Bus<String> = Bus::builder().transport(hub.transport()).build()?;
        bus.start()?;
        bus.subscribe(
            "status\\..*",
            true,
            |msg: &InboundMessage, node: &String| -> HandlerResult {
                println!(
                    "[{node}] {} = {}",
                    msg.channel,
                    String::from_utf8_lossy(&msg.payload)
                );
                Ok(())
            },
            name.to_string(),
        )?;
        nodes.push(bus);
    }

    nodes[0].publish("status.planner", b"ready").await?;
    nodes[1].publish("status.controller", b"armed").await?;

    for bus in &nodes {
        bus.flush().await?;
    }
    for bus in &nodes {
        bus.stop().await;
    }

    println!("nodes left on hub: {}", hub.node_count());
    Ok(())
}
