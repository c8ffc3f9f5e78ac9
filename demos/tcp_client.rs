//! Sample TCP client.
//!
//! Sends `MessageDto`s from `tcp-client` through a pooled outbound gateway
//! and prints each reply.
//!
//! Configured through the environment (`TCP_SERVER_HOST`, `TCP_SERVER_PORT`,
//! `TCP_CLIENT_POOL_SIZE`, ...). Start `tcp_server` first.
//!
//! Usage:
//!   cargo run --example tcp_client
//!   cargo run --example tcp_client -- --count 20
//!   cargo run --example tcp_client -- --debug

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use common::Args;
use tcp_gateway::{ClientConfig, ConnectionPool, MessageDto, OutboundGateway, Result};

// ============================================================================
// Constants
// ============================================================================

const SENDER: &str = "tcp-client";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== TCP Client ===\n");

    let config = ClientConfig::from_env()?;
    let pool = ConnectionPool::connect(config.endpoint(), config.pool_options())?;
    let gateway = OutboundGateway::new(Arc::new(pool), config.gateway_options())?;

    println!("[Target] {} (pool size {})\n", config.endpoint(), config.pool_size);

    // ========================================================================
    // Concurrent sends
    // ========================================================================

    let started = Instant::now();
    let mut tasks = Vec::with_capacity(args.count);

    for n in 0..args.count {
        let gateway = gateway.clone();
        tasks.push(tokio::spawn(async move {
            let request = MessageDto::new(format!("Hello from TCP client #{n}"), SENDER);
            let reply: MessageDto = gateway.send_json(&request).await?;
            Ok::<_, tcp_gateway::Error>((n, reply))
        }));
    }

    for task in tasks {
        match task.await {
            Ok(Ok((n, reply))) => {
                println!("[#{n}] {} ({}, {})", reply.message, reply.sender, reply.timestamp);
            }
            Ok(Err(e)) => println!("[FAIL] {e}"),
            Err(e) => println!("[FAIL] task: {e}"),
        }
    }

    let status = gateway.pool().status();
    println!(
        "\n[Pool] idle={} busy={} live={}/{}",
        status.idle,
        status.busy,
        status.live(),
        status.capacity
    );
    println!("        ✓ {} messages in {:?}", args.count, started.elapsed());

    gateway.pool().close();
    println!("\n=== Done ===");
    Ok(())
}
