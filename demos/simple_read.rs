//! Example: Reading data from PLC memory over UDP
//!
//! Run with: cargo run --example simple_read -- 192.168.1.250
//!
//! This example demonstrates:
//! - Awaiting a single reply through a reply channel
//! - Firing several tagged requests and collecting them from the event stream
//! - Reading several unrelated addresses in one request
//!
//! Set `RUST_LOG=omron_fins_client=trace` to see every frame.

use std::time::Duration;

use omron_fins_client::{ClientConfig, ClientEvent, FinsClient, RequestOptions};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.250".to_string());

    // =========================================================================
    // Connect to PLC
    // =========================================================================

    let config = ClientConfig::new(host).with_timeout(Duration::from_secs(1));
    let client = FinsClient::new(config)?;
    let mut events = client.take_events().ok_or("event stream already taken")?;
    client.connect().await?;

    // =========================================================================
    // One request, one reply
    // =========================================================================

    let (options, reply) = RequestOptions::new().reply_channel();
    client.read("D100", 5, options, None)?;
    match reply.await? {
        Ok(reply) => println!("D100-D104: {:?} ({})", reply.values(), reply.end_code),
        Err(failure) => println!("D100 read failed: {failure}"),
    }

    // =========================================================================
    // Many requests, replies on the event stream
    // =========================================================================

    let mut pending = 0;
    for address in ["CIO0", "W0", "H0", "A0", "CIO0.05"] {
        client.read(address, 1, RequestOptions::new(), Some(json!(address)))?;
        pending += 1;
    }
    client.read_multiple(&["D10", "CIO20.0", "T5.x"], RequestOptions::new(), Some(json!("multi")))?;
    pending += 1;

    while pending > 0 {
        match events.recv().await {
            Some(ClientEvent::Reply(reply)) => {
                println!("{}: {:?} in {:?}", reply.tag.clone().unwrap_or_default(), reply.values(), reply.time_taken);
                pending -= 1;
            }
            Some(ClientEvent::Error(failure)) => {
                println!("{:?} failed: {failure}", failure.tag);
                if failure.sid.is_some() {
                    pending -= 1;
                }
            }
            Some(_) => {}
            None => break,
        }
    }

    let stats = client.stats();
    println!(
        "\n{} replies, {} errors, {} timeouts, average {:.1} ms",
        stats.reply_count, stats.error_count, stats.timeout_count, stats.average_reply_ms
    );

    client.close().await;
    Ok(())
}
