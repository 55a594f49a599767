//! Example: PLC status, CPU unit data and clock over FINS/TCP
//!
//! Run with: cargo run --example tcp_status -- 192.168.1.250
//!
//! Replies are printed as JSON.

use omron_fins_client::{ClientConfig, ClientEvent, FinsClient, Protocol, ReplyBody, RequestOptions};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let host = std::env::args().nth(1).unwrap_or_else(|| "192.168.1.250".to_string());
    let client = FinsClient::new(ClientConfig::new(host).with_protocol(Protocol::Tcp))?;
    let mut events = client.take_events().ok_or("event stream already taken")?;
    client.connect().await?;

    while let Ok(event) = events.try_recv() {
        if let ClientEvent::Open(remote) = event {
            println!(
                "connected to {}:{} as node {:?} (PLC node {:?})",
                remote.address, remote.port, remote.client_node, remote.server_node
            );
        }
    }

    let (status_options, status) = RequestOptions::new().reply_channel();
    let (unit_options, unit) = RequestOptions::new().reply_channel();
    let (clock_options, clock) = RequestOptions::new().reply_channel();
    client.status(status_options, None)?;
    client.cpu_unit_data_read(unit_options, None)?;
    client.clock_read(clock_options, None)?;

    for reply in [status.await?, unit.await?, clock.await?] {
        match reply {
            Ok(reply) => {
                if let ReplyBody::Status(status) = &reply.body {
                    if let Some(fatal) = &status.fatal_errors {
                        println!("fatal errors: {}", fatal.join(", "));
                    }
                }
                println!("{}", serde_json::to_string_pretty(&reply)?);
            }
            Err(failure) => println!("request {:?} failed: {failure}", failure.sid),
        }
    }

    client.close().await;
    Ok(())
}
