//! Send one query to an instrument and print the reply.
//!
//! Run with:
//!   cargo run --example query -- '{"network":{"host":"192.168.1.20","port":5025}}' '*IDN?'
//!
//! The first argument is a JSON connection config, or a path to a file holding
//! one. Set `LABHAL_LOG=debug` to see the bytes on the wire.

use std::time::Duration;

use labhal::logging::{init_logging, LogFormat, LogLevel};
use labhal::{connect, Collaborators, ConnectionParameters};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = match std::env::var("LABHAL_LOG") {
        Ok(value) => value.parse::<LogLevel>()?,
        Err(_) => LogLevel::Warn,
    };
    init_logging(LogFormat::Text, level);

    let mut args = std::env::args().skip(1);
    let config = args
        .next()
        .ok_or("usage: query <config-json | config-file> [command]")?;
    let command = args.next().unwrap_or_else(|| "*IDN?".to_string());

    let json = if config.trim_start().starts_with('{') {
        config
    } else {
        std::fs::read_to_string(&config)?
    };
    let params = ConnectionParameters::from_json(&json)?;
    eprintln!("Connecting to {} over {}", params.name(), params.kind());

    let mut handler = connect(&params, &Collaborators::new())?;
    let reply = handler.query(&command, Some(Duration::from_secs(5)), None)?;
    println!("{reply}");

    handler.transport_mut().close()?;
    Ok(())
}
