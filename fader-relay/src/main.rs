//! Relay server binary. Thin bootstrap: logging, bind address, run.

use fader_relay::{RelayConfig, RelayServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // FADER_ADDR takes a full address; PORT alone binds all interfaces,
    // matching the original deployment environments.
    let bind_addr = std::env::var("FADER_ADDR")
        .or_else(|_| std::env::var("PORT").map(|port| format!("0.0.0.0:{port}")))
        .unwrap_or_else(|_| RelayConfig::default().bind_addr);

    let config = RelayConfig {
        bind_addr,
        ..RelayConfig::default()
    };
    RelayServer::new(config).run().await
}
