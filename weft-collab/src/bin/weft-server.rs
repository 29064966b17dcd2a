//! Standalone collaborative editing server.
//!
//! ```text
//! weft-server [bind-addr]        default 127.0.0.1:9090
//! ```
//!
//! The bind address may also come from `WEFT_BIND_ADDR`. Documents live in
//! memory only; a restart loses all of them.

use weft_collab::server::{CollabServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let bind_addr = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("WEFT_BIND_ADDR").ok())
        .unwrap_or_else(|| "127.0.0.1:9090".to_owned());

    let server = CollabServer::new(ServerConfig {
        bind_addr,
        ..ServerConfig::default()
    });
    server.run().await
}
