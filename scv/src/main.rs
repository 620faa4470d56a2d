mod server;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use scv_core::{logging, LoggingInjector, Manager, ServiceConfig};
use server::ScvServer;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = ServiceConfig::load(config_path.as_deref())?;

    logging::init_logging(&config.logging)?;
    info!("scv starting");

    let expiration_window = config
        .manager
        .expiration_window()
        .unwrap_or(Duration::from_secs(20 * 60));
    let manager = Manager::new(Arc::new(LoggingInjector), expiration_window);

    let server = ScvServer::new(manager, config.server.bind_addr.clone());
    server.run().await
}
