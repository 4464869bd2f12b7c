use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use salvo::prelude::*;
use tracing::info;

use crate::bridge_store::BridgeStore;
use crate::config::Config;

pub mod handlers;
pub mod middleware;

use self::middleware::auth::admin_router;

/// Shared state carried to every admin handler through the salvo depot.
#[derive(Clone)]
pub struct AdminState {
    pub bridges: Arc<BridgeStore>,
    pub admin_token: Option<String>,
    pub booted_at: Instant,
}

/// The operator-facing HTTP surface: bridge provisioning plus a health
/// probe.
pub struct AdminApi {
    bind_addr: String,
    state: AdminState,
}

impl AdminApi {
    pub fn new(config: &Config, bridges: Arc<BridgeStore>) -> Self {
        Self {
            bind_addr: format!("{}:{}", config.web.bind_address, config.web.port),
            state: AdminState {
                bridges,
                admin_token: config.web.admin_token.clone(),
                booted_at: Instant::now(),
            },
        }
    }

    pub async fn serve(self) -> Result<()> {
        info!(addr = %self.bind_addr, "admin api listening");
        let acceptor = TcpListener::new(self.bind_addr).bind().await;
        Server::new(acceptor).serve(admin_router(self.state)).await;
        Ok(())
    }
}
