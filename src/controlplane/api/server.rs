//! Operator HTTP Server
//!
//! Serves the operator router until shutdown is triggered.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;
use crate::controlplane::orchestrator::Orchestrator;

/// Operator HTTP server with broadcast-driven graceful shutdown
pub struct OpsServer {
    addr: SocketAddr,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl OpsServer {
    pub fn new(addr: SocketAddr, orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            addr,
            orchestrator,
            shutdown_tx,
        }
    }

    /// Bind and serve until [`Self::shutdown`] is called
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(self.orchestrator.clone()).build();
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind ops server: {}", e)))?;
        info!("Ops API listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Ops server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("Ops server error: {}", e)))?;
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
