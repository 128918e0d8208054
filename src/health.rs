//! HTTP health-check endpoint for orchestration tooling.
//!
//! Runs on its own thread with `rouille`, separate from the WebSocket relay.
//! It reports process status only and knows nothing about rooms.

use std::net::SocketAddr;
use std::sync::mpsc::Sender;
use std::thread::JoinHandle;

use rouille::{router, Request, Response, Server};
use serde_json::json;
use tracing::{debug, info};

use crate::error::RelayError;

pub struct HealthServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    stop: Sender<()>,
}

impl HealthServer {
    pub fn start(addr: SocketAddr) -> Result<HealthServer, RelayError> {
        let server = Server::new(addr, handle_request)
            .map_err(|e| RelayError::Health(e.to_string()))?;

        let addr = server.server_addr();
        info!("Health check listening on http://{}", addr);

        let (handle, stop) = server.stoppable();
        Ok(HealthServer { addr, handle, stop })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(self) {
        let _ = self.stop.send(());
        let _ = self.handle.join();
        debug!("Health check stopped");
    }
}

fn handle_request(request: &Request) -> Response {
    router!(request,
        (GET) (/) => {
            Response::json(&json!({
                "status": "ok",
                "message": "signaling relay running",
            }))
        },
        _ => Response::empty_404()
    )
}
