use std::convert::Infallible;
use std::net::SocketAddr;

use log::info;
use warp::{Filter, Reply};

use super::routes;
use crate::error_handling::types::WebError;
use crate::session_management::CaptureController;

pub const DEFAULT_BIND: &str = "127.0.0.1:7878";

/// JSON control API over a [`CaptureController`].
pub struct WebServer {
    controller: CaptureController,
}

impl WebServer {
    pub fn new(controller: CaptureController) -> Self {
        Self { controller }
    }

    /// Every route, with rejections rendered as JSON errors.
    pub fn routes(&self) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
        let controller = self.controller.clone();
        routes::session_route(controller.clone())
            .or(routes::start_capture_route(controller.clone()))
            .or(routes::stop_capture_route(controller.clone()))
            .or(routes::import_route(controller.clone()))
            .or(routes::index_route(controller.clone()))
            .or(routes::progress_route(controller))
            .recover(routes::handle_rejection)
            .with(warp::log("tcpsplit::web"))
    }

    /// Serves the API on `addr` until the process exits.
    pub async fn start(&self, addr: SocketAddr) -> Result<(), WebError> {
        // Bind once first so a taken port is an error rather than a panic in warp
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| WebError::BindFailed(format!("{}: {}", addr, e)))?;
        drop(listener);

        info!("Control API listening on http://{}", addr);
        warp::serve(self.routes()).run(addr).await;
        Ok(())
    }
}

/// Parses a `host:port` bind address.
pub fn parse_bind(addr: &str) -> Result<SocketAddr, WebError> {
    addr.parse()
        .map_err(|e| WebError::BindFailed(format!("invalid address {}: {}", addr, e)))
}
