use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::recorder::Recorder;

pub mod control;
pub mod status;

/// HTTP control surface: `GET /api/status`, `GET /health`, `POST /api/control`.
pub struct ApiServer {
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start(bind: &str, recorder: Arc<Recorder>) -> anyhow::Result<Self> {
        let server = Arc::new(Server::http(bind).map_err(|e| anyhow::anyhow!(e))?);
        log::info!("[api] server on {}", bind);

        let srv = server.clone();
        let handle = thread::Builder::new().name("api".into()).spawn(move || {
            for req in srv.incoming_requests() {
                let url = req.url().to_string();
                let path = url.split_once('?').map(|(p, _)| p).unwrap_or(&url);

                match (req.method(), path) {
                    (&Method::Get, "/api/status") => {
                        status::handle_status_request(req, &recorder);
                    }
                    (&Method::Get, "/health") => {
                        status::handle_health_request(req, &recorder);
                    }
                    (_, "/api/control") => {
                        control::handle_control_request(req, &recorder);
                    }
                    _ => {
                        let _ = req.respond(Response::empty(StatusCode(404)));
                    }
                }
            }
            log::debug!("[api] server stopped");
        })?;

        Ok(Self {
            server,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn shutdown(&mut self) {
        self.server.unblock();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub(crate) fn json_response(body: String, status: StatusCode) -> Response<Cursor<Vec<u8>>> {
    let response = Response::from_string(body).with_status_code(status);
    match Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(h) => response.with_header(h),
        Err(()) => response,
    }
}
