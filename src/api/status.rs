use tiny_http::{Request, StatusCode};

use crate::api::json_response;
use crate::recorder::Recorder;

pub fn handle_status_request(req: Request, recorder: &Recorder) {
    let status = recorder.status();
    let response = match serde_json::to_string(&status) {
        Ok(body) => json_response(body, StatusCode(200)),
        Err(err) => json_response(
            format!("{{\"error\":\"{}\"}}", err),
            StatusCode(500),
        ),
    };
    let _ = req.respond(response);
}

pub fn handle_health_request(req: Request, recorder: &Recorder) {
    let status = recorder.status();
    let healthy = status.last_error.is_none();
    let body = serde_json::json!({
        "ok": healthy,
        "mode": status.mode,
        "last_error": status.last_error,
    });
    let code = if healthy { StatusCode(200) } else { StatusCode(503) };
    let _ = req.respond(json_response(body.to_string(), code));
}
