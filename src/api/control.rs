use serde::{Deserialize, Serialize};
use std::time::Duration;

use tiny_http::{Method, Request, Response, StatusCode};

use crate::api::json_response;
use crate::recorder::{OutputFormat, Recorder};

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
}

pub fn handle_control_request(mut req: Request, recorder: &Recorder) {
    if req.method() != &Method::Post {
        let _ = req.respond(Response::empty(StatusCode(405)));
        return;
    }

    let mut body = String::new();
    if let Err(err) = req.as_reader().read_to_string(&mut body) {
        let _ = req.respond(Response::from_string(err.to_string()).with_status_code(400));
        return;
    }

    let payload: ControlRequest = match serde_json::from_str(&body) {
        Ok(payload) => payload,
        Err(err) => {
            let _ = req.respond(Response::from_string(err.to_string()).with_status_code(400));
            return;
        }
    };

    let (ok, message) = dispatch_control(recorder, &payload.action, payload.value.as_ref());
    if ok {
        log::info!("[api] {}: {}", payload.action, message);
    } else {
        log::warn!("[api] {} rejected: {}", payload.action, message);
    }
    let body = serde_json::to_string(&ControlResponse { ok, message })
        .unwrap_or_else(|_| "{\"ok\":false,\"message\":\"serialization_error\"}".to_string());
    let _ = req.respond(json_response(body, StatusCode(200)));
}

pub fn dispatch_control(
    recorder: &Recorder,
    action: &str,
    value: Option<&serde_json::Value>,
) -> (bool, String) {
    match action {
        "start" => match recorder.start() {
            Ok(()) => (true, "recording started".to_string()),
            Err(err) => (false, format!("failed to start: {}", err)),
        },
        "stop" => match recorder.stop() {
            Ok(()) => (true, "recording stopped".to_string()),
            Err(err) => (false, format!("failed to stop: {}", err)),
        },
        "pause" => match recorder.pause() {
            Ok(()) => (true, "recording paused".to_string()),
            Err(err) => (false, format!("failed to pause: {}", err)),
        },
        "resume" => match recorder.resume() {
            Ok(()) => (true, "recording resumed".to_string()),
            Err(err) => (false, format!("failed to resume: {}", err)),
        },
        "set_device" => {
            let device = match value.and_then(|v| v.as_str()) {
                Some(d) => d,
                None => return (false, "missing value".to_string()),
            };
            match recorder.set_device(device) {
                Ok(()) => (true, format!("device set to '{}'", device.trim())),
                Err(err) => (false, err.to_string()),
            }
        }
        "set_format" => {
            let format: OutputFormat = match value.and_then(|v| v.as_str()).map(str::parse) {
                Some(Ok(f)) => f,
                Some(Err(err)) => return (false, err),
                None => return (false, "missing value".to_string()),
            };
            match recorder.set_format(format) {
                Ok(()) => (true, format!("format set to {}", format)),
                Err(err) => (false, err.to_string()),
            }
        }
        "set_retention" => {
            let days = match value.and_then(as_u64) {
                Some(d) => d,
                None => return (false, "value must be a whole number of days".to_string()),
            };
            match recorder.set_retention(days) {
                Ok(()) => (true, format!("retention set to {} days", days)),
                Err(err) => (false, err.to_string()),
            }
        }
        "set_segment_duration" => {
            let secs = match value.and_then(as_u64) {
                Some(s) => s,
                None => return (false, "value must be a whole number of seconds".to_string()),
            };
            match recorder.set_segment_duration(Duration::from_secs(secs)) {
                Ok(()) => (true, format!("segment duration set to {}s", secs)),
                Err(err) => (false, err.to_string()),
            }
        }
        "sweep" => {
            let report = recorder.sweep_now();
            (
                report.failed.is_empty(),
                format!(
                    "removed {} file(s), {} failure(s)",
                    report.deleted.len(),
                    report.failed.len()
                ),
            )
        }
        _ => (false, "unknown action".to_string()),
    }
}

// Accepts 7 as well as "7".
fn as_u64(value: &serde_json::Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
