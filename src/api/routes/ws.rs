//! Job progress streaming over WebSocket.
//!
//! Incoming frames: `{type: "subscribe"|"unsubscribe", payload: {jobId}}`
//! and `{type: "ping"}`. Outgoing frames: `job:progress`, `job:completed`,
//! `job:failed` and `pong`. Delivery is best-effort: a connection that
//! cannot keep up is dropped by the bus and must re-fetch the job on
//! reconnect.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::api::server::AppState;
use crate::progress::{BusMessage, JobEvent};

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(progress_ws))
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: FramePayload,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FramePayload {
    #[serde(default)]
    job_id: Option<String>,
}

async fn progress_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (subscriber_id, mut events) = state.bus.register();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
                            debug!("Invalid ws frame: {}", text);
                            continue;
                        };
                        match frame.kind.as_str() {
                            "subscribe" => {
                                if let Some(job_id) = frame.payload.job_id.as_deref() {
                                    state.bus.subscribe(subscriber_id, job_id);
                                    debug!(subscriber = subscriber_id, job_id, "Subscribed");
                                }
                            }
                            "unsubscribe" => {
                                if let Some(job_id) = frame.payload.job_id.as_deref() {
                                    state.bus.unsubscribe(subscriber_id, job_id);
                                }
                            }
                            "ping" => {
                                let pong = serde_json::json!({"type": "pong", "payload": {}});
                                if sender.send(Message::Text(pong.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            other => debug!("Unknown ws frame type: {}", other),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Some(message) => {
                        let frame = event_frame(&message);
                        if sender.send(Message::Text(frame.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                    // The bus dropped this subscriber (slow consumer) or
                    // the process is shutting down.
                    None => break,
                }
            }
        }
    }

    state.bus.unregister(subscriber_id);
    let _ = sender.close().await;
}

/// Map a bus event to its wire frame. `Cancelled` has no dedicated frame
/// type; clients observe it as a failure with a cancel message.
fn event_frame(message: &BusMessage) -> serde_json::Value {
    let job_id = &message.job_id;
    match &message.event {
        JobEvent::Progress {
            percent,
            current_operation,
            eta_seconds,
        } => {
            let mut payload = serde_json::json!({"jobId": job_id, "percent": percent});
            if let Some(op) = current_operation {
                payload["currentOperation"] = serde_json::json!(op);
            }
            if *eta_seconds > 0 {
                payload["eta"] = serde_json::json!(eta_seconds);
            }
            serde_json::json!({"type": "job:progress", "payload": payload})
        }
        JobEvent::Completed { output_file_id } => serde_json::json!({
            "type": "job:completed",
            "payload": {"jobId": job_id, "outputFileId": output_file_id},
        }),
        JobEvent::Failed { message } => serde_json::json!({
            "type": "job:failed",
            "payload": {"jobId": job_id, "error": message},
        }),
        JobEvent::Cancelled => serde_json::json!({
            "type": "job:failed",
            "payload": {"jobId": job_id, "error": "Job cancelled by user"},
        }),
    }
}
