use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Instant, interval};

use crate::app_context::AppContext;
use crate::ws::{NotificationHub, WsMessage, message_types};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn upgrade(
    State(context): State<Arc<AppContext>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(error) = context.auth.verify(&query.token) {
        return error.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(context, socket))
}

async fn handle_socket(context: Arc<AppContext>, socket: WebSocket) {
    let (connection_id, mut outbound) = match context.hub.register() {
        Ok(registered) => registered,
        Err(error) => {
            log::error!("ws registration failed: {error:#}");
            return;
        }
    };
    send_setup_burst(&context, connection_id).await;

    let (mut sink, mut stream) = socket.split();
    let mut ping_timer = interval(NotificationHub::PING_INTERVAL);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            queued = outbound.recv() => {
                // A closed channel means the hub dropped us (buffer overflow).
                let Some(message) = queued else { break };
                if sink
                    .send(Message::Text(message.to_json().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => last_pong = Instant::now(),
                    Some(Ok(Message::Text(text))) => {
                        if text.contains("\"pong\"") {
                            last_pong = Instant::now();
                        } else if text.contains("\"ping\"") {
                            let pong = WsMessage::new(message_types::PONG, json!({}));
                            if sink
                                .send(Message::Text(pong.to_json().into()))
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping_timer.tick() => {
                if last_pong.elapsed() > NotificationHub::PONG_DEADLINE {
                    log::debug!("ws connection {connection_id}: pong deadline missed");
                    break;
                }
                let ping = WsMessage::ping();
                if sink
                    .send(Message::Text(ping.to_json().into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }

    if let Err(error) = context.hub.unregister(connection_id) {
        log::warn!("ws connection {connection_id}: unregister failed: {error:#}");
    }
}

/// Initial state push so clients can render without extra REST round trips.
async fn send_setup_burst(context: &Arc<AppContext>, connection_id: u64) {
    match context.ai.queue_snapshot().await {
        Ok(queues) => {
            if let Ok(data) = serde_json::to_value(queues) {
                burst(context, connection_id, message_types::AI_QUEUE_STATUS, data);
            }
        }
        Err(error) => log::warn!("setup burst: queue snapshot failed: {error:#}"),
    }

    match context.storage.multi_stats().await {
        Ok(storage_stats) => {
            if let Ok(data) = serde_json::to_value(storage_stats) {
                burst(context, connection_id, message_types::STORAGE_STATS, data);
            }
        }
        Err(error) => log::warn!("setup burst: storage stats failed: {error}"),
    }

    match context.images.count_live().await {
        Ok(count) => burst(
            context,
            connection_id,
            message_types::IMAGE_COUNT,
            json!({ "count": count }),
        ),
        Err(error) => log::warn!("setup burst: image count failed: {error}"),
    }
}

fn burst(
    context: &Arc<AppContext>,
    connection_id: u64,
    message_type: &str,
    data: serde_json::Value,
) {
    if let Err(error) = context.hub.send_to(connection_id, message_type, data) {
        log::warn!("setup burst send failed: {error:#}");
    }
}
