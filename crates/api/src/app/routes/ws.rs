//! WebSocket endpoint: authentication, upgrade, and the per-connection
//! read/write loops feeding the hub.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use flowra_core::UserId;
use flowra_realtime::{ClientConfig, ClientReceiver, client_pair};

use crate::app::AppState;
use crate::app::dto::{self, codes};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Bearer token from the `Authorization` header, or `?token=`.
fn extract_token(headers: &HeaderMap, query: &WsQuery) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.token.clone())
}

/// Token exchange is a collaborator concern; the core treats the token as
/// an opaque carrier of the authenticated user id.
fn resolve_user(token: &str) -> Option<UserId> {
    token.parse().ok()
}

/// GET /api/v1/ws
pub async fn upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = extract_token(&headers, &query).as_deref().and_then(resolve_user) else {
        return dto::error(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "missing or invalid token",
        );
    };

    let config = state.ws_config.clone();
    ws.max_message_size(config.max_message_size)
        .max_frame_size(config.max_message_size)
        .write_buffer_size(config.write_buffer_size)
        .on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: UserId) {
    let config = state.ws_config.clone();
    let (client, receiver) = client_pair(user_id, &config);
    let client_id = client.client_id();

    info!(user_id = %user_id, client_id = %client_id, "websocket connected");
    state.hub.register(client);

    let (sink, stream) = socket.split();
    let mut write_task = tokio::spawn(write_loop(sink, receiver, config.clone()));
    let mut read_task = tokio::spawn(read_loop(stream, config));

    // Whichever loop ends first takes the connection down with it.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    state.hub.unregister(user_id, client_id);
    info!(user_id = %user_id, client_id = %client_id, "websocket disconnected");
}

/// Drains the send queue, issues periodic pings, and enforces the write
/// deadline. Ends when the hub closes the queue or a write fails.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut receiver: ClientReceiver,
    config: ClientConfig,
) {
    let mut ping = tokio::time::interval(config.ping_interval);
    ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping.tick().await; // First tick fires immediately; skip it.

    loop {
        let frame = tokio::select! {
            staged = receiver.recv() => match staged {
                Some(message) => match serde_json::to_string(&message) {
                    Ok(text) => Message::Text(text),
                    Err(err) => {
                        warn!(error = %err, "dropping unserializable frame");
                        continue;
                    }
                },
                // Hub dropped the client (or is shutting down).
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        match tokio::time::timeout(config.write_deadline, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                debug!(error = %err, "write failed; closing");
                break;
            }
            Err(_) => {
                warn!("write deadline exceeded; closing");
                break;
            }
        }
    }
}

/// Consumes inbound frames under the read deadline. Inbound traffic
/// (including pongs) refreshes liveness; payload frames are not routed
/// anywhere yet.
async fn read_loop(mut stream: SplitStream<WebSocket>, config: ClientConfig) {
    loop {
        let frame = match tokio::time::timeout(config.read_deadline, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(err))) => {
                debug!(error = %err, "read failed; closing");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                debug!("read deadline exceeded; closing");
                return;
            }
        };

        match frame {
            Message::Close(_) => return,
            Message::Text(text) => {
                debug!(len = text.len(), "inbound text frame");
            }
            Message::Binary(bytes) => {
                debug!(len = bytes.len(), "inbound binary frame");
            }
            // The transport answers pings; pongs refresh the deadline.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins_over_query() {
        let user = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {user}").parse().unwrap(),
        );
        let query = WsQuery {
            token: Some("ignored".to_string()),
        };
        let token = extract_token(&headers, &query).unwrap();
        assert_eq!(resolve_user(&token), Some(user));
    }

    #[test]
    fn query_token_is_accepted_without_header() {
        let user = UserId::new();
        let query = WsQuery {
            token: Some(user.to_string()),
        };
        let token = extract_token(&HeaderMap::new(), &query).unwrap();
        assert_eq!(resolve_user(&token), Some(user));
    }

    #[test]
    fn garbage_tokens_do_not_resolve() {
        assert_eq!(resolve_user("not-a-user"), None);
        assert!(extract_token(&HeaderMap::new(), &WsQuery { token: None }).is_none());
    }
}
