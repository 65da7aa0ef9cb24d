/// Messaging endpoints and the live push channel
///
/// REST handlers cover history and read state. `GET /messages/ws` upgrades to
/// a WebSocket that receives [`PushEvent`] frames as JSON text and accepts
/// [`ClientFrame`] frames for sending and marking read.
use super::{extract::JsonBody, middleware::extract_bearer_token};
use crate::{
    auth::{authenticate_token, AuthContext},
    context::AppContext,
    error::{PortalError, PortalResult},
    messaging::{
        ClientFrame, ConversationSummary, Message, ParticipantKind, PushEvent, SendMessageRequest,
    },
};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::{interval, timeout};

const SEND_TIMEOUT_MS: u64 = 5000;
const PING_INTERVAL_SECS: u64 = 30;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/messages/ws", get(connect))
        .route("/messages/conversations", get(list_conversations))
        .route("/messages/:user_id", get(get_conversation).post(send_message))
        .route("/messages/:user_id/read", post(mark_as_read))
}

async fn list_conversations(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> PortalResult<Json<Vec<ConversationSummary>>> {
    Ok(Json(ctx.messages.list_conversations(&auth.actor).await?))
}

async fn get_conversation(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(user_id): Path<String>,
) -> PortalResult<Json<Vec<Message>>> {
    Ok(Json(ctx.messages.conversation(&auth.actor, &user_id).await?))
}

async fn send_message(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(user_id): Path<String>,
    JsonBody(req): JsonBody<SendMessageRequest>,
) -> PortalResult<(StatusCode, Json<Message>)> {
    let message = ctx
        .messages
        .send(&auth.actor, &user_id, &req.content)
        .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarkReadResponse {
    updated: u64,
}

async fn mark_as_read(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Path(user_id): Path<String>,
) -> PortalResult<Json<MarkReadResponse>> {
    let updated = ctx.messages.mark_as_read(&auth.actor, &user_id).await?;
    Ok(Json(MarkReadResponse { updated }))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// Authenticate before upgrading; browsers cannot set headers on WebSocket
/// requests, so the token may also arrive as a query parameter.
async fn connect(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<ConnectParams>,
    State(ctx): State<AppContext>,
) -> PortalResult<Response> {
    let token = extract_bearer_token(&headers)
        .or(params.token)
        .ok_or_else(|| PortalError::Unauthorized("Missing access token".to_string()))?;
    let auth = authenticate_token(&ctx, &token).await?;
    ParticipantKind::for_role(auth.role())?;

    Ok(ws.on_upgrade(move |socket| handle_connection(socket, auth, ctx)))
}

async fn handle_connection(socket: WebSocket, auth: AuthContext, ctx: AppContext) {
    let account_id = auth.account_id().to_string();
    let (mut sender, mut receiver) = socket.split();
    let (connection_id, mut events) = ctx.connections.connect(&account_id).await;

    let mut ping_interval = interval(Duration::from_secs(PING_INTERVAL_SECS));

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    tracing::debug!("Connection {} dropped during send", connection_id);
                    break;
                }
            }

            _ = ping_interval.tick() => {
                if sender.send(WsMessage::Ping(vec![])).await.is_err() {
                    break;
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(e) = handle_frame(&ctx, &auth, &text).await {
                            let event = PushEvent::Error { message: e.to_string() };
                            if send_event(&mut sender, &event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::debug!("Client closed connection {}", connection_id);
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", connection_id, e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    ctx.connections.disconnect(&account_id, connection_id).await;
}

/// Apply one client frame; results reach the client as push events
async fn handle_frame(ctx: &AppContext, auth: &AuthContext, text: &str) -> PortalResult<()> {
    let frame: ClientFrame = serde_json::from_str(text)
        .map_err(|e| PortalError::Validation(format!("Invalid frame: {}", e)))?;

    match frame {
        ClientFrame::Send {
            receiver_id,
            content,
        } => {
            ctx.messages
                .send(&auth.actor, &receiver_id, &content)
                .await?;
        }
        ClientFrame::MarkRead { sender_id } => {
            ctx.messages.mark_as_read(&auth.actor, &sender_id).await?;
        }
    }
    Ok(())
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, WsMessage>,
    event: &PushEvent,
) -> Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    match timeout(
        Duration::from_millis(SEND_TIMEOUT_MS),
        sender.send(WsMessage::Text(json)),
    )
    .await
    {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}
