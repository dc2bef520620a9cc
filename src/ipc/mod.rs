//! WebSocket JSON-RPC 2.0 server and connection lifecycle.
//!
//! Every connection must authenticate before anything else: the first frame
//! has to be an `auth.identify` call carrying a bearer token, which resolves
//! to an [`ActorId`] through the identity provider. On success the connection
//! is registered with the room registry and from then on receives both RPC
//! responses and the domain events its channels entitle it to, over the same
//! socket. Closing the socket (or any stream error) releases the
//! registration — deliveries stop promptly, and a second release is a no-op.

pub mod handlers;

use crate::authz::AccessError;
use crate::identity::{ActorId, AuthError, IdentityProvider as _};
use crate::membership::MembershipStore as _;
use crate::rooms::ConnectionId;
use crate::storage::InvariantViolation;
use crate::AppContext;
use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

// ─── JSON-RPC 2.0 types ──────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

// ─── Error codes ─────────────────────────────────────────────────────────────
//
// unauthenticated = -32001  (no or invalid identity — fatal, not retried)
// notFound        = -32002  (resource absent, or present but invisible)
// forbidden       = -32003  (resource visible but the operation is denied)

const PARSE_ERROR: i32 = -32700;
const INVALID_REQUEST: i32 = -32600;
const METHOD_NOT_FOUND: i32 = -32601;
const INVALID_PARAMS: i32 = -32602;
const INTERNAL_ERROR: i32 = -32603;
const UNAUTHENTICATED: i32 = -32001;
const NOT_FOUND: i32 = -32002;
const FORBIDDEN: i32 = -32003;

// ─── Server ──────────────────────────────────────────────────────────────────

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "server listening (WebSocket + HTTP health on same port)");

    // Graceful shutdown: resolve on SIGTERM (Unix) or Ctrl-C (all platforms).
    // Pinned so we can use it in the select! loop without moving.
    let shutdown = make_shutdown_future();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => {
                info!("shutdown signal received — stopping server");
                break;
            }

            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(c) => c,
                    Err(e) => {
                        error!(err = %e, "accept error");
                        continue;
                    }
                };
                debug!(peer = %peer, "new connection");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, ctx).await {
                        warn!(peer = %peer, err = %e, "connection error");
                    }
                });
            }
        }
    }

    info!("server stopped");
    Ok(())
}

/// Respond to an HTTP `GET /health` request with a JSON status document.
///
/// The daemon shares one port for both WebSocket (JSON-RPC) and a plain
/// HTTP health endpoint so load balancers can check liveness without a WS
/// library.
async fn handle_health_check(mut stream: tokio::net::TcpStream, ctx: &AppContext) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Consume the request (we don't inspect it — any GET /health is fine).
    let mut req_buf = vec![0u8; 2048];
    let _ = stream.read(&mut req_buf).await;

    let uptime_secs = ctx.started_at.elapsed().as_secs();
    let connections = ctx.rooms.connection_count().await;
    let body = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime_secs,
        "activeConnections": connections,
        "port": ctx.config.port,
    });
    let body_str = body.to_string();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body_str.len(),
        body_str
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Returns a future that resolves when a shutdown signal is received.
///
/// On Unix we listen for SIGTERM *and* Ctrl-C.
/// On other platforms we listen for Ctrl-C only.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    // Peek at the first bytes to distinguish HTTP health checks from
    // WebSocket upgrades — both share the same port. All GET requests other
    // than /health fall through to the WS handshake as normal.
    let mut peek_buf = [0u8; 12];
    let n = stream.peek(&mut peek_buf).await.unwrap_or(0);
    if n >= 11 && &peek_buf[..11] == b"GET /health" {
        return handle_health_check(stream, &ctx).await;
    }

    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // ── Auth challenge ───────────────────────────────────────────────────────
    // The first message from every client must be an `auth.identify` RPC call
    // carrying a bearer token issued by the identity service. Nothing else is
    // dispatched until the actor is known.
    let first = tokio::time::timeout(std::time::Duration::from_secs(10), stream.next()).await;

    let text = match first {
        Ok(Some(Ok(Message::Text(t)))) => t,
        // Timeout, connection closed, or non-text frame — reject silently.
        _ => return Ok(()),
    };

    let req: RpcRequest = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(_) => {
            let _ = sink
                .send(Message::Text(error_response(
                    Value::Null,
                    PARSE_ERROR,
                    "Parse error",
                )))
                .await;
            return Ok(());
        }
    };

    let id = req.id.clone().unwrap_or(Value::Null);

    if req.method != "auth.identify" {
        let _ = sink
            .send(Message::Text(error_response(
                id,
                UNAUTHENTICATED,
                "Unauthenticated — send auth.identify first",
            )))
            .await;
        return Ok(());
    }

    let token = req
        .params
        .as_ref()
        .and_then(|p| p.get("token"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let actor = match ctx.storage.verify(token).await {
        Ok(actor) => actor,
        Err(e) => {
            let _ = sink
                .send(Message::Text(error_response(
                    id,
                    UNAUTHENTICATED,
                    &e.to_string(),
                )))
                .await;
            return Ok(());
        }
    };

    // ── Registration ─────────────────────────────────────────────────────────
    // Subscriptions are recomputed from current membership on every connect;
    // nothing about them survives a disconnect.
    let projects = ctx.storage.projects_for(&actor).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn_id = ConnectionId::generate();
    let channels = ctx
        .rooms
        .connect(conn_id.clone(), actor.clone(), tx, &projects)
        .await;

    let resp = serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "authenticated": true,
            "userId": actor.as_str(),
            "channels": channels.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        }
    });
    let _ = sink.send(Message::Text(resp.to_string())).await;
    debug!(conn = %conn_id, actor = %actor, "client authenticated");

    loop {
        tokio::select! {
            // Incoming message from client
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = dispatch_text(&text, &actor, &ctx).await;
                        if let Err(e) = sink.send(Message::Text(response)).await {
                            warn!(err = %e, "send error");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Outgoing event from the fan-out dispatcher
            event = rx.recv() => {
                match event {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            warn!(err = %e, "event send error");
                            break;
                        }
                    }
                    // Registry dropped our sender — nothing left to deliver.
                    None => break,
                }
            }
        }
    }

    // Releases all subscriptions; idempotent if the socket errored twice.
    ctx.rooms.disconnect(&conn_id).await;
    debug!(conn = %conn_id, actor = %actor, "client disconnected");
    Ok(())
}

pub(crate) async fn dispatch_text(text: &str, actor: &ActorId, ctx: &AppContext) -> String {
    let req: RpcRequest = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(_) => {
            return error_response(Value::Null, PARSE_ERROR, "Parse error");
        }
    };

    if req.jsonrpc != "2.0" {
        return error_response(
            req.id.unwrap_or(Value::Null),
            INVALID_REQUEST,
            "Invalid Request",
        );
    }

    let id = req.id.unwrap_or(Value::Null);
    let params = req.params.unwrap_or(Value::Null);

    debug!(method = %req.method, actor = %actor, "rpc dispatch");

    let result = dispatch(&req.method, params, actor, ctx).await;

    match result {
        Ok(value) => {
            let resp = RpcResponse {
                jsonrpc: "2.0",
                id,
                result: Some(value),
                error: None,
            };
            serde_json::to_string(&resp).unwrap_or_default()
        }
        Err(e) => {
            let (code, msg) = classify_error(&e);
            error_response(id, code, &msg)
        }
    }
}

async fn dispatch(
    method: &str,
    params: Value,
    actor: &ActorId,
    ctx: &AppContext,
) -> anyhow::Result<Value> {
    match method {
        "daemon.ping" => handlers::daemon::ping(params, ctx).await,
        "daemon.status" => handlers::daemon::status(params, ctx).await,
        "project.list" => handlers::projects::list(actor, params, ctx).await,
        "project.get" => handlers::projects::get(actor, params, ctx).await,
        "project.create" => handlers::projects::create(actor, params, ctx).await,
        "project.update" => handlers::projects::update(actor, params, ctx).await,
        "project.delete" => handlers::projects::delete(actor, params, ctx).await,
        "project.addMember" => handlers::projects::add_member(actor, params, ctx).await,
        "project.removeMember" => handlers::projects::remove_member(actor, params, ctx).await,
        "task.list" => handlers::tasks::list(actor, params, ctx).await,
        "task.get" => handlers::tasks::get(actor, params, ctx).await,
        "task.create" => handlers::tasks::create(actor, params, ctx).await,
        "task.update" => handlers::tasks::update(actor, params, ctx).await,
        "task.delete" => handlers::tasks::delete(actor, params, ctx).await,
        "comment.create" => handlers::comments::create(actor, params, ctx).await,
        "comment.update" => handlers::comments::update(actor, params, ctx).await,
        "comment.delete" => handlers::comments::delete(actor, params, ctx).await,
        "notification.list" => handlers::notifications::list(actor, params, ctx).await,
        "notification.markRead" => handlers::notifications::mark_read(actor, params, ctx).await,
        "notification.markAllRead" => {
            handlers::notifications::mark_all_read(actor, params, ctx).await
        }
        _ => Err(anyhow::anyhow!("METHOD_NOT_FOUND:{}", method)),
    }
}

fn classify_error(e: &anyhow::Error) -> (i32, String) {
    // Typed denials from the decision functions — returned, never thrown,
    // until the handler converts them for propagation.
    if let Some(access) = e.downcast_ref::<AccessError>() {
        return match access {
            AccessError::NotFound => (NOT_FOUND, "Not found".to_string()),
            AccessError::Forbidden => (FORBIDDEN, "Forbidden".to_string()),
        };
    }
    if e.downcast_ref::<AuthError>().is_some() {
        return (UNAUTHENTICATED, "Authentication required".to_string());
    }
    // A broken data-model invariant is a bug in the calling layer. Log it
    // loudly and surface a generic internal error — it must not leak
    // resource existence to the actor.
    if let Some(violation) = e.downcast_ref::<InvariantViolation>() {
        error!(err = %violation, "invariant violation");
        return (INTERNAL_ERROR, "Internal error".to_string());
    }

    let msg = e.to_string();
    if msg.starts_with("METHOD_NOT_FOUND:") {
        return (METHOD_NOT_FOUND, "Method not found".to_string());
    }
    if msg.starts_with("missing param")
        || msg.contains("missing field")
        || msg.contains("invalid type")
        || msg.contains("already a member")
        || msg.starts_with("unknown role")
    {
        return (INVALID_PARAMS, format!("Invalid params: {}", msg));
    }
    error!(err = %e, "internal error");
    (INTERNAL_ERROR, "Internal error".to_string())
}

fn error_response(id: Value, code: i32, message: &str) -> String {
    let resp = RpcResponse {
        jsonrpc: "2.0",
        id,
        result: None,
        error: Some(RpcError {
            code,
            message: message.to_string(),
        }),
    };
    serde_json::to_string(&resp).unwrap_or_default()
}
