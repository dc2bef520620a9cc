use anyhow::Result;
use serde_json::{json, Value};

use crate::AppContext;

pub async fn ping(_params: Value, _ctx: &AppContext) -> Result<Value> {
    Ok(json!({ "pong": true }))
}

pub async fn status(_params: Value, ctx: &AppContext) -> Result<Value> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": ctx.started_at.elapsed().as_secs(),
        "activeConnections": ctx.rooms.connection_count().await,
        "port": ctx.config.port,
    }))
}
