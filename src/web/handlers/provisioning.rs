use salvo::prelude::*;
use serde::Deserialize;
use serde_json::json;

use crate::bridge_store::{BridgeStoreError, CreateBridgeRequest};
use crate::db::BridgePair;
use crate::event::Platform;

use super::{admin_state, reply_failure};

fn reply_store_failure(res: &mut Response, err: BridgeStoreError) {
    let status = match &err {
        BridgeStoreError::DuplicatePair => StatusCode::CONFLICT,
        BridgeStoreError::NotFound(_) => StatusCode::NOT_FOUND,
        BridgeStoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reply_failure(res, status, err.to_string());
}

/// A pair plus the webhook readiness flags operators actually look for.
fn describe(pair: &BridgePair) -> serde_json::Value {
    json!({
        "pair": pair,
        "has_discord_webhook": pair.has_webhook(Platform::Discord),
        "has_fluxer_webhook": pair.has_webhook(Platform::Fluxer),
    })
}

fn parse_bridge_id(req: &mut Request) -> Option<i64> {
    req.param::<i64>("id").filter(|id| *id > 0)
}

#[handler]
pub async fn list_bridges(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let limit = req.query::<i64>("limit").map_or(50, |v| v.clamp(1, 500));
    let offset = req.query::<i64>("offset").map_or(0, |v| v.max(0));

    match state.bridges.list(limit, offset).await {
        Ok(bridges) => {
            res.render(Json(json!({
                "ok": true,
                "count": bridges.len(),
                "bridges": bridges,
            })));
        }
        Err(err) => reply_store_failure(res, err),
    }
}

#[derive(Debug, Deserialize)]
struct CreateBridgeBody {
    discord_channel_id: String,
    discord_guild_id: String,
    fluxer_channel_id: String,
    #[serde(default)]
    fluxer_guild_id: Option<String>,
    #[serde(default)]
    sync_uploads: bool,
}

#[handler]
pub async fn create_bridge(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let body = match req.parse_json::<CreateBridgeBody>().await {
        Ok(body) => body,
        Err(err) => {
            reply_failure(
                res,
                StatusCode::BAD_REQUEST,
                format!("bad bridge payload: {err}"),
            );
            return;
        }
    };

    if body.discord_channel_id.trim().is_empty() || body.fluxer_channel_id.trim().is_empty() {
        reply_failure(res, StatusCode::BAD_REQUEST, "both channel ids are required");
        return;
    }

    match state
        .bridges
        .create(CreateBridgeRequest {
            discord_channel_id: body.discord_channel_id,
            discord_guild_id: body.discord_guild_id,
            fluxer_channel_id: body.fluxer_channel_id,
            fluxer_guild_id: body.fluxer_guild_id,
            sync_uploads: body.sync_uploads,
        })
        .await
    {
        Ok(pair) => {
            res.status_code(StatusCode::CREATED);
            res.render(Json(describe(&pair)));
        }
        Err(err) => reply_store_failure(res, err),
    }
}

#[handler]
pub async fn get_bridge_info(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let Some(id) = parse_bridge_id(req) else {
        reply_failure(
            res,
            StatusCode::BAD_REQUEST,
            "bridge id must be a positive integer",
        );
        return;
    };

    match state.bridges.get(id).await {
        Ok(pair) => res.render(Json(describe(&pair))),
        Err(err) => reply_store_failure(res, err),
    }
}

#[handler]
pub async fn delete_bridge(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let Some(id) = parse_bridge_id(req) else {
        reply_failure(
            res,
            StatusCode::BAD_REQUEST,
            "bridge id must be a positive integer",
        );
        return;
    };

    match state.bridges.delete(id).await {
        Ok(()) => res.render(Json(json!({ "ok": true, "deleted": id }))),
        Err(err) => reply_store_failure(res, err),
    }
}

#[derive(Debug, Deserialize)]
struct ToggleBody {
    active: bool,
}

#[handler]
pub async fn toggle_bridge(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let Some(id) = parse_bridge_id(req) else {
        reply_failure(
            res,
            StatusCode::BAD_REQUEST,
            "bridge id must be a positive integer",
        );
        return;
    };
    let body = match req.parse_json::<ToggleBody>().await {
        Ok(body) => body,
        Err(err) => {
            reply_failure(
                res,
                StatusCode::BAD_REQUEST,
                format!("bad toggle payload: {err}"),
            );
            return;
        }
    };

    match state.bridges.toggle(id, body.active).await {
        Ok(pair) => res.render(Json(describe(&pair))),
        Err(err) => reply_store_failure(res, err),
    }
}

#[handler]
pub async fn repair_bridge(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(state) = admin_state(depot, res) else {
        return;
    };
    let Some(id) = parse_bridge_id(req) else {
        reply_failure(
            res,
            StatusCode::BAD_REQUEST,
            "bridge id must be a positive integer",
        );
        return;
    };

    match state.bridges.repair(id).await {
        Ok(pair) => res.render(Json(describe(&pair))),
        Err(err) => reply_store_failure(res, err),
    }
}
