//! Server lifecycle endpoints.
//!
//! `startServer` and `whitelistPlayer` keep the request shapes the game
//! clients already send: a JSON body with `serverId` and friends.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lodestone_control::{
    ControlPlane, InfoRecord, LifecycleState, PlayerName, ServerId, StartOutcome, TaskHandle,
};

use crate::error::ApiError;
use crate::handlers::parse_server_id;
use crate::state::GatewayState;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request body for starting a server.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartServerRequest {
    /// The server to start.
    pub server_id: String,
}

/// Response for a start request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartServerResponse {
    /// The server that was asked to start.
    pub server_id: ServerId,
    /// `launched`, `already_running` or `claimed_elsewhere`.
    pub outcome: &'static str,
    /// Human-readable summary.
    pub message: String,
    /// Handle of the compute unit launched by this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<TaskHandle>,
    /// Game address of the compute unit launched by this call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_address: Option<String>,
}

impl StartServerResponse {
    fn new(server_id: ServerId, outcome: StartOutcome) -> Self {
        match outcome {
            StartOutcome::Launched {
                task_handle,
                network_address,
            } => Self {
                message: format!("Server {server_id} is live at {network_address}"),
                server_id,
                outcome: "launched",
                task_handle: Some(task_handle),
                network_address: Some(network_address),
            },
            StartOutcome::AlreadyRunning { state } => Self {
                message: format!("Server {server_id} is already {}", state_label(state)),
                server_id,
                outcome: "already_running",
                task_handle: None,
                network_address: None,
            },
            StartOutcome::ClaimedElsewhere => Self {
                message: format!("Server {server_id} is being started by another request"),
                server_id,
                outcome: "claimed_elsewhere",
                task_handle: None,
                network_address: None,
            },
        }
    }
}

/// Request body for whitelisting a player.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistPlayerRequest {
    /// The server to whitelist on.
    pub server_id: String,
    /// The in-game name to add.
    pub player_name: String,
    /// Stable account identifier, when the client knows it.
    #[serde(default)]
    pub account_id: Option<String>,
}

/// Response for a whitelist request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistPlayerResponse {
    /// The server the player was added to.
    pub server_id: ServerId,
    /// The player now on the whitelist.
    pub player_name: PlayerName,
    /// Earlier names of the same account that were removed.
    pub replaced: Vec<PlayerName>,
}

/// A server's record as exposed over HTTP.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerView {
    /// Server identifier.
    pub server_id: ServerId,
    /// Lifecycle state.
    pub state: LifecycleState,
    /// Whether the server accepts players.
    pub is_live: bool,
    /// Handle of the compute unit, if one may exist.
    pub task_handle: Option<TaskHandle>,
    /// Game address, if live.
    pub network_address: Option<String>,
    /// Last time a sweep saw players online.
    pub last_seen_active_at: Option<DateTime<Utc>>,
    /// When the state last changed.
    pub state_changed_at: DateTime<Utc>,
}

impl From<InfoRecord> for ServerView {
    fn from(info: InfoRecord) -> Self {
        Self {
            is_live: info.is_live(),
            server_id: info.server_id,
            state: info.state,
            task_handle: info.task_handle,
            network_address: info.network_address,
            last_seen_active_at: info.last_seen_active_at,
            state_changed_at: info.state_changed_at,
        }
    }
}

const fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Stopped => "stopped",
        LifecycleState::Starting => "starting",
        LifecycleState::Live => "live",
        LifecycleState::Stopping => "stopping",
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Start a server.
///
/// Blocks until the server is live or the launch fails. Concurrent calls for
/// the same server all succeed; only one launches a compute unit.
///
/// # Errors
///
/// Returns 404 for an unknown server, 409 while it is shutting down, 503
/// when out of capacity, and 504 if the unit never became ready.
pub async fn start_server<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Json(body): Json<StartServerRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id = parse_server_id(&body.server_id)?;
    let outcome = state.control.start_server(&server_id).await?;

    Ok(Json(StartServerResponse::new(server_id, outcome)))
}

/// Whitelist a player on a live server.
///
/// # Errors
///
/// Returns 400 for a malformed name, 404 for an unknown server, 409 if the
/// server is not live, and 503 if its console cannot be reached.
pub async fn whitelist_player<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Json(body): Json<WhitelistPlayerRequest>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id = parse_server_id(&body.server_id)?;
    let outcome = state
        .control
        .whitelist_player(&server_id, &body.player_name, body.account_id.as_deref())
        .await?;

    Ok(Json(WhitelistPlayerResponse {
        server_id,
        player_name: outcome.player_name,
        replaced: outcome.replaced,
    }))
}

/// Get a server's current record.
///
/// # Errors
///
/// Returns 400 for a malformed ID and 404 for an unknown server.
pub async fn get_server<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Path(server_id): Path<String>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let server_id = parse_server_id(&server_id)?;
    let info = state.control.get_server(&server_id).await?;

    Ok(Json(ServerView::from(info)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid() -> ServerId {
        ServerId::parse("s1").unwrap()
    }

    #[test]
    fn launched_response_carries_address() {
        let response = StartServerResponse::new(
            sid(),
            StartOutcome::Launched {
                task_handle: TaskHandle::new("h1"),
                network_address: "10.0.0.1:25565".into(),
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["serverId"], "s1");
        assert_eq!(json["outcome"], "launched");
        assert_eq!(json["networkAddress"], "10.0.0.1:25565");
    }

    #[test]
    fn already_running_omits_unit_fields() {
        let response = StartServerResponse::new(
            sid(),
            StartOutcome::AlreadyRunning {
                state: LifecycleState::Starting,
            },
        );
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["outcome"], "already_running");
        assert!(json.get("taskHandle").is_none());
        assert!(response.message.contains("starting"));
    }

    #[test]
    fn whitelist_request_account_id_is_optional() {
        let body: WhitelistPlayerRequest =
            serde_json::from_str(r#"{"serverId": "s1", "playerName": "Steve"}"#).unwrap();
        assert_eq!(body.player_name, "Steve");
        assert!(body.account_id.is_none());
    }

    #[test]
    fn server_view_reports_liveness() {
        let view = ServerView::from(InfoRecord::new(sid()).with_state(LifecycleState::Live));
        assert!(view.is_live);

        let view = ServerView::from(InfoRecord::new(sid()));
        assert!(!view.is_live);
    }
}
