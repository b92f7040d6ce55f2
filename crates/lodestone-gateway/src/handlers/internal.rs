//! Internal API endpoints.
//!
//! These endpoints are called by the deployment pipeline and by an external
//! scheduler. They are not exposed publicly.
//!
//! # Security
//!
//! Internal endpoints should be protected by network policies that only allow
//! traffic from within the cluster.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use lodestone_control::{ControlPlane, ProvisioningEvent, ProvisioningOutcome, ServerId};

use crate::error::ApiError;
use crate::state::GatewayState;

/// Response for a provisioning event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProvisioningResponse {
    /// Always `SUCCESS`; failures are reported through the error body.
    pub status: &'static str,
    /// The server the event was about.
    pub physical_resource_id: ServerId,
    /// What the control plane did.
    pub data: ProvisioningOutcome,
}

/// Run one idle sweep now.
///
/// The built-in timer calls the same operation; this endpoint lets an
/// external scheduler drive sweeps instead.
///
/// # Errors
///
/// Returns an error only if the store cannot be read. Per-server failures
/// are counted in the report.
pub async fn sweep<C>(State(state): State<Arc<GatewayState<C>>>) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    let report = state.control.timeout_sweep().await?;

    tracing::info!(
        checked = report.checked,
        stopped = report.stopped.len(),
        failed = report.failed,
        "Sweep requested over HTTP"
    );

    Ok(Json(report))
}

/// Apply a provisioning event from the deployment pipeline.
///
/// # Errors
///
/// Returns 500 if teardown leaves records behind; the pipeline is expected
/// to retry the delete.
pub async fn config_records<C>(
    State(state): State<Arc<GatewayState<C>>>,
    Json(event): Json<ProvisioningEvent>,
) -> Result<impl IntoResponse, ApiError>
where
    C: ControlPlane + 'static,
{
    tracing::info!(
        server_id = %event.server_id(),
        request_type = ?event.request_type,
        "Received provisioning event"
    );

    let outcome = state.control.handle_provisioning_event(&event).await?;

    Ok(Json(ProvisioningResponse {
        status: "SUCCESS",
        physical_resource_id: event.server_id().clone(),
        data: outcome,
    }))
}
