//! HTTP request handlers.
//!
//! This module contains all the endpoint handlers for the gateway API.

pub mod health;
pub mod internal;
pub mod servers;

use lodestone_control::ServerId;

use crate::error::ApiError;

/// Parse a server ID from a request, rejecting malformed values.
pub(crate) fn parse_server_id(raw: &str) -> Result<ServerId, ApiError> {
    ServerId::parse(raw).map_err(|e| ApiError::BadRequest(format!("invalid serverId: {e}")))
}
