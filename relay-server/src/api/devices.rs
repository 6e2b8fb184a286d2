//! Device registration endpoint handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use serde::Serialize;

use crate::{
    api::{ApiResult, AppState, CommandRequest, CommandResult, ProblemDetails},
    controlid::ControlIdService,
    models::{DeviceRegistration, NewDeviceRegistration},
};

#[derive(Debug, Serialize)]
pub struct ReaderStatus {
    pub agent_id: String,
    pub device_ip: String,
    pub online: bool,
}

pub async fn list_devices(
    State(state): State<AppState>,
    Path(gym_id): Path<i64>,
) -> ApiResult<Json<Vec<DeviceRegistration>>> {
    Ok(Json(state.db.list_devices_for_gym(gym_id).await?))
}

pub async fn create_device(
    State(state): State<AppState>,
    Path(gym_id): Path<i64>,
    Json(device): Json<NewDeviceRegistration>,
) -> ApiResult<(StatusCode, Json<DeviceRegistration>)> {
    device.validate().map_err(ProblemDetails::validation_error)?;

    match state.db.get_agent(&device.agent_id).await? {
        Some(agent) if agent.gym_id == gym_id => {}
        Some(agent) => {
            return Err(ProblemDetails::validation_error(format!(
                "Agent {} belongs to gym {}",
                agent.agent_id, agent.gym_id
            )))
        }
        None => {
            return Err(ProblemDetails::validation_error(format!(
                "Unknown agent {}",
                device.agent_id
            )))
        }
    }

    let existing = state.db.list_devices_for_gym(gym_id).await?;
    if existing
        .iter()
        .any(|d| d.ip_address == device.ip_address && d.device_type == device.device_type)
    {
        return Err(ProblemDetails::conflict(format!(
            "Device {} already registered for gym {}",
            device.ip_address, gym_id
        )));
    }

    let created = state.db.create_device(gym_id, &device).await?;
    tracing::info!(
        "Registered {} device {} ({}) for gym {}",
        created.device_type,
        created.name,
        created.ip_address,
        gym_id
    );
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    if state.db.delete_device(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ProblemDetails::not_found(format!("Device {}", id))
            .with_instance(format!("/api/devices/{}", id)))
    }
}

/// Relay a command to a registered device through its agent
pub async fn send_device_command(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CommandRequest>,
) -> ApiResult<Json<CommandResult>> {
    tracing::info!("Command {} for device {}", request.action, id);
    let device = state
        .db
        .get_device(id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("Device {}", id)))?;

    if !device.active {
        return Err(ProblemDetails::conflict(format!("Device {} is inactive", id)));
    }
    if request.action.device_type() != device.device_type {
        return Err(ProblemDetails::validation_error(format!(
            "Action {} does not apply to a {} device",
            request.action, device.device_type
        )));
    }

    let timeout = request.timeout(&state);
    let device_ip = Some(device.ip_address.clone());
    let data = state
        .hub
        .send_command(
            &device.agent_id,
            device_ip.clone(),
            request.action,
            request.data,
            timeout,
        )
        .await
        .map_err(|e| {
            tracing::warn!("Command to device {} failed: {}", id, e);
            ProblemDetails::from(e).with_instance(format!("/api/devices/{}/commands", id))
        })?;

    Ok(Json(CommandResult {
        action: request.action,
        device_ip,
        data,
    }))
}

/// Whether the gym's default reader answers through its agent
pub async fn reader_status(
    State(state): State<AppState>,
    Path(gym_id): Path<i64>,
) -> ApiResult<Json<ReaderStatus>> {
    let service = ControlIdService::for_gym(state.hub.clone(), &state.db, gym_id)
        .await?
        .ok_or_else(|| {
            ProblemDetails::not_found(format!("Active reader for gym {}", gym_id))
                .with_instance(format!("/api/gyms/{}/reader/status", gym_id))
        })?;

    let online = service.check_status().await;
    Ok(Json(ReaderStatus {
        agent_id: service.agent_id().to_string(),
        device_ip: service.device_ip().to_string(),
        online,
    }))
}
