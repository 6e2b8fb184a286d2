//! Device registration CRUD
//!
//! Registrations are admin configuration: which readers and HUBs exist at a
//! gym and which agent reaches them.

use anyhow::{anyhow, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Database;
use crate::models::{DeviceRegistration, NewDeviceRegistration};
use gym_bridge_protocol::DeviceType;

const DEVICE_COLUMNS: &str = "id, gym_id, agent_id, name, ip_address, port, device_type, \
     username, password, active, created_at, updated_at";

fn device_from_row(row: &SqliteRow) -> Result<DeviceRegistration> {
    let device_type: String = row.get("device_type");
    let port: i64 = row.get("port");

    Ok(DeviceRegistration {
        id: row.get("id"),
        gym_id: row.get("gym_id"),
        agent_id: row.get("agent_id"),
        name: row.get("name"),
        ip_address: row.get("ip_address"),
        port: u16::try_from(port).map_err(|_| anyhow!("Invalid port in database: {}", port))?,
        device_type: device_type.parse::<DeviceType>().map_err(|e| anyhow!(e))?,
        username: row.get("username"),
        password: row.get("password"),
        active: row.get::<i64, _>("active") != 0,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Database {
    pub async fn create_device(
        &self,
        gym_id: i64,
        device: &NewDeviceRegistration,
    ) -> Result<DeviceRegistration> {
        let result = sqlx::query(
            "INSERT INTO device_registrations
             (gym_id, agent_id, name, ip_address, port, device_type, username, password, active)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(gym_id)
        .bind(&device.agent_id)
        .bind(&device.name)
        .bind(&device.ip_address)
        .bind(i64::from(device.port))
        .bind(device.device_type.to_string())
        .bind(&device.username)
        .bind(&device.password)
        .bind(device.active)
        .execute(&self.pool)
        .await?;

        self.get_device(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow!("Failed to retrieve created device"))
    }

    pub async fn get_device(&self, id: i64) -> Result<Option<DeviceRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM device_registrations WHERE id = ?",
            DEVICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    pub async fn list_devices_for_gym(&self, gym_id: i64) -> Result<Vec<DeviceRegistration>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM device_registrations WHERE gym_id = ? ORDER BY id",
            DEVICE_COLUMNS
        ))
        .bind(gym_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(device_from_row).collect()
    }

    /// First active device of a type at a gym, the one commands go to by default
    pub async fn first_active_device(
        &self,
        gym_id: i64,
        device_type: DeviceType,
    ) -> Result<Option<DeviceRegistration>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM device_registrations
             WHERE gym_id = ? AND device_type = ? AND active = 1
             ORDER BY id LIMIT 1",
            DEVICE_COLUMNS
        ))
        .bind(gym_id)
        .bind(device_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(device_from_row).transpose()
    }

    /// Returns false when no such device existed
    pub async fn delete_device(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM device_registrations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
