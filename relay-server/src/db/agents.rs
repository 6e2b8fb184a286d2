//! Agent credential storage

use anyhow::{anyhow, Result};
use sqlx::Row;

use super::Database;
use crate::models::{AgentRecord, NewAgent};

impl Database {
    /// Create or replace an agent's credentials
    pub async fn upsert_agent(&self, agent: &NewAgent) -> Result<AgentRecord> {
        sqlx::query(
            "INSERT INTO agents (agent_id, gym_id, token) VALUES (?, ?, ?)
             ON CONFLICT(agent_id) DO UPDATE SET gym_id = excluded.gym_id, token = excluded.token",
        )
        .bind(&agent.agent_id)
        .bind(agent.gym_id)
        .bind(&agent.token)
        .execute(&self.pool)
        .await?;

        self.get_agent(&agent.agent_id)
            .await?
            .ok_or_else(|| anyhow!("Failed to retrieve agent {}", agent.agent_id))
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            "SELECT agent_id, gym_id, token, created_at FROM agents WHERE agent_id = ?",
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| AgentRecord {
            agent_id: row.get("agent_id"),
            gym_id: row.get("gym_id"),
            token: row.get("token"),
            created_at: row.get("created_at"),
        }))
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let rows = sqlx::query(
            "SELECT agent_id, gym_id, token, created_at FROM agents ORDER BY agent_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AgentRecord {
                agent_id: row.get("agent_id"),
                gym_id: row.get("gym_id"),
                token: row.get("token"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    /// Check an agent's bearer token, returning its gym on success
    pub async fn authenticate_agent(&self, agent_id: &str, token: &str) -> Result<Option<i64>> {
        let agent = self.get_agent(agent_id).await?;
        Ok(agent
            .filter(|agent| agent.token == token)
            .map(|agent| agent.gym_id))
    }
}
