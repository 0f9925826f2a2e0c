// Persistence seam - workflow definitions, leads, and action write-backs.
// The trait exists so the engine can run against an in-memory fake in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadpilot_shared::{Lead, LeadStatus, LeadTask, MessageRecord};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::automation::engine::WorkflowDefinition;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt stored definition: {0}")]
    Decode(#[from] serde_json::Error),
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    // Workflow definitions
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError>;
    async fn update_workflow(&self, workflow: &WorkflowDefinition) -> Result<bool, StoreError>;
    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError>;
    async fn set_workflow_active(&self, id: Uuid, active: bool) -> Result<bool, StoreError>;
    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError>;
    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;
    async fn list_active_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError>;
    /// Stamp aggregate run stats after an execution finishes.
    async fn record_run(
        &self,
        id: Uuid,
        success: bool,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    // Targets
    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError>;

    // Action write-backs
    async fn update_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<(), StoreError>;
    async fn assign_lead(&self, lead_id: Uuid, assignee_id: Uuid) -> Result<(), StoreError>;
    /// Set-union: existing tags are kept, duplicates dropped.
    async fn add_lead_tags(&self, lead_id: Uuid, tags: &[String]) -> Result<(), StoreError>;
    async fn create_task(&self, task: &LeadTask) -> Result<(), StoreError>;
    async fn record_message(&self, message: &MessageRecord) -> Result<(), StoreError>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type WorkflowRow = (
    Uuid,
    String,
    Option<String>,
    bool,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    i64,
    i64,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const WORKFLOW_COLUMNS: &str = "id, name, description, active, trigger, conditions, actions, \
     total_runs, successful_runs, last_run, next_run, created_at, updated_at";

fn decode_workflow(row: WorkflowRow) -> Result<WorkflowDefinition, StoreError> {
    Ok(WorkflowDefinition {
        id: row.0,
        name: row.1,
        description: row.2,
        active: row.3,
        trigger: serde_json::from_value(row.4)?,
        conditions: serde_json::from_value(row.5)?,
        actions: serde_json::from_value(row.6)?,
        total_runs: row.7,
        successful_runs: row.8,
        last_run: row.9,
        next_run: row.10,
        created_at: row.11,
        updated_at: row.12,
    })
}

#[async_trait]
impl AutomationStore for PgStore {
    async fn insert_workflow(&self, workflow: &WorkflowDefinition) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflows
            (id, name, description, active, trigger, conditions, actions,
             total_runs, successful_runs, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, 0, NOW())
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.active)
        .bind(serde_json::to_value(&workflow.trigger)?)
        .bind(serde_json::to_value(&workflow.conditions)?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_workflow(&self, workflow: &WorkflowDefinition) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflows
            SET name = $2, description = $3, active = $4, trigger = $5,
                conditions = $6, actions = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.active)
        .bind(serde_json::to_value(&workflow.trigger)?)
        .bind(serde_json::to_value(&workflow.conditions)?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_workflow_active(&self, id: Uuid, active: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE workflows SET active = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(active)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        let row: Option<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(decode_workflow).transpose()
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_workflow).collect()
    }

    async fn list_active_workflows(&self) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows: Vec<WorkflowRow> = sqlx::query_as(&format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE active = true ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_workflow).collect()
    }

    async fn record_run(
        &self,
        id: Uuid,
        success: bool,
        last_run: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET total_runs = total_runs + 1,
                successful_runs = successful_runs + (CASE WHEN $2 THEN 1 ELSE 0 END),
                last_run = $3,
                next_run = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(success)
        .bind(last_run)
        .bind(next_run)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_leads(&self) -> Result<Vec<Lead>, StoreError> {
        let leads = sqlx::query_as::<_, Lead>(
            r#"
            SELECT id, name, phone, email, status, source, loan_type, loan_amount,
                   assigned_to, tags, created_at, updated_at
            FROM leads
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(leads)
    }

    async fn update_lead_status(&self, lead_id: Uuid, status: LeadStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(lead_id)
            .bind(status)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assign_lead(&self, lead_id: Uuid, assignee_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE leads SET assigned_to = $2, updated_at = NOW() WHERE id = $1")
            .bind(lead_id)
            .bind(assignee_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_lead_tags(&self, lead_id: Uuid, tags: &[String]) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE leads
            SET tags = ARRAY(SELECT DISTINCT t FROM unnest(tags || $2::text[]) AS t ORDER BY t),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(lead_id)
        .bind(tags)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_task(&self, task: &LeadTask) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO lead_tasks (id, lead_id, title, description, due_at, completed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(task.id)
        .bind(task.lead_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.due_at)
        .bind(task.completed)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_message(&self, message: &MessageRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO messages
            (id, lead_id, channel, direction, content, provider_message_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(message.id)
        .bind(message.lead_id)
        .bind(message.channel)
        .bind(message.direction)
        .bind(&message.content)
        .bind(message.provider_message_id.as_deref())
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
