// Execution Engine - runs one workflow against its resolved target set

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use leadpilot_shared::Lead;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AutomationError;
use super::actions::{Action, ActionStep, RetryPolicy};
use super::conditions::{self, Condition};
use super::executor::{ActionExecutor, ExecutionContext};
use super::retry::RetryManager;
use super::triggers::Trigger;
use crate::store::AutomationStore;

/// A stored automation definition plus its aggregate run stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    pub trigger: Trigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<ActionStep>,
    pub total_runs: i64,
    pub successful_runs: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionErrorEntry {
    pub step: String,
    pub target_id: Option<Uuid>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// One run of a workflow. Lives in the engine's map until process restart;
/// only aggregate counters are written back to the workflow row.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub target_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub logs: Vec<LogEntry>,
    pub errors: Vec<ExecutionErrorEntry>,
}

impl Execution {
    fn new(id: Uuid, workflow_id: Uuid) -> Self {
        Self {
            id,
            workflow_id,
            status: ExecutionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            target_count: 0,
            success_count: 0,
            failure_count: 0,
            logs: Vec::new(),
            errors: Vec::new(),
        }
    }
}

enum ActionOutcome {
    Success(Value),
    Failed { error: String, retry_count: u32 },
    Cancelled,
}

/// Evaluation view of a lead. Numeric fields are plain JSON numbers so the
/// numeric condition operators can compare them.
pub fn target_record(lead: &Lead) -> Value {
    json!({
        "id": lead.id,
        "name": lead.name,
        "phone": lead.phone,
        "email": lead.email,
        "status": lead.status,
        "source": lead.source,
        "loan_type": lead.loan_type,
        "loan_amount": lead.loan_amount.and_then(|a| a.to_f64()),
        "assigned_to": lead.assigned_to,
        "tags": lead.tags,
    })
}

#[derive(Clone)]
pub struct ExecutionEngine {
    store: Arc<dyn AutomationStore>,
    executor: Arc<ActionExecutor>,
    retries: Arc<RetryManager>,
    executions: Arc<RwLock<HashMap<Uuid, Execution>>>,
    cancel_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    target_concurrency: usize,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        executor: ActionExecutor,
        retries: Arc<RetryManager>,
        target_concurrency: usize,
    ) -> Self {
        Self {
            store,
            executor: Arc::new(executor),
            retries,
            executions: Arc::new(RwLock::new(HashMap::new())),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
            target_concurrency: target_concurrency.max(1),
        }
    }

    /// Accept a run and return its execution id immediately; the run itself
    /// proceeds on a spawned task.
    pub async fn execute(
        &self,
        workflow_id: Uuid,
        trigger_payload: Option<Value>,
    ) -> Result<Uuid, AutomationError> {
        let workflow = self
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(AutomationError::WorkflowNotFound(workflow_id))?;
        if !workflow.active {
            return Err(AutomationError::WorkflowInactive(workflow_id));
        }

        let execution_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.executions
            .write()
            .await
            .insert(execution_id, Execution::new(execution_id, workflow_id));
        self.cancel_tokens
            .write()
            .await
            .insert(execution_id, token.clone());

        info!(%execution_id, %workflow_id, "execution accepted");

        let engine = self.clone();
        let payload = trigger_payload.unwrap_or(Value::Null);
        tokio::spawn(async move {
            let workflow_name = workflow.name.clone();
            if let Err(e) = engine.run(execution_id, workflow, payload, token).await {
                error!(%execution_id, workflow = %workflow_name, "execution failed: {e}");
                engine.mark_failed(execution_id, &e.to_string()).await;
            }
            engine.cancel_tokens.write().await.remove(&execution_id);
        });

        Ok(execution_id)
    }

    /// Cooperatively cancel a run: no new target pipelines start, in-flight
    /// pipelines stop at their next between-action checkpoint. Completed
    /// side effects are not rolled back.
    pub async fn cancel(&self, execution_id: Uuid) -> bool {
        let token = self.cancel_tokens.read().await.get(&execution_id).cloned();
        let Some(token) = token else {
            return false;
        };

        let mut executions = self.executions.write().await;
        let Some(execution) = executions.get_mut(&execution_id) else {
            return false;
        };
        if execution.status.is_terminal() {
            return false;
        }

        token.cancel();
        execution.status = ExecutionStatus::Cancelled;
        execution.completed_at = Some(Utc::now());
        execution.logs.push(LogEntry {
            level: LogLevel::Info,
            message: "execution cancelled".to_string(),
            timestamp: Utc::now(),
            metadata: None,
        });
        info!(%execution_id, "execution cancelled");
        true
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<Execution> {
        self.executions.read().await.get(&execution_id).cloned()
    }

    pub async fn list_running(&self) -> Vec<Execution> {
        self.executions
            .read()
            .await
            .values()
            .filter(|e| !e.status.is_terminal())
            .cloned()
            .collect()
    }

    async fn run(
        &self,
        execution_id: Uuid,
        workflow: WorkflowDefinition,
        payload: Value,
        cancel: CancellationToken,
    ) -> Result<(), AutomationError> {
        self.transition(execution_id, ExecutionStatus::Running).await;
        self.log(
            execution_id,
            LogLevel::Info,
            format!("workflow '{}' started", workflow.name),
            None,
        )
        .await;

        let resolved = conditions::resolve_values(&workflow.conditions, &payload);
        let leads = self.store.list_leads().await?;
        let targets: Vec<Lead> = leads
            .into_iter()
            .filter(|lead| conditions::matches(&target_record(lead), &resolved))
            .collect();

        {
            let mut executions = self.executions.write().await;
            if let Some(execution) = executions.get_mut(&execution_id) {
                execution.target_count = targets.len();
            }
        }
        self.log(
            execution_id,
            LogLevel::Info,
            format!("resolved {} matching targets", targets.len()),
            None,
        )
        .await;

        if !targets.is_empty() {
            let ctx = ExecutionContext {
                execution_id,
                workflow_id: workflow.id,
                trigger_payload: payload,
            };
            let workflow_ref = &workflow;
            let ctx_ref = &ctx;
            let cancel_ref = &cancel;

            futures::stream::iter(targets)
                .for_each_concurrent(self.target_concurrency, |lead| async move {
                    if cancel_ref.is_cancelled() {
                        return;
                    }
                    self.run_target(execution_id, workflow_ref, lead, ctx_ref, cancel_ref)
                        .await;
                })
                .await;
        }

        self.finish(execution_id, &workflow).await;
        Ok(())
    }

    async fn run_target(
        &self,
        execution_id: Uuid,
        workflow: &WorkflowDefinition,
        lead: Lead,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) {
        for step in &workflow.actions {
            if cancel.is_cancelled() {
                return;
            }

            match &step.action {
                Action::Wait { duration_ms } => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(*duration_ms)) => {}
                        _ = cancel.cancelled() => return,
                    }
                    self.log(
                        execution_id,
                        LogLevel::Info,
                        format!("lead {} waited {duration_ms}ms", lead.id),
                        None,
                    )
                    .await;
                }
                action => {
                    let outcome = self
                        .run_action_with_retry(
                            execution_id,
                            workflow,
                            action,
                            step.retry_policy.as_ref(),
                            &lead,
                            ctx,
                            cancel,
                        )
                        .await;

                    match outcome {
                        ActionOutcome::Success(output) => {
                            self.log(
                                execution_id,
                                LogLevel::Info,
                                format!("action {} succeeded for lead {}", action.kind(), lead.id),
                                Some(output),
                            )
                            .await;
                        }
                        ActionOutcome::Failed { error, retry_count } => {
                            self.record_target_failure(
                                execution_id,
                                action.kind(),
                                lead.id,
                                &error,
                                retry_count,
                            )
                            .await;
                            return;
                        }
                        ActionOutcome::Cancelled => return,
                    }
                }
            }
        }

        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&execution_id) {
            execution.success_count += 1;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_action_with_retry(
        &self,
        execution_id: Uuid,
        workflow: &WorkflowDefinition,
        action: &Action,
        policy: Option<&RetryPolicy>,
        lead: &Lead,
        ctx: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> ActionOutcome {
        let mut attempt: u32 = 0;
        let mut active_retry: Option<Uuid> = None;

        loop {
            match self.executor.execute(action, lead, ctx).await {
                Ok(output) => {
                    if let Some(retry_id) = active_retry {
                        self.retries.mark_retry_success(retry_id).await;
                    }
                    return ActionOutcome::Success(output);
                }
                Err(err) => {
                    let error = err.to_string();
                    let scheduled = match (active_retry, policy) {
                        (_, None) => None,
                        (None, Some(policy)) => {
                            self.retries
                                .schedule_retry(
                                    execution_id,
                                    workflow.id,
                                    action.kind(),
                                    &error,
                                    policy.clone(),
                                    attempt,
                                    Some(lead.id),
                                )
                                .await
                        }
                        (Some(retry_id), Some(_)) => {
                            self.retries.mark_retry_failure(retry_id, &error).await
                        }
                    };

                    let Some(scheduled) = scheduled else {
                        return ActionOutcome::Failed {
                            error,
                            retry_count: attempt,
                        };
                    };

                    let retry_id = scheduled.id;
                    self.log(
                        execution_id,
                        LogLevel::Warn,
                        format!(
                            "action {} failed for lead {}, retrying in {}ms: {}",
                            action.kind(),
                            lead.id,
                            scheduled.delay.as_millis(),
                            error
                        ),
                        None,
                    )
                    .await;

                    tokio::select! {
                        _ = scheduled.wait() => {
                            active_retry = Some(retry_id);
                            attempt += 1;
                        }
                        _ = cancel.cancelled() => {
                            self.retries.cancel(retry_id).await;
                            return ActionOutcome::Cancelled;
                        }
                    }
                }
            }
        }
    }

    async fn finish(&self, execution_id: Uuid, workflow: &WorkflowDefinition) {
        let success = {
            let mut executions = self.executions.write().await;
            let Some(execution) = executions.get_mut(&execution_id) else {
                return;
            };

            if !execution.status.is_terminal() {
                execution.status = ExecutionStatus::Completed;
                execution.completed_at = Some(Utc::now());
                let counts = json!({
                    "targets": execution.target_count,
                    "succeeded": execution.success_count,
                    "failed": execution.failure_count,
                });
                execution.logs.push(LogEntry {
                    level: LogLevel::Info,
                    message: "execution completed".to_string(),
                    timestamp: Utc::now(),
                    metadata: Some(counts),
                });
            }

            execution.status == ExecutionStatus::Completed && execution.failure_count == 0
        };

        if let Err(e) = self
            .store
            .record_run(workflow.id, success, Utc::now(), workflow.trigger.next_run())
            .await
        {
            warn!(workflow_id = %workflow.id, "failed to persist run stats: {e}");
        }
    }

    async fn mark_failed(&self, execution_id: Uuid, error: &str) {
        let mut executions = self.executions.write().await;
        let Some(execution) = executions.get_mut(&execution_id) else {
            return;
        };
        if execution.status.is_terminal() {
            return;
        }

        execution.status = ExecutionStatus::Failed;
        execution.completed_at = Some(Utc::now());
        execution.errors.push(ExecutionErrorEntry {
            step: "execution".to_string(),
            target_id: None,
            error: error.to_string(),
            timestamp: Utc::now(),
            retry_count: 0,
        });
        execution.logs.push(LogEntry {
            level: LogLevel::Error,
            message: format!("execution failed: {error}"),
            timestamp: Utc::now(),
            metadata: None,
        });
    }

    async fn record_target_failure(
        &self,
        execution_id: Uuid,
        step: &str,
        target_id: Uuid,
        error: &str,
        retry_count: u32,
    ) {
        warn!(%execution_id, %target_id, step, retry_count, "target failed: {error}");

        let mut executions = self.executions.write().await;
        let Some(execution) = executions.get_mut(&execution_id) else {
            return;
        };
        execution.failure_count += 1;
        execution.errors.push(ExecutionErrorEntry {
            step: step.to_string(),
            target_id: Some(target_id),
            error: error.to_string(),
            timestamp: Utc::now(),
            retry_count,
        });
        execution.logs.push(LogEntry {
            level: LogLevel::Error,
            message: format!("action {step} failed terminally for lead {target_id}"),
            timestamp: Utc::now(),
            metadata: None,
        });
    }

    async fn transition(&self, execution_id: Uuid, status: ExecutionStatus) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&execution_id) {
            if !execution.status.is_terminal() {
                execution.status = status;
            }
        }
    }

    async fn log(
        &self,
        execution_id: Uuid,
        level: LogLevel,
        message: String,
        metadata: Option<Value>,
    ) {
        let mut executions = self.executions.write().await;
        if let Some(execution) = executions.get_mut(&execution_id) {
            execution.logs.push(LogEntry {
                level,
                message,
                timestamp: Utc::now(),
                metadata,
            });
        }
    }
}
