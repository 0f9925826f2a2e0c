// Automation Engine
//
// Trigger-driven workflow execution for the LeadPilot CRM: time and event
// triggers, targeting conditions, per-target action pipelines, and retry
// handling with exponential backoff.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod events;
pub mod executor;
pub mod retry;
pub mod trigger_manager;
pub mod triggers;

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error("workflow {0} is inactive")]
    WorkflowInactive(Uuid),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub use actions::{Action, ActionStep, RetryPolicy};
pub use conditions::{Condition, ConditionOperator, LogicalOperator};
pub use engine::{Execution, ExecutionEngine, ExecutionStatus, WorkflowDefinition};
pub use events::EventEmitter;
pub use executor::{ActionError, ActionExecutor, ExecutionContext};
pub use retry::{RetryManager, ScheduledRetry};
pub use trigger_manager::TriggerManager;
pub use triggers::{DayOfWeek, DomainEvent, EventType, Frequency, Trigger, TriggerFire, TriggerKind};
