// Trigger Manager - live schedules and event subscriptions, one per workflow

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::AutomationError;
use super::conditions::{self, Condition};
use super::triggers::{DomainEvent, EventType, Trigger, TriggerFire, TriggerKind};

enum Registration {
    Timed { job_id: Uuid, trigger: Trigger },
    Event { event_type: EventType, filters: Vec<Condition> },
}

/// Owns the process-wide catalog of live trigger registrations. Every
/// workflow has at most one: registering always tears down the previous
/// registration first, and mutations hold the write lock so a trigger never
/// fires from a definition that is mid-teardown.
pub struct TriggerManager {
    scheduler: JobScheduler,
    registrations: Arc<RwLock<HashMap<Uuid, Registration>>>,
    fires: mpsc::UnboundedSender<TriggerFire>,
}

impl TriggerManager {
    /// Build the manager and start its scheduler loop. The returned receiver
    /// is the engine-facing side of the fire channel.
    pub async fn new() -> Result<(Self, mpsc::UnboundedReceiver<TriggerFire>), AutomationError> {
        let scheduler = JobScheduler::new().await?;
        scheduler.start().await?;

        let (fires, fire_rx) = mpsc::unbounded_channel();

        Ok((
            Self {
                scheduler,
                registrations: Arc::new(RwLock::new(HashMap::new())),
                fires,
            },
            fire_rx,
        ))
    }

    /// Install (or replace) the registration for a workflow. Malformed
    /// schedules are rejected before any state changes.
    pub async fn register(&self, workflow_id: Uuid, trigger: &Trigger) -> Result<(), AutomationError> {
        trigger.validate()?;

        let mut registrations = self.registrations.write().await;
        self.teardown(&mut registrations, workflow_id).await;

        let registration = match trigger {
            Trigger::TimeBased { .. } => {
                let expr = trigger
                    .cron_expression()?
                    .expect("time-based trigger has a cron expression");
                let (_, timezone) = trigger
                    .schedule()?
                    .expect("time-based trigger has a schedule");

                let fires = self.fires.clone();
                let job = Job::new_async_tz(expr.as_str(), timezone, move |_uuid, _lock| {
                    let fires = fires.clone();
                    Box::pin(async move {
                        let fire = TriggerFire {
                            workflow_id,
                            kind: TriggerKind::Time,
                            payload: Value::Null,
                            fired_at: Utc::now(),
                        };
                        if fires.send(fire).is_err() {
                            warn!(%workflow_id, "trigger fired but the engine channel is closed");
                        }
                    })
                })?;

                let job_id = self.scheduler.add(job).await?;
                info!(%workflow_id, schedule = %expr, "time trigger registered");
                Registration::Timed {
                    job_id,
                    trigger: trigger.clone(),
                }
            }
            Trigger::EventBased { event_type, filters } => {
                info!(%workflow_id, event_type = ?event_type, "event trigger registered");
                Registration::Event {
                    event_type: *event_type,
                    filters: filters.clone(),
                }
            }
        };

        registrations.insert(workflow_id, registration);
        Ok(())
    }

    /// Remove a workflow's registration. Returns whether one existed.
    pub async fn unregister(&self, workflow_id: Uuid) -> bool {
        let mut registrations = self.registrations.write().await;
        let existed = registrations.contains_key(&workflow_id);
        self.teardown(&mut registrations, workflow_id).await;
        if existed {
            info!(%workflow_id, "trigger unregistered");
        }
        existed
    }

    /// Re-derive the registration from the workflow's current state.
    /// Deactivating an already-inactive trigger is a successful no-op.
    pub async fn toggle(
        &self,
        workflow_id: Uuid,
        active: bool,
        trigger: &Trigger,
    ) -> Result<bool, AutomationError> {
        if active {
            self.register(workflow_id, trigger).await?;
        } else {
            self.unregister(workflow_id).await;
        }
        Ok(true)
    }

    /// Route a domain event to every matching subscription. Never errors;
    /// one broken subscription must not stop the others.
    pub async fn emit(&self, event: &DomainEvent) {
        let registrations = self.registrations.read().await;

        for (workflow_id, registration) in registrations.iter() {
            let Registration::Event { event_type, filters } = registration else {
                continue;
            };
            if *event_type != event.event_type {
                continue;
            }
            if !conditions::matches(&event.payload, filters) {
                continue;
            }

            let fire = TriggerFire {
                workflow_id: *workflow_id,
                kind: TriggerKind::Event,
                payload: event.payload.clone(),
                fired_at: Utc::now(),
            };
            if self.fires.send(fire).is_err() {
                error!(%workflow_id, "event matched but the engine channel is closed");
            }
        }
    }

    /// Next firing instant for a registered time-based trigger.
    pub async fn next_run(&self, workflow_id: Uuid) -> Option<DateTime<Utc>> {
        let registrations = self.registrations.read().await;
        match registrations.get(&workflow_id)? {
            Registration::Timed { trigger, .. } => trigger.next_run(),
            Registration::Event { .. } => None,
        }
    }

    pub async fn registered_count(&self) -> usize {
        self.registrations.read().await.len()
    }

    pub async fn shutdown(&self) {
        let mut scheduler = self.scheduler.clone();
        if let Err(e) = scheduler.shutdown().await {
            error!("scheduler shutdown failed: {e}");
        }
    }

    async fn teardown(&self, registrations: &mut HashMap<Uuid, Registration>, workflow_id: Uuid) {
        if let Some(Registration::Timed { job_id, .. }) = registrations.remove(&workflow_id) {
            let mut scheduler = self.scheduler.clone();
            if let Err(e) = scheduler.remove(&job_id).await {
                warn!(%workflow_id, "failed to remove scheduled job: {e}");
            }
        }
    }
}
