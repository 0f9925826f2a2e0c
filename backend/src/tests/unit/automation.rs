// Engine scenario tests against the in-memory store and recording sender

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use crate::automation::{
    Action, ActionExecutor, ActionStep, AutomationError, Condition, DomainEvent, EventType,
    Execution, ExecutionEngine, ExecutionStatus, RetryManager, RetryPolicy, Trigger,
    TriggerManager,
};
use crate::services::MessageSender;
use crate::store::AutomationStore;
use crate::tests::fixtures::{
    MemoryStore, RecordingSender, lead, loan_lead, send_step, send_step_with_retry, workflow,
};
use leadpilot_shared::LeadStatus;

fn build_engine(
    store: &Arc<MemoryStore>,
    sender: &Arc<RecordingSender>,
    concurrency: usize,
) -> ExecutionEngine {
    let store_dyn: Arc<dyn AutomationStore> = store.clone();
    let sender_dyn: Arc<dyn MessageSender> = sender.clone();
    let executor = ActionExecutor::new(store_dyn.clone(), sender_dyn, Duration::from_secs(30));
    ExecutionEngine::new(store_dyn, executor, Arc::new(RetryManager::new()), concurrency)
}

async fn wait_for_terminal(engine: &ExecutionEngine, execution_id: Uuid) -> Execution {
    for _ in 0..2_000 {
        if let Some(execution) = engine.get_execution(execution_id).await {
            if execution.status.is_terminal() {
                return execution;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution did not reach a terminal status");
}

#[tokio::test]
async fn all_targets_succeed() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    for (name, phone) in [("Asha", "+911"), ("Bala", "+912"), ("Chitra", "+913")] {
        store.add_lead(lead(name, phone)).await;
    }
    let wf = workflow(vec![send_step()]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.target_count, 3);
    assert_eq!(execution.success_count, 3);
    assert_eq!(execution.failure_count, 0);
    assert!(execution.errors.is_empty());
    assert_eq!(sender.sent.lock().await.len(), 3);

    // Run stats stamped on the workflow: one successful run, next_run set
    // from the daily trigger.
    let stored = store.get_workflow(wf.id).await.unwrap().unwrap();
    assert_eq!(stored.total_runs, 1);
    assert_eq!(stored.successful_runs, 1);
    assert!(stored.last_run.is_some());
    assert!(stored.next_run.is_some());
}

#[tokio::test(start_paused = true)]
async fn failing_target_retries_with_backoff_then_fails() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(lead("Asha", "+911")).await;
    let flaky = lead("Bala", "+912");
    store.add_lead(flaky.clone()).await;
    store.add_lead(lead("Chitra", "+913")).await;
    sender.fail_for("+912").await;

    let wf = workflow(vec![send_step_with_retry(RetryPolicy {
        max_retries: 2,
        backoff_multiplier: 2.0,
        initial_delay_ms: 100,
    })]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.target_count, 3);
    assert_eq!(execution.success_count, 2);
    assert_eq!(execution.failure_count, 1);

    assert_eq!(execution.errors.len(), 1);
    let entry = &execution.errors[0];
    assert_eq!(entry.step, "send_message");
    assert_eq!(entry.target_id, Some(flaky.id));
    assert_eq!(entry.retry_count, 2);

    // Initial attempt plus two retries, backed off at ~100ms then ~200ms.
    let attempts = sender.attempts_for("+912").await;
    assert_eq!(attempts.len(), 3);
    assert_eq!(attempts[1].at - attempts[0].at, Duration::from_millis(100));
    assert_eq!(attempts[2].at - attempts[1].at, Duration::from_millis(200));
}

#[tokio::test]
async fn failure_without_policy_is_terminal_and_skips_later_actions() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    let flaky = lead("Asha", "+911");
    let healthy = lead("Bala", "+912");
    store.add_lead(flaky.clone()).await;
    store.add_lead(healthy.clone()).await;
    sender.fail_for("+911").await;

    let wf = workflow(vec![
        send_step(),
        ActionStep::new(Action::UpdateLeadStatus {
            status: LeadStatus::Contacted,
        }),
    ]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 1);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.success_count, 1);
    assert_eq!(execution.failure_count, 1);
    assert_eq!(execution.errors[0].retry_count, 0);
    assert_eq!(sender.attempts_for("+911").await.len(), 1, "no retry without a policy");

    // The failed target's pipeline aborted before the status update; the
    // healthy target went through both actions.
    let leads = store.leads.lock().await;
    let flaky_after = leads.iter().find(|l| l.id == flaky.id).unwrap();
    let healthy_after = leads.iter().find(|l| l.id == healthy.id).unwrap();
    assert_eq!(flaky_after.status, LeadStatus::New);
    assert_eq!(healthy_after.status, LeadStatus::Contacted);
}

#[tokio::test]
async fn zero_max_retries_policy_fails_immediately() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(lead("Asha", "+911")).await;
    sender.fail_for("+911").await;

    let wf = workflow(vec![send_step_with_retry(RetryPolicy {
        max_retries: 0,
        backoff_multiplier: 2.0,
        initial_delay_ms: 100,
    })]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 1);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.failure_count, 1);
    assert_eq!(execution.errors[0].retry_count, 0);
    assert_eq!(sender.sent.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_remaining_targets() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    for i in 1..=5 {
        store.add_lead(lead(&format!("Lead {i}"), &format!("+91{i}"))).await;
    }
    // A wait in front of the send gives each target a checkpointed delay.
    let wf = workflow(vec![
        ActionStep::new(Action::Wait { duration_ms: 100 }),
        send_step(),
    ]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 1);
    let execution_id = engine.execute(wf.id, None).await.unwrap();

    // Target #1 completes at ~100ms; cancel lands while #2 is waiting.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(engine.cancel(execution_id).await);

    let execution = wait_for_terminal(&engine, execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Cancelled);
    assert_eq!(execution.target_count, 5);
    assert_eq!(execution.success_count, 1);
    assert_eq!(execution.failure_count, 0);
    assert!(execution.errors.is_empty(), "untouched targets produce no error entries");
    assert_eq!(sender.sent.lock().await.len(), 1);

    // Cancelling a terminal execution is refused.
    assert!(!engine.cancel(execution_id).await);
}

#[tokio::test]
async fn empty_target_set_completes_with_zero_counts() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(loan_lead("Asha", "+911", "PERSONAL", 100_000)).await;

    let mut wf = workflow(vec![send_step()]);
    wf.conditions = vec![Condition::equals("loan_type", json!("BUSINESS"))];
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.target_count, 0);
    assert_eq!(execution.success_count, 0);
    assert_eq!(execution.failure_count, 0);
    assert!(sender.sent.lock().await.is_empty());

    let stored = store.get_workflow(wf.id).await.unwrap().unwrap();
    assert_eq!(stored.total_runs, 1);
    assert_eq!(stored.successful_runs, 1);
}

#[tokio::test]
async fn conditions_filter_targets() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(loan_lead("Asha", "+911", "BUSINESS", 600_000)).await;
    store.add_lead(loan_lead("Bala", "+912", "BUSINESS", 400_000)).await;
    store.add_lead(loan_lead("Chitra", "+913", "PERSONAL", 900_000)).await;

    let mut wf = workflow(vec![send_step()]);
    wf.conditions = vec![
        Condition::equals("loan_type", json!("BUSINESS")),
        Condition::greater_than("loan_amount", 500_000.0).and(),
    ];
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.target_count, 1);
    let sent = sender.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].phone, "+911");
    assert_eq!(sent[0].content, "Hi Asha");
}

#[tokio::test]
async fn trigger_payload_interpolates_into_conditions() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    let first = lead("Asha", "+911");
    store.add_lead(first.clone()).await;
    store.add_lead(lead("Bala", "+912")).await;

    let mut wf = workflow(vec![send_step()]);
    wf.conditions = vec![Condition::equals("id", json!("${lead_id}"))];
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine
        .execute(wf.id, Some(json!({"lead_id": first.id})))
        .await
        .unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.target_count, 1);
    assert_eq!(execution.success_count, 1);
    let sent = sender.sent.lock().await;
    assert_eq!(sent[0].phone, "+911");
}

#[tokio::test]
async fn unknown_and_inactive_workflows_are_rejected() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();
    let engine = build_engine(&store, &sender, 4);

    let missing = engine.execute(Uuid::new_v4(), None).await;
    assert!(matches!(missing, Err(AutomationError::WorkflowNotFound(_))));

    let mut wf = workflow(vec![send_step()]);
    wf.active = false;
    store.add_workflow(wf.clone()).await;

    let inactive = engine.execute(wf.id, None).await;
    assert!(matches!(inactive, Err(AutomationError::WorkflowInactive(_))));
}

#[tokio::test]
async fn unreachable_store_fails_the_whole_execution() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    let wf = workflow(vec![send_step()]);
    store.add_workflow(wf.clone()).await;
    store.break_lead_listing();

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.target_count, 0);
    assert_eq!(execution.errors.len(), 1);
    assert_eq!(execution.errors[0].step, "execution");
    assert_eq!(execution.errors[0].target_id, None);
}

#[tokio::test]
async fn lead_without_phone_fails_send_with_missing_channel() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    let mut phoneless = lead("Asha", "");
    phoneless.phone = None;
    store.add_lead(phoneless.clone()).await;

    let wf = workflow(vec![send_step()]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 1);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.failure_count, 1);
    assert!(execution.errors[0].error.contains("no contact channel"));
    assert!(sender.sent.lock().await.is_empty());
}

#[tokio::test]
async fn mutation_actions_update_the_lead() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    let mut tagged = lead("Asha", "+911");
    tagged.tags = vec!["vip".to_string()];
    store.add_lead(tagged.clone()).await;

    let assignee = Uuid::new_v4();
    let wf = workflow(vec![
        ActionStep::new(Action::UpdateLeadStatus {
            status: LeadStatus::Qualified,
        }),
        ActionStep::new(Action::AssignLead { assignee_id: assignee }),
        ActionStep::new(Action::UpdateTags {
            tags: vec!["vip".to_string(), "hot".to_string()],
        }),
        ActionStep::new(Action::CreateTask {
            title: "Call {name}".to_string(),
            description: None,
            due_in_hours: Some(24),
        }),
    ]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 1);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.success_count, 1);

    let leads = store.leads.lock().await;
    let after = leads.iter().find(|l| l.id == tagged.id).unwrap();
    assert_eq!(after.status, LeadStatus::Qualified);
    assert_eq!(after.assigned_to, Some(assignee));
    // Tag update is a set union: no duplicate "vip".
    assert_eq!(after.tags, vec!["vip".to_string(), "hot".to_string()]);

    let tasks = store.tasks.lock().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Call Asha");
    assert!(tasks[0].due_at.is_some());
}

#[tokio::test]
async fn event_fire_drives_execution_exactly_once() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(lead("Asha", "+911")).await;

    let mut wf = workflow(vec![send_step()]);
    wf.trigger = Trigger::EventBased {
        event_type: EventType::LeadStatusChanged,
        filters: vec![Condition::equals("status", json!("INTERESTED"))],
    };
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let (manager, mut fires) = TriggerManager::new().await.unwrap();
    manager.register(wf.id, &wf.trigger).await.unwrap();

    manager
        .emit(&DomainEvent::new(
            EventType::LeadStatusChanged,
            json!({"status": "NEW"}),
        ))
        .await;
    assert!(fires.try_recv().is_err(), "non-matching event never fires");

    manager
        .emit(&DomainEvent::new(
            EventType::LeadStatusChanged,
            json!({"status": "INTERESTED"}),
        ))
        .await;
    let fire = fires.try_recv().expect("matching event fires");
    assert!(fires.try_recv().is_err(), "fires exactly once");

    let execution_id = engine
        .execute(fire.workflow_id, Some(fire.payload))
        .await
        .unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.success_count, 1);
}

#[tokio::test(start_paused = true)]
async fn wait_suspends_only_the_owning_target() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(lead("Slow", "+911")).await;
    store.add_lead(lead("Fast", "+912")).await;

    // Target pipelines run concurrently; the fast target's send must not
    // wait for the slow target's delay.
    let wf = workflow(vec![
        ActionStep::new(Action::Wait { duration_ms: 5_000 }),
        send_step(),
    ]);
    let mut fast_wf = workflow(vec![send_step()]);
    fast_wf.conditions = vec![Condition::equals("name", json!("Fast"))];

    let mut slow_wf = wf;
    slow_wf.conditions = vec![Condition::equals("name", json!("Slow"))];

    store.add_workflow(slow_wf.clone()).await;
    store.add_workflow(fast_wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let slow_id = engine.execute(slow_wf.id, None).await.unwrap();
    let fast_id = engine.execute(fast_wf.id, None).await.unwrap();

    let fast = wait_for_terminal(&engine, fast_id).await;
    assert_eq!(fast.status, ExecutionStatus::Completed);

    let slow = wait_for_terminal(&engine, slow_id).await;
    assert_eq!(slow.status, ExecutionStatus::Completed);

    let sent = sender.sent.lock().await;
    assert_eq!(sent.len(), 2);
    // The fast execution's message went out well before the slow one's.
    let fast_at = sent.iter().find(|m| m.phone == "+912").unwrap().at;
    let slow_at = sent.iter().find(|m| m.phone == "+911").unwrap().at;
    assert!(slow_at - fast_at >= Duration::from_millis(4_000));
}

#[tokio::test]
async fn list_running_reports_in_flight_executions_only() {
    let store = MemoryStore::new();
    let sender = RecordingSender::new();

    store.add_lead(lead("Asha", "+911")).await;
    let wf = workflow(vec![send_step()]);
    store.add_workflow(wf.clone()).await;

    let engine = build_engine(&store, &sender, 4);
    let execution_id = engine.execute(wf.id, None).await.unwrap();
    let execution = wait_for_terminal(&engine, execution_id).await;

    assert_eq!(execution.success_count + execution.failure_count, execution.target_count);
    assert!(engine.list_running().await.is_empty());
    assert!(engine.get_execution(execution_id).await.is_some());
    assert!(engine.get_execution(Uuid::new_v4()).await.is_none());
}
