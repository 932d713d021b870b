// tests/run_store.rs

use chrono::{Duration, TimeZone, Utc};

use labqueue::errors::LabqueueError;
use labqueue::protocol::{CommandSpec, ValidatedParams};
use labqueue::store::{CommandStatus, NewRun, RunStatus, RunStore};
use labqueue::types::OrphanPolicy;

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

fn new_run(protocol: &str, n: usize) -> NewRun {
    NewRun {
        protocol_id: protocol.to_string(),
        workcell: "cell".to_string(),
        params: ValidatedParams::default(),
        commands_digest: "digest".to_string(),
        commands: (0..n)
            .map(|i| CommandSpec::new("arm", "arm", format!("{protocol}-{i}")))
            .collect(),
    }
}

#[test]
fn insert_run_creates_commands_in_order() {
    let mut store = RunStore::new();
    let run = store.insert_run(new_run("p", 3), t0()).unwrap();

    assert_eq!(run.status, RunStatus::Queued);
    assert_eq!(run.commands.len(), 3);
    assert!(run.commands.iter().all(|c| c.status == CommandStatus::Created));
    assert!(run.commands.iter().all(|c| c.run_id == run.id));

    let opcodes: Vec<_> = run.commands.iter().map(|c| c.command_info.command.as_str()).collect();
    assert_eq!(opcodes, vec!["p-0", "p-1", "p-2"]);

    // Queue ids increase in run order.
    assert!(run.commands.windows(2).all(|w| w[0].queue_id < w[1].queue_id));
    assert_eq!(store.get(run.id).unwrap(), run);
}

#[test]
fn fifo_spans_runs_in_command_creation_order() {
    let mut store = RunStore::new();
    let a = store.insert_run(new_run("a", 2), t0()).unwrap();
    let b = store.insert_run(new_run("b", 2), t0()).unwrap();

    let fifo: Vec<_> = store.commands().map(|c| c.command_info.command.clone()).collect();
    assert_eq!(fifo, vec!["a-0", "a-1", "b-0", "b-1"]);
    assert!(a.id < b.id);
}

#[test]
fn transitions_follow_legal_edges_only() {
    let mut store = RunStore::new();
    let run = store.insert_run(new_run("p", 2), t0()).unwrap();
    let q0 = run.commands[0].queue_id;
    let q1 = run.commands[1].queue_id;

    // CREATED -> COMPLETED is not an edge.
    let err = store.transition(q0, CommandStatus::Completed, t0()).unwrap_err();
    assert!(matches!(err, LabqueueError::InvalidTransition { .. }));

    store.transition(q0, CommandStatus::Started, t0()).unwrap();
    let done = store
        .transition(q0, CommandStatus::Completed, t0() + Duration::milliseconds(1500))
        .unwrap();
    assert_eq!(done.duration_actual, Some(1.5));
    assert!(done.completed_at.is_some());

    // Terminal states never move again.
    assert!(store.transition(q0, CommandStatus::Started, t0()).is_err());

    store.transition(q1, CommandStatus::Skipped, t0()).unwrap();
    assert!(store.transition(q1, CommandStatus::Started, t0()).is_err());

    let run = store.get(run.id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}

#[test]
fn transition_of_unknown_command_is_not_found() {
    let mut store = RunStore::new();
    let err = store
        .transition(ulid::Ulid::new(), CommandStatus::Started, t0())
        .unwrap_err();
    assert!(matches!(err, LabqueueError::CommandNotFound(_)));
}

#[test]
fn next_eligible_blocks_runs_with_failed_or_started_commands() {
    let mut store = RunStore::new();
    let a = store.insert_run(new_run("a", 2), t0()).unwrap();
    let b = store.insert_run(new_run("b", 1), t0()).unwrap();

    assert_eq!(store.next_eligible(), Some(a.commands[0].queue_id));

    store.transition(a.commands[0].queue_id, CommandStatus::Started, t0()).unwrap();
    // a-1 waits behind a-0; b-0 is the next candidate.
    assert_eq!(store.next_eligible(), Some(b.commands[0].queue_id));

    store.transition(a.commands[0].queue_id, CommandStatus::Failed, t0()).unwrap();
    assert_eq!(store.next_eligible(), Some(b.commands[0].queue_id));
    assert_eq!(store.run_status(a.id), Some(RunStatus::Failed));
}

#[test]
fn derived_run_timestamps() {
    let mut store = RunStore::new();
    let run = store.insert_run(new_run("p", 2), t0()).unwrap();
    let (q0, q1) = (run.commands[0].queue_id, run.commands[1].queue_id);

    store.transition(q0, CommandStatus::Started, t0() + Duration::seconds(1)).unwrap();
    store.transition(q0, CommandStatus::Completed, t0() + Duration::seconds(2)).unwrap();

    let mid = store.get(run.id).unwrap();
    assert_eq!(mid.status, RunStatus::Created);
    assert_eq!(mid.started_at, Some(t0() + Duration::seconds(1)));
    assert_eq!(mid.completed_at, None);

    store.transition(q1, CommandStatus::Started, t0() + Duration::seconds(3)).unwrap();
    store.transition(q1, CommandStatus::Completed, t0() + Duration::seconds(5)).unwrap();

    let done = store.get(run.id).unwrap();
    assert_eq!(done.status, RunStatus::Completed);
    assert_eq!(done.completed_at, Some(t0() + Duration::seconds(5)));
}

#[test]
fn clear_completed_is_idempotent() {
    let mut store = RunStore::new();
    let done = store.insert_run(new_run("done", 1), t0()).unwrap();
    let waiting = store.insert_run(new_run("waiting", 1), t0()).unwrap();

    let q = done.commands[0].queue_id;
    store.transition(q, CommandStatus::Started, t0()).unwrap();
    store.transition(q, CommandStatus::Completed, t0()).unwrap();

    let first = store.completed_run_ids();
    assert_eq!(store.remove_runs(&first), 1);
    let after_once = store.snapshot();

    let second = store.completed_run_ids();
    assert_eq!(store.remove_runs(&second), 0);
    assert_eq!(store.snapshot(), after_once);

    assert!(store.get(done.id).is_none());
    assert!(store.get(waiting.id).is_some());
    assert_eq!(store.commands().count(), 1);
}

#[test]
fn snapshot_roundtrip_keeps_ids_monotonic() {
    let mut store = RunStore::new();
    let first = store.insert_run(new_run("p", 2), t0()).unwrap();

    let mut restored = RunStore::from_snapshot(store.snapshot());
    assert_eq!(restored.get(first.id).unwrap(), first);

    let second = restored.insert_run(new_run("q", 1), t0()).unwrap();
    assert!(second.id > first.commands[1].queue_id);
}

#[test]
fn reconcile_orphans_fail_policy() {
    let mut store = RunStore::new();
    let run = store.insert_run(new_run("p", 2), t0()).unwrap();
    let q0 = run.commands[0].queue_id;
    store.transition(q0, CommandStatus::Started, t0()).unwrap();

    let orphans = store.reconcile_orphans(OrphanPolicy::Fail, t0());
    assert_eq!(orphans, vec![q0]);

    let cmd = store.command(q0).unwrap();
    assert_eq!(cmd.status, CommandStatus::Failed);
    assert_eq!(
        cmd.error.as_ref().map(|e| e.kind),
        Some(labqueue::store::FailureKind::Orphaned)
    );
    assert_eq!(store.run_status(run.id), Some(RunStatus::Failed));
}

#[test]
fn reconcile_orphans_requeue_policy() {
    let mut store = RunStore::new();
    let run = store.insert_run(new_run("p", 2), t0()).unwrap();
    let q0 = run.commands[0].queue_id;
    store.transition(q0, CommandStatus::Started, t0()).unwrap();

    let orphans = store.reconcile_orphans(OrphanPolicy::Requeue, t0());
    assert_eq!(orphans, vec![q0]);

    let cmd = store.command(q0).unwrap();
    assert_eq!(cmd.status, CommandStatus::Created);
    assert_eq!(cmd.started_at, None);
    assert_eq!(store.next_eligible(), Some(q0));
}
