// tests/queue_scenarios.rs

use std::error::Error;

use labqueue::alerts::AlertEvent;
use labqueue::engine::QueueState;
use labqueue::errors::LabqueueError;
use labqueue::protocol::ParamMap;
use labqueue::store::{CommandStatus, FailureKind, RunStatus};
use labqueue::types::OrphanPolicy;
use labqueue_test_utils::builders::{WORKCELL, linear_registry};
use labqueue_test_utils::fake_dispatcher::{Script, ScriptedDispatcher};
use labqueue_test_utils::{init_tracing, settle, test_queue, test_queue_with, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn no_params() -> ParamMap {
    ParamMap::new()
}

#[tokio::test]
async fn scenario_a_three_commands_complete_in_order() -> TestResult {
    init_tracing();
    let mut q = test_queue(linear_registry("three", 3), ScriptedDispatcher::new()).await;

    let run = q.handle.create_run(WORKCELL, "three", &no_params()).await?;
    assert_eq!(run.commands.len(), 3);
    assert!(run.commands.iter().all(|c| c.status == CommandStatus::Created));

    for _ in 0..3 {
        assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    }
    assert_eq!(q.runtime.tick().await, None);

    let run = q.handle.get_run(run.id).await?;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(run.commands.iter().all(|c| c.duration_actual.is_some()));
    assert_eq!(q.dispatcher.commands(), vec!["step0", "step1", "step2"]);
    assert_eq!(q.handle.status().await.state, QueueState::Ready);

    settle().await;
    let events = q.alerts.events();
    assert!(events.contains(&AlertEvent::RunStarted {
        run_id: run.id,
        protocol_id: "three".to_string()
    }));
    assert!(events.contains(&AlertEvent::RunCompleted {
        run_id: run.id,
        protocol_id: "three".to_string()
    }));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AlertEvent::RunStarted { .. }))
            .count(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn scenario_b_failure_halts_queue_until_restart() -> TestResult {
    init_tracing();
    let dispatcher = ScriptedDispatcher::new().fail_on_call(2);
    let mut q = test_queue(linear_registry("three", 3), dispatcher).await;

    let run = q.handle.create_run(WORKCELL, "three", &no_params()).await?;

    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Failed));
    // Halted: nothing further is dispatched.
    assert_eq!(q.runtime.tick().await, None);
    assert_eq!(q.dispatcher.calls().len(), 2);

    let run = q.handle.get_run(run.id).await?;
    let statuses = run.command_statuses();
    assert_eq!(
        statuses,
        vec![CommandStatus::Completed, CommandStatus::Failed, CommandStatus::Created]
    );
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(q.handle.status().await.state, QueueState::Failed);

    let err = run.commands[1].error.as_ref().expect("error recorded");
    assert_eq!(err.kind, FailureKind::ResponseCode);
    assert!(err.message.contains("scripted failure on call 2"));
    assert!(run.commands[1].failed_at.is_some());

    settle().await;
    assert!(q.alerts.events().iter().any(|e| matches!(
        e,
        AlertEvent::CommandFailed { queue_id, .. } if *queue_id == run.commands[1].queue_id
    )));

    let status = q.handle.restart().await;
    assert_eq!(status.state, QueueState::Ready);
    assert!(status.running);
    Ok(())
}

#[tokio::test]
async fn restart_lets_other_runs_proceed_but_keeps_failed_run_blocked() -> TestResult {
    let dispatcher = ScriptedDispatcher::new().fail_on_call(1);
    let mut q = test_queue(linear_registry("two", 2), dispatcher).await;

    let failed = q.handle.create_run(WORKCELL, "two", &no_params()).await?;
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Failed));

    let next = q.handle.create_run(WORKCELL, "two", &no_params()).await?;
    assert_eq!(q.runtime.tick().await, None, "halted until restart");

    q.handle.restart().await;
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(q.runtime.tick().await, None);

    assert_eq!(q.handle.get_run(next.id).await?.status, RunStatus::Completed);
    let failed = q.handle.get_run(failed.id).await?;
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.commands[1].status, CommandStatus::Created);

    // The operator clears the blocked remainder.
    q.handle.skip_command(failed.commands[1].queue_id).await?;
    let failed = q.handle.get_run(failed.id).await?;
    assert_eq!(failed.commands[1].status, CommandStatus::Skipped);
    assert_eq!(failed.status, RunStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn scenario_c_unknown_protocol_creates_nothing() -> TestResult {
    let q = test_queue(linear_registry("three", 3), ScriptedDispatcher::new()).await;

    let err = q
        .handle
        .create_run(WORKCELL, "nonexistent", &no_params())
        .await
        .unwrap_err();
    assert!(matches!(err, LabqueueError::ProtocolNotFound(ref id) if id == "nonexistent"));

    // Known protocol, wrong workcell.
    let err = q
        .handle
        .create_run("other-cell", "three", &no_params())
        .await
        .unwrap_err();
    assert!(matches!(err, LabqueueError::ProtocolNotFound(_)));

    assert!(q.handle.list_runs().await.is_empty());
    assert!(q.handle.commands().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn scenario_d_skip_until_fast_forwards() -> TestResult {
    let mut q = test_queue(linear_registry("five", 5), ScriptedDispatcher::new()).await;
    let run = q.handle.create_run(WORKCELL, "five", &no_params()).await?;
    let c3 = run.commands[2].queue_id;

    let outcome = q.handle.skip_commands_until(c3).await?;
    assert_eq!(
        outcome.skipped,
        vec![run.commands[0].queue_id, run.commands[1].queue_id]
    );

    let run = q.handle.get_run(run.id).await?;
    assert_eq!(
        run.command_statuses(),
        vec![
            CommandStatus::Skipped,
            CommandStatus::Skipped,
            CommandStatus::Created,
            CommandStatus::Created,
            CommandStatus::Created,
        ]
    );
    assert!(run.commands[0].skipped_at.is_some());

    q.runtime.tick().await;
    assert_eq!(q.dispatcher.commands(), vec!["step2"]);
    Ok(())
}

#[tokio::test]
async fn scenario_e_clear_all_resets_to_idle() -> TestResult {
    let dispatcher = ScriptedDispatcher::new().fail_on_call(2);
    let mut q = test_queue(linear_registry("one", 1), dispatcher).await;

    let done = q.handle.create_run(WORKCELL, "one", &no_params()).await?;
    let failed = q.handle.create_run(WORKCELL, "one", &no_params()).await?;
    q.runtime.tick().await;
    q.runtime.tick().await;

    assert_eq!(q.handle.get_run(done.id).await?.status, RunStatus::Completed);
    assert_eq!(q.handle.get_run(failed.id).await?.status, RunStatus::Failed);
    assert_eq!(q.handle.status().await.state, QueueState::Failed);

    let status = q.handle.clear_all().await;
    assert_eq!(status.state, QueueState::Ready);
    assert!(q.handle.list_runs().await.is_empty());
    assert!(q.handle.commands().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn clear_completed_leaves_failed_and_waiting_runs() -> TestResult {
    let dispatcher = ScriptedDispatcher::new().fail_on_call(2);
    let mut q = test_queue(linear_registry("one", 1), dispatcher).await;

    let done = q.handle.create_run(WORKCELL, "one", &no_params()).await?;
    let failed = q.handle.create_run(WORKCELL, "one", &no_params()).await?;
    q.runtime.tick().await;
    q.runtime.tick().await;
    let waiting = q.handle.create_run(WORKCELL, "one", &no_params()).await?;

    q.handle.clear_completed().await;
    let ids: Vec<_> = q.handle.list_runs().await.into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![failed.id, waiting.id]);
    assert!(matches!(
        q.handle.get_run(done.id).await,
        Err(LabqueueError::RunNotFound(_))
    ));

    // Second call is a no-op.
    q.handle.clear_completed().await;
    assert_eq!(q.handle.list_runs().await.len(), 2);
    Ok(())
}

#[tokio::test]
async fn stop_pauses_dispatch_until_restart() -> TestResult {
    let mut q = test_queue(linear_registry("three", 3), ScriptedDispatcher::new()).await;
    let run = q.handle.create_run(WORKCELL, "three", &no_params()).await?;

    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));

    let status = q.handle.stop().await;
    assert!(!status.running);
    assert_eq!(q.runtime.tick().await, None);
    assert_eq!(q.dispatcher.calls().len(), 1);

    q.handle.restart().await;
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(q.handle.get_run(run.id).await?.status, RunStatus::Completed);

    settle().await;
    let events = q.alerts.events();
    assert!(events.contains(&AlertEvent::QueueStopped));
    assert!(events.contains(&AlertEvent::QueueRestarted));
    Ok(())
}

#[tokio::test]
async fn runs_interleave_by_command_creation_order() -> TestResult {
    let mut q = test_queue(linear_registry("two", 2), ScriptedDispatcher::new()).await;
    let a = q.handle.create_run(WORKCELL, "two", &no_params()).await?;
    let b = q.handle.create_run(WORKCELL, "two", &no_params()).await?;

    while q.runtime.tick().await.is_some() {}

    let mut order: Vec<_> = q
        .handle
        .commands()
        .await
        .into_iter()
        .map(|c| (c.started_at.expect("started"), c.run_id))
        .collect();
    order.sort_by_key(|(at, _)| *at);
    assert_eq!(order.len(), 4);
    assert_eq!(
        order.iter().map(|(_, r)| *r).collect::<Vec<_>>(),
        vec![a.id, a.id, b.id, b.id]
    );
    Ok(())
}

#[tokio::test]
async fn dispatch_timeout_fails_the_command() -> TestResult {
    let dispatcher = ScriptedDispatcher::new().on_call(1, Script::Hang);
    let mut q = test_queue(linear_registry("one", 1), dispatcher).await;
    let run = q.handle.create_run(WORKCELL, "one", &no_params()).await?;

    let status = with_timeout(q.runtime.tick()).await;
    assert_eq!(status, Some(CommandStatus::Failed));

    let run = q.handle.get_run(run.id).await?;
    let err = run.commands[0].error.as_ref().expect("error recorded");
    assert_eq!(err.kind, FailureKind::Timeout);
    assert_eq!(q.handle.status().await.state, QueueState::Failed);
    Ok(())
}

#[tokio::test]
async fn transport_error_fails_the_command() -> TestResult {
    let dispatcher =
        ScriptedDispatcher::new().on_call(1, Script::Transport("connection refused".into()));
    let mut q = test_queue(linear_registry("one", 1), dispatcher).await;
    let run = q.handle.create_run(WORKCELL, "one", &no_params()).await?;

    assert_eq!(q.runtime.tick().await, Some(CommandStatus::Failed));

    let run = q.handle.get_run(run.id).await?;
    let err = run.commands[0].error.as_ref().expect("error recorded");
    assert_eq!(err.kind, FailureKind::Transport);
    assert!(err.message.contains("connection refused"));
    Ok(())
}

#[tokio::test]
async fn skip_rejects_non_created_and_unknown_commands() -> TestResult {
    let mut q = test_queue(linear_registry("two", 2), ScriptedDispatcher::new()).await;
    let run = q.handle.create_run(WORKCELL, "two", &no_params()).await?;
    q.runtime.tick().await;

    let done = run.commands[0].queue_id;
    let err = q.handle.skip_command(done).await.unwrap_err();
    assert!(matches!(
        err,
        LabqueueError::CommandNotSkippable { status: CommandStatus::Completed, .. }
    ));

    let err = q.handle.skip_commands_until(done).await.unwrap_err();
    assert!(matches!(err, LabqueueError::CommandNotSkippable { .. }));

    let err = q.handle.skip_command(ulid::Ulid::new()).await.unwrap_err();
    assert!(matches!(err, LabqueueError::CommandNotFound(_)));

    // Skipping the last pending command completes the run.
    q.handle.skip_command(run.commands[1].queue_id).await?;
    assert_eq!(q.handle.get_run(run.id).await?.status, RunStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn startup_with_requeue_policy_dispatches_orphan_again() -> TestResult {
    use labqueue::store::{RunJournal, StoreSnapshot};
    use std::sync::{Arc, Mutex};

    /// Journal shared between two queue instances.
    #[derive(Default, Clone)]
    struct SharedJournal(Arc<Mutex<Option<StoreSnapshot>>>);

    impl RunJournal for SharedJournal {
        fn load(&self) -> labqueue::errors::Result<Option<StoreSnapshot>> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn save(&self, snapshot: &StoreSnapshot) -> labqueue::errors::Result<()> {
            *self.0.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    let journal = SharedJournal::default();

    // First process: the dispatch never returns before "the crash".
    let first = test_queue_with(
        linear_registry("one", 1),
        ScriptedDispatcher::new().on_call(1, Script::Hang),
        Box::new(journal.clone()),
        OrphanPolicy::Fail,
        labqueue_test_utils::test_options(),
    )
    .await;
    let run = first.handle.create_run(WORKCELL, "one", &no_params()).await?;
    let started = first.handle.begin_next().await.expect("dispatch");
    assert_eq!(started.run_id, run.id);
    drop(first);

    // Second process requeues the orphan and runs it.
    let mut second = test_queue_with(
        linear_registry("one", 1),
        ScriptedDispatcher::new(),
        Box::new(journal.clone()),
        OrphanPolicy::Requeue,
        labqueue_test_utils::test_options(),
    )
    .await;
    assert_eq!(second.handle.status().await.state, QueueState::Ready);
    assert_eq!(second.runtime.tick().await, Some(CommandStatus::Completed));
    assert_eq!(second.handle.get_run(run.id).await?.status, RunStatus::Completed);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_are_atomic_and_ordered() -> TestResult {
    const RUNS: usize = 16;
    const STEPS: usize = 4;

    let q = test_queue(linear_registry("batch", STEPS), ScriptedDispatcher::new()).await;

    let mut tasks = Vec::new();
    for _ in 0..RUNS {
        let handle = q.handle.clone();
        tasks.push(tokio::spawn(async move {
            let run = handle.create_run(WORKCELL, "batch", &no_params()).await?;
            // Readers racing the other writers never see a partial run.
            for seen in handle.list_runs().await {
                assert_eq!(seen.commands.len(), STEPS);
            }
            let fetched = handle.get_run(run.id).await?;
            assert_eq!(fetched.commands.len(), STEPS);
            Ok::<_, LabqueueError>(run)
        }));
    }

    let mut runs = Vec::new();
    for task in tasks {
        runs.push(with_timeout(task).await??);
    }
    runs.sort_by_key(|r| r.id);
    runs.dedup_by_key(|r| r.id);
    assert_eq!(runs.len(), RUNS);

    // Each run's ids form one contiguous block: no interleaving between runs.
    for pair in runs.windows(2) {
        let last_of_first = pair[0].commands[STEPS - 1].queue_id;
        assert!(last_of_first < pair[1].id);
    }

    let queue: Vec<_> = q.handle.commands().await.iter().map(|c| c.queue_id).collect();
    assert_eq!(queue.len(), RUNS * STEPS);
    assert!(queue.windows(2).all(|w| w[0] < w[1]));
    for run in &runs {
        assert!(run.commands.windows(2).all(|w| w[0].queue_id < w[1].queue_id));
        assert!(run.id < run.commands[0].queue_id);
    }

    let listed = q.handle.list_runs().await;
    assert_eq!(listed.len(), RUNS);
    assert!(listed.iter().all(|r| r.status == RunStatus::Queued));
    Ok(())
}
