use pretty_assertions::assert_eq;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use swapguard_supervisor::{
    NestedSupervisor, ProcessId, ProcessStatus, RestartBudget, SupervisionStrategy, Supervisor,
    SupervisorConfig, SupervisorError, SupervisorEvent, WorkerError,
};
use swapguard_test_utils::{crash, Journal, ManualClock, ScriptedWorker};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};

const WINDOW: u64 = 60_000;

fn supervisor(strategy: SupervisionStrategy, tree_max: u32, clock: &ManualClock) -> Supervisor {
    Supervisor::with_clock(
        SupervisorConfig::new("test")
            .with_strategy(strategy)
            .with_tree_budget(RestartBudget::new(tree_max, WINDOW, 0)),
        Arc::new(clock.clone()),
    )
}

fn budget(max_restarts: u32) -> RestartBudget {
    RestartBudget::new(max_restarts, WINDOW, 0)
}

fn id(name: &str) -> ProcessId {
    ProcessId::from(name)
}

fn drain(events: &mut mpsc::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn started(names: &[&str], strategy: SupervisionStrategy, journal: &Journal) -> Supervisor {
    let clock = ManualClock::new(0);
    let mut sup = supervisor(strategy, 0, &clock);
    for name in names {
        sup.register(*name, budget(5), ScriptedWorker::new(name, journal))
            .unwrap();
    }
    sup.start().await.unwrap();
    journal.take();
    sup
}

#[tokio::test]
async fn start_runs_in_registration_order() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    for name in ["a", "b", "c"] {
        sup.register(name, budget(1), ScriptedWorker::new(name, &journal))
            .unwrap();
    }
    let mut events = sup.subscribe();

    sup.start().await.unwrap();

    assert_eq!(journal.entries(), vec!["start a", "start b", "start c"]);
    assert!(sup.records().all(|r| r.status == ProcessStatus::Running));
    assert_eq!(
        drain(&mut events),
        vec![
            SupervisorEvent::ProcessStarted { process: id("a") },
            SupervisorEvent::ProcessStarted { process: id("b") },
            SupervisorEvent::ProcessStarted { process: id("c") },
        ]
    );
}

#[tokio::test]
async fn stop_runs_in_reverse_and_tolerates_failures() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", budget(1), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.register("b", budget(1), ScriptedWorker::new("b", &journal).failing_stop())
        .unwrap();
    sup.register("c", budget(1), ScriptedWorker::new("c", &journal))
        .unwrap();
    sup.start().await.unwrap();
    journal.take();

    sup.stop().await;

    assert_eq!(journal.entries(), vec!["stop c", "stop b", "stop a"]);
    assert!(sup.records().all(|r| r.status == ProcessStatus::Stopped));
}

#[tokio::test]
async fn one_for_one_escalates_on_third_crash_without_touching_sibling() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", budget(2), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.register("b", budget(2), ScriptedWorker::new("b", &journal))
        .unwrap();
    sup.start().await.unwrap();
    journal.take();

    sup.on_crash(id("a"), crash("first")).await.unwrap();
    sup.on_crash(id("a"), crash("second")).await.unwrap();
    assert_eq!(
        journal.take(),
        vec!["stop a", "start a", "stop a", "start a"]
    );
    assert_eq!(sup.record(&id("a")).unwrap().restart_count(), 2);

    let err = sup.on_crash(id("a"), crash("third")).await.unwrap_err();
    assert_eq!(
        err,
        SupervisorError::Escalated {
            supervisor: "test".to_string(),
            process: id("a"),
            source: crash("third"),
        }
    );
    // b is only touched by the final shutdown of the tree
    assert_eq!(journal.entries(), vec!["stop b", "stop a"]);
    assert!(sup.records().all(|r| r.status == ProcessStatus::Stopped));
}

#[tokio::test]
async fn rest_for_one_restarts_crashed_process_and_successors() {
    let journal = Journal::new();
    let mut sup = started(&["a", "b", "c"], SupervisionStrategy::RestForOne, &journal).await;

    sup.on_crash(id("b"), crash("boom")).await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["stop c", "stop b", "start b", "start c"]
    );
    assert!(journal.entries_for("a").is_empty());
    assert_eq!(sup.record(&id("a")).unwrap().restart_count(), 0);
    assert_eq!(sup.record(&id("b")).unwrap().restart_count(), 1);
    assert_eq!(sup.record(&id("c")).unwrap().restart_count(), 0);
}

#[tokio::test]
async fn one_for_all_restarts_everything() {
    let journal = Journal::new();
    let mut sup = started(&["a", "b", "c"], SupervisionStrategy::OneForAll, &journal).await;

    sup.on_crash(id("b"), crash("boom")).await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["stop c", "stop b", "stop a", "start a", "start b", "start c"]
    );
    assert!(sup.records().all(|r| r.status.is_running()));
}

#[tokio::test]
async fn start_failure_goes_through_crash_handler() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", budget(2), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.register("b", budget(2), ScriptedWorker::new("b", &journal).failing_starts(1))
        .unwrap();
    sup.register("c", budget(2), ScriptedWorker::new("c", &journal))
        .unwrap();
    let mut events = sup.subscribe();

    sup.start().await.unwrap();

    assert_eq!(
        journal.entries(),
        vec!["start a", "start-failed b", "stop b", "start b", "start c"]
    );
    assert_eq!(sup.record(&id("b")).unwrap().restart_count(), 1);
    let events = drain(&mut events);
    assert!(events.contains(&SupervisorEvent::ProcessCrashed {
        process: id("b"),
        code: 1,
        message: "b refused to start".to_string(),
    }));
    assert!(events.contains(&SupervisorEvent::ProcessRestarted {
        process: id("b"),
        attempt: 1,
    }));
}

#[tokio::test]
async fn repeated_start_failure_escalates_to_caller() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", budget(2), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.register("b", budget(2), ScriptedWorker::new("b", &journal).failing_starts(10))
        .unwrap();

    let err = sup.start().await.unwrap_err();

    assert!(matches!(err, SupervisorError::Escalated { ref process, .. } if process == &id("b")));
    assert_eq!(
        journal.entries_for("b"),
        vec![
            "start-failed b",
            "stop b",
            "start-failed b",
            "stop b",
            "start-failed b",
            "stop b",
        ]
    );
    assert!(sup.records().all(|r| r.status == ProcessStatus::Stopped));
}

#[tokio::test]
async fn restart_window_resets_once_elapsed() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", RestartBudget::new(1, 1_000, 0), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.start().await.unwrap();

    sup.on_crash(id("a"), crash("one")).await.unwrap();
    clock.advance(1_000);
    sup.on_crash(id("a"), crash("two")).await.unwrap();
    let record = sup.record(&id("a")).unwrap();
    assert_eq!(record.restart_count(), 1);
    assert_eq!(record.window_start(), 1_000);

    clock.advance(999);
    assert!(sup.on_crash(id("a"), crash("three")).await.is_err());
}

#[tokio::test]
async fn escalation_within_tree_budget_restarts_whole_tree() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 1, &clock);
    sup.register("a", budget(0), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.register("b", budget(0), ScriptedWorker::new("b", &journal))
        .unwrap();
    let mut events = sup.subscribe();
    sup.start().await.unwrap();
    journal.take();
    drain(&mut events);

    sup.on_crash(id("a"), crash("boom")).await.unwrap();

    assert_eq!(
        journal.take(),
        vec!["stop b", "stop a", "start a", "start b"]
    );
    assert_eq!(sup.tree_restarts(), 1);
    assert_eq!(
        drain(&mut events),
        vec![
            SupervisorEvent::ProcessCrashed {
                process: id("a"),
                code: 50,
                message: "boom".to_string(),
            },
            SupervisorEvent::Escalated {
                process: id("a"),
                tree_restarts: 1,
            },
            SupervisorEvent::ProcessStopped { process: id("b") },
            SupervisorEvent::ProcessStopped { process: id("a") },
            SupervisorEvent::ProcessRestarted {
                process: id("a"),
                attempt: 0,
            },
            SupervisorEvent::ProcessRestarted {
                process: id("b"),
                attempt: 0,
            },
        ]
    );

    let err = sup.on_crash(id("b"), crash("again")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Escalated { .. }));
    let tail = drain(&mut events);
    assert_eq!(
        tail.last(),
        Some(&SupervisorEvent::SupervisorFailed {
            process: id("b"),
            message: crash("again").to_string(),
        })
    );
}

#[tokio::test]
async fn crash_past_restart_deadline_retires_process() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register(
        "claim",
        budget(3),
        ScriptedWorker::new("claim", &journal).with_restart_deadline(100),
    )
    .unwrap();
    let mut events = sup.subscribe();
    sup.start().await.unwrap();
    journal.take();
    drain(&mut events);

    clock.set(100);
    sup.on_crash(id("claim"), crash("expired")).await.unwrap();

    assert_eq!(journal.take(), vec!["stop claim"]);
    let record = sup.record(&id("claim")).unwrap();
    assert!(record.retired);
    assert_eq!(record.status, ProcessStatus::Stopped);
    assert!(drain(&mut events).contains(&SupervisorEvent::RestartAbandoned {
        process: id("claim"),
        deadline: 100,
    }));

    sup.start().await.unwrap();
    assert!(journal.entries().is_empty());
}

#[tokio::test(start_paused = true)]
async fn restart_backoff_grows_with_attempts() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    sup.register("a", RestartBudget::new(3, WINDOW, 500), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.start().await.unwrap();

    let began = Instant::now();
    sup.on_crash(id("a"), crash("one")).await.unwrap();
    assert_eq!(began.elapsed(), Duration::from_millis(500));

    let began = Instant::now();
    sup.on_crash(id("a"), crash("two")).await.unwrap();
    assert_eq!(began.elapsed(), Duration::from_millis(1_000));
}

#[tokio::test(start_paused = true)]
async fn run_until_processes_reported_crashes() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    let reporter = sup.reporter("a");
    sup.register("a", budget(3), ScriptedWorker::new("a", &journal))
        .unwrap();
    sup.start().await.unwrap();
    journal.take();

    reporter.report(crash("runtime failure"));
    sup.run_until(sleep(Duration::from_secs(1))).await.unwrap();

    assert_eq!(journal.entries(), vec!["stop a", "start a", "stop a"]);
    assert_eq!(sup.record(&id("a")).unwrap().restart_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn health_probe_restarts_unhealthy_process() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);
    let mut sup = Supervisor::with_clock(
        SupervisorConfig::new("probe").with_health_interval(100),
        Arc::new(clock.clone()),
    );
    let worker = ScriptedWorker::new("a", &journal);
    let health = worker.health();
    sup.register("a", budget(3), worker).unwrap();
    sup.start().await.unwrap();
    journal.take();

    health.store(false, Ordering::SeqCst);
    sup.run_until(sleep(Duration::from_millis(150))).await.unwrap();

    assert_eq!(journal.entries(), vec!["stop a", "start a", "stop a"]);
    let record = sup.record(&id("a")).unwrap();
    assert_eq!(record.restart_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn nested_escalation_is_a_crash_in_the_parent() {
    let journal = Journal::new();
    let clock = ManualClock::new(0);

    let mut child = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    let x = child.reporter("x");
    child
        .register("x", budget(0), ScriptedWorker::new("x", &journal))
        .unwrap();

    let mut parent = supervisor(SupervisionStrategy::OneForOne, 0, &clock);
    let nested = NestedSupervisor::new(child, parent.reporter("child"));
    parent.register("child", budget(1), nested).unwrap();
    let mut events = parent.subscribe();
    parent.start().await.unwrap();
    assert_eq!(journal.take(), vec!["start x"]);

    x.report(crash("x died"));
    parent
        .run_until(sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(journal.entries(), vec!["stop x", "start x", "stop x"]);
    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        SupervisorEvent::ProcessCrashed { process, code, .. }
            if process == &id("child") && *code == WorkerError::ESCALATED
    )));
    assert!(events.contains(&SupervisorEvent::ProcessRestarted {
        process: id("child"),
        attempt: 1,
    }));
}
