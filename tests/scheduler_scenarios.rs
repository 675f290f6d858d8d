use futures::FutureExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use telescope_executive::task::{
    ErrorIndicator, GroupFailureMode, GroupPolicy, GroupTask, LeafTask, ParallelConfig,
    ParallelTask, RootManager, Task, TaskInfoState, TaskRef,
};
use tokio::time::sleep;

type Log = Arc<Mutex<Vec<String>>>;

fn quick() -> ParallelConfig {
    ParallelConfig::default().with_poll_interval(Duration::from_millis(5))
}

fn step(name: &str, delay: Duration, outcome: Result<(), i32>, log: &Log) -> Arc<LeafTask> {
    let log = log.clone();
    let label = name.to_string();
    Arc::new(LeafTask::from_fn(name, move |_cancel| {
        let log = log.clone();
        let label = label.clone();
        async move {
            log.lock().unwrap().push(format!("start {label}"));
            sleep(delay).await;
            log.lock().unwrap().push(format!("end {label}"));
            outcome
                .map(|_| None)
                .map_err(|code| ErrorIndicator::new(code, format!("{label} failed")))
        }
        .boxed()
    }))
}

fn index_of(log: &Log, entry: &str) -> usize {
    log.lock()
        .unwrap()
        .iter()
        .position(|e| e == entry)
        .unwrap_or_else(|| panic!("missing log entry {entry}"))
}

#[tokio::test]
async fn test_join_waits_for_both_predecessors() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let a = step("a", Duration::from_millis(20), Ok(()), &log);
    let b = step("b", Duration::from_millis(40), Ok(()), &log);
    let c = step("c", Duration::ZERO, Ok(()), &log);

    let policy = GroupPolicy::new()
        .with_tasks([a.clone() as TaskRef, b.clone(), c.clone()])
        .with_edge(a.id(), c.id())
        .with_edge(b.id(), c.id());
    let group: Arc<GroupTask> = Arc::new(ParallelTask::new("join", policy).with_config(quick()));

    let outcome = RootManager::new().run(group.clone()).await;

    assert!(outcome.is_done());
    let start_c = index_of(&log, "start c");
    assert!(index_of(&log, "end a") < start_c);
    assert!(index_of(&log, "end b") < start_c);
    assert!(index_of(&log, "start b") < index_of(&log, "end a"));
    assert_eq!(group.statistics().done_tasks, 3);
}

#[tokio::test]
async fn test_skipped_failure_releases_dependent() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let a = step("a", Duration::ZERO, Err(3001), &log);
    let b = step("b", Duration::from_millis(10), Ok(()), &log);
    let c = step("c", Duration::ZERO, Ok(()), &log);

    let policy = GroupPolicy::new()
        .with_tasks([a.clone() as TaskRef, b.clone(), c.clone()])
        .with_edge(a.id(), c.id())
        .with_edge(b.id(), c.id())
        .with_failure_mode(GroupFailureMode::Skip);
    let group: Arc<GroupTask> = Arc::new(ParallelTask::new("optional", policy).with_config(quick()));

    let outcome = RootManager::new().run(group.clone()).await;

    assert!(outcome.is_done());
    assert!(index_of(&log, "end b") < index_of(&log, "start c"));
    let states = group.child_states();
    assert!(states.contains(&("a".to_string(), TaskInfoState::Skipped)));
    assert!(states.contains(&("c".to_string(), TaskInfoState::Done)));
}

#[tokio::test]
async fn test_composite_failure_aborts_running_children() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let first = step("first", Duration::from_secs(30), Ok(()), &log);
    let second = step("second", Duration::from_secs(30), Ok(()), &log);

    let policy = GroupPolicy::new().with_tasks([first.clone() as TaskRef, second.clone()]);
    let group: Arc<GroupTask> = Arc::new(ParallelTask::new("pointing", policy).with_config(quick()));

    let root = RootManager::new();
    let runner = root.clone();
    let as_task: TaskRef = group.clone();
    let handle = tokio::spawn(async move { runner.run(as_task).await });

    for _ in 0..400 {
        if group.statistics().running_tasks == 2 {
            break;
        }
        sleep(Duration::from_millis(5)).await;
    }
    group.fail(ErrorIndicator::new(4001, "bad target"));

    let outcome = handle.await.unwrap();
    assert!(outcome.is_failed());
    assert_eq!(outcome.error().unwrap().code(), 4001);
    assert_eq!(outcome.error().unwrap().message(), "bad target");
    assert!(first.is_aborted());
    assert!(second.is_aborted());
}
