//! Composition tests exercising sequence/parallel ordering guarantees.
//!
//! All tests run on tokio's paused clock, so timings are exact.

#![cfg(test)]

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{Instant, sleep};

use super::compose::{Node, Outcome, SequencePolicy, Task};
use super::dispatcher::{DispatchOutcome, Dispatcher};
use crate::device::{Phase, SimulationProfile};
use crate::error::{DispatchError, ErrorKind};
use crate::model::{Command, DeviceId, DeviceKind};
use crate::registry::{DeviceDescriptor, DeviceRegistry};

type Log = Arc<Mutex<Vec<String>>>;

/// Test task that logs its start and end, sleeps, then succeeds or fails.
struct Step {
    name: &'static str,
    delay: Duration,
    fail: bool,
    log: Log,
}

impl Step {
    fn node(name: &'static str, delay_ms: u64, fail: bool, log: &Log) -> Node {
        Node::leaf(Step {
            name,
            delay: Duration::from_millis(delay_ms),
            fail,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Task for Step {
    async fn run(&self) -> Outcome {
        self.log.lock().unwrap().push(format!("start {}", self.name));
        sleep(self.delay).await;
        self.log.lock().unwrap().push(format!("end {}", self.name));

        let result = if self.fail {
            Err(DispatchError::Execution {
                device: DeviceId(0),
                reason: format!("{} failed", self.name),
            })
        } else {
            Ok(())
        };

        Outcome::Dispatch(DispatchOutcome {
            device: DeviceId(0),
            label: Some(self.name.to_string()),
            command: Command::switch_on(),
            started_at: Utc::now(),
            elapsed: self.delay,
            result,
        })
    }
}

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn labels(outcome: &Outcome) -> Vec<String> {
    outcome
        .dispatches()
        .iter()
        .filter_map(|d| d.label.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_parallel_preserves_input_order() {
    let log = new_log();
    // finishes in reverse input order
    let tree = Node::parallel(vec![
        Step::node("a", 30, false, &log),
        Step::node("b", 20, false, &log),
        Step::node("c", 10, false, &log),
    ]);

    let outcome = tree.execute().await;

    assert_eq!(labels(&outcome), vec!["a", "b", "c"]);
    assert_eq!(outcome.children().len(), 3);
    let ends: Vec<_> = entries(&log).into_iter().filter(|e| e.starts_with("end")).collect();
    assert_eq!(ends, vec!["end c", "end b", "end a"]);
}

#[tokio::test(start_paused = true)]
async fn test_sequence_happens_before() {
    let log = new_log();
    let tree = Node::sequence(vec![
        Step::node("first", 30, false, &log),
        Step::node("second", 10, false, &log),
        Step::node("third", 20, false, &log),
    ]);

    let start = Instant::now();
    let outcome = tree.execute().await;

    assert!(outcome.is_success());
    assert_eq!(
        entries(&log),
        vec!["start first", "end first", "start second", "end second", "start third", "end third"]
    );
    assert_eq!(start.elapsed(), Duration::from_millis(60));
}

#[tokio::test(start_paused = true)]
async fn test_sequence_is_fail_soft() {
    let log = new_log();
    let tree = Node::sequence(vec![
        Step::node("one", 5, false, &log),
        Step::node("two", 5, true, &log),
        Step::node("three", 5, false, &log),
    ]);

    let outcome = tree.execute().await;

    assert!(!outcome.is_success());
    assert!(entries(&log).contains(&"end three".to_string()));
    let failures = outcome.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].label.as_deref(), Some("two"));
}

#[tokio::test(start_paused = true)]
async fn test_strict_sequence_skips_after_failure() {
    let log = new_log();
    let tree = Node::sequence_with(
        SequencePolicy::AbortOnFailure,
        vec![
            Step::node("one", 5, false, &log),
            Step::node("two", 5, true, &log),
            Step::node("three", 5, false, &log),
        ],
    );

    let outcome = tree.execute().await;

    assert_eq!(outcome.children().len(), 3);
    assert!(matches!(outcome.children()[2], Outcome::Skipped));
    assert_eq!(outcome.skipped(), 1);
    assert!(!entries(&log).iter().any(|e| e.ends_with("three")));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failure_does_not_cancel_siblings() {
    let log = new_log();
    let tree = Node::parallel(vec![
        Step::node("fails-fast", 0, true, &log),
        Step::node("slow", 50, false, &log),
        Step::node("slower", 80, false, &log),
    ]);

    let outcome = tree.execute().await;

    let dispatches = outcome.dispatches();
    assert_eq!(dispatches.len(), 3);
    assert!(!dispatches[0].is_success());
    assert!(dispatches[1].is_success());
    assert!(dispatches[2].is_success());
    let log = entries(&log);
    assert!(log.contains(&"end slow".to_string()));
    assert!(log.contains(&"end slower".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_all_failing_completes() {
    let log = new_log();
    let tree = Node::parallel(vec![
        Step::node("x", 10, true, &log),
        Step::node("y", 20, true, &log),
    ]);

    let outcome = tree.execute().await;
    assert_eq!(outcome.failures().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_nested_composition() {
    let log = new_log();
    // (a || b) ; (c ; (d || e))
    let tree = Node::sequence(vec![
        Node::parallel(vec![Step::node("a", 20, false, &log), Step::node("b", 10, false, &log)]),
        Node::sequence(vec![
            Step::node("c", 10, false, &log),
            Node::parallel(vec![Step::node("d", 10, false, &log), Step::node("e", 30, false, &log)]),
        ]),
    ]);

    let start = Instant::now();
    let outcome = tree.execute().await;

    assert_eq!(labels(&outcome), vec!["a", "b", "c", "d", "e"]);
    // 20 + 10 + 30
    assert_eq!(start.elapsed(), Duration::from_millis(60));

    let log = entries(&log);
    let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
    assert!(pos("end a") < pos("start c"));
    assert!(pos("end b") < pos("start c"));
    assert!(pos("end c") < pos("start d"));
}

#[tokio::test(start_paused = true)]
async fn test_node_as_task() {
    let log = new_log();
    let inner = Node::parallel(vec![Step::node("p", 10, false, &log), Step::node("q", 10, false, &log)]);
    let tree = Node::sequence(vec![Node::leaf(inner), Step::node("r", 10, false, &log)]);

    let outcome = tree.execute().await;
    assert_eq!(labels(&outcome), vec!["p", "q", "r"]);
    assert!(matches!(outcome.children()[0], Outcome::Parallel(_)));
}

#[tokio::test(start_paused = true)]
async fn test_wake_phase_time_is_max_not_sum() {
    const T_REG: u64 = 100;
    const T_STEP: u64 = 40;

    let registry = Arc::new(DeviceRegistry::new());
    let descriptors = vec![
        DeviceDescriptor::simulated("light", DeviceKind::HueLight, profile(T_REG, T_STEP)),
        DeviceDescriptor::simulated("speaker", DeviceKind::SmartSpeaker, profile(T_REG, T_STEP)),
        DeviceDescriptor::simulated("toilet", DeviceKind::SmartToilet, profile(T_REG, T_STEP)),
    ];

    let start = Instant::now();
    let ids = super::compose::parallel(descriptors.into_iter().map(|d| {
        let registry = registry.clone();
        async move { registry.register(d).await }
    }))
    .await;
    assert_eq!(start.elapsed(), Duration::from_millis(T_REG));

    let ids: Vec<_> = ids.into_iter().map(Result::unwrap).collect();
    let dispatcher = Arc::new(Dispatcher::new(registry));
    let scripts = [
        vec![Command::switch_on(), Command::change_color("blue")],
        vec![Command::switch_on(), Command::play_song("Never Gonna Give You Up")],
        vec![Command::flush(), Command::clean()],
    ];

    let wake = Node::parallel(
        ids.iter()
            .zip(scripts)
            .map(|(id, script)| {
                Node::sequence(script.into_iter().map(|c| dispatcher.leaf(*id, c)).collect())
            })
            .collect(),
    );

    let start = Instant::now();
    let outcome = wake.execute().await;

    assert!(outcome.is_success());
    // each dispatch is connect + execute, no disconnect latency; two per device
    assert_eq!(start.elapsed(), Duration::from_millis(2 * 2 * T_STEP));
}

#[tokio::test(start_paused = true)]
async fn test_failing_device_does_not_block_others() {
    let registry = Arc::new(DeviceRegistry::new());
    let broken = registry
        .register(DeviceDescriptor::simulated(
            "broken",
            DeviceKind::HueLight,
            SimulationProfile::uniform(5).failing(Phase::Connect),
        ))
        .await
        .unwrap();
    let healthy = registry
        .register(DeviceDescriptor::simulated(
            "healthy",
            DeviceKind::SmartSpeaker,
            SimulationProfile::uniform(5),
        ))
        .await
        .unwrap();
    let dispatcher = Arc::new(Dispatcher::new(registry));

    let tree = Node::parallel(vec![
        Node::sequence(vec![
            dispatcher.leaf(broken, Command::switch_on()),
            dispatcher.leaf(broken, Command::change_color("red")),
        ]),
        dispatcher.leaf(healthy, Command::switch_on()),
        dispatcher.leaf(DeviceId(99), Command::switch_on()),
    ]);

    let outcome = tree.execute().await;
    let kinds: Vec<_> = outcome
        .dispatches()
        .iter()
        .map(|d| d.error().map(DispatchError::kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            Some(ErrorKind::Connection),
            Some(ErrorKind::Connection),
            None,
            Some(ErrorKind::UnknownDevice),
        ]
    );
}

fn profile(setup_ms: u64, step_ms: u64) -> SimulationProfile {
    SimulationProfile {
        setup_ms,
        connect_ms: step_ms,
        execute_ms: step_ms,
        disconnect_ms: 0,
        fail: Vec::new(),
    }
}
