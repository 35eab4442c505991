// Sequential and parallel composition of tasks

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

use super::dispatcher::DispatchOutcome;

/// Anything that runs to completion and yields an [`Outcome`].
///
/// Leaf dispatches and composition nodes both implement this, so trees nest
/// uniformly.
#[async_trait]
pub trait Task: Send + Sync {
    async fn run(&self) -> Outcome;
}

/// What a sequence does after one of its children fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencePolicy {
    /// Keep going: later children still run.
    #[default]
    FailSoft,
    /// Stop starting children; the rest are reported as [`Outcome::Skipped`].
    AbortOnFailure,
}

/// Result tree mirroring the [`Node`] tree that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    Dispatch(DispatchOutcome),
    Skipped,
    Sequence(Vec<Outcome>),
    Parallel(Vec<Outcome>),
}

impl Outcome {
    /// True when every leaf below this outcome ran and succeeded.
    pub fn is_success(&self) -> bool {
        match self {
            Outcome::Dispatch(outcome) => outcome.is_success(),
            Outcome::Skipped => false,
            Outcome::Sequence(children) | Outcome::Parallel(children) => {
                children.iter().all(Outcome::is_success)
            }
        }
    }

    /// Direct children of a group; empty for leaves.
    pub fn children(&self) -> &[Outcome] {
        match self {
            Outcome::Sequence(children) | Outcome::Parallel(children) => children,
            _ => &[],
        }
    }

    /// Every dispatch outcome in the tree, depth-first in input order.
    pub fn dispatches(&self) -> Vec<&DispatchOutcome> {
        let mut out = Vec::new();
        self.collect_dispatches(&mut out);
        out
    }

    fn collect_dispatches<'a>(&'a self, out: &mut Vec<&'a DispatchOutcome>) {
        match self {
            Outcome::Dispatch(outcome) => out.push(outcome),
            Outcome::Skipped => {}
            Outcome::Sequence(children) | Outcome::Parallel(children) => {
                for child in children {
                    child.collect_dispatches(out);
                }
            }
        }
    }

    pub fn failures(&self) -> Vec<&DispatchOutcome> {
        self.dispatches()
            .into_iter()
            .filter(|outcome| !outcome.is_success())
            .collect()
    }

    pub fn skipped(&self) -> usize {
        match self {
            Outcome::Skipped => 1,
            Outcome::Dispatch(_) => 0,
            Outcome::Sequence(children) | Outcome::Parallel(children) => {
                children.iter().map(Outcome::skipped).sum()
            }
        }
    }
}

/// A composition tree. Built fresh for a run and consumed by [`Node::execute`].
#[derive(Clone)]
pub enum Node {
    Leaf(Arc<dyn Task>),
    Sequence {
        policy: SequencePolicy,
        children: Vec<Node>,
    },
    Parallel(Vec<Node>),
}

impl Node {
    pub fn leaf(task: impl Task + 'static) -> Self {
        Node::Leaf(Arc::new(task))
    }

    /// Fail-soft sequence.
    pub fn sequence(children: Vec<Node>) -> Self {
        Self::sequence_with(SequencePolicy::FailSoft, children)
    }

    pub fn sequence_with(policy: SequencePolicy, children: Vec<Node>) -> Self {
        Node::Sequence { policy, children }
    }

    pub fn parallel(children: Vec<Node>) -> Self {
        Node::Parallel(children)
    }

    /// Sets the policy of this node and every sequence below it.
    pub fn with_policy(self, policy: SequencePolicy) -> Self {
        match self {
            Node::Leaf(task) => Node::Leaf(task),
            Node::Sequence { children, .. } => Node::Sequence {
                policy,
                children: children.into_iter().map(|c| c.with_policy(policy)).collect(),
            },
            Node::Parallel(children) => {
                Node::Parallel(children.into_iter().map(|c| c.with_policy(policy)).collect())
            }
        }
    }

    /// Runs the tree to completion.
    pub fn execute(self) -> BoxFuture<'static, Outcome> {
        async move {
            match self {
                Node::Leaf(task) => task.run().await,
                Node::Sequence { policy, children } => {
                    debug!("Running sequence of {} children ({:?})", children.len(), policy);
                    Outcome::Sequence(run_sequence(policy, children).await)
                }
                Node::Parallel(children) => {
                    debug!("Running {} children in parallel", children.len());
                    Outcome::Parallel(parallel(children.into_iter().map(Node::execute)).await)
                }
            }
        }
        .boxed()
    }
}

#[async_trait]
impl Task for Node {
    async fn run(&self) -> Outcome {
        self.clone().execute().await
    }
}

async fn run_sequence(policy: SequencePolicy, children: Vec<Node>) -> Vec<Outcome> {
    match policy {
        SequencePolicy::FailSoft => sequence(children.into_iter().map(Node::execute)).await,
        SequencePolicy::AbortOnFailure => {
            let mut outcomes = Vec::with_capacity(children.len());
            let mut aborted = false;
            for child in children {
                if aborted {
                    outcomes.push(Outcome::Skipped);
                    continue;
                }
                let outcome = child.execute().await;
                if !outcome.is_success() {
                    debug!("Sequence step failed; skipping the remaining steps");
                    aborted = true;
                }
                outcomes.push(outcome);
            }
            outcomes
        }
    }
}

/// Awaits `children` one at a time, in order.
///
/// Futures are lazy, so a child does not start until the previous one has
/// completed.
pub async fn sequence<F, I>(children: I) -> Vec<F::Output>
where
    I: IntoIterator<Item = F>,
    F: Future,
{
    let mut outcomes = Vec::new();
    for child in children {
        outcomes.push(child.await);
    }
    outcomes
}

/// Spawns every child as its own task and waits for all of them.
///
/// Outcomes come back in input order. Nothing is cancelled: a child that
/// panics is held until every sibling has finished, then the panic is
/// resumed on the caller.
pub async fn parallel<F, I>(children: I) -> Vec<F::Output>
where
    I: IntoIterator<Item = F>,
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handles: Vec<_> = children.into_iter().map(tokio::spawn).collect();

    let mut outcomes = Vec::with_capacity(handles.len());
    let mut panic: Option<Box<dyn Any + Send>> = None;
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if e.is_panic() => {
                error!("Parallel child panicked");
                panic.get_or_insert(e.into_panic());
            }
            Err(e) => {
                error!("Parallel child did not complete: {}", e);
                panic.get_or_insert_with(|| Box::new(e.to_string()) as Box<dyn Any + Send>);
            }
        }
    }

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
    outcomes
}
