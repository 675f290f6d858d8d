//! The composite engine: a [`Task`] that is also a [`TaskManager`] for its
//! own children.
//!
//! One worker runs the loop below for each live composite:
//!
//! 1. abort check (propagate once to running and pending children)
//! 2. process at most one queued signal
//! 3. dispatch every runnable child on a worker of its own
//! 4. completion check
//!
//! then waits for the next signal, a wake-up, an abort or the poll interval,
//! whichever comes first. Domain behaviour comes from the [`TaskPolicy`].

use crate::env::{codes, engine};
use crate::task::error::SchedulerError;
use crate::task::lifecycle::{Task, TaskCore, TaskRef, lock, spawn_worker};
use crate::task::list::{TaskList, TaskListStatistics, UnblockRule};
use crate::task::manager::{Mailbox, ManagerHandle, Signal};
use crate::task::policy::{FailureAction, GroupPolicy, TaskPolicy};
use crate::task::types::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Engine settings for one composite instance
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Upper bound on the wait between two loop iterations
    pub poll_interval: Duration,
    /// Finish once every child is terminal; long-lived agents set this to false
    pub exit_on_completion: bool,
    /// Wall-clock budget from the start of `perform`
    pub time_budget: Option<Duration>,
    pub unblock_rule: UnblockRule,
    /// Whether the composite honours abort requests from its parent
    pub abortable: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            poll_interval: engine::DEFAULT_POLL_INTERVAL,
            exit_on_completion: true,
            time_budget: None,
            unblock_rule: UnblockRule::RequireDone,
            abortable: true,
        }
    }
}

impl ParallelConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_exit_on_completion(mut self, exit_on_completion: bool) -> Self {
        self.exit_on_completion = exit_on_completion;
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    pub fn with_unblock_rule(mut self, rule: UnblockRule) -> Self {
        self.unblock_rule = rule;
        self
    }

    pub fn non_abortable(mut self) -> Self {
        self.abortable = false;
        self
    }
}

/// The two terminal-seeking triggers plus the graceful stop request
#[derive(Debug, Default)]
struct RunFlags {
    failing: AtomicBool,
    aborting: AtomicBool,
    stopping: AtomicBool,
}

impl RunFlags {
    fn failing(&self) -> bool {
        self.failing.load(Ordering::SeqCst)
    }

    fn aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    fn stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn winding_down(&self) -> bool {
        self.failing() || self.aborting()
    }

    fn clear(&self) {
        self.failing.store(false, Ordering::SeqCst);
        self.aborting.store(false, Ordering::SeqCst);
        self.stopping.store(false, Ordering::SeqCst);
    }
}

/// Mutable per-run state of the loop
#[derive(Debug, Default)]
struct EngineState {
    list: TaskList,
    started_at: Option<Instant>,
    abort_propagated: bool,
    stop_propagated: bool,
    overrun_reported: bool,
    /// Children removed while active; dropped from the list once terminal
    remove_on_terminal: HashSet<TaskId>,
}

struct Engine<P> {
    policy: P,
    state: EngineState,
}

/// Exclusive view of a composite's task list handed to [`TaskPolicy`] hooks.
pub struct CompositeContext<'a> {
    core: &'a TaskCore,
    flags: &'a RunFlags,
    config: &'a ParallelConfig,
    state: &'a mut EngineState,
}

impl<'a> CompositeContext<'a> {
    pub fn id(&self) -> TaskId {
        self.core.id()
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn config(&self) -> &ParallelConfig {
        self.config
    }

    pub fn add_task(&mut self, task: TaskRef) -> Result<TaskId, SchedulerError> {
        self.state.list.add_task(task)
    }

    pub fn sequence(&mut self, predecessor: TaskId, successor: TaskId) -> Result<(), SchedulerError> {
        self.state.list.sequence(predecessor, successor)
    }

    pub fn sequence_chain(&mut self, tasks: &[TaskId]) -> Result<(), SchedulerError> {
        self.state.list.sequence_chain(tasks)
    }

    pub fn add_barrier(&mut self, predecessors: &[TaskId]) -> Result<TaskId, SchedulerError> {
        self.state.list.add_barrier(predecessors)
    }

    pub fn skip(&mut self, task_id: TaskId) -> Result<(), SchedulerError> {
        self.state.list.skip(task_id)
    }

    /// Drop a child that has no active worker
    pub fn remove(&mut self, task_id: TaskId) -> Result<TaskRef, SchedulerError> {
        match self.state.list.get_info(task_id) {
            None => Err(SchedulerError::UnknownTask(task_id)),
            Some(info) if info.state.is_active() => Err(SchedulerError::WorkerActive(task_id)),
            Some(_) => self
                .state
                .list
                .remove(task_id)
                .ok_or(SchedulerError::UnknownTask(task_id)),
        }
    }

    pub fn list(&self) -> &TaskList {
        &self.state.list
    }

    /// How many times the child has been dispatched by this composite
    pub fn run_count(&self, task_id: TaskId) -> u32 {
        self.state
            .list
            .get_info(task_id)
            .map(|info| info.run_count)
            .unwrap_or(0)
    }

    /// Enter the failure-abort sequence with `error`
    pub fn fail(&mut self, error: ErrorIndicator) {
        enter_failing(self.core, self.flags, error);
    }

    pub fn is_failing(&self) -> bool {
        self.flags.failing()
    }

    pub fn is_aborting(&self) -> bool {
        self.flags.aborting()
    }

    pub fn is_stopping(&self) -> bool {
        self.flags.stopping()
    }

    /// Publish the composite's result value
    pub fn set_result(&mut self, result: serde_json::Value) {
        self.core.set_result(Some(result));
    }

    /// Forward a message to this composite's own manager
    pub fn forward(&self, message: TaskMessage) {
        self.core.forward(message);
    }

    /// Time since the worker started, zero before `perform`
    pub fn elapsed(&self) -> Duration {
        self.state
            .started_at
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO)
    }
}

fn enter_failing(core: &TaskCore, flags: &RunFlags, error: ErrorIndicator) {
    if core.state().is_terminal() {
        debug!(task = %core.name(), "Ignoring failure on terminal composite");
        return;
    }
    warn!(task = %core.name(), code = error.code(), "Composite failing: {}", error.message());
    core.record_error(error);
    flags.failing.store(true, Ordering::SeqCst);
    core.token().cancel();
}

/// How a loop iteration ended
enum Finish {
    Done,
    Failed,
    Aborted,
}

struct StepOutcome {
    finish: Option<Finish>,
    carried: Option<Signal>,
    wait: Duration,
    abort_propagated: bool,
}

/// A composite task parameterised by its [`TaskPolicy`].
pub struct ParallelTask<P: TaskPolicy> {
    core: TaskCore,
    config: ParallelConfig,
    flags: RunFlags,
    mailbox: Mailbox,
    handle: ManagerHandle,
    inbox: tokio::sync::Mutex<UnboundedReceiver<Signal>>,
    engine: Mutex<Engine<P>>,
    worker_active: AtomicBool,
    wake: Notify,
}

/// Plain group executor over a fixed set of children
pub type GroupTask = ParallelTask<GroupPolicy>;

impl<P: TaskPolicy> ParallelTask<P> {
    pub fn new(name: impl Into<String>, policy: P) -> Self {
        let (mailbox, inbox) = Mailbox::new();
        let handle: ManagerHandle = Arc::new(mailbox.clone());
        Self {
            core: TaskCore::new(name),
            config: ParallelConfig::default(),
            flags: RunFlags::default(),
            mailbox,
            handle,
            inbox: tokio::sync::Mutex::new(inbox),
            engine: Mutex::new(Engine {
                policy,
                state: EngineState::default(),
            }),
            worker_active: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    pub fn with_config(mut self, config: ParallelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn core(&self) -> &TaskCore {
        &self.core
    }

    /// Record `error` and start the failure-abort sequence. Children are
    /// aborted on the next loop iteration.
    pub fn fail(&self, error: ErrorIndicator) {
        enter_failing(&self.core, &self.flags, error);
        self.wake.notify_one();
    }

    /// Queue a new child; it is registered by the loop
    pub fn add_task(&self, task: TaskRef) {
        self.mailbox.post(Signal::Add(task));
    }

    /// Queue removal of a child; an active child is aborted first
    pub fn remove_task(&self, task_id: TaskId) {
        self.mailbox.post(Signal::Remove(task_id));
    }

    pub fn is_failing(&self) -> bool {
        self.flags.failing()
    }

    pub fn is_aborting(&self) -> bool {
        self.flags.aborting() || (self.core.abort_requested() && !self.flags.failing())
    }

    pub fn statistics(&self) -> TaskListStatistics {
        lock(&self.engine).state.list.statistics()
    }

    /// Child names and states in registration order
    pub fn child_states(&self) -> Vec<(String, TaskInfoState)> {
        lock(&self.engine)
            .state
            .list
            .list_all_tasks()
            .into_iter()
            .map(|info| (info.task().name().to_string(), info.state))
            .collect()
    }

    /// Read access to the policy
    pub fn with_policy<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&lock(&self.engine).policy)
    }

    /// One loop iteration. Runs entirely under the engine lock.
    fn step(&self, inbox: &mut UnboundedReceiver<Signal>, carried: Option<Signal>) -> StepOutcome {
        let mut guard = lock(&self.engine);
        let Engine { policy, state } = &mut *guard;
        let mut ctx = CompositeContext {
            core: &self.core,
            flags: &self.flags,
            config: &self.config,
            state,
        };

        self.observe_abort(policy, &mut ctx);
        self.observe_stop(&mut ctx);

        let signal = carried.or_else(|| inbox.try_recv().ok());
        if let Some(signal) = signal {
            self.process(policy, &mut ctx, signal);
        }

        let now = Utc::now();
        // A failure seen above cancels pending children on the next turn;
        // only cleanup added by `on_aborting` may start after that.
        if !self.flags.winding_down() || ctx.state.abort_propagated {
            self.dispatch(&mut ctx, now);
        }
        self.check_time_budget(policy, &mut ctx);

        let mut carried = None;
        let mut finish = None;
        if !ctx.state.list.all_terminal() {
            let stalled = ctx.state.list.stalled(now);
            if !stalled.is_empty() {
                match inbox.try_recv() {
                    Ok(signal) => carried = Some(signal),
                    Err(_) => self.cancel_stalled(&mut ctx, stalled),
                }
            }
        }
        if carried.is_none() && ctx.state.list.all_terminal() {
            match inbox.try_recv() {
                Ok(signal) => carried = Some(signal),
                Err(_) => finish = self.completion(policy, &mut ctx),
            }
        }

        StepOutcome {
            finish,
            carried,
            wait: self.next_wait(&ctx.state.list, now),
            abort_propagated: ctx.state.abort_propagated,
        }
    }

    fn observe_abort(&self, policy: &mut P, ctx: &mut CompositeContext<'_>) {
        let failing = self.flags.failing();
        if !failing && self.core.abort_requested() {
            self.flags.aborting.store(true, Ordering::SeqCst);
        }
        if ctx.state.abort_propagated || !(failing || self.flags.aborting()) {
            return;
        }
        ctx.state.abort_propagated = true;

        let reason = if failing {
            self.core
                .error()
                .unwrap_or_else(|| ErrorIndicator::aborted_by_parent(self.core.name()))
        } else {
            ErrorIndicator::aborted_by_parent(self.core.name())
        };
        info!(task = %self.core.name(), failing, "Propagating abort to children");

        let list = &mut ctx.state.list;
        for task_id in list.tasks_in_state(TaskInfoState::Running) {
            let Some(info) = list.get_info_mut(task_id) else {
                continue;
            };
            if !info.task().is_abortable() {
                debug!(task = %self.core.name(), child = %info.task().name(), "Leaving non-abortable child running");
                continue;
            }
            info.task().abort(reason.clone());
            info.set_state(TaskInfoState::Aborting);
        }
        for task_id in list.tasks_in_state(TaskInfoState::Pending) {
            if let Some(info) = list.get_info_mut(task_id) {
                info.set_state(TaskInfoState::Cancelled);
            }
        }

        policy.on_aborting(ctx);
    }

    fn observe_stop(&self, ctx: &mut CompositeContext<'_>) {
        if !self.flags.stopping() {
            return;
        }
        if !ctx.state.stop_propagated {
            ctx.state.stop_propagated = true;
            info!(task = %self.core.name(), "Stopping: pending children will not start");
        }
        let list = &mut ctx.state.list;
        for task_id in list.tasks_in_state(TaskInfoState::Pending) {
            if let Some(info) = list.get_info_mut(task_id) {
                info.set_state(TaskInfoState::Cancelled);
            }
        }
    }

    fn process(&self, policy: &mut P, ctx: &mut CompositeContext<'_>, signal: Signal) {
        debug!(task = %self.core.name(), "Processing {:?}", signal);
        match signal {
            Signal::Done(task_id) => {
                let Some(child) = self.child(ctx, task_id) else {
                    return;
                };
                if self.flags.winding_down() {
                    self.record_aborted(policy, ctx, &child, None);
                } else {
                    self.set_child_state(ctx, task_id, TaskInfoState::Done);
                    policy.on_sub_task_done(ctx, &child);
                    child.dispose();
                }
                self.drop_if_removed(ctx, task_id);
            }
            Signal::Failed(task_id, error) => {
                let Some(child) = self.child(ctx, task_id) else {
                    return;
                };
                if self.flags.winding_down() {
                    self.record_aborted(policy, ctx, &child, Some(&error));
                } else {
                    self.set_child_state(ctx, task_id, TaskInfoState::Failed);
                    let action = policy.on_sub_task_failed(ctx, &child, &error);
                    child.dispose();
                    self.apply_failure(ctx, &child, error, action);
                }
                self.drop_if_removed(ctx, task_id);
            }
            Signal::Aborted(task_id, error) => {
                let Some(child) = self.child(ctx, task_id) else {
                    return;
                };
                self.record_aborted(policy, ctx, &child, error.as_ref());
                self.drop_if_removed(ctx, task_id);
            }
            Signal::Message(task_id, message) => {
                if let Some(child) = self.child(ctx, task_id) {
                    policy.on_sub_task_message(ctx, &child, &message);
                }
            }
            Signal::Add(task) => {
                if self.flags.winding_down() || self.flags.stopping() {
                    warn!(task = %self.core.name(), child = %task.name(), "Rejecting new child while winding down");
                    return;
                }
                if let Err(err) = ctx.add_task(task) {
                    warn!(task = %self.core.name(), "Could not add child: {}", err);
                }
            }
            Signal::Remove(task_id) => {
                let Some(info) = ctx.state.list.get_info_mut(task_id) else {
                    debug!(task = %self.core.name(), "Remove for unknown child {}", task_id);
                    return;
                };
                if info.state.is_active() {
                    if info.state == TaskInfoState::Running {
                        info.task().abort(ErrorIndicator::aborted_by_parent(self.core.name()));
                        info.set_state(TaskInfoState::Aborting);
                    }
                    ctx.state.remove_on_terminal.insert(task_id);
                } else {
                    ctx.state.list.remove(task_id);
                }
            }
        }
    }

    fn child(&self, ctx: &CompositeContext<'_>, task_id: TaskId) -> Option<TaskRef> {
        let child = ctx.state.list.get_info(task_id).map(|info| info.task().clone());
        if child.is_none() {
            debug!(task = %self.core.name(), "Signal for unknown child {}", task_id);
        }
        child
    }

    fn set_child_state(&self, ctx: &mut CompositeContext<'_>, task_id: TaskId, state: TaskInfoState) {
        if let Err(err) = ctx.state.list.set_state(task_id, state) {
            warn!(task = %self.core.name(), "Could not update child state: {}", err);
        }
    }

    fn record_aborted(
        &self,
        policy: &mut P,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: Option<&ErrorIndicator>,
    ) {
        self.set_child_state(ctx, child.id(), TaskInfoState::Aborted);
        policy.on_sub_task_aborted(ctx, child, error);
        child.dispose();
    }

    fn drop_if_removed(&self, ctx: &mut CompositeContext<'_>, task_id: TaskId) {
        if ctx.state.remove_on_terminal.remove(&task_id) {
            ctx.state.list.remove(task_id);
        }
    }

    fn apply_failure(
        &self,
        ctx: &mut CompositeContext<'_>,
        child: &TaskRef,
        error: ErrorIndicator,
        action: FailureAction,
    ) {
        let task_id = child.id();
        debug!(task = %self.core.name(), child = %child.name(), "Failure action {:?}", action);
        match action {
            FailureAction::FailUpward => ctx.fail(error),
            FailureAction::Reclassify(reclassified) => ctx.fail(reclassified.with_cause(error)),
            FailureAction::Skip => {
                if let Err(err) = ctx.skip(task_id) {
                    ctx.fail(err.into());
                }
            }
            FailureAction::Retry { delay } => {
                if let Err(err) = child.reset() {
                    ctx.fail(err.into());
                    return;
                }
                let hold = chrono::Duration::from_std(delay)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                info!(
                    task = %self.core.name(),
                    child = %child.name(),
                    attempt = ctx.run_count(task_id) + 1,
                    "Retrying child in {:?}",
                    delay
                );
                if let Err(err) = ctx.state.list.requeue(task_id, Some(Utc::now() + hold)) {
                    ctx.fail(err.into());
                }
            }
            FailureAction::Substitute(recovery) => {
                let successors = ctx.state.list.successors_of(task_id);
                let substituted = ctx.add_task(recovery).and_then(|recovery_id| {
                    for successor in successors {
                        ctx.sequence(recovery_id, successor)?;
                    }
                    ctx.skip(task_id)
                });
                if let Err(err) = substituted {
                    ctx.fail(err.into());
                }
            }
            FailureAction::Absorb => {}
        }
    }

    fn dispatch(&self, ctx: &mut CompositeContext<'_>, now: DateTime<Utc>) {
        if self.flags.stopping() {
            return;
        }
        for task_id in ctx.state.list.runnable(now) {
            let Some(info) = ctx.state.list.get_info_mut(task_id) else {
                continue;
            };
            info.set_state(TaskInfoState::Running);
            info.run_count += 1;
            info.not_before = None;
            let child = info.task().clone();

            match child.init(self.handle.clone()) {
                Ok(()) => {
                    debug!(task = %self.core.name(), child = %child.name(), "Starting child");
                    let mailbox = self.mailbox.clone();
                    spawn_worker(child, move |error| mailbox.post(Signal::Failed(task_id, error)));
                }
                Err(error) => {
                    warn!(task = %self.core.name(), child = %child.name(), code = error.code(), "Child failed during init");
                    self.mailbox.post(Signal::Failed(task_id, error));
                }
            }
        }
    }

    fn check_time_budget(&self, policy: &mut P, ctx: &mut CompositeContext<'_>) {
        let Some(budget) = self.config.time_budget else {
            return;
        };
        if ctx.state.overrun_reported {
            return;
        }
        let elapsed = ctx.elapsed();
        if elapsed <= budget {
            return;
        }
        ctx.state.overrun_reported = true;
        warn!(task = %self.core.name(), ?elapsed, ?budget, "Time budget exceeded");
        self.core.forward(TaskMessage::TimeOverrun { elapsed, budget });
        policy.on_time_overrun(ctx, elapsed);
    }

    fn cancel_stalled(&self, ctx: &mut CompositeContext<'_>, stalled: Vec<TaskId>) {
        warn!(task = %self.core.name(), count = stalled.len(), "Pending children can never run");
        for task_id in &stalled {
            if let Some(info) = ctx.state.list.get_info_mut(*task_id) {
                info.set_state(TaskInfoState::Cancelled);
            }
        }
        if !self.flags.winding_down() {
            ctx.fail(ErrorIndicator::new(
                codes::STALLED_DEPENDENTS,
                format!("{} pending tasks blocked by unfinished predecessors", stalled.len()),
            ));
        }
    }

    fn completion(&self, policy: &mut P, ctx: &mut CompositeContext<'_>) -> Option<Finish> {
        if self.flags.failing() {
            policy.on_failure(ctx);
            Some(Finish::Failed)
        } else if self.flags.aborting() {
            Some(Finish::Aborted)
        } else if self.flags.stopping() || self.config.exit_on_completion {
            policy.on_completion(ctx);
            Some(Finish::Done)
        } else {
            None
        }
    }

    fn next_wait(&self, list: &TaskList, now: DateTime<Utc>) -> Duration {
        list.list_all_tasks()
            .into_iter()
            .filter(|info| info.is_held(now))
            .filter_map(|info| info.not_before)
            .min()
            .and_then(|release| (release - now).to_std().ok())
            .map_or(self.config.poll_interval, |d| d.min(self.config.poll_interval))
    }

    fn finish(&self, finish: Finish) {
        match finish {
            Finish::Done => {
                info!(task = %self.core.name(), "Composite done");
                self.core.complete();
            }
            Finish::Failed => {
                let error = self
                    .core
                    .error()
                    .unwrap_or_else(|| ErrorIndicator::new(codes::INIT_FAILURE, "composite failed"));
                self.core.fail(error);
            }
            Finish::Aborted => {
                info!(task = %self.core.name(), "Composite aborted");
                self.core.finish_aborted();
            }
        }
    }
}

#[async_trait]
impl<P: TaskPolicy> Task for ParallelTask<P> {
    fn id(&self) -> TaskId {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn init(&self, manager: ManagerHandle) -> Result<(), ErrorIndicator> {
        self.core.attach(manager);

        let mut guard = lock(&self.engine);
        let Engine { policy, state } = &mut *guard;
        state.list = TaskList::with_unblock_rule(self.config.unblock_rule);
        let mut ctx = CompositeContext {
            core: &self.core,
            flags: &self.flags,
            config: &self.config,
            state,
        };

        let built = policy
            .pre_init(&mut ctx)
            .and_then(|()| {
                if self.flags.failing() {
                    Err(self
                        .core
                        .error()
                        .unwrap_or_else(|| ErrorIndicator::new(codes::INIT_FAILURE, "pre-init failed")))
                } else {
                    Ok(())
                }
            })
            .and_then(|()| policy.create_task_list(&mut ctx));

        if let Err(error) = built {
            ctx.state.list.clear();
            self.core.record_error(error.clone());
            self.core.advance(TaskState::Failed);
            let error = self.core.error().unwrap_or(error);
            warn!(task = %self.core.name(), code = error.code(), "Composite init failed: {}", error.message());
            return Err(error);
        }

        policy.on_init(&mut ctx);
        debug!(task = %self.core.name(), children = ctx.state.list.len(), "Composite initialized");
        Ok(())
    }

    async fn perform(&self) {
        if self.worker_active.swap(true, Ordering::SeqCst) {
            warn!(task = %self.core.name(), "Composite already has an active worker");
            return;
        }
        if !self.core.begin_run() {
            self.worker_active.store(false, Ordering::SeqCst);
            return;
        }
        lock(&self.engine).state.started_at = Some(Instant::now());

        let mut inbox = self.inbox.lock().await;
        let mut carried = None;
        loop {
            let outcome = self.step(&mut inbox, carried.take());
            if let Some(finish) = outcome.finish {
                self.worker_active.store(false, Ordering::SeqCst);
                self.finish(finish);
                return;
            }
            if outcome.carried.is_some() {
                carried = outcome.carried;
                continue;
            }

            let token = self.core.token();
            tokio::select! {
                biased;
                _ = token.cancelled(), if !outcome.abort_propagated => {}
                signal = inbox.recv() => carried = signal,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(outcome.wait) => {}
            }
        }
    }

    fn abort(&self, reason: ErrorIndicator) {
        if self.flags.winding_down() {
            debug!(task = %self.core.name(), "Abort ignored: already winding down");
            return;
        }
        if !self.config.abortable {
            info!(task = %self.core.name(), "Ignoring abort for non-abortable composite");
            return;
        }
        if self.core.request_abort(reason) {
            self.wake.notify_one();
        }
    }

    fn stop(&self) {
        self.flags.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    fn dispose(&self) {
        lock(&self.engine).state.list.clear();
        self.core.detach();
    }

    fn reset(&self) -> Result<(), SchedulerError> {
        if self.worker_active.load(Ordering::SeqCst) {
            return Err(SchedulerError::WorkerActive(self.core.id()));
        }
        {
            let mut guard = lock(&self.engine);
            guard.state = EngineState::default();
            guard.policy.on_reset();
        }
        self.flags.clear();
        self.core.reset();
        if let Ok(mut inbox) = self.inbox.try_lock() {
            while inbox.try_recv().is_ok() {}
        }
        Ok(())
    }

    fn state(&self) -> TaskState {
        self.core.state()
    }

    fn error_indicator(&self) -> Option<ErrorIndicator> {
        self.core.error()
    }

    fn run_count(&self) -> u32 {
        self.core.run_count()
    }

    fn result(&self) -> Option<serde_json::Value> {
        self.core.result()
    }

    fn is_abortable(&self) -> bool {
        self.config.abortable
    }
}
