use crate::task::barrier::BarrierTask;
use crate::task::error::{Result, SchedulerError};
use crate::task::lifecycle::TaskRef;
use crate::task::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Which predecessor outcomes release a dependent task.
///
/// `Done` and `Skipped` always unblock.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnblockRule {
    /// A predecessor must be done (or skipped)
    #[default]
    RequireDone,
    /// A failed predecessor also releases its dependents
    AllowFailed,
}

impl UnblockRule {
    pub fn unblocks(&self, state: TaskInfoState) -> bool {
        match state {
            TaskInfoState::Done | TaskInfoState::Skipped => true,
            TaskInfoState::Failed => matches!(self, UnblockRule::AllowFailed),
            _ => false,
        }
    }
}

/// Bookkeeping record for one task inside a [`TaskList`].
#[derive(Clone)]
pub struct TaskInfo {
    task: TaskRef,
    pub state: TaskInfoState,
    pub run_count: u32,
    /// Earliest time a held retry may be dispatched
    pub not_before: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInfo {
    fn new(task: TaskRef) -> Self {
        let now = Utc::now();
        Self {
            task,
            state: TaskInfoState::Pending,
            run_count: 0,
            not_before: None,
            added_at: now,
            updated_at: now,
        }
    }

    pub fn task(&self) -> &TaskRef {
        &self.task
    }

    pub fn id(&self) -> TaskId {
        self.task.id()
    }

    /// Update state and timestamp
    pub fn set_state(&mut self, state: TaskInfoState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    /// Whether a held retry is still waiting at `now`
    pub fn is_held(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskInfoState::Pending && self.not_before.is_some_and(|t| now < t)
    }
}

impl std::fmt::Debug for TaskInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskInfo")
            .field("task", &self.task.name())
            .field("state", &self.state)
            .field("run_count", &self.run_count)
            .field("not_before", &self.not_before)
            .finish()
    }
}

/// Per-state counts for a task list
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskListStatistics {
    pub total_tasks: u32,
    pub pending_tasks: u32,
    pub running_tasks: u32,
    pub done_tasks: u32,
    pub failed_tasks: u32,
    pub aborting_tasks: u32,
    pub aborted_tasks: u32,
    pub skipped_tasks: u32,
    pub cancelled_tasks: u32,
}

/// Dependency graph and state registry for a composite's immediate children.
#[derive(Debug, Default)]
pub struct TaskList {
    entries: HashMap<TaskId, TaskInfo>,
    /// Registration order, used for deterministic dispatch
    order: Vec<TaskId>,
    predecessors: HashMap<TaskId, HashSet<TaskId>>,
    successors: HashMap<TaskId, HashSet<TaskId>>,
    unblock: UnblockRule,
}

impl TaskList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unblock_rule(unblock: UnblockRule) -> Self {
        Self {
            unblock,
            ..Self::default()
        }
    }

    pub fn unblock_rule(&self) -> UnblockRule {
        self.unblock
    }

    /// Register a task in state `Pending` with run count 0
    pub fn add_task(&mut self, task: TaskRef) -> Result<TaskId> {
        let task_id = task.id();
        if self.entries.contains_key(&task_id) {
            return Err(SchedulerError::DuplicateTask(task_id));
        }
        debug!("Added task {} ({}) to list", task.name(), task_id);
        self.entries.insert(task_id, TaskInfo::new(task));
        self.order.push(task_id);
        Ok(task_id)
    }

    /// Add a precedence edge: `successor` may not start before `predecessor`
    /// has reached an unblocking state.
    ///
    /// The edge is rejected, and not added, if either task is unknown or the
    /// edge would close a cycle.
    pub fn sequence(&mut self, predecessor: TaskId, successor: TaskId) -> Result<()> {
        for id in [predecessor, successor] {
            if !self.entries.contains_key(&id) {
                return Err(SchedulerError::UnknownTask(id));
            }
        }

        if predecessor == successor || self.reaches(successor, predecessor) {
            return Err(SchedulerError::Cycle {
                predecessor,
                successor,
            });
        }

        self.predecessors
            .entry(successor)
            .or_default()
            .insert(predecessor);
        self.successors
            .entry(predecessor)
            .or_default()
            .insert(successor);
        Ok(())
    }

    /// Chain the given tasks so they run strictly one after another
    pub fn sequence_chain(&mut self, tasks: &[TaskId]) -> Result<()> {
        for pair in tasks.windows(2) {
            self.sequence(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Register a synthetic no-op task that runs after all `predecessors`
    pub fn add_barrier(&mut self, predecessors: &[TaskId]) -> Result<TaskId> {
        for id in predecessors {
            if !self.entries.contains_key(id) {
                return Err(SchedulerError::UnknownTask(*id));
            }
        }
        let barrier_id = self.add_task(Arc::new(BarrierTask::new("barrier")))?;
        for &pred in predecessors {
            self.sequence(pred, barrier_id)?;
        }
        Ok(barrier_id)
    }

    /// Depth-first search along successor edges
    fn reaches(&self, from: TaskId, to: TaskId) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.successors.get(&current) {
                stack.extend(next.iter().copied());
            }
        }

        false
    }

    /// Whether the task is pending and every predecessor has released it.
    pub fn can_run(&self, task_id: TaskId) -> bool {
        self.can_run_at(task_id, Utc::now())
    }

    /// [`can_run`](Self::can_run) evaluated at a given instant (held retries
    /// are not runnable before their `not_before`)
    pub fn can_run_at(&self, task_id: TaskId, now: DateTime<Utc>) -> bool {
        let Some(info) = self.entries.get(&task_id) else {
            return false;
        };
        if info.state != TaskInfoState::Pending || info.is_held(now) {
            return false;
        }
        self.predecessors_satisfied(task_id)
    }

    fn predecessors_satisfied(&self, task_id: TaskId) -> bool {
        self.predecessors.get(&task_id).is_none_or(|preds| {
            preds.iter().all(|pred| {
                self.entries
                    .get(pred)
                    .is_some_and(|info| self.unblock.unblocks(info.state))
            })
        })
    }

    /// Tasks runnable at `now`, in registration order
    pub fn runnable(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|&id| self.can_run_at(id, now))
            .collect()
    }

    /// Force a task to `Skipped` without running it.
    ///
    /// Allowed from any non-terminal state and from `Failed`; dependents are
    /// released exactly as if the task had completed.
    pub fn skip(&mut self, task_id: TaskId) -> Result<()> {
        let info = self
            .entries
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        if info.state.is_terminal() && info.state != TaskInfoState::Failed {
            return Err(SchedulerError::AlreadyTerminal {
                task: task_id,
                state: info.state,
            });
        }
        info.set_state(TaskInfoState::Skipped);
        info.not_before = None;
        debug!("Skipped task {}", task_id);
        Ok(())
    }

    /// Put a task back to `Pending` for another attempt, optionally held
    /// until `not_before`. The run count is kept.
    pub fn requeue(&mut self, task_id: TaskId, not_before: Option<DateTime<Utc>>) -> Result<()> {
        let info = self
            .entries
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        info.set_state(TaskInfoState::Pending);
        info.not_before = not_before;
        Ok(())
    }

    pub fn set_state(&mut self, task_id: TaskId, state: TaskInfoState) -> Result<()> {
        self.entries
            .get_mut(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?
            .set_state(state);
        Ok(())
    }

    pub fn get_info(&self, task_id: TaskId) -> Option<&TaskInfo> {
        self.entries.get(&task_id)
    }

    pub fn get_info_mut(&mut self, task_id: TaskId) -> Option<&mut TaskInfo> {
        self.entries.get_mut(&task_id)
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.entries.contains_key(&task_id)
    }

    /// All tasks in registration order
    pub fn list_all_tasks(&self) -> Vec<&TaskInfo> {
        self.order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .collect()
    }

    /// Ids of the tasks currently in `state`
    pub fn tasks_in_state(&self, state: TaskInfoState) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.entries.get(id).is_some_and(|i| i.state == state))
            .collect()
    }

    pub fn predecessors_of(&self, task_id: TaskId) -> Vec<TaskId> {
        self.predecessors
            .get(&task_id)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn successors_of(&self, task_id: TaskId) -> Vec<TaskId> {
        self.successors
            .get(&task_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether every registered task is terminal (vacuously true when empty)
    pub fn all_terminal(&self) -> bool {
        self.entries.values().all(|info| info.state.is_terminal())
    }

    /// Whether any task has a worker that may still be running
    pub fn has_active(&self) -> bool {
        self.entries.values().any(|info| info.state.is_active())
    }

    /// Pending tasks that can never run: nothing is active or held, and
    /// their predecessors are all terminal without having released them.
    pub fn stalled(&self, now: DateTime<Utc>) -> Vec<TaskId> {
        if self.has_active() || self.entries.values().any(|info| info.is_held(now)) {
            return Vec::new();
        }
        if !self.runnable(now).is_empty() {
            return Vec::new();
        }
        self.tasks_in_state(TaskInfoState::Pending)
    }

    /// Remove a task and every edge touching it
    pub fn remove(&mut self, task_id: TaskId) -> Option<TaskRef> {
        let info = self.entries.remove(&task_id)?;
        self.order.retain(|&id| id != task_id);
        if let Some(preds) = self.predecessors.remove(&task_id) {
            for pred in preds {
                if let Some(s) = self.successors.get_mut(&pred) {
                    s.remove(&task_id);
                }
            }
        }
        if let Some(succs) = self.successors.remove(&task_id) {
            for succ in succs {
                if let Some(p) = self.predecessors.get_mut(&succ) {
                    p.remove(&task_id);
                }
            }
        }
        Some(info.task)
    }

    /// Release every entry
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.predecessors.clear();
        self.successors.clear();
    }

    /// Count tasks per state
    pub fn statistics(&self) -> TaskListStatistics {
        let mut stats = TaskListStatistics {
            total_tasks: self.entries.len() as u32,
            ..Default::default()
        };

        for info in self.entries.values() {
            match info.state {
                TaskInfoState::Pending => stats.pending_tasks += 1,
                TaskInfoState::Running => stats.running_tasks += 1,
                TaskInfoState::Done => stats.done_tasks += 1,
                TaskInfoState::Failed => stats.failed_tasks += 1,
                TaskInfoState::Aborting => stats.aborting_tasks += 1,
                TaskInfoState::Aborted => stats.aborted_tasks += 1,
                TaskInfoState::Skipped => stats.skipped_tasks += 1,
                TaskInfoState::Cancelled => stats.cancelled_tasks += 1,
            }
        }

        stats
    }
}
