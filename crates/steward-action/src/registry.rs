//! Task registry: owns every task of a session and allocates their ids.

use std::collections::BTreeMap;
use std::sync::Arc;

use steward_core::{TaskId, TaskIdGenerator, TaskState};

use crate::task::Task;

/// Id-ordered owner of all tasks created in one session.
///
/// Tasks are never removed while the session lives; dropping the registry
/// drops them (and abandons any in-flight batches).
#[derive(Default)]
pub struct TaskRegistry {
    ids: TaskIdGenerator,
    tasks: BTreeMap<TaskId, Arc<Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `task`, give it the next id and return that id.
    pub fn add_task(&mut self, task: Task) -> TaskId {
        let id = self.ids.generate_next_id();
        task.assign_id(id);
        self.tasks.insert(id, Arc::new(task));
        tracing::debug!(task_id = %id, "Task registered");
        id
    }

    pub fn get_task(&self, id: TaskId) -> Option<&Arc<Task>> {
        self.tasks.get(&id)
    }

    /// All tasks in id (= creation) order.
    pub fn tasks(&self) -> impl Iterator<Item = (TaskId, &Arc<Task>)> {
        self.tasks.iter().map(|(id, task)| (*id, task))
    }

    /// Tasks that have not finished.
    pub fn active_tasks(&self) -> impl Iterator<Item = (TaskId, &Arc<Task>)> {
        self.tasks()
            .filter(|(_, task)| task.state() != TaskState::Finished)
    }

    /// Tasks that have finished.
    pub fn inactive_tasks(&self) -> impl Iterator<Item = (TaskId, &Arc<Task>)> {
        self.tasks()
            .filter(|(_, task)| task.state() == TaskState::Finished)
    }

    /// Stop the task with `id`. Unknown ids are ignored.
    pub fn stop_task(&self, id: TaskId) {
        if let Some(task) = self.tasks.get(&id) {
            task.stop();
        }
    }

    pub fn stop_all(&self) {
        for task in self.tasks.values() {
            task.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
