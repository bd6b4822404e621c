//! JSON scripts replayed by `steward run`.
//!
//! A script opens some tabs, then walks through steps: starting tasks,
//! submitting batches, feeding observations and simulating what the user
//! does to tabs in between.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use steward_action::{
    ActionBatch, BatchOutcome, DetachReason, StartTaskStatus, TargetDescriptor, ToolError,
};
use steward_core::{TabId, TaskId};

use crate::session::Session;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to read script: {0}")]
    Read(#[from] std::io::Error),
    #[error("Invalid script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Unknown task label: {0}")]
    UnknownTask(String),
    #[error("Task label already in use: {0}")]
    DuplicateTask(String),
    #[error("Task {0} could not be started")]
    StartFailed(String),
    #[error("Task {0} has no tab to observe")]
    NothingToObserve(String),
    #[error("Browser error: {0}")]
    Browser(#[from] ToolError),
}

#[derive(Debug, Deserialize)]
pub struct Script {
    /// URLs opened before the first step, as tabs 1, 2, ...
    #[serde(default)]
    pub tabs: Vec<String>,
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Start {
        task: String,
        #[serde(default)]
        title: Option<String>,
        target: TargetDescriptor,
    },
    Act {
        task: String,
        batch: ActionBatch,
    },
    Observe {
        task: String,
        #[serde(default)]
        text: String,
    },
    /// The user navigates a tab.
    Navigate { tab: TabId, url: String },
    /// The user closes a tab.
    CloseTab { tab: TabId },
    Pause { task: String },
    Resume { task: String },
    Stop { task: String },
}

impl Script {
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Outcome of one `act` step.
#[derive(Debug, Serialize)]
pub struct ActReport {
    pub step: usize,
    pub task: String,
    pub outcome: BatchOutcome,
}

pub struct ScriptRunner<'a> {
    session: &'a Session,
    tasks: HashMap<String, TaskId>,
}

impl<'a> ScriptRunner<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            tasks: HashMap::new(),
        }
    }

    /// Replay `script`, stopping at the first step that cannot be carried out.
    pub async fn run(&mut self, script: &Script) -> Result<Vec<ActReport>, ScriptError> {
        for url in &script.tabs {
            self.session.browser.open(url);
        }

        let mut reports = Vec::new();
        for (step, entry) in script.steps.iter().enumerate() {
            tracing::debug!(step, ?entry, "Replaying step");
            if let Some(report) = self.run_step(step, entry).await? {
                reports.push(report);
            }
        }
        Ok(reports)
    }

    async fn run_step(&mut self, step: usize, entry: &Step) -> Result<Option<ActReport>, ScriptError> {
        let service = &self.session.service;
        match entry {
            Step::Start {
                task,
                title,
                target,
            } => {
                if self.tasks.contains_key(task) {
                    return Err(ScriptError::DuplicateTask(task.clone()));
                }
                let response = service.start_task(target.clone(), title.as_deref().unwrap_or(task));
                match (response.status, response.task_id) {
                    (StartTaskStatus::Success, Some(id)) => {
                        self.tasks.insert(task.clone(), id);
                    }
                    _ => return Err(ScriptError::StartFailed(task.clone())),
                }
            }
            Step::Act { task, batch } => {
                let id = self.task_id(task)?;
                let outcome = service.act(id, batch.clone()).await;
                tracing::info!(task = %task, result = %outcome.result, "Batch finished");
                return Ok(Some(ActReport {
                    step,
                    task: task.clone(),
                    outcome,
                }));
            }
            Step::Observe { task, text } => {
                let id = self.task_id(task)?;
                let snapshot = service
                    .task(id)
                    .and_then(|t| t.engine().bound_tab())
                    .and_then(|tab| self.session.browser.observe(tab, text))
                    .ok_or_else(|| ScriptError::NothingToObserve(task.clone()))?;
                service.did_observe_content(id, snapshot);
            }
            Step::Navigate { tab, url } => self.session.browser.navigate(*tab, url)?,
            Step::CloseTab { tab } => {
                if self.session.browser.close(*tab) {
                    service.on_tab_detached(*tab, DetachReason::Delete);
                }
            }
            Step::Pause { task } => service.pause_task(self.task_id(task)?),
            Step::Resume { task } => service.resume_task(self.task_id(task)?),
            Step::Stop { task } => service.stop_task(self.task_id(task)?),
        }
        Ok(None)
    }

    fn task_id(&self, label: &str) -> Result<TaskId, ScriptError> {
        self.tasks
            .get(label)
            .copied()
            .ok_or_else(|| ScriptError::UnknownTask(label.to_string()))
    }
}
