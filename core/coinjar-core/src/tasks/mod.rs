//! Tasks recorded against the open jar cycle.

pub mod parse;

pub use parse::parse_tasks;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, uniffi::Record)]
pub struct PendingTask {
    pub title: String,
    pub detail: Option<String>,
}

impl PendingTask {
    /// Trims both fields; `None` when nothing is left.
    pub fn new(title: &str, detail: Option<&str>) -> Option<Self> {
        let title = title.trim();
        let detail = detail.map(str::trim).filter(|detail| !detail.is_empty());
        if title.is_empty() && detail.is_none() {
            return None;
        }
        Some(Self {
            title: title.to_string(),
            detail: detail.map(str::to_string),
        })
    }

    pub fn normalized(&self) -> Option<Self> {
        Self::new(&self.title, self.detail.as_deref())
    }

    /// Accepts `{title, detail}` objects and bare strings (older archives
    /// stored tasks as plain titles).
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(title) => Self::new(title, None),
            Value::Object(fields) => Self::new(
                fields.get("title").and_then(Value::as_str).unwrap_or_default(),
                fields.get("detail").and_then(Value::as_str),
            ),
            _ => None,
        }
    }

    pub fn list_from_value(value: Option<&Value>) -> Vec<Self> {
        value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Self::from_value).collect())
            .unwrap_or_default()
    }
}

/// Ordered accumulation of tasks for the current cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRegistry {
    tasks: Vec<PendingTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: Vec<PendingTask>) -> Self {
        Self {
            tasks: tasks.iter().filter_map(PendingTask::normalized).collect(),
        }
    }

    /// Returns false if the task normalized to nothing.
    pub fn register(&mut self, task: &PendingTask) -> bool {
        match task.normalized() {
            Some(task) => {
                self.tasks.push(task);
                true
            }
            None => false,
        }
    }

    /// Parses free text and registers every task found. Returns how many.
    pub fn register_text(&mut self, text: &str) -> usize {
        let parsed = parse_tasks(text);
        let count = parsed.len();
        self.tasks.extend(parsed);
        count
    }

    pub fn tasks(&self) -> &[PendingTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Hands the accumulated tasks to a sealed archive.
    pub fn take(&mut self) -> Vec<PendingTask> {
        std::mem::take(&mut self.tasks)
    }

    pub fn replace(&mut self, tasks: Vec<PendingTask>) {
        *self = Self::from_tasks(tasks);
    }
}
