//! Dependency resolution: run this once at the start of every run.
//!
//! Rules enforced:
//! 1. Task IDs must be unique within the workflow (fatal).
//! 2. A dependency on a missing task is dropped with a warning.
//! 3. The dependency graph must be acyclic (fatal).
//!
//! Returns the tasks in execution order plus feedback for the caller. On any
//! fatal problem the order is empty, so nothing runs.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::Task;

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackLevel {
    Warning,
    Error,
}

/// A message surfaced to the user about a workflow or a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub level: FeedbackLevel,
    pub message: String,
}

impl Feedback {
    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: FeedbackLevel::Warning, message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: FeedbackLevel::Error, message: message.into() }
    }

    pub fn is_error(&self) -> bool {
        self.level == FeedbackLevel::Error
    }
}

impl std::fmt::Display for Feedback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.level {
            FeedbackLevel::Warning => write!(f, "warning: {}", self.message),
            FeedbackLevel::Error => write!(f, "error: {}", self.message),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Output of [`resolve_order`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Task ids; every task comes after all of its existing dependencies.
    pub order: Vec<String>,
    pub feedback: Vec<Feedback>,
}

impl Resolution {
    /// Whether the workflow must not start.
    pub fn is_fatal(&self) -> bool {
        self.feedback.iter().any(Feedback::is_error)
    }
}

/// Order `tasks` so that dependencies precede dependents.
///
/// Depth-first, visiting tasks and their dependencies in the order given, so
/// the same input always yields the same order.
pub fn resolve_order(tasks: &[Task]) -> Resolution {
    let mut feedback = Vec::new();

    // -----------------------------------------------------------------------
    // 1. Ensure task IDs are unique
    // -----------------------------------------------------------------------
    let mut by_id: HashMap<&str, &Task> = HashMap::with_capacity(tasks.len());
    for task in tasks {
        if by_id.insert(task.id.as_str(), task).is_some() {
            feedback.push(Feedback::error(format!("Duplicate task id '{}'", task.id)));
        }
    }
    if !feedback.is_empty() {
        return Resolution { order: Vec::new(), feedback };
    }

    // -----------------------------------------------------------------------
    // 2. Depth-first visit with a recursion stack
    // -----------------------------------------------------------------------
    let mut visit = Visit {
        by_id,
        visited: HashSet::with_capacity(tasks.len()),
        stack: Vec::new(),
        order: Vec::with_capacity(tasks.len()),
        feedback,
        cyclic: false,
    };
    for task in tasks {
        visit.visit(task.id.as_str());
    }

    // -----------------------------------------------------------------------
    // 3. Any cycle invalidates the whole order
    // -----------------------------------------------------------------------
    if visit.cyclic {
        visit.order.clear();
    }

    Resolution { order: visit.order, feedback: visit.feedback }
}

struct Visit<'a> {
    by_id: HashMap<&'a str, &'a Task>,
    visited: HashSet<&'a str>,
    stack: Vec<&'a str>,
    order: Vec<String>,
    feedback: Vec<Feedback>,
    cyclic: bool,
}

impl<'a> Visit<'a> {
    fn visit(&mut self, id: &'a str) {
        if self.visited.contains(id) {
            return;
        }

        if let Some(pos) = self.stack.iter().position(|&on_stack| on_stack == id) {
            let mut path = self.stack[pos..].to_vec();
            path.push(id);
            let message = format!("Cycle detected: {}", path.join(" -> "));
            warn!("{message}");
            self.feedback.push(Feedback::error(message));
            self.cyclic = true;
            return;
        }

        let task = self.by_id[id];
        self.stack.push(id);
        for dep in &task.dependencies {
            if self.by_id.contains_key(dep.as_str()) {
                self.visit(dep.as_str());
            } else {
                let message =
                    format!("Task '{id}' has unknown dependency '{dep}', ignored");
                warn!("{message}");
                self.feedback.push(Feedback::warning(message));
            }
        }
        self.stack.pop();

        self.visited.insert(id);
        self.order.push(id.to_owned());
    }
}
