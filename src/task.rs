// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Named, reusable units of remote work.
//!
//! A [`Task`] owns a replaceable body. Bodies are async closures taking an
//! explicit [`TaskContext`]; when the task is bound to a host the context
//! exposes it, otherwise only the positional arguments are available.
//!
//! Hosts and roles keep their own [`TaskScope`]. Redefining a task in a
//! scope never touches the shared definition: the scope stores a copy with
//! the new body in place of the original entry.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::error;

use crate::error::FleetError;
use crate::host::Host;
use crate::log::Severity;

pub type TaskFuture = BoxFuture<'static, anyhow::Result<String>>;

/// Shared, callable task body.
pub type TaskBody = Arc<dyn Fn(TaskContext) -> TaskFuture + Send + Sync>;

/// Wrap an async closure as a [`TaskBody`].
pub fn task_body<F, Fut>(f: F) -> TaskBody
where
    F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// Execution context handed to a task body.
#[derive(Clone)]
pub struct TaskContext {
    task: String,
    host: Option<Arc<Host>>,
    args: Vec<String>,
}

impl TaskContext {
    /// The host this invocation is bound to.
    pub fn host(&self) -> Result<&Arc<Host>, FleetError> {
        self.host.as_ref().ok_or_else(|| FleetError::UnboundTask {
            task: self.task.clone(),
        })
    }

    pub fn is_bound(&self) -> bool {
        self.host.is_some()
    }

    pub fn task_name(&self) -> &str {
        &self.task
    }

    pub fn args(&self) -> Vec<&str> {
        self.args.iter().map(String::as_str).collect()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// A named block of work, runnable on a host or unbound.
pub struct Task {
    name: String,
    body: RwLock<Option<TaskBody>>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: RwLock::new(None),
        }
    }

    pub fn with_body(name: impl Into<String>, body: TaskBody) -> Self {
        Self {
            name: name.into(),
            body: RwLock::new(Some(body)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> Option<TaskBody> {
        self.body
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the body in place. Every scope sharing this task sees it.
    pub fn set_body(&self, body: TaskBody) {
        *self.body.write().unwrap_or_else(PoisonError::into_inner) = Some(body);
    }

    /// Shallow copy sharing the same body.
    pub fn dup(&self) -> Task {
        Task {
            name: self.name.clone(),
            body: RwLock::new(self.body()),
        }
    }

    /// Run the body. A failure while bound to a host is logged on that host
    /// with the task name and error chain, then returned.
    pub async fn run(&self, host: Option<Arc<Host>>, args: &[&str]) -> anyhow::Result<String> {
        let body = self.body().ok_or_else(|| FleetError::EmptyTask {
            task: self.name.clone(),
        })?;
        let ctx = TaskContext {
            task: self.name.clone(),
            host: host.clone(),
            args: args.iter().map(|a| a.to_string()).collect(),
        };

        let result = body(ctx).await;
        if let (Err(err), Some(host)) = (&result, &host) {
            error!(task = %self.name, host = %host.name(), "task failed: {err:#}");
            host.log(Severity::Error, format!("task {} failed: {}", self.name, err));
            for cause in err.chain().skip(1) {
                host.log(Severity::Error, format!("  caused by: {cause}"));
            }
        }
        result
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        let same_body = match (self.body(), other.body()) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a, &b),
            (None, None) => true,
            _ => false,
        };
        self.name == other.name && same_body
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("has_body", &self.body().is_some())
            .finish()
    }
}

/// Ordered task list local to a host or role.
#[derive(Default)]
pub(crate) struct TaskScope {
    tasks: Mutex<Vec<Arc<Task>>>,
}

impl TaskScope {
    pub(crate) fn find(&self, name: &str) -> Option<Arc<Task>> {
        self.lock().iter().find(|t| t.name == name).cloned()
    }

    pub(crate) fn all(&self) -> Vec<Arc<Task>> {
        self.lock().clone()
    }

    /// Find or define `name` in this scope.
    ///
    /// Resolution: local entry, then `global` (adopted only when no body
    /// is supplied), otherwise a fresh task. Supplying a body stores a copy
    /// carrying that body in place of the found entry.
    pub(crate) fn task(
        &self,
        name: &str,
        body: Option<TaskBody>,
        global: Option<Arc<Task>>,
    ) -> Arc<Task> {
        let mut tasks = self.lock();
        let index = match tasks.iter().position(|t| t.name == name) {
            Some(index) => index,
            None => {
                let task = match (global, &body) {
                    (Some(global), None) => global,
                    _ => Arc::new(Task::new(name)),
                };
                tasks.push(task);
                tasks.len() - 1
            }
        };

        match body {
            Some(body) => {
                let mut copy = tasks[index].dup();
                copy.body = RwLock::new(Some(body));
                let copy = Arc::new(copy);
                tasks[index] = Arc::clone(&copy);
                copy
            }
            None => Arc::clone(&tasks[index]),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Task>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: &'static str) -> TaskBody {
        task_body(move |_ctx| async move { Ok(value.to_string()) })
    }

    #[tokio::test]
    async fn test_unbound_run_receives_args() {
        let task = Task::with_body(
            "greet",
            task_body(|ctx| async move { Ok(format!("hello {}", ctx.arg(0).unwrap_or("?"))) }),
        );
        let out = task.run(None, &["world"]).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn test_unbound_task_cannot_reach_host() {
        let task = Task::with_body(
            "needs_host",
            task_body(|ctx| async move {
                let host = ctx.host()?;
                Ok(host.name().to_string())
            }),
        );
        let err = task.run(None, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::UnboundTask { .. })
        ));
    }

    #[tokio::test]
    async fn test_task_without_body_fails() {
        let err = Task::new("empty").run(None, &[]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FleetError>(),
            Some(FleetError::EmptyTask { .. })
        ));
    }

    #[test]
    fn test_dup_shares_body_and_equality() {
        let task = Task::with_body("t", constant("x"));
        let copy = task.dup();
        assert!(task == copy);

        let other = Task::with_body("t", constant("x"));
        assert!(task != other, "different body identity");
    }

    #[tokio::test]
    async fn test_scope_override_leaves_global_untouched() {
        let global = Arc::new(Task::with_body("deploy", constant("global")));
        let scope = TaskScope::default();

        let adopted = scope.task("deploy", None, Some(Arc::clone(&global)));
        assert!(Arc::ptr_eq(&adopted, &global));

        let local = scope.task("deploy", Some(constant("local")), Some(Arc::clone(&global)));
        assert!(!Arc::ptr_eq(&local, &global));
        assert_eq!(scope.all().len(), 1);
        assert_eq!(local.run(None, &[]).await.unwrap(), "local");
        assert_eq!(global.run(None, &[]).await.unwrap(), "global");
    }

    #[test]
    fn test_scope_creates_fresh_task_when_body_given() {
        let global = Arc::new(Task::with_body("setup", constant("global")));
        let scope = TaskScope::default();
        let local = scope.task("setup", Some(constant("local")), Some(Arc::clone(&global)));
        assert_eq!(local.name(), "setup");
        assert!(*local != *global);
        assert!(Arc::ptr_eq(&scope.find("setup").unwrap(), &local));
    }
}
