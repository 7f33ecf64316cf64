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

//! Roles: task bundles shared by the hosts that carry them.

use std::fmt::Write as _;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::error::{FleetError, Result};
use crate::host::Host;
use crate::orchestrator::Registry;
use crate::task::{Task, TaskBody, TaskScope};

/// What to do when a host fails during a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BroadcastPolicy {
    /// Run on every host regardless of failures
    #[default]
    Continue,
    /// Stop after the first failing host
    FailFast,
}

/// Result of running a broadcast task on one host.
#[derive(Debug)]
pub struct HostOutcome {
    pub host: Arc<Host>,
    pub result: anyhow::Result<String>,
}

/// A named set of tasks, applied to every host that has the role.
pub struct Role {
    name: String,
    registry: Weak<Registry>,
    tasks: TaskScope,
}

impl Role {
    pub(crate) fn new(name: &str, registry: Weak<Registry>) -> Self {
        Self {
            name: name.to_string(),
            registry,
            tasks: TaskScope::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn registry(&self) -> Result<Arc<Registry>> {
        self.registry.upgrade().ok_or_else(|| FleetError::Detached {
            name: self.name.clone(),
        })
    }

    /// Find or create a role task, adopting a global task of that name.
    pub fn task(&self, name: &str) -> Result<Arc<Task>> {
        let global = self.registry()?.tasks.find(name);
        Ok(self.tasks.task(name, None, global))
    }

    /// Define `name` for this role, shadowing any global task.
    pub fn define_task(&self, name: &str, body: TaskBody) -> Arc<Task> {
        let global = self.registry.upgrade().and_then(|r| r.tasks.find(name));
        self.tasks.task(name, Some(body), global)
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.all()
    }

    /// A task this role declares. Global tasks are only visible once
    /// adopted through [`Role::task`].
    pub fn find_task(&self, name: &str) -> Option<Arc<Task>> {
        self.tasks.find(name)
    }

    /// Hosts carrying this role, in registration order.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        match self.registry.upgrade() {
            Some(registry) => registry
                .hosts()
                .into_iter()
                .filter(|h| h.has_role(&self.name))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Run task `name` once on each member host, in registration order.
    pub async fn broadcast(
        &self,
        name: &str,
        args: &[&str],
        policy: BroadcastPolicy,
    ) -> Result<Vec<HostOutcome>> {
        let task = self
            .find_task(name)
            .ok_or_else(|| FleetError::TaskNotFound {
                name: name.to_string(),
                scope: format!("role {}", self.name),
            })?;

        let hosts = self.hosts();
        debug!(role = %self.name, task = name, "broadcast to {} hosts", hosts.len());
        let mut outcomes = Vec::with_capacity(hosts.len());
        for host in hosts {
            let result = task.run(Some(Arc::clone(&host)), args).await;
            let failed = result.is_err();
            outcomes.push(HostOutcome { host, result });
            if failed && policy == BroadcastPolicy::FailFast {
                warn!(role = %self.name, task = name, "stopping broadcast after failure");
                break;
            }
        }
        Ok(outcomes)
    }

    /// Broadcast `name` to every member host, continuing past failures.
    pub async fn call(&self, name: &str, args: &[&str]) -> Result<Vec<HostOutcome>> {
        self.broadcast(name, args, BroadcastPolicy::Continue).await
    }

    /// Run `f` on every member host in turn, stopping at the first error.
    pub async fn for_each_host<F, Fut>(&self, mut f: F) -> anyhow::Result<()>
    where
        F: FnMut(Arc<Host>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        for host in self.hosts() {
            f(host).await?;
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        let mut out = format!("role {}\n", self.name);
        let hosts: Vec<String> = self.hosts().iter().map(|h| h.name().to_string()).collect();
        if !hosts.is_empty() {
            let _ = writeln!(out, "  hosts: {}", hosts.join(", "));
        }
        for task in self.tasks() {
            let _ = writeln!(out, "  task {}", task.name());
        }
        out
    }
}

impl std::fmt::Debug for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Role").field("name", &self.name).finish()
    }
}

/// Calls a role's tasks with one host as the execution context.
pub struct RoleProxy {
    host: Weak<Host>,
    role: Arc<Role>,
}

impl RoleProxy {
    pub(crate) fn new(host: &Arc<Host>, role: Arc<Role>) -> Self {
        Self {
            host: Arc::downgrade(host),
            role,
        }
    }

    pub fn role(&self) -> &Arc<Role> {
        &self.role
    }

    /// Run the role's task `name` on the bound host.
    pub async fn call(&self, name: &str, args: &[&str]) -> anyhow::Result<String> {
        let host = self.host.upgrade().ok_or_else(|| FleetError::Detached {
            name: self.role.name.clone(),
        })?;
        let task = self
            .role
            .find_task(name)
            .ok_or_else(|| FleetError::TaskNotFound {
                name: name.to_string(),
                scope: format!("role {}", self.role.name),
            })?;
        task.run(Some(host), args).await
    }
}
