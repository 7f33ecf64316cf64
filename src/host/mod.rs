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

//! Hosts: the per-machine half of the fleet model.
//!
//! A [`Host`] carries the shell state folded into every command (user,
//! working directory, environment, sudo target), owns a lazily opened
//! connection, and dispatches named tasks bound to itself.

mod exec;
mod fs;

pub use exec::{ExecOptions, ExecOutput, OutputCallback};
pub use fs::FileType;

use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

use crate::error::{FleetError, Result};
use crate::gateway::Gateway;
use crate::group::Group;
use crate::log::{null_handler, LogHandler, LogMessage, Severity};
use crate::orchestrator::Registry;
use crate::role::{Role, RoleProxy};
use crate::security::SudoPassword;
use crate::task::{Task, TaskBody, TaskScope};
use crate::transport::{Connection, Transport, Tunnel};
use crate::utils::shell::join_command;

/// Mutable shell state of a host.
pub(crate) struct HostState {
    pub(crate) user: String,
    /// Remote working directory, populated from `pwd` on first use
    pub(crate) cwd: Option<String>,
    pub(crate) env: IndexMap<String, String>,
    pub(crate) sudo: Option<String>,
    pub(crate) password: Option<SudoPassword>,
    gateway: Option<Arc<Gateway>>,
    roles: Vec<String>,
    on_log: LogHandler,
}

/// Identity of an open connection; a change forces a reconnect.
#[derive(Clone, PartialEq, Eq)]
struct ConnectionKey {
    user: String,
    via: Option<String>,
}

/// A remote machine reachable over the fleet transport.
pub struct Host {
    name: String,
    is_gateway: bool,
    registry: Weak<Registry>,
    transport: Arc<dyn Transport>,
    state: Mutex<HostState>,
    tasks: TaskScope,
    role_proxies: Mutex<HashMap<String, Arc<RoleProxy>>>,
    pub(crate) homedirs: Mutex<HashMap<String, String>>,
    connection: tokio::sync::Mutex<Option<(ConnectionKey, Arc<dyn Connection>)>>,
    /// Serializes channel runs; one command at a time per host
    exec_queue: tokio::sync::Mutex<()>,
}

/// Restores the previous sudo target when dropped.
#[must_use = "the sudo target is reset as soon as the guard is dropped"]
pub struct SudoGuard<'a> {
    host: &'a Host,
    previous: Option<String>,
}

impl Drop for SudoGuard<'_> {
    fn drop(&mut self) {
        self.host.state().sudo = self.previous.take();
    }
}

fn default_user() -> String {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "root".to_string())
}

impl Host {
    pub(crate) fn new(
        name: impl Into<String>,
        registry: Weak<Registry>,
        transport: Arc<dyn Transport>,
        is_gateway: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            is_gateway,
            registry,
            transport,
            state: Mutex::new(HostState {
                user: default_user(),
                cwd: None,
                env: IndexMap::new(),
                sudo: None,
                password: None,
                gateway: None,
                roles: Vec::new(),
                on_log: null_handler(),
            }),
            tasks: TaskScope::default(),
            role_proxies: Mutex::new(HashMap::new()),
            homedirs: Mutex::new(HashMap::new()),
            connection: tokio::sync::Mutex::new(None),
            exec_queue: tokio::sync::Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_gateway(&self) -> bool {
        self.is_gateway
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry(&self) -> Result<Arc<Registry>> {
        self.registry.upgrade().ok_or_else(|| FleetError::Detached {
            name: self.name.clone(),
        })
    }

    /// Send a line to this host's log handler and to `tracing`.
    pub fn log(&self, severity: Severity, text: impl Into<String>) {
        let message = LogMessage::new(severity, text);
        match severity {
            Severity::Debug => debug!(host = %self.name, "{}", message.text),
            Severity::Info => info!(host = %self.name, "{}", message.text),
            Severity::Stderr => info!(host = %self.name, stream = "stderr", "{}", message.text),
            Severity::Warn => warn!(host = %self.name, "{}", message.text),
            Severity::Error => error!(host = %self.name, "{}", message.text),
        }
        let handler = Arc::clone(&self.state().on_log);
        handler(&message);
    }

    /// Replace the log handler. The default discards messages.
    pub fn on_log<F>(&self, handler: F)
    where
        F: Fn(&LogMessage) + Send + Sync + 'static,
    {
        self.state().on_log = Arc::new(handler);
    }

    pub fn user(&self) -> String {
        self.state().user.clone()
    }

    pub fn set_user(&self, user: impl Into<String>) {
        self.state().user = user.into();
    }

    pub fn env(&self, key: &str) -> Option<String> {
        self.state().env.get(key).cloned()
    }

    /// Set an environment override exported to every command.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state().env.insert(key.into(), value.into());
    }

    pub fn unset_env(&self, key: &str) {
        self.state().env.shift_remove(key);
    }

    /// Password fed to `sudo -S`. An empty password clears it.
    pub fn set_password(&self, password: Option<&str>) {
        self.set_sudo_password(password.and_then(|p| SudoPassword::new(p.to_string()).ok()));
    }

    pub fn set_sudo_password(&self, password: Option<SudoPassword>) {
        self.state().password = password;
    }

    pub fn has_password(&self) -> bool {
        self.state().password.is_some()
    }

    pub fn sudo_target(&self) -> Option<String> {
        self.state().sudo.clone()
    }

    /// Run subsequent commands as `user` until the guard is dropped.
    pub fn as_user(&self, user: impl Into<String>) -> SudoGuard<'_> {
        let previous = self.state().sudo.replace(user.into());
        SudoGuard {
            host: self,
            previous,
        }
    }

    pub fn gateway(&self) -> Option<Arc<Gateway>> {
        self.state().gateway.clone()
    }

    /// Route this host's connection through `gateway`. Gateways always
    /// connect directly.
    pub fn set_gateway(&self, gateway: Option<Arc<Gateway>>) {
        if self.is_gateway && gateway.is_some() {
            warn!(host = %self.name, "ignoring gateway on a gateway host");
            return;
        }
        self.state().gateway = gateway;
    }

    /// The shared tunnel this host connects through, if any.
    pub async fn tunnel(&self) -> Result<Option<Arc<dyn Tunnel>>> {
        match self.gateway() {
            Some(gateway) if !self.is_gateway => Ok(Some(gateway.gateway_tunnel().await?)),
            _ => Ok(None),
        }
    }

    /// The open connection, establishing it on first use.
    pub(crate) async fn connection(&self) -> Result<Arc<dyn Connection>> {
        let (user, gateway) = {
            let state = self.state();
            (state.user.clone(), state.gateway.clone())
        };
        let key = ConnectionKey {
            user: user.clone(),
            via: gateway.as_ref().map(|g| g.name().to_string()),
        };

        let mut slot = self.connection.lock().await;
        if let Some((current, connection)) = slot.as_ref() {
            if *current == key && !connection.is_closed() {
                return Ok(Arc::clone(connection));
            }
        }

        let connection = match self.tunnel().await? {
            Some(tunnel) => {
                info!(host = %self.name, via = ?key.via, "connecting as {user} through gateway");
                tunnel.connect(&self.name, &user).await?
            }
            None => {
                info!(host = %self.name, "connecting as {user}");
                self.transport.connect(&self.name, &user).await?
            }
        };
        *slot = Some((key, Arc::clone(&connection)));
        Ok(connection)
    }

    /// Find or create a task visible on this host. A global task of the
    /// same name is adopted into the local list.
    pub fn task(&self, name: &str) -> Result<Arc<Task>> {
        let global = self.registry()?.tasks.find(name);
        Ok(self.tasks.task(name, None, global))
    }

    /// Define `name` locally with `body`, shadowing any global task.
    pub fn define_task(&self, name: &str, body: TaskBody) -> Arc<Task> {
        let global = self.registry.upgrade().and_then(|r| r.tasks.find(name));
        self.tasks.task(name, Some(body), global)
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.tasks.all()
    }

    /// Local task first, then the orchestrator's global task.
    pub fn resolve_task(&self, name: &str) -> Option<Arc<Task>> {
        self.tasks
            .find(name)
            .or_else(|| self.registry.upgrade().and_then(|r| r.tasks.find(name)))
    }

    /// Run the task `name` bound to this host.
    pub async fn call(self: &Arc<Self>, name: &str, args: &[&str]) -> anyhow::Result<String> {
        let task = self
            .resolve_task(name)
            .ok_or_else(|| FleetError::TaskNotFound {
                name: name.to_string(),
                scope: format!("host {}", self.name),
            })?;
        task.run(Some(Arc::clone(self)), args).await
    }

    /// Run the task `name` if one resolves, otherwise execute `name` with
    /// escaped `args` as a literal remote command.
    pub async fn run_command(
        self: &Arc<Self>,
        name: &str,
        args: &[&str],
        opts: ExecOptions,
    ) -> anyhow::Result<String> {
        match self.resolve_task(name) {
            Some(task) => task.run(Some(Arc::clone(self)), args).await,
            None => Ok(self.exec(&join_command(name, args), opts).await?),
        }
    }

    /// Give this host `role`, registering the role if needed.
    pub fn role(&self, name: &str) -> Result<Arc<Role>> {
        let role = self.registry()?.role(name);
        let mut state = self.state();
        if !state.roles.iter().any(|r| r == name) {
            state.roles.push(name.to_string());
        }
        Ok(role)
    }

    pub fn has_role(&self, name: &str) -> bool {
        self.state().roles.iter().any(|r| r == name)
    }

    pub fn roles(&self) -> Vec<Arc<Role>> {
        let names = self.state().roles.clone();
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        names.iter().filter_map(|n| registry.find_role(n)).collect()
    }

    /// Forwarder exposing the tasks of one of this host's roles.
    pub fn role_proxy(self: &Arc<Self>, name: &str) -> Result<Arc<RoleProxy>> {
        if !self.has_role(name) {
            return Err(FleetError::NameResolution {
                name: format!("{}.{name}", self.name),
            });
        }
        let mut proxies = self
            .role_proxies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(proxy) = proxies.get(name) {
            return Ok(Arc::clone(proxy));
        }
        let role = self.registry()?.role(name);
        let proxy = Arc::new(RoleProxy::new(self, role));
        proxies.insert(name.to_string(), Arc::clone(&proxy));
        Ok(proxy)
    }

    /// Run a task of one of this host's roles on this host.
    pub async fn run(self: &Arc<Self>, role: &str, task: &str, args: &[&str]) -> anyhow::Result<String> {
        let proxy = self.role_proxy(role)?;
        proxy.call(task, args).await
    }

    /// Add this host to `group`.
    pub fn join(self: &Arc<Self>, group: &Arc<Group>) {
        group.add_host(self);
    }

    /// Groups listing this host as a direct member.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let Some(registry) = self.registry.upgrade() else {
            return Vec::new();
        };
        registry
            .all_groups()
            .into_iter()
            .filter(|g| g.has_direct_host(&self.name))
            .collect()
    }

    /// Multi-line summary of the host's configuration.
    pub fn describe(&self) -> String {
        let (user, cwd, env, sudo, gateway, roles) = {
            let state = self.state();
            (
                state.user.clone(),
                state.cwd.clone(),
                state.env.clone(),
                state.sudo.clone(),
                state.gateway.as_ref().map(|g| g.name().to_string()),
                state.roles.clone(),
            )
        };

        let mut out = format!("host {} (user {user})\n", self.name);
        if let Some(gateway) = gateway {
            let _ = writeln!(out, "  gateway: {gateway}");
        }
        if let Some(cwd) = cwd {
            let _ = writeln!(out, "  cwd: {cwd}");
        }
        if let Some(sudo) = sudo {
            let _ = writeln!(out, "  sudo: {sudo}");
        }
        for (key, value) in &env {
            let _ = writeln!(out, "  env {key}={value}");
        }
        if !roles.is_empty() {
            let _ = writeln!(out, "  roles: {}", roles.join(", "));
        }
        let groups: Vec<String> = self.groups().iter().map(|g| g.path()).collect();
        if !groups.is_empty() {
            let _ = writeln!(out, "  groups: {}", groups.join(", "));
        }
        for task in self.tasks() {
            let _ = writeln!(out, "  task {}", task.name());
        }
        out
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("name", &self.name)
            .field("is_gateway", &self.is_gateway)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn detached(name: &str) -> Arc<Host> {
        Host::new(name, Weak::new(), Arc::new(MockTransport::new()), false)
    }

    #[test]
    fn test_sudo_guard_restores_previous_target() {
        let host = detached("web1");
        {
            let _outer = host.as_user("deploy");
            {
                let _inner = host.as_user("root");
                assert_eq!(host.sudo_target().as_deref(), Some("root"));
            }
            assert_eq!(host.sudo_target().as_deref(), Some("deploy"));
        }
        assert_eq!(host.sudo_target(), None);
    }

    #[test]
    fn test_log_reaches_handler() {
        let host = detached("web1");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        host.on_log(move |m| sink.lock().unwrap().push((m.severity, m.text.clone())));
        host.log(Severity::Warn, "disk almost full");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Severity::Warn, "disk almost full".to_string())]
        );
    }

    #[test]
    fn test_env_overrides_keep_order() {
        let host = detached("web1");
        host.set_env("B", "2");
        host.set_env("A", "1");
        let keys: Vec<String> = host.state().env.keys().cloned().collect();
        assert_eq!(keys, vec!["B", "A"]);
        host.unset_env("B");
        assert_eq!(host.env("B"), None);
        assert_eq!(host.env("A").as_deref(), Some("1"));
    }

    #[test]
    fn test_detached_host_cannot_take_roles() {
        let host = detached("web1");
        assert!(matches!(host.role("web"), Err(FleetError::Detached { .. })));
        assert!(host.groups().is_empty());
    }

    #[tokio::test]
    async fn test_empty_password_is_ignored() {
        let transport = MockTransport::new();
        let host = Host::new("db1", Weak::new(), Arc::new(transport.clone()), false);
        host.set_password(Some(""));
        let _root = host.as_user("root");
        host.exec("true", ExecOptions::new()).await.unwrap();
        assert_eq!(transport.requests()[0].stdin, "");
    }
}
