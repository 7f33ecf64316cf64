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

//! The root registry binding names to hosts, gateways, groups, roles and
//! tasks.

use indexmap::IndexMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::info;

use crate::error::{FleetError, Result};
use crate::gateway::Gateway;
use crate::group::Group;
use crate::host::Host;
use crate::role::Role;
use crate::script;
use crate::task::{Task, TaskBody, TaskScope};
use crate::transport::Transport;

/// Anything a bare name can resolve to.
#[derive(Debug, Clone)]
pub enum Entity {
    Group(Arc<Group>),
    Host(Arc<Host>),
    Role(Arc<Role>),
    Task(Arc<Task>),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Group(_) => "group",
            Entity::Host(_) => "host",
            Entity::Role(_) => "role",
            Entity::Task(_) => "task",
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Name-keyed maps shared by every entity of one orchestrator.
pub(crate) struct Registry {
    me: Weak<Registry>,
    transport: Arc<dyn Transport>,
    hosts: Mutex<IndexMap<String, Arc<Host>>>,
    gateways: Mutex<IndexMap<String, Arc<Gateway>>>,
    groups: Mutex<IndexMap<String, Arc<Group>>>,
    roles: Mutex<IndexMap<String, Arc<Role>>>,
    pub(crate) tasks: TaskScope,
    /// User given to hosts created from now on
    default_user: Mutex<Option<String>>,
}

impl Registry {
    fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            transport,
            hosts: Mutex::new(IndexMap::new()),
            gateways: Mutex::new(IndexMap::new()),
            groups: Mutex::new(IndexMap::new()),
            roles: Mutex::new(IndexMap::new()),
            tasks: TaskScope::default(),
            default_user: Mutex::new(None),
        })
    }

    fn new_host(&self, name: &str, is_gateway: bool) -> Arc<Host> {
        let host = Host::new(name, self.me.clone(), Arc::clone(&self.transport), is_gateway);
        if let Some(user) = lock(&self.default_user).clone() {
            host.set_user(user);
        }
        host
    }

    pub(crate) fn host(&self, name: &str) -> Arc<Host> {
        let mut hosts = lock(&self.hosts);
        if let Some(host) = hosts.get(name) {
            return Arc::clone(host);
        }
        let host = self.new_host(name, false);
        hosts.insert(name.to_string(), Arc::clone(&host));
        host
    }

    pub(crate) fn hosts(&self) -> Vec<Arc<Host>> {
        lock(&self.hosts).values().cloned().collect()
    }

    pub(crate) fn gateway(&self, name: &str) -> Arc<Gateway> {
        let mut gateways = lock(&self.gateways);
        if let Some(gateway) = gateways.get(name) {
            return Arc::clone(gateway);
        }
        let host = self.new_host(name, true);
        let gateway = Arc::new(Gateway::new(host));
        gateways.insert(name.to_string(), Arc::clone(&gateway));
        gateway
    }

    pub(crate) fn role(&self, name: &str) -> Arc<Role> {
        lock(&self.roles)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Role::new(name, self.me.clone())))
            .clone()
    }

    pub(crate) fn find_role(&self, name: &str) -> Option<Arc<Role>> {
        lock(&self.roles).get(name).cloned()
    }

    pub(crate) fn group(&self, name: &str) -> Arc<Group> {
        lock(&self.groups)
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name, Weak::new(), self.me.clone()))
            .clone()
    }

    /// Every group at any depth: top-level groups each followed by their
    /// descendants.
    pub(crate) fn all_groups(&self) -> Vec<Arc<Group>> {
        let top: Vec<Arc<Group>> = lock(&self.groups).values().cloned().collect();
        let mut out = Vec::new();
        for group in top {
            let descendants = group.descendants();
            out.push(group);
            out.extend(descendants);
        }
        out
    }
}

/// Entry point of the fleet model.
///
/// Every accessor is get-or-create: asking for a name that does not exist
/// yet registers a fresh entity under it. Clones share one registry.
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<Registry>,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            registry: Registry::new(transport),
        }
    }

    pub fn host(&self, name: &str) -> Arc<Host> {
        self.registry.host(name)
    }

    /// Login user for hosts and gateways registered after this call.
    pub fn set_default_user(&self, user: impl Into<String>) {
        *lock(&self.registry.default_user) = Some(user.into());
    }

    pub fn gateway(&self, name: &str) -> Arc<Gateway> {
        self.registry.gateway(name)
    }

    /// Top-level group `name`.
    pub fn group(&self, name: &str) -> Arc<Group> {
        self.registry.group(name)
    }

    /// Nested group addressed by a slash-separated path such as `prod/web`.
    pub fn group_path(&self, path: &str) -> Result<Arc<Group>> {
        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let first = parts.next().ok_or_else(|| FleetError::NameResolution {
            name: path.to_string(),
        })?;
        Ok(parts.fold(self.group(first), |group, part| group.group(part)))
    }

    pub fn role(&self, name: &str) -> Arc<Role> {
        self.registry.role(name)
    }

    /// Global task `name`.
    pub fn task(&self, name: &str) -> Arc<Task> {
        self.registry.tasks.task(name, None, None)
    }

    /// Set the body of global task `name` in place. Scopes that adopted
    /// the task without overriding it pick up the new body.
    pub fn define_task(&self, name: &str, body: TaskBody) -> Arc<Task> {
        let task = self.task(name);
        task.set_body(body);
        task
    }

    pub fn hosts(&self) -> Vec<Arc<Host>> {
        self.registry.hosts()
    }

    pub fn gateways(&self) -> Vec<Arc<Gateway>> {
        lock(&self.registry.gateways).values().cloned().collect()
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        lock(&self.registry.groups).values().cloned().collect()
    }

    pub fn roles(&self) -> Vec<Arc<Role>> {
        lock(&self.registry.roles).values().cloned().collect()
    }

    pub fn tasks(&self) -> Vec<Arc<Task>> {
        self.registry.tasks.all()
    }

    /// Existing host or gateway host called `name`.
    pub fn find_host(&self, name: &str) -> Option<Arc<Host>> {
        if let Some(host) = lock(&self.registry.hosts).get(name) {
            return Some(Arc::clone(host));
        }
        lock(&self.registry.gateways)
            .get(name)
            .map(|g| Arc::clone(g.host()))
    }

    /// Resolve a bare name against existing entities, trying group, host,
    /// role and task in that order. A name containing `/` is a group path.
    pub fn resolve(&self, name: &str) -> Result<Entity> {
        if name.contains('/') {
            let mut parts = name.split('/').filter(|p| !p.is_empty());
            let found = parts.next().and_then(|first| {
                let top = lock(&self.registry.groups).get(first).cloned();
                parts.try_fold(top?, |group, part| match group.resolve(part) {
                    Some(Entity::Group(child)) => Some(child),
                    _ => None,
                })
            });
            return found
                .map(Entity::Group)
                .ok_or_else(|| FleetError::NameResolution {
                    name: name.to_string(),
                });
        }

        if let Some(group) = lock(&self.registry.groups).get(name).cloned() {
            return Ok(Entity::Group(group));
        }
        if let Some(host) = self.find_host(name) {
            return Ok(Entity::Host(host));
        }
        if let Some(role) = self.registry.find_role(name) {
            return Ok(Entity::Role(role));
        }
        if let Some(task) = self.registry.tasks.find(name) {
            return Ok(Entity::Task(task));
        }
        Err(FleetError::NameResolution {
            name: name.to_string(),
        })
    }

    /// Hosts addressed by a group, host or role name.
    pub fn hosts_for(&self, target: &str) -> Result<Vec<Arc<Host>>> {
        match self.resolve(target)? {
            Entity::Group(group) => Ok(group.hosts()),
            Entity::Host(host) => Ok(vec![host]),
            Entity::Role(role) => Ok(role.hosts()),
            Entity::Task(_) => Err(FleetError::NameResolution {
                name: target.to_string(),
            }),
        }
    }

    /// Load fleet files matching `patterns` in sorted order. Patterns
    /// starting with `-` exclude files ending with the rest of the
    /// pattern. Returns the files applied.
    pub async fn load<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<PathBuf>> {
        let files = script::expand_patterns(patterns)?;
        for path in &files {
            let fleet = script::FleetFile::read(path).await?;
            fleet.apply(self);
            info!(file = %path.display(), "loaded fleet file");
        }
        Ok(files)
    }

    pub fn describe(&self) -> String {
        let mut out = String::new();
        for gateway in self.gateways() {
            let _ = writeln!(out, "gateway {}", gateway.name());
        }
        for host in self.hosts() {
            out.push_str(&host.describe());
        }
        for group in self.groups() {
            out.push_str(&group.describe());
        }
        for role in self.roles() {
            out.push_str(&role.describe());
        }
        for task in self.tasks() {
            let _ = writeln!(out, "task {}", task.name());
        }
        out
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("hosts", &lock(&self.registry.hosts).len())
            .field("groups", &lock(&self.registry.groups).len())
            .field("roles", &lock(&self.registry.roles).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task_body;
    use crate::transport::mock::MockTransport;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(Arc::new(MockTransport::new()))
    }

    #[test]
    fn test_get_or_create_returns_same_handle() {
        let orch = orchestrator();
        assert!(Arc::ptr_eq(&orch.host("web1"), &orch.host("web1")));
        assert!(Arc::ptr_eq(&orch.role("web"), &orch.role("web")));
        assert!(Arc::ptr_eq(&orch.group("prod"), &orch.group("prod")));
        assert!(Arc::ptr_eq(&orch.task("deploy"), &orch.task("deploy")));
        assert_eq!(orch.hosts().len(), 1);
    }

    #[test]
    fn test_resolution_order() {
        let orch = orchestrator();
        orch.task("shared");
        assert_eq!(orch.resolve("shared").unwrap().kind(), "task");
        orch.role("shared");
        assert_eq!(orch.resolve("shared").unwrap().kind(), "role");
        orch.host("shared");
        assert_eq!(orch.resolve("shared").unwrap().kind(), "host");
        orch.group("shared");
        assert_eq!(orch.resolve("shared").unwrap().kind(), "group");
    }

    #[test]
    fn test_unknown_name_fails() {
        let orch = orchestrator();
        assert!(matches!(
            orch.resolve("nope"),
            Err(FleetError::NameResolution { .. })
        ));
    }

    #[test]
    fn test_group_path() {
        let orch = orchestrator();
        let web = orch.group_path("prod/web").unwrap();
        assert_eq!(web.path(), "prod/web");
        assert!(Arc::ptr_eq(&orch.group("prod").group("web"), &web));
        match orch.resolve("prod/web").unwrap() {
            Entity::Group(g) => assert!(Arc::ptr_eq(&g, &web)),
            other => panic!("unexpected {}", other.kind()),
        }
        assert!(orch.resolve("prod/db").is_err());
    }

    #[test]
    fn test_host_groups_are_derived() {
        let orch = orchestrator();
        let web1 = orch.host("web1");
        web1.join(&orch.group_path("prod/web").unwrap());
        orch.group("all").add_host(&web1);
        let paths: Vec<String> = web1.groups().iter().map(|g| g.path()).collect();
        assert_eq!(paths, vec!["prod/web", "all"]);
    }

    #[tokio::test]
    async fn test_define_task_updates_adopters() {
        let orch = orchestrator();
        let global = orch.task("ping");
        let adopted = orch.host("web1").task("ping").unwrap();
        assert!(Arc::ptr_eq(&global, &adopted));
        orch.define_task("ping", task_body(|_| async { Ok("pong".to_string()) }));
        assert_eq!(adopted.run(None, &[]).await.unwrap(), "pong");
    }

    #[test]
    fn test_gateways_are_not_plain_hosts() {
        let orch = orchestrator();
        let gw = orch.gateway("bastion");
        assert!(gw.host().is_gateway());
        assert!(orch.hosts().is_empty());
        assert_eq!(orch.resolve("bastion").unwrap().kind(), "host");
    }
}
