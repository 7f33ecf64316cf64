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

//! Hierarchical host groups.

use indexmap::IndexMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::error::{FleetError, Result};
use crate::host::Host;
use crate::orchestrator::{Entity, Registry};

/// A named set of hosts and sub-groups.
///
/// Membership is recorded here only; a host's groups are derived by
/// scanning the registry.
pub struct Group {
    name: String,
    me: Weak<Group>,
    parent: Weak<Group>,
    registry: Weak<Registry>,
    children: Mutex<IndexMap<String, Arc<Group>>>,
    hosts: Mutex<IndexMap<String, Arc<Host>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Group {
    pub(crate) fn new(name: &str, parent: Weak<Group>, registry: Weak<Registry>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name: name.to_string(),
            me: me.clone(),
            parent,
            registry,
            children: Mutex::new(IndexMap::new()),
            hosts: Mutex::new(IndexMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Group>> {
        self.parent.upgrade()
    }

    /// Get or create the child group `name`.
    pub fn group(&self, name: &str) -> Arc<Group> {
        let mut children = lock(&self.children);
        if let Some(child) = children.get(name) {
            return Arc::clone(child);
        }
        let child = Group::new(name, self.me.clone(), self.registry.clone());
        children.insert(name.to_string(), Arc::clone(&child));
        child
    }

    /// Get or create the host `name` in the registry and add it here.
    pub fn host(&self, name: &str) -> Result<Arc<Host>> {
        let registry = self.registry.upgrade().ok_or_else(|| FleetError::Detached {
            name: self.path(),
        })?;
        let host = registry.host(name);
        self.add_host(&host);
        Ok(host)
    }

    /// Add `host` as a direct member. Adding it again changes nothing.
    pub fn add_host(&self, host: &Arc<Host>) {
        lock(&self.hosts)
            .entry(host.name().to_string())
            .or_insert_with(|| Arc::clone(host));
    }

    pub fn remove_host(&self, name: &str) -> bool {
        lock(&self.hosts).shift_remove(name).is_some()
    }

    pub(crate) fn has_direct_host(&self, name: &str) -> bool {
        lock(&self.hosts).contains_key(name)
    }

    pub fn direct_hosts(&self) -> Vec<Arc<Host>> {
        lock(&self.hosts).values().cloned().collect()
    }

    pub fn groups(&self) -> Vec<Arc<Group>> {
        lock(&self.children).values().cloned().collect()
    }

    /// Direct hosts plus the hosts of every descendant, each once.
    pub fn hosts(&self) -> Vec<Arc<Host>> {
        let mut seen = IndexMap::new();
        self.collect_hosts(&mut seen);
        seen.into_values().collect()
    }

    fn collect_hosts(&self, seen: &mut IndexMap<String, Arc<Host>>) {
        for host in self.direct_hosts() {
            seen.entry(host.name().to_string()).or_insert(host);
        }
        for child in self.groups() {
            child.collect_hosts(seen);
        }
    }

    /// Every descendant group, depth first.
    pub(crate) fn descendants(&self) -> Vec<Arc<Group>> {
        let mut out = Vec::new();
        for child in self.groups() {
            out.push(Arc::clone(&child));
            out.extend(child.descendants());
        }
        out
    }

    /// Slash-separated path from the top-level group.
    pub fn path(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}/{}", parent.path(), self.name),
            None => self.name.clone(),
        }
    }

    /// Look `name` up as a child group, then as a direct host.
    pub fn resolve(&self, name: &str) -> Option<Entity> {
        if let Some(child) = lock(&self.children).get(name) {
            return Some(Entity::Group(Arc::clone(child)));
        }
        lock(&self.hosts)
            .get(name)
            .map(|host| Entity::Host(Arc::clone(host)))
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
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        let _ = writeln!(out, "{indent}group {}", self.name);
        for host in self.direct_hosts() {
            let _ = writeln!(out, "{indent}  host {}", host.name());
        }
        for child in self.groups() {
            child.describe_into(out, depth + 1);
        }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        if self.name != other.name {
            return false;
        }
        match (self.parent(), other.parent()) {
            (None, None) => true,
            (Some(a), Some(b)) => *a == *b,
            _ => false,
        }
    }
}

impl Eq for Group {}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("path", &self.path()).finish()
    }
}
