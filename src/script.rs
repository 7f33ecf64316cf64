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

//! Declarative fleet files.
//!
//! A fleet file is YAML describing gateways, hosts, groups, roles and
//! tasks. Task bodies are lists of steps run in order on the bound host:
//!
//! ```yaml
//! gateways:
//!   bastion: { user: ops }
//! hosts:
//!   web1: { user: deploy, gateway: bastion, roles: [web] }
//! groups:
//!   prod: { hosts: [db1], groups: { web: { hosts: [web1] } } }
//! roles:
//!   web:
//!     tasks:
//!       restart:
//!         - { run: "systemctl restart nginx", sudo: root }
//! tasks:
//!   uptime: ["uptime"]
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::error::{FleetError, Result};
use crate::group::Group;
use crate::host::{ExecOptions, Host};
use crate::orchestrator::Orchestrator;
use crate::task::{task_body, TaskBody};
use crate::utils::shell::escape;

/// Suffix implied by a pattern ending in `*`.
pub const FLEET_FILE_SUFFIX: &str = ".yaml";

/// One step of a scripted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Step {
    /// Invoke another task on the same host
    Task {
        task: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Command with options
    Run {
        run: String,
        /// Run as this user through sudo
        #[serde(default)]
        sudo: Option<String>,
        /// Fail the task on non-zero exit
        #[serde(default = "default_check")]
        check: bool,
        /// Change directory before running
        #[serde(default)]
        cd: Option<String>,
    },
    /// Plain command line
    Command(String),
}

fn default_check() -> bool {
    true
}

/// Prefix setting the shell's positional parameters to `args`.
fn positional(args: &[&str]) -> String {
    if args.is_empty() {
        return String::new();
    }
    let quoted: Vec<String> = args.iter().map(|a| escape(a)).collect();
    format!("set -- {}; ", quoted.join(" "))
}

impl Step {
    /// Run this step on `host`. Task arguments are visible to commands as
    /// `$1`, `$2`, ...
    pub async fn run(&self, host: &Arc<Host>, args: &[&str]) -> anyhow::Result<String> {
        match self {
            Step::Command(command) => {
                let command = format!("{}{command}", positional(args));
                Ok(host.exec(&command, ExecOptions::new()).await?)
            }
            Step::Run {
                run,
                sudo,
                check,
                cd,
            } => {
                if let Some(dir) = cd {
                    host.cd(Some(dir)).await?;
                }
                let _sudo = sudo.as_ref().map(|user| host.as_user(user.clone()));
                let mut opts = ExecOptions::new();
                if !check {
                    opts = opts.unchecked();
                }
                let command = format!("{}{run}", positional(args));
                Ok(host.exec(&command, opts).await?)
            }
            Step::Task { task, args } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                host.call(task, &args).await
            }
        }
    }
}

/// Turn a step list into a task body returning the last step's output.
pub fn steps_body(steps: Vec<Step>) -> TaskBody {
    let steps = Arc::new(steps);
    task_body(move |ctx| {
        let steps = Arc::clone(&steps);
        async move {
            let host = Arc::clone(ctx.host()?);
            let args = ctx.args();
            let mut last = String::new();
            for step in steps.iter() {
                last = step.run(&host, &args).await?;
            }
            Ok(last)
        }
    })
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySpec {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostSpec {
    #[serde(default)]
    pub user: Option<String>,
    /// Name of the gateway this host connects through
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
    #[serde(default)]
    pub sudo_password: Option<String>,
    #[serde(default)]
    pub tasks: IndexMap<String, Vec<Step>>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupSpec {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub groups: IndexMap<String, GroupSpec>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSpec {
    /// Hosts given this role
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub tasks: IndexMap<String, Vec<Step>>,
}

/// Parsed contents of one fleet file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetFile {
    #[serde(default)]
    pub gateways: IndexMap<String, GatewaySpec>,
    #[serde(default)]
    pub hosts: IndexMap<String, HostSpec>,
    #[serde(default)]
    pub groups: IndexMap<String, GroupSpec>,
    #[serde(default)]
    pub roles: IndexMap<String, RoleSpec>,
    #[serde(default)]
    pub tasks: IndexMap<String, Vec<Step>>,
}

impl FleetFile {
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| FleetError::Script {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn read(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| FleetError::Script {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::parse(&content, path)
    }

    /// Register everything this file declares. Later files extend and
    /// override earlier ones.
    pub fn apply(&self, orch: &Orchestrator) {
        for (name, steps) in &self.tasks {
            orch.define_task(name, steps_body(steps.clone()));
        }

        for (name, spec) in &self.gateways {
            let gateway = orch.gateway(name);
            let host = gateway.host();
            if let Some(user) = &spec.user {
                host.set_user(user);
            }
            for (key, value) in &spec.env {
                host.set_env(key, value);
            }
        }

        for (name, spec) in &self.hosts {
            let host = orch.host(name);
            if let Some(user) = &spec.user {
                host.set_user(user);
            }
            if let Some(gateway) = &spec.gateway {
                host.set_gateway(Some(orch.gateway(gateway)));
            }
            for (key, value) in &spec.env {
                host.set_env(key, value);
            }
            if spec.sudo_password.is_some() {
                host.set_password(spec.sudo_password.as_deref());
            }
            for role in &spec.roles {
                // The host is registered, so the registry is alive.
                let _ = host.role(role);
            }
            for (task, steps) in &spec.tasks {
                host.define_task(task, steps_body(steps.clone()));
            }
        }

        for (name, spec) in &self.groups {
            apply_group(&orch.group(name), spec, orch);
        }

        for (name, spec) in &self.roles {
            let role = orch.role(name);
            for (task, steps) in &spec.tasks {
                role.define_task(task, steps_body(steps.clone()));
            }
            for host in &spec.hosts {
                let _ = orch.host(host).role(name);
            }
        }
    }
}

fn apply_group(group: &Arc<Group>, spec: &GroupSpec, orch: &Orchestrator) {
    for host in &spec.hosts {
        group.add_host(&orch.host(host));
    }
    for (name, child) in &spec.groups {
        apply_group(&group.group(name), child, orch);
    }
}

/// Expand load patterns into the sorted list of fleet files to apply.
///
/// A pattern ending in `*` gets the fleet file suffix appended. Patterns
/// starting with `-` are exclusions: any matched file whose path ends with
/// the exclusion text is skipped.
pub fn expand_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<PathBuf>> {
    let (exclusions, includes): (Vec<&str>, Vec<&str>) = patterns
        .iter()
        .map(AsRef::as_ref)
        .partition(|p| p.starts_with('-'));
    let exclusions: Vec<&str> = exclusions.iter().map(|p| &p[1..]).collect();

    let mut files = Vec::new();
    for pattern in includes {
        let pattern = if pattern.ends_with('*') {
            format!("{pattern}{FLEET_FILE_SUFFIX}")
        } else {
            pattern.to_string()
        };
        let entries = glob::glob(&pattern).map_err(|e| FleetError::Script {
            path: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut matched: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect();
        matched.sort();

        for path in matched {
            let text = path.to_string_lossy();
            if let Some(excl) = exclusions.iter().find(|e| text.ends_with(**e)) {
                debug!(file = %text, "skipping fleet file excluded by -{excl}");
                continue;
            }
            files.push(path);
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_step_forms() {
        let steps: Vec<Step> = serde_yaml::from_str(
            r#"
- uptime
- { run: "make install", sudo: root, check: false, cd: /src }
- { task: restart, args: [now] }
"#,
        )
        .unwrap();
        assert_eq!(steps[0], Step::Command("uptime".into()));
        assert_eq!(
            steps[1],
            Step::Run {
                run: "make install".into(),
                sudo: Some("root".into()),
                check: false,
                cd: Some("/src".into()),
            }
        );
        assert_eq!(
            steps[2],
            Step::Task {
                task: "restart".into(),
                args: vec!["now".into()],
            }
        );
    }

    #[test]
    fn test_run_step_checks_by_default() {
        let step: Step = serde_yaml::from_str("{ run: ls }").unwrap();
        assert!(matches!(step, Step::Run { check: true, .. }));
    }

    #[test]
    fn test_positional_prefix() {
        assert_eq!(positional(&[]), "");
        assert_eq!(positional(&["a", "b c"]), "set -- a \"b c\"; ");
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = FleetFile::parse("hosts: [", Path::new("fleet/bad.yaml")).unwrap_err();
        assert!(err.to_string().contains("fleet/bad.yaml"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = FleetFile::parse("hostz: {}", Path::new("x.yaml")).unwrap_err();
        assert!(matches!(err, FleetError::Script { .. }));
    }

    #[test]
    fn test_expand_patterns_sorts_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.yaml", "a.yaml", "local.yaml", "notes.txt"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        fs::create_dir(dir.path().join("sub.yaml")).unwrap();

        let base = dir.path().display().to_string();
        let files = expand_patterns(&[format!("{base}/*"), "-local.yaml".to_string()]).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.yaml", "b.yaml"]);
    }
}
