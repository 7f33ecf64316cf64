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

use anyhow::{bail, Result};

use super::report_outcomes;
use crate::cli::Cli;
use crate::orchestrator::{Entity, Orchestrator};
use crate::role::{BroadcastPolicy, HostOutcome};

/// Run a `SCOPE.TASK` target. A role broadcasts the task to its hosts, a
/// group calls it on each member host, a host calls it directly. A bare
/// task name runs the global task unbound.
pub async fn run_target(orch: &Orchestrator, target: &str, args: &[String]) -> Result<bool> {
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let (scope, task) = Cli::split_target(target);

    let Some(scope) = scope else {
        let Entity::Task(global) = orch.resolve(task)? else {
            bail!("'{task}' is not a task; use SCOPE.TASK to run on hosts");
        };
        let output = global.run(None, &args).await?;
        if !output.is_empty() {
            println!("{output}");
        }
        return Ok(true);
    };

    let outcomes = match orch.resolve(scope)? {
        Entity::Role(role) => role.broadcast(task, &args, BroadcastPolicy::Continue).await?,
        Entity::Group(group) => {
            let mut outcomes = Vec::new();
            for host in group.hosts() {
                let result = host.call(task, &args).await;
                outcomes.push(HostOutcome { host, result });
            }
            outcomes
        }
        Entity::Host(host) => {
            let result = host.call(task, &args).await;
            vec![HostOutcome { host, result }]
        }
        Entity::Task(_) => bail!("'{scope}' is a task, not a role, group or host"),
    };
    Ok(report_outcomes(&outcomes, false))
}
