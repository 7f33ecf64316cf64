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

use anyhow::Result;
use owo_colors::OwoColorize;

use super::report_outcomes;
use crate::host::ExecOptions;
use crate::orchestrator::Orchestrator;
use crate::role::HostOutcome;

/// Execute `command` on every host `target` names, one host at a time.
/// Output is echoed through each host's log as it arrives.
pub async fn exec_on(orch: &Orchestrator, target: &str, command: &str) -> Result<bool> {
    let hosts = orch.hosts_for(target)?;
    println!(
        "{} {} on {} {}\n",
        "▶".cyan(),
        command.bold(),
        hosts.len().to_string().yellow(),
        if hosts.len() == 1 { "host" } else { "hosts" }
    );

    let mut outcomes = Vec::with_capacity(hosts.len());
    for host in hosts {
        let result = host
            .exec(command, ExecOptions::new().echo())
            .await
            .map_err(anyhow::Error::from);
        outcomes.push(HostOutcome { host, result });
    }
    Ok(report_outcomes(&outcomes, true))
}
