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

use owo_colors::OwoColorize;

use crate::orchestrator::Orchestrator;

pub fn list_fleet(orch: &Orchestrator) {
    let hosts = orch.hosts();
    if hosts.is_empty() && orch.gateways().is_empty() {
        println!("{}", "No hosts loaded".dimmed());
        return;
    }

    let gateways = orch.gateways();
    if !gateways.is_empty() {
        println!("\n{} {}\n", "▶".cyan(), "Gateways".bold());
        for gateway in &gateways {
            println!(
                "  {} {} {}",
                "●".blue(),
                gateway.name().bold(),
                format!("(user {})", gateway.host().user()).dimmed()
            );
        }
    }

    println!("\n{} {}\n", "▶".cyan(), "Hosts".bold());
    for host in &hosts {
        let via = host
            .gateway()
            .map(|g| format!(" via {}", g.name()))
            .unwrap_or_default();
        println!(
            "  {} {} {}",
            "●".blue(),
            host.name().bold(),
            format!("(user {}{via})", host.user()).dimmed()
        );
        let roles: Vec<String> = host.roles().iter().map(|r| r.name().to_string()).collect();
        if !roles.is_empty() {
            println!("    {} roles: {}", "•".dimmed(), roles.join(", "));
        }
    }

    let groups = orch.groups();
    if !groups.is_empty() {
        println!("\n{} {}\n", "▶".cyan(), "Groups".bold());
        for group in &groups {
            let count = group.hosts().len();
            println!(
                "  {} {} ({} {})",
                "●".blue(),
                group.path().bold(),
                count.to_string().yellow(),
                if count == 1 { "host" } else { "hosts" }
            );
        }
    }

    let roles = orch.roles();
    if !roles.is_empty() {
        println!("\n{} {}\n", "▶".cyan(), "Roles".bold());
        for role in &roles {
            let tasks: Vec<String> = role.tasks().iter().map(|t| t.name().to_string()).collect();
            println!(
                "  {} {} ({} {})",
                "●".blue(),
                role.name().bold(),
                role.hosts().len().to_string().yellow(),
                if tasks.is_empty() {
                    "hosts".to_string()
                } else {
                    format!("hosts; tasks: {}", tasks.join(", "))
                }
            );
        }
    }

    let tasks = orch.tasks();
    if !tasks.is_empty() {
        println!("\n{} {}\n", "▶".cyan(), "Tasks".bold());
        for task in &tasks {
            println!("  {} {}", "•".dimmed(), task.name());
        }
    }
    println!();
}
