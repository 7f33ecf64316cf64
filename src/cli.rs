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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "bfleet",
    version,
    about = "Fleet command and control over SSH",
    long_about = "bfleet runs named tasks and ad-hoc commands on hosts, groups and roles\ndeclared in YAML fleet files. Hosts may be reached through gateway (jump) hosts,\nand tasks may escalate with sudo.",
    after_help = "EXAMPLES:\n  List the fleet:                 bfleet -f 'fleet/*' list\n  Run a role task on every host:  bfleet -f 'fleet/*' run web.restart\n  Run a command on a group:       bfleet -f 'fleet/*' exec prod/web uptime"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short = 'c',
        long,
        help = "Configuration file path [default: $XDG_CONFIG_HOME/bfleet/config.yaml]"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'f',
        long = "fleet",
        help = "Fleet file pattern; may be repeated. A trailing '*' implies .yaml,\na leading '-' excludes files ending with the rest of the pattern"
    )]
    pub fleet: Vec<String>,

    #[arg(short = 'u', long, help = "Default username for SSH connections")]
    pub user: Option<String>,

    #[arg(short = 'p', long, help = "SSH port for every host")]
    pub port: Option<u16>,

    #[arg(short = 'i', long, help = "SSH private key file path")]
    pub identity: Option<PathBuf>,

    #[arg(short = 'A', long, help = "Use SSH agent for authentication")]
    pub use_agent: bool,

    #[arg(
        short = 'v',
        long,
        action = clap::ArgAction::Count,
        help = "Verbose mode (-v, -vv, -vvv)"
    )]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Describe gateways, hosts, groups, roles and tasks")]
    List,

    #[command(about = "Run a task: SCOPE.TASK on a role, group or host, or a bare TASK unbound")]
    Run {
        #[arg(help = "Task target, e.g. web.restart or prod/web.deploy")]
        target: String,

        #[arg(trailing_var_arg = true, help = "Arguments passed to the task")]
        args: Vec<String>,
    },

    #[command(about = "Execute a command on a host or every host of a group or role")]
    Exec {
        #[arg(help = "Host, group or role name")]
        name: String,

        #[arg(trailing_var_arg = true, required = true, help = "Command to execute")]
        command: Vec<String>,
    },
}

impl Cli {
    /// `(scope, task)` for a `run` target: `web.restart` splits at the
    /// last dot, a bare name has no scope.
    pub fn split_target(target: &str) -> (Option<&str>, &str) {
        match target.rsplit_once('.') {
            Some((scope, task)) if !scope.is_empty() => (Some(scope), task),
            _ => (None, target),
        }
    }
}
