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

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::sync::Arc;

use bfleet::{
    cli::{Cli, Commands},
    commands::{exec::exec_on, list::list_fleet, run::run_target},
    config::{expand_tilde, FleetConfig},
    log::{LogMessage, Severity},
    security::sudo_password_from_env,
    ssh::SshTransport,
    utils::init_logging,
    Host, Orchestrator,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = FleetConfig::load_with_priority(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;

    let mut options = config.ssh_options();
    if let Some(port) = cli.port {
        options.port = port;
    }
    if let Some(identity) = &cli.identity {
        options.identity_file = Some(expand_tilde(identity));
    }
    if cli.use_agent {
        options.use_agent = true;
    }

    let orch = Orchestrator::new(Arc::new(SshTransport::new(options)));
    if let Some(user) = cli.user.as_ref().or(config.defaults.user.as_ref()) {
        orch.set_default_user(user.clone());
    }

    let patterns = if cli.fleet.is_empty() {
        config.fleet.clone()
    } else {
        cli.fleet.clone()
    };
    let files = orch
        .load(&patterns)
        .await
        .context("Failed to load fleet files")?;
    tracing::debug!("Loaded {} fleet file(s)", files.len());

    let sudo_password = sudo_password_from_env()?;
    let show_debug = cli.verbose > 0;
    let all_hosts = orch
        .hosts()
        .into_iter()
        .chain(orch.gateways().into_iter().map(|g| Arc::clone(g.host())));
    for host in all_hosts {
        if let Some(password) = &sudo_password {
            if !host.has_password() {
                host.set_sudo_password(Some(password.clone()));
            }
        }
        attach_printer(&host, show_debug);
    }

    let success = match cli.command {
        Commands::List => {
            list_fleet(&orch);
            true
        }
        Commands::Run { target, args } => run_target(&orch, &target, &args).await?,
        Commands::Exec { name, command } => exec_on(&orch, &name, &command.join(" ")).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Print host log lines to the terminal prefixed with the host name.
fn attach_printer(host: &Arc<Host>, show_debug: bool) {
    let name = host.name().to_string();
    host.on_log(move |message: &LogMessage| {
        let prefix = format!("[{name}]");
        match message.severity {
            Severity::Debug if !show_debug => {}
            Severity::Debug => println!("{} {}", prefix.dimmed(), message.text.dimmed()),
            Severity::Info => println!("{} {}", prefix.cyan(), message.text),
            Severity::Stderr => eprintln!("{} {}", prefix.cyan(), message.text.red()),
            Severity::Warn => eprintln!("{} {}", prefix.yellow(), message.text.yellow()),
            Severity::Error => eprintln!("{} {}", prefix.red(), message.text.red().bold()),
        }
    });
}
