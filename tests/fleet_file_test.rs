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

use bfleet::transport::mock::{MockReply, MockTransport};
use bfleet::{Entity, FleetError, Orchestrator};
use std::path::Path;
use std::sync::Arc;

const BASE: &str = r#"
gateways:
  bastion:
    user: jump
hosts:
  web1:
    user: deploy
    gateway: bastion
    roles: [web]
  web2:
    gateway: bastion
    roles: [web]
    env:
      app_env: staging
groups:
  prod:
    groups:
      web:
        hosts: [web1, web2]
tasks:
  uptime:
    - uptime
"#;

const ROLES: &str = r#"
roles:
  web:
    tasks:
      deploy:
        - run: ./deploy.sh $1
          cd: /srv/app
        - task: uptime
"#;

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

#[tokio::test]
async fn test_load_fleet_files_in_order() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "10-base.yaml", BASE);
    write(dir.path(), "20-roles.yaml", ROLES);
    write(dir.path(), "30-broken.yaml", "hosts: [this is not a map");

    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    let pattern = format!("{}/*", dir.path().display());
    let files = orch.load(&[pattern.as_str(), "-broken.yaml"]).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("10-base.yaml"));

    let names: Vec<String> = orch.hosts().iter().map(|h| h.name().to_string()).collect();
    assert_eq!(names, vec!["web1", "web2"]);
    let web1 = orch.host("web1");
    assert_eq!(web1.user(), "deploy");
    assert_eq!(web1.gateway().unwrap().name(), "bastion");
    assert_eq!(orch.gateway("bastion").host().user(), "jump");
    assert_eq!(orch.host("web2").env("app_env").as_deref(), Some("staging"));

    let hosts = orch.hosts_for("prod/web").unwrap();
    assert_eq!(hosts.len(), 2);
    assert!(matches!(orch.resolve("web"), Ok(Entity::Role(_))));
    assert!(matches!(orch.resolve("uptime"), Ok(Entity::Task(_))));
}

#[tokio::test]
async fn test_scripted_role_task_runs_steps() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "10-base.yaml", BASE);
    write(dir.path(), "20-roles.yaml", ROLES);

    let transport = MockTransport::new();
    transport.respond("stat -c", MockReply::ok("directory"));
    transport.respond("uptime", MockReply::ok("up 3 days"));
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    orch.load(&[format!("{}/*", dir.path().display())])
        .await
        .unwrap();

    let output = orch.host("web1").run("web", "deploy", &["v2"]).await.unwrap();
    assert_eq!(output, "up 3 days");

    let commands = transport.commands_for("web1");
    assert!(commands
        .iter()
        .any(|c| c == "cd /srv/app; set -- v2; ./deploy.sh $1; echo $?; "));
    assert_eq!(transport.tunnels_opened(), 1);
}

#[tokio::test]
async fn test_parse_error_names_file() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad.yaml", "hosts:\n  web1:\n    colour: blue\n");

    let orch = Orchestrator::new(Arc::new(MockTransport::new()));
    let err = orch
        .load(&[format!("{}/*", dir.path().display())])
        .await
        .unwrap_err();
    match err {
        FleetError::Script { path, .. } => assert!(path.ends_with("bad.yaml")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_later_files_override_earlier() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "10-base.yaml", BASE);
    write(dir.path(), "20-override.yaml", "hosts:\n  web1:\n    user: admin\n");

    let orch = Orchestrator::new(Arc::new(MockTransport::new()));
    orch.load(&[format!("{}/*", dir.path().display())])
        .await
        .unwrap();
    let web1 = orch.host("web1");
    assert_eq!(web1.user(), "admin");
    assert!(web1.has_role("web"));
    assert_eq!(web1.gateway().unwrap().name(), "bastion");
}
