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

use bfleet::commands::run::run_target;
use bfleet::transport::mock::{MockReply, MockTransport};
use bfleet::{task_body, BroadcastPolicy, Entity, ExecOptions, FleetError, Orchestrator};
use std::sync::Arc;

fn fleet() -> (MockTransport, Orchestrator) {
    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    (transport, orch)
}

fn exec_task(command: &'static str) -> bfleet::TaskBody {
    task_body(move |ctx| async move {
        let host = Arc::clone(ctx.host()?);
        Ok(host.exec(command, ExecOptions::new()).await?)
    })
}

fn constant(text: &'static str) -> bfleet::TaskBody {
    task_body(move |_ctx| async move { Ok(text.to_string()) })
}

#[tokio::test]
async fn test_host_override_does_not_leak() {
    let (_transport, orch) = fleet();
    orch.define_task("deploy", constant("global"));
    let a = orch.host("a");
    let b = orch.host("b");

    a.define_task("deploy", constant("local"));

    assert_eq!(a.call("deploy", &[]).await.unwrap(), "local");
    assert_eq!(b.call("deploy", &[]).await.unwrap(), "global");
    assert_eq!(orch.task("deploy").run(None, &[]).await.unwrap(), "global");
}

#[tokio::test]
async fn test_role_override_shadows_global() {
    let (_transport, orch) = fleet();
    orch.define_task("status", constant("global"));
    let role = orch.role("web");
    role.define_task("status", constant("web"));

    let host = orch.host("web1");
    host.role("web").unwrap();
    let proxy = host.role_proxy("web").unwrap();
    assert_eq!(proxy.call("status", &[]).await.unwrap(), "web");
    assert_eq!(host.call("status", &[]).await.unwrap(), "global");
}

#[tokio::test]
async fn test_broadcast_runs_on_every_member() {
    let (transport, orch) = fleet();
    let role = orch.role("web");
    role.define_task("restart", exec_task("systemctl restart app"));
    for name in ["a", "b", "c"] {
        orch.host(name).role("web").unwrap();
    }
    orch.host("db");

    let outcomes = role
        .broadcast("restart", &[], BroadcastPolicy::Continue)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));

    let hosts: Vec<String> = transport.requests().into_iter().map(|r| r.host).collect();
    assert_eq!(hosts, vec!["a", "b", "c"]);
    assert!(transport.commands_for("db").is_empty());
}

#[tokio::test]
async fn test_broadcast_policies() {
    let (transport, orch) = fleet();
    transport.respond_with("check-health", |req| {
        if req.host == "a" {
            MockReply::status(1, "", "unhealthy\n")
        } else {
            MockReply::ok("healthy")
        }
    });
    let role = orch.role("web");
    role.define_task("check", exec_task("check-health"));
    for name in ["a", "b"] {
        orch.host(name).role("web").unwrap();
    }

    let outcomes = role
        .broadcast("check", &[], BroadcastPolicy::Continue)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.is_err());
    assert_eq!(outcomes[1].result.as_deref().unwrap(), "healthy");

    let outcomes = role
        .broadcast("check", &[], BroadcastPolicy::FailFast)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].host.name(), "a");

    let missing = role.broadcast("nope", &[], BroadcastPolicy::Continue).await;
    assert!(matches!(missing, Err(FleetError::TaskNotFound { .. })));
}

#[tokio::test]
async fn test_run_target_dispatches_role_task_in_order() {
    let (transport, orch) = fleet();
    orch.role("web")
        .define_task("restart", exec_task("systemctl restart app"));
    orch.host("a").role("web").unwrap();
    orch.host("b").role("web").unwrap();

    assert!(run_target(&orch, "web.restart", &[]).await.unwrap());
    let hosts: Vec<String> = transport.requests().into_iter().map(|r| r.host).collect();
    assert_eq!(hosts, vec!["a", "b"]);
}

#[tokio::test]
async fn test_run_target_on_group_path() {
    let (transport, orch) = fleet();
    orch.define_task("uptime", exec_task("uptime"));
    let web = orch.group_path("prod/web").unwrap();
    web.add_host(&orch.host("w1"));
    orch.group("prod").add_host(&orch.host("p1"));

    assert!(run_target(&orch, "prod/web.uptime", &[]).await.unwrap());
    assert_eq!(transport.commands_for("w1").len(), 1);
    assert!(transport.commands_for("p1").is_empty());

    assert!(run_target(&orch, "prod.uptime", &[]).await.unwrap());
    assert_eq!(transport.commands_for("p1").len(), 1);
    assert_eq!(transport.commands_for("w1").len(), 2);
}

#[tokio::test]
async fn test_run_target_reports_failure() {
    let (transport, orch) = fleet();
    transport.respond("false", MockReply::status(1, "", ""));
    orch.host("a").define_task("check", exec_task("false"));

    assert!(!run_target(&orch, "a.check", &[]).await.unwrap());
    assert!(run_target(&orch, "ghost.check", &[]).await.is_err());
}

#[test]
fn test_group_membership_is_idempotent() {
    let (_transport, orch) = fleet();
    let group = orch.group("prod");
    let host = orch.host("web1");

    group.add_host(&host);
    group.add_host(&host);
    host.join(&group);
    assert_eq!(group.direct_hosts().len(), 1);

    let names: Vec<String> = host.groups().iter().map(|g| g.path()).collect();
    assert_eq!(names, vec!["prod"]);

    assert!(group.remove_host("web1"));
    assert!(host.groups().is_empty());
}

#[test]
fn test_role_proxy_requires_membership() {
    let (_transport, orch) = fleet();
    let host = orch.host("db1");
    host.role("db").unwrap();

    let first = host.role_proxy("db").unwrap();
    let second = host.role_proxy("db").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.role().name(), "db");
    assert!(matches!(
        host.role_proxy("web"),
        Err(FleetError::NameResolution { .. })
    ));
}

#[tokio::test]
async fn test_role_proxy_binds_host() {
    let (_transport, orch) = fleet();
    orch.role("db").define_task(
        "backup",
        task_body(|ctx| async move { Ok(format!("backup on {}", ctx.host()?.name())) }),
    );
    let host = orch.host("db1");
    host.role("db").unwrap();

    let output = host.run("db", "backup", &[]).await.unwrap();
    assert_eq!(output, "backup on db1");
}

#[tokio::test]
async fn test_run_command_falls_back_to_literal_command() {
    let (transport, orch) = fleet();
    let host = orch.host("web1");
    host.define_task("greet", constant("hello"));

    let output = host
        .run_command("greet", &[], ExecOptions::new())
        .await
        .unwrap();
    assert_eq!(output, "hello");
    assert!(transport.requests().is_empty());

    host.run_command("ls", &["-la", "my dir"], ExecOptions::new())
        .await
        .unwrap();
    let command = transport.commands_for("web1").pop().unwrap();
    assert!(command.contains("ls -la \"my dir\""));
}

#[tokio::test]
async fn test_unbound_task_needs_host() {
    let (_transport, orch) = fleet();
    orch.define_task("restart", exec_task("systemctl restart app"));

    let err = orch.task("restart").run(None, &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FleetError>(),
        Some(FleetError::UnboundTask { .. })
    ));
    assert!(matches!(orch.resolve("restart"), Ok(Entity::Task(_))));
}

#[tokio::test]
async fn test_role_ignores_undeclared_global_task() {
    let (transport, orch) = fleet();
    orch.define_task("restart", exec_task("systemctl restart app"));
    let role = orch.role("web");
    let host = orch.host("a");
    host.role("web").unwrap();
    orch.host("b").role("web").unwrap();

    let err = role.call("restart", &[]).await.unwrap_err();
    assert!(matches!(err, FleetError::TaskNotFound { .. }));
    let err = host.run("web", "restart", &[]).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<FleetError>(),
        Some(FleetError::TaskNotFound { .. })
    ));
    assert!(transport.requests().is_empty());

    role.task("restart").unwrap();
    let outcomes = role.call("restart", &[]).await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.result.is_ok()));
}
