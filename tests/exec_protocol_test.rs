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

use bfleet::log::Severity;
use bfleet::transport::mock::{MockReply, MockTransport};
use bfleet::{ExecOptions, FleetError, Orchestrator};
use std::sync::{Arc, Mutex};

fn fleet() -> (MockTransport, Orchestrator) {
    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    (transport, orch)
}

#[tokio::test]
async fn test_output_split_across_chunks() {
    let (transport, orch) = fleet();
    transport.respond("print-parts", MockReply::raw(["part1", "part2", "0\n"]));

    let host = orch.host("web1");
    let output = host.exec("print-parts", ExecOptions::new()).await.unwrap();
    assert_eq!(output, "part1part2");
}

#[tokio::test]
async fn test_digits_before_more_output_are_not_a_status() {
    let (transport, orch) = fleet();
    transport.respond("count", MockReply::raw(["42\n", "done\n", "0\n"]));

    let output = orch
        .host("web1")
        .exec_output("count", ExecOptions::new())
        .await
        .unwrap();
    assert_eq!(output.stdout, "42\ndone\n");
    assert_eq!(output.status, Some(0));
}

#[tokio::test]
async fn test_non_zero_status_is_command_failure() {
    let (transport, orch) = fleet();
    transport.respond("frobnicate", MockReply::status(127, "", "frobnicate: not found\n"));

    let err = orch
        .host("web1")
        .exec("frobnicate", ExecOptions::new())
        .await
        .unwrap_err();
    match err {
        FleetError::CommandFailure {
            host,
            command,
            code,
            stderr,
            ..
        } => {
            assert_eq!(host, "web1");
            assert_eq!(command, "frobnicate");
            assert_eq!(code, 127);
            assert!(stderr.contains("not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_unchecked_reports_status() {
    let (transport, orch) = fleet();
    transport.respond("grep", MockReply::status(1, "", ""));

    let output = orch
        .host("web1")
        .exec_output("grep -q x /etc/hosts", ExecOptions::new().unchecked())
        .await
        .unwrap();
    assert_eq!(output.status, Some(1));
    assert!(!output.success());
}

#[tokio::test]
async fn test_missing_marker_is_protocol_error() {
    let (transport, orch) = fleet();
    transport.respond("hello", MockReply::raw(["hello\n"]));

    let err = orch
        .host("web1")
        .exec("hello", ExecOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FleetError::Protocol { .. }));
}

#[tokio::test]
async fn test_command_carries_cwd_and_env() {
    let (transport, orch) = fleet();
    let host = orch.host("web1");
    host.set_env("rails_env", "production");
    host.cd(Some("/srv")).await.unwrap_err();

    transport.respond("stat -c", MockReply::ok("directory"));
    host.cd(Some("/srv")).await.unwrap();
    host.exec("rake db:migrate", ExecOptions::new()).await.unwrap();

    let last = transport.commands_for("web1").pop().unwrap();
    assert_eq!(last, "cd /srv; RAILS_ENV=production rake db:migrate; echo $?; ");
}

#[tokio::test]
async fn test_sudo_wraps_command_and_feeds_password() {
    let (transport, orch) = fleet();
    let host = orch.host("db1");
    host.set_password(Some("s3cret"));

    {
        let _root = host.as_user("root");
        host.exec("whoami", ExecOptions::new().stdin("payload"))
            .await
            .unwrap();
    }
    host.exec("whoami", ExecOptions::new()).await.unwrap();

    let requests = transport.requests();
    assert!(requests[0].command.starts_with("sudo -S -u root bash -c "));
    assert_eq!(requests[0].stdin, "s3cret\npayload");
    assert!(requests[1].command.starts_with("cd ; whoami"));
    assert_eq!(requests[1].stdin, "");
}

#[tokio::test]
async fn test_sudo_failure_is_logged() {
    let (transport, orch) = fleet();
    transport.respond("whoami", MockReply::status(1, "", "Sorry, try again.\n"));
    let host = orch.host("db1");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    host.on_log(move |m| sink.lock().unwrap().push(m.severity));

    let _root = host.as_user("root");
    let err = host.exec("whoami", ExecOptions::new()).await.unwrap_err();
    assert_eq!(err.exit_code(), Some(1));
    assert!(seen.lock().unwrap().contains(&Severity::Warn));
}

#[tokio::test]
async fn test_exec_with_drives_stdin() {
    let (transport, orch) = fleet();
    transport.respond_with("cat", |req| MockReply::ok(req.stdin.clone()));

    let output = orch
        .host("web1")
        .exec_with("cat", ExecOptions::new().stdin("first\n"), |input| async move {
            input.send("second\n")?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .unwrap();
    assert_eq!(output, "first\nsecond");
}

#[tokio::test]
async fn test_exec_with_body_error_propagates() {
    let (_transport, orch) = fleet();
    let err = orch
        .host("web1")
        .exec_with("cat", ExecOptions::new(), |_input| async move {
            Err::<(), _>(anyhow::anyhow!("gave up"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "gave up");
}

#[tokio::test]
async fn test_echo_and_callbacks() {
    let (transport, orch) = fleet();
    transport.respond("report", MockReply::status(0, "a\nb\n", "careful\n"));
    let host = orch.host("web1");

    let logged = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&logged);
    host.on_log(move |m| sink.lock().unwrap().push((m.severity, m.text.clone())));

    let streamed = Arc::new(Mutex::new(String::new()));
    let out = Arc::clone(&streamed);
    host.exec(
        "report",
        ExecOptions::new()
            .echo()
            .on_stdout(move |s| out.lock().unwrap().push_str(s)),
    )
    .await
    .unwrap();

    assert_eq!(*streamed.lock().unwrap(), "a\nb\n");
    let logged = logged.lock().unwrap();
    assert!(logged.contains(&(Severity::Stderr, "careful".to_string())));
    assert!(logged.contains(&(Severity::Info, "a".to_string())));
    assert!(logged.contains(&(Severity::Info, "b".to_string())));
}

#[tokio::test]
async fn test_reconnects_when_user_changes() {
    let (transport, orch) = fleet();
    let host = orch.host("web1");
    host.exec("true", ExecOptions::new()).await.unwrap();
    host.exec("true", ExecOptions::new()).await.unwrap();
    assert_eq!(transport.connects().len(), 1);

    host.set_user("deploy");
    host.exec("true", ExecOptions::new()).await.unwrap();
    assert_eq!(transport.connects().len(), 2);
    assert_eq!(transport.requests()[2].user, "deploy");
}
