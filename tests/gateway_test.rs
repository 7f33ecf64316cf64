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

use bfleet::transport::mock::MockTransport;
use bfleet::{ExecOptions, Orchestrator};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_hosts_share_one_tunnel() {
    let transport = MockTransport::new();
    transport.set_tunnel_delay(Duration::from_millis(50));
    let orch = Orchestrator::new(Arc::new(transport.clone()));

    let gateway = orch.gateway("bastion");
    gateway.host().set_user("jump");
    let hosts: Vec<_> = (0..12)
        .map(|i| {
            let host = orch.host(&format!("node{i}"));
            host.set_gateway(Some(Arc::clone(&gateway)));
            host
        })
        .collect();

    let results = join_all(hosts.iter().map(|h| h.exec("hostname", ExecOptions::new()))).await;
    assert!(results.iter().all(Result::is_ok));

    assert_eq!(transport.tunnels_opened(), 1);
    assert!(gateway.is_open().await);
    let connects = transport.connects();
    assert_eq!(connects.len(), 12);
    assert!(connects
        .iter()
        .all(|(_, via)| via.as_deref() == Some("bastion")));
}

#[tokio::test]
async fn test_concurrent_requesters_get_identical_tunnel() {
    let transport = MockTransport::new();
    transport.set_tunnel_delay(Duration::from_millis(50));
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    let gateway = orch.gateway("bastion");

    let requests = (0..16).map(|_| {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move { gateway.gateway_tunnel().await })
    });
    let tunnels: Vec<_> = join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(tunnels.len(), 16);
    assert!(tunnels.iter().all(|t| Arc::ptr_eq(t, &tunnels[0])));
    assert_eq!(transport.tunnels_opened(), 1);

    let later = orch.host("node1");
    later.set_gateway(Some(Arc::clone(&gateway)));
    let via_host = later.tunnel().await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&via_host, &tunnels[0]));
}

#[tokio::test]
async fn test_gateway_is_registered_once() {
    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport));

    let first = orch.gateway("bastion");
    let second = orch.gateway("bastion");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.host().is_gateway());
    assert!(orch.hosts().is_empty());
    assert_eq!(orch.gateways().len(), 1);
}

#[tokio::test]
async fn test_gateway_host_connects_directly() {
    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    let gateway = orch.gateway("bastion");

    gateway.host().set_gateway(Some(Arc::clone(&gateway)));
    assert!(gateway.host().gateway().is_none());

    gateway
        .host()
        .exec("uptime", ExecOptions::new())
        .await
        .unwrap();
    assert_eq!(transport.tunnels_opened(), 0);
    assert_eq!(transport.connects(), vec![("bastion".to_string(), None)]);
}

#[tokio::test]
async fn test_switching_gateway_reconnects() {
    let transport = MockTransport::new();
    let orch = Orchestrator::new(Arc::new(transport.clone()));
    let host = orch.host("node1");

    host.exec("true", ExecOptions::new()).await.unwrap();
    host.set_gateway(Some(orch.gateway("bastion")));
    host.exec("true", ExecOptions::new()).await.unwrap();

    assert_eq!(
        transport.connects(),
        vec![
            ("node1".to_string(), None),
            ("node1".to_string(), Some("bastion".to_string())),
        ]
    );
}
