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

//! Scripted in-memory transport.
//!
//! Replies are chosen by substring match on the full wrapped command line,
//! newest rule first. Each channel waits for its input side to reach EOF
//! (or close) before answering, so stdin and sudo passwords can be
//! inspected in the recorded [`MockRequest`].

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::{ChannelEvent, Connection, ExecChannel, InputCommand, Transport, Tunnel};
use crate::error::{FleetError, Result};

/// A command as the mock saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub host: String,
    pub user: String,
    pub command: String,
    pub stdin: String,
}

/// What the mock sends back for a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockReply {
    /// Raw stdout chunks, sent as separate data events
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl MockReply {
    /// Chunks sent verbatim; nothing is appended.
    pub fn raw<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stdout: chunks.into_iter().map(Into::into).collect(),
            stderr: Vec::new(),
        }
    }

    /// Output followed by a zero status marker.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::status(0, stdout, "")
    }

    /// Output, stderr and a status marker the way the remote shell emits them.
    pub fn status(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        let stdout = stdout.into();
        let stderr = stderr.into();
        let mut chunks = Vec::new();
        if !stdout.is_empty() {
            chunks.push(stdout);
        }
        chunks.push(format!("{code}\n"));
        Self {
            stdout: chunks,
            stderr: if stderr.is_empty() {
                Vec::new()
            } else {
                vec![stderr]
            },
        }
    }
}

type Responder = Arc<dyn Fn(&MockRequest) -> MockReply + Send + Sync>;

#[derive(Default)]
struct MockState {
    rules: Mutex<Vec<(String, Responder)>>,
    requests: Mutex<Vec<MockRequest>>,
    connects: Mutex<Vec<(String, Option<String>)>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
    tunnels_opened: AtomicUsize,
    tunnel_delay: Mutex<Duration>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory [`Transport`] with scripted replies and full call recording.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with a fixed reply.
    pub fn respond(&self, pattern: impl Into<String>, reply: MockReply) -> &Self {
        self.respond_with(pattern, move |_| reply.clone())
    }

    /// Answer commands containing `pattern` by calling `f`.
    pub fn respond_with<F>(&self, pattern: impl Into<String>, f: F) -> &Self
    where
        F: Fn(&MockRequest) -> MockReply + Send + Sync + 'static,
    {
        lock(&self.state.rules).push((pattern.into(), Arc::new(f)));
        self
    }

    /// Delay tunnel construction, widening any race between requesters.
    pub fn set_tunnel_delay(&self, delay: Duration) {
        *lock(&self.state.tunnel_delay) = delay;
    }

    pub fn requests(&self) -> Vec<MockRequest> {
        lock(&self.state.requests).clone()
    }

    /// Wrapped command lines sent to `host`, in order.
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        lock(&self.state.requests)
            .iter()
            .filter(|r| r.host == host)
            .map(|r| r.command.clone())
            .collect()
    }

    /// `(host, gateway)` for every connection opened.
    pub fn connects(&self) -> Vec<(String, Option<String>)> {
        lock(&self.state.connects).clone()
    }

    pub fn tunnels_opened(&self) -> usize {
        self.state.tunnels_opened.load(Ordering::SeqCst)
    }

    /// Place a file on a mock host.
    pub fn put_file(&self, host: &str, remote: &str, contents: impl Into<Vec<u8>>) {
        lock(&self.state.files).insert((host.to_string(), remote.to_string()), contents.into());
    }

    /// Contents of a file uploaded to a mock host.
    pub fn file(&self, host: &str, remote: &str) -> Option<Vec<u8>> {
        lock(&self.state.files)
            .get(&(host.to_string(), remote.to_string()))
            .cloned()
    }

    fn connection(&self, host: &str, user: &str, via: Option<&str>) -> Arc<dyn Connection> {
        lock(&self.state.connects).push((host.to_string(), via.map(str::to_string)));
        Arc::new(MockConnection {
            host: host.to_string(),
            user: user.to_string(),
            closed: AtomicBool::new(false),
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>> {
        Ok(self.connection(host, user, None))
    }

    async fn open_tunnel(&self, gateway: &str, _user: &str) -> Result<Arc<dyn Tunnel>> {
        let delay = *lock(&self.state.tunnel_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.state.tunnels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTunnel {
            gateway: gateway.to_string(),
            transport: self.clone(),
        }))
    }
}

struct MockTunnel {
    gateway: String,
    transport: MockTransport,
}

#[async_trait]
impl Tunnel for MockTunnel {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn Connection>> {
        Ok(self.transport.connection(host, user, Some(&self.gateway)))
    }
}

struct MockConnection {
    host: String,
    user: String,
    closed: AtomicBool,
    state: Arc<MockState>,
}

#[async_trait]
impl Connection for MockConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn open_channel(&self, command: &str) -> Result<ExecChannel> {
        let (channel, mut endpoint) = ExecChannel::pair(self.host.clone());
        let mut request = MockRequest {
            host: self.host.clone(),
            user: self.user.clone(),
            command: command.to_string(),
            stdin: String::new(),
        };
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let mut killed = false;
            while let Some(input) = endpoint.input.recv().await {
                match input {
                    InputCommand::Data(data) => {
                        request.stdin.push_str(&String::from_utf8_lossy(&data))
                    }
                    InputCommand::Eof => break,
                    InputCommand::Close => {
                        killed = true;
                        break;
                    }
                }
            }

            let responder = lock(&state.rules)
                .iter()
                .rev()
                .find(|(pattern, _)| request.command.contains(pattern.as_str()))
                .map(|(_, responder)| Arc::clone(responder));
            let reply = match responder {
                Some(responder) => responder(&request),
                None => MockReply::ok(""),
            };
            lock(&state.requests).push(request);

            if killed {
                return;
            }
            for chunk in reply.stderr {
                let event = ChannelEvent::ExtendedData {
                    ext: 1,
                    data: chunk.into_bytes(),
                };
                if endpoint.events.send(event).await.is_err() {
                    return;
                }
            }
            for chunk in reply.stdout {
                if endpoint
                    .events
                    .send(ChannelEvent::Data(chunk.into_bytes()))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = endpoint.events.send(ChannelEvent::Eof).await;
        });

        Ok(channel)
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let contents = tokio::fs::read(local).await?;
        lock(&self.state.files).insert((self.host.clone(), remote.to_string()), contents);
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<()> {
        let contents = lock(&self.state.files)
            .get(&(self.host.clone(), remote.to_string()))
            .cloned()
            .ok_or_else(|| FleetError::transfer(&self.host, format!("{remote}: no such file")))?;
        tokio::fs::write(local, contents).await?;
        Ok(())
    }
}
