//! Cycle-scoped protocol session

use cdp_types::domains::heap_profiler::methods;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};
use crate::event_bus::EventStream;
use crate::transport::Transport;

/// Unique identifier for a protocol session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new unique session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a protocol session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, `enable` not sent yet
    Open,
    /// `enable` succeeded; mode commands may be sent
    Enabled,
    /// `disable` was sent; the session is finished
    Disabled,
}

/// One enable/disable bracket over a transport
///
/// The session is created at the start of a profiling cycle and dropped at
/// its end. Only the owner toggles `enable`/`disable`; instrumentation modes
/// receive a shared reference and can only [`send`](Self::send) commands,
/// which are refused unless the session is enabled.
pub struct ProtocolSession {
    /// Unique session ID
    id: SessionId,
    /// Connection to the endpoint
    transport: Arc<dyn Transport>,
    /// Current state
    state: RwLock<SessionState>,
    /// Optional bound on every round trip
    command_timeout: Option<Duration>,
}

impl ProtocolSession {
    /// Open a session over `transport` with no command timeout
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            id: SessionId::new(),
            transport,
            state: RwLock::new(SessionState::Open),
            command_timeout: None,
        }
    }

    /// Bound each command round trip by `timeout`
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Get session ID
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether mode commands may be sent
    pub fn is_enabled(&self) -> bool {
        self.state() == SessionState::Enabled
    }

    /// Send `HeapProfiler.enable`
    pub async fn enable(&self) -> Result<()> {
        self.call(methods::ENABLE, None).await?;
        *self.state.write() = SessionState::Enabled;
        info!(session_id = %self.id, "Heap profiler session enabled");
        Ok(())
    }

    /// Send `HeapProfiler.disable`
    ///
    /// The session counts as finished afterwards even if the endpoint
    /// rejected the command.
    pub async fn disable(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(ProtocolError::NotEnabled(methods::DISABLE.to_string()));
        }

        let result = self.call(methods::DISABLE, None).await;
        *self.state.write() = SessionState::Disabled;
        info!(session_id = %self.id, "Heap profiler session disabled");
        result.map(|_| ())
    }

    /// Send a mode command and wait for its reply
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_enabled() {
            return Err(ProtocolError::NotEnabled(method.to_string()));
        }
        self.call(method, params).await
    }

    /// Send a mode command with typed params
    pub async fn send_with<P: Serialize>(&self, method: &str, params: &P) -> Result<Value> {
        let params = serde_json::to_value(params)?;
        self.send(method, Some(params)).await
    }

    /// Subscribe to events named `event`
    pub fn subscribe(&self, event: &str) -> EventStream {
        self.transport.subscribe(event)
    }

    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value> {
        debug!(session_id = %self.id, "-> {}", method);
        let reply = with_timeout(
            method,
            self.command_timeout,
            self.transport.send(method, params),
        )
        .await;
        match &reply {
            Ok(_) => debug!(session_id = %self.id, "<- {}", method),
            Err(e) => debug!(session_id = %self.id, "<- {} failed: {}", method, e),
        }
        reply
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

async fn with_timeout<F>(method: &str, timeout: Option<Duration>, fut: F) -> Result<Value>
where
    F: Future<Output = Result<Value>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ProtocolError::Timeout {
                method: method.to_string(),
                timeout,
            })?,
        None => fut.await,
    }
}
