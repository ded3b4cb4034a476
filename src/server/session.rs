//! Session management
//!
//! Sessions are created on every successful `initialize` and keyed by an
//! opaque visible-ASCII id. HTTP-family transports carry the id in the
//! `Mcp-Session-Id` header; single-connection transports bind one session
//! per connection, and stdio has exactly one implicit session per process.
//!
//! Handler-visible accessors are read-only; the negotiated protocol
//! version is immutable after initialize.

use std::collections::HashMap;
use std::sync::RwLock as StdRwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use std::sync::Arc;

use crate::core::logging::LoggingLevel;
use crate::protocol::types::{ClientCapabilities, ClientInfo};
use crate::protocol::version::ProtocolVersion;

/// Default idle window after which transports may evict a session
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(300);

/// Sampling support negotiated from the client's capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplingCapabilities {
    /// Whether the client accepts `sampling/createMessage` at all
    pub supported: bool,
    /// Text completion support
    pub text: bool,
    /// Image completion support
    pub image: bool,
    /// Audio completion support
    pub audio: bool,
}

impl SamplingCapabilities {
    fn from_client(capabilities: &ClientCapabilities) -> Self {
        match &capabilities.sampling {
            Some(sampling) => Self {
                supported: true,
                text: sampling.text.unwrap_or(true),
                image: sampling.image.unwrap_or(false),
                audio: sampling.audio.unwrap_or(false),
            },
            None => Self::default(),
        }
    }
}

/// Per-client session state
#[derive(Debug)]
pub struct Session {
    id: String,
    protocol_version: ProtocolVersion,
    client_name: String,
    client_version: String,
    client_env: HashMap<String, String>,
    workspace_roots: StdRwLock<Vec<String>>,
    sampling: SamplingCapabilities,
    roots_list_changed: bool,
    initialized: AtomicBool,
    logging_level: StdRwLock<LoggingLevel>,
    created_at: SystemTime,
    last_seen: StdRwLock<Instant>,
}

impl Session {
    fn new(
        id: String,
        protocol_version: ProtocolVersion,
        client_info: &ClientInfo,
        capabilities: &ClientCapabilities,
        client_env: HashMap<String, String>,
    ) -> Self {
        let initial_roots = client_info
            .roots
            .as_ref()
            .map(|roots| {
                roots
                    .iter()
                    .filter_map(|r| crate::utils::uri::root_uri_to_path(&r.uri).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id,
            protocol_version,
            client_name: client_info.name.clone(),
            client_version: client_info.version.clone(),
            client_env,
            workspace_roots: StdRwLock::new(initial_roots),
            sampling: SamplingCapabilities::from_client(capabilities),
            roots_list_changed: capabilities
                .roots
                .as_ref()
                .and_then(|r| r.list_changed)
                .unwrap_or(false),
            initialized: AtomicBool::new(false),
            logging_level: StdRwLock::new(LoggingLevel::default()),
            created_at: SystemTime::now(),
            last_seen: StdRwLock::new(Instant::now()),
        }
    }

    /// Opaque session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Protocol version negotiated at initialize
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    /// Client implementation name
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    /// Client implementation version
    pub fn client_version(&self) -> &str {
        &self.client_version
    }

    /// Environment variables captured at session creation
    pub fn client_env(&self) -> &HashMap<String, String> {
        &self.client_env
    }

    /// Workspace roots, as decoded filesystem paths
    pub fn workspace_roots(&self) -> Vec<String> {
        self.workspace_roots.read().expect("roots lock").clone()
    }

    /// Sampling capabilities advertised by the client
    pub fn sampling_capabilities(&self) -> SamplingCapabilities {
        self.sampling
    }

    /// Whether the client advertised `capabilities.roots.listChanged`
    pub fn supports_roots_listing(&self) -> bool {
        self.roots_list_changed
    }

    /// Whether `notifications/initialized` has been received
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Session creation time
    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Current MCP logging threshold for this session
    pub fn logging_level(&self) -> LoggingLevel {
        *self.logging_level.read().expect("level lock")
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    pub(crate) fn set_logging_level(&self, level: LoggingLevel) {
        *self.logging_level.write().expect("level lock") = level;
    }

    pub(crate) fn merge_roots(&self, roots: Vec<String>) {
        let mut current = self.workspace_roots.write().expect("roots lock");
        for root in roots {
            if !current.contains(&root) {
                current.push(root);
            }
        }
    }

    fn touch(&self) {
        *self.last_seen.write().expect("seen lock") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_seen.read().expect("seen lock").elapsed()
    }
}

/// Generate an opaque visible-ASCII session id
pub fn generate_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Map of live sessions
#[derive(Debug, Default)]
pub struct SessionManager {
    sessions: StdRwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    /// Create an empty session map
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session on successful initialize.
    ///
    /// `id` is the transport's connection-scoped id when it has one;
    /// otherwise a fresh id is generated. An existing session under the
    /// same id is replaced, so re-initializing a connection starts clean.
    pub fn create(
        &self,
        id: Option<String>,
        protocol_version: ProtocolVersion,
        client_info: &ClientInfo,
        capabilities: &ClientCapabilities,
        client_env: HashMap<String, String>,
    ) -> Arc<Session> {
        let id = id.unwrap_or_else(generate_session_id);
        let session = Arc::new(Session::new(
            id.clone(),
            protocol_version,
            client_info,
            capabilities,
            client_env,
        ));
        let mut sessions = self.sessions.write().expect("session lock");
        sessions.insert(id, session.clone());
        session
    }

    /// Retrieve a session, refreshing its idle clock
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let sessions = self.sessions.read().expect("session lock");
        let session = sessions.get(id).cloned();
        if let Some(s) = &session {
            s.touch();
        }
        session
    }

    /// Remove a session; returns whether it existed
    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write().expect("session lock");
        sessions.remove(id).is_some()
    }

    /// All live sessions
    pub fn all(&self) -> Vec<Arc<Session>> {
        let sessions = self.sessions.read().expect("session lock");
        sessions.values().cloned().collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().expect("session lock").len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict sessions idle longer than `ttl`; returns the evicted ids.
    ///
    /// Transports that accept new connections call this periodically.
    pub fn evict_stale(&self, ttl: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write().expect("session lock");
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.idle_for() > ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        stale
    }
}
