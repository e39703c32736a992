#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;

use super::traits::{CloseFrame, Frame};
use crate::error::Error;

/// Address used when [`ConnectionConfig`] does not name one.
pub const DEFAULT_ADDRESS: &str = "ws://127.0.0.1:8080";

const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 7;
const DEFAULT_RECONNECT_INTERVAL_DURATION: Duration = Duration::from_millis(2000);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_millis(5000);
const DEFAULT_NORMAL_CLOSE_CODE: u16 = 1000;
const DEFAULT_HEARTBEAT_PAYLOAD: &str = "ping";

/// Configuration for a [`ConnectionManager`](super::ConnectionManager).
///
/// ```
/// use std::time::Duration;
///
/// use ws_tether::ws::config::ConnectionConfig;
///
/// let config = ConnectionConfig::builder()
///     .address("wss://example.com/feed")
///     .max_reconnect_attempts(3)
///     .reconnect_interval(Duration::from_millis(500))
///     .build();
///
/// assert_eq!(config.address(), "wss://example.com/feed");
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ConnectionConfig {
    /// Connection target. Falls back to [`DEFAULT_ADDRESS`].
    #[builder(into)]
    address: Option<String>,
    /// An abnormal closure is retried while the consecutive reconnect count is at most this.
    #[builder(default = DEFAULT_MAX_RECONNECT_ATTEMPTS)]
    max_reconnect_attempts: u32,
    /// Base reconnect delay. The n-th consecutive reconnect waits `n × reconnect_interval`,
    /// counting from zero.
    #[builder(default = DEFAULT_RECONNECT_INTERVAL_DURATION)]
    reconnect_interval: Duration,
    /// Interval between liveness probes while a connection is unconfirmed
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    heartbeat_interval: Duration,
    /// Liveness probe sent on every heartbeat tick
    #[builder(into, default = DEFAULT_HEARTBEAT_PAYLOAD.to_owned())]
    heartbeat_payload: String,
    /// Close status that marks an intentional, non-retriable closure
    #[builder(default = DEFAULT_NORMAL_CLOSE_CODE)]
    normal_close_code: u16,
    /// Lifecycle callbacks
    #[builder(default)]
    hooks: Hooks,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(DEFAULT_ADDRESS)
    }

    #[must_use]
    pub fn max_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts
    }

    #[must_use]
    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    #[must_use]
    pub fn heartbeat_payload(&self) -> &str {
        &self.heartbeat_payload
    }

    #[must_use]
    pub fn normal_close_code(&self) -> u16 {
        self.normal_close_code
    }

    #[must_use]
    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Delay before the reconnect that follows `attempts` earlier ones.
    pub(crate) fn reconnect_delay(&self, attempts: u32) -> Duration {
        self.reconnect_interval.saturating_mul(attempts)
    }
}

type OpenHook = Arc<dyn Fn() + Send + Sync>;
type MessageHook = Arc<dyn Fn(&Frame) + Send + Sync>;
type CloseHook = Arc<dyn Fn(&CloseFrame) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Optional lifecycle callbacks, invoked on the connection manager's event loop.
///
/// Callbacks must not block; they run between transport events.
#[derive(Clone, Default)]
pub struct Hooks {
    on_open: Option<OpenHook>,
    on_message: Option<MessageHook>,
    on_close: Option<CloseHook>,
    on_error: Option<ErrorHook>,
}

impl Hooks {
    /// Called every time a connection attempt completes its handshake.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open = Some(Arc::new(f));
        self
    }

    /// Called for every inbound frame that carries a payload.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called whenever the current connection closes, whatever the status code.
    #[must_use]
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&CloseFrame) + Send + Sync + 'static,
    {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called for transport errors, construction faults and failed sends.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn opened(&self) {
        if let Some(hook) = &self.on_open {
            hook();
        }
    }

    pub(crate) fn message(&self, frame: &Frame) {
        if let Some(hook) = &self.on_message {
            hook(frame);
        }
    }

    pub(crate) fn closed(&self, frame: &CloseFrame) {
        if let Some(hook) = &self.on_close {
            hook(frame);
        }
    }

    pub(crate) fn errored(&self, error: &Error) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}
