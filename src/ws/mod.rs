//! Resilient WebSocket connection management.
//!
//! A [`ConnectionManager`] keeps one logical channel alive on top of any transport that
//! implements [`Connector`].
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: event loop owning the transport handle, reconnect policy and
//!   heartbeat, plus the caller-facing send API
//! - [`Connector`] / [`TransportHandle`]: the seam to a concrete socket implementation
//! - [`Events`]: how a transport reports open, message, close and error back to the manager
//! - [`tungstenite::TungsteniteConnector`]: the bundled `tokio-tungstenite` transport
//!
//! # Example
//!
//! ```ignore
//! let config = ConnectionConfig::builder()
//!     .address("wss://example.com/feed")
//!     .hooks(Hooks::default().on_message(|frame| println!("{frame:?}")))
//!     .build();
//!
//! let connection = ConnectionManager::connect(config);
//! connection.send_message(&json!({ "subscribe": "ticker" }));
//! ```

pub(crate) mod bus;
pub mod config;
pub mod connection;
pub mod error;
pub(crate) mod gate;
pub(crate) mod heartbeat;
pub mod traits;
#[cfg(feature = "tungstenite")]
pub mod tungstenite;

pub use config::{ConnectionConfig, DEFAULT_ADDRESS, Hooks};
pub use connection::{ConnectionManager, ConnectionState, Status};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
