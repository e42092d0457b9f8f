//! # Link Abstraction
//!
//! The session manager talks to the sensor only through these two traits,
//! so the reconnect logic does not depend on a particular Bluetooth stack.
//!
//! - `Connector`: establishes a link and subscribes to notifications
//! - `Link`: an open, subscribed connection owned by exactly one session

use crate::error::ConnectionError;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    /// Connect to `address` and subscribe to `characteristic`.
    ///
    /// Only returns once notifications are flowing; a link that connected but
    /// could not subscribe is released and reported as an error.
    async fn connect(
        &self,
        address: &str,
        characteristic: Uuid,
    ) -> Result<Self::Link, ConnectionError>;

    /// Release a connection left half-open by a `connect` future that was
    /// dropped before it returned (stop requested or attempt timed out).
    async fn abort_pending(&self) {}
}

#[async_trait]
pub trait Link: Send {
    /// Next raw notification payload. `None` means the stream ended.
    async fn next_notification(&mut self) -> Option<Vec<u8>>;

    /// Liveness check; an error is treated as a lost link.
    async fn is_connected(&mut self) -> Result<bool, ConnectionError>;

    /// Best-effort release of the connection.
    async fn disconnect(&mut self) -> Result<(), ConnectionError>;
}
