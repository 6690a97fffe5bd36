//! The GATT operations the PMD client consumes.
//!
//! Scanning, connecting, MTU negotiation and operation queueing belong to
//! whatever implements [`Transport`]; [`crate::polar_client`] provides one on
//! top of btleplug.

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::PmdError;

/// Notifications from one characteristic.
///
/// An `Err` item reports a link-level failure; the stream ending means the
/// subscription (and in practice the connection) is gone.
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>, PmdError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write `data` to `characteristic`.
    async fn send(
        &self,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), PmdError>;

    async fn read(&self, characteristic: Uuid) -> Result<Vec<u8>, PmdError>;

    /// Enable notifications on `characteristic` and stream them.
    async fn subscribe(&self, characteristic: Uuid) -> Result<NotificationStream, PmdError>;

    async fn is_connected(&self) -> bool;
}
