//! Application callback invoked by every protocol server.

use std::sync::Arc;

use async_trait::async_trait;
use thinghub_core::{NotificationMessage, RequestMessage, ResponseMessage};

use crate::connection::ServerConnection;

/// Receives inbound messages from all transports.
///
/// Protocol servers stamp `sender_id` with the authenticated client before
/// calling in, so implementations can trust it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle a request.
    ///
    /// Return `Some` to answer immediately. Return `None` when the answer
    /// will be sent later through `reply_to`.
    async fn handle_request(
        &self,
        req: RequestMessage,
        reply_to: Arc<dyn ServerConnection>,
    ) -> Option<ResponseMessage>;

    /// Handle a response no local waiter claimed, or a progress update.
    async fn handle_response(&self, resp: ResponseMessage, from: Arc<dyn ServerConnection>);

    /// Handle a notification from an agent.
    async fn handle_notification(&self, notif: NotificationMessage, from: Arc<dyn ServerConnection>);
}
