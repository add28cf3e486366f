use async_trait::async_trait;

use portal_core::errors::CollaboratorError;
use portal_core::workflow::ports::{NotificationKind, Notifier};
use portal_core::{Request, UserId};

/// Logs notifications instead of delivering them.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_approver(
        &self,
        approver_id: &UserId,
        request: &Request,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            event_name = "notify.approver",
            approver_id = %approver_id,
            request_id = %request.id,
            number = %request.number,
            "request awaits approval"
        );
        Ok(())
    }

    async fn notify_submitter(
        &self,
        request: &Request,
        message: &str,
        kind: NotificationKind,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            event_name = "notify.submitter",
            submitter_id = %request.submitter_id,
            request_id = %request.id,
            kind = ?kind,
            "{message}"
        );
        Ok(())
    }
}
