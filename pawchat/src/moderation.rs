//! Message reporting seam.
//!
//! Only the minimal surface the conversation view needs: submitting a
//! report and reflecting the resulting status flag. Review workflows live
//! elsewhere.

use pawchat_proto::message::{MessageId, UserId};

/// Outcome of a report submission.
///
/// A duplicate report is not a failure: the message is already pending
/// review, which is exactly the state the reporter asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The report was recorded.
    Accepted,
    /// The reporter had already reported this message.
    AlreadyReported,
}

/// Errors from the external moderation service.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    /// The report was rejected outright (bad request).
    #[error("report rejected: {0}")]
    Rejected(String),

    /// Any other backend failure.
    #[error("moderation backend error: {0}")]
    Backend(String),
}

/// External moderation endpoint.
pub trait ModerationService: Send + Sync {
    /// Submit a report against a message.
    fn submit_report(
        &self,
        reporter: UserId,
        message: MessageId,
        reason: &str,
    ) -> impl std::future::Future<Output = Result<ReportOutcome, ModerationError>> + Send;
}
