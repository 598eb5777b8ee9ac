//! Render job: the unit of work handed from the interpreter to one worker.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One accepted render request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Correlation id for logs.
    pub id: Uuid,
    /// Markup body inserted into the template.
    pub source_text: String,
    pub chat_id: i64,
    /// Message the rendered image replies to (the triggering message).
    pub reply_to_message_id: i64,
    /// Also deliver the raw compiler log.
    pub wants_report: bool,
    pub submitted_at: DateTime<Utc>,
}

impl RenderJob {
    pub fn new(
        source_text: impl Into<String>,
        chat_id: i64,
        reply_to_message_id: i64,
        wants_report: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_text: source_text.into(),
            chat_id,
            reply_to_message_id,
            wants_report,
            submitted_at: Utc::now(),
        }
    }

    /// Time spent between creation and `now`, in milliseconds.
    pub fn queued_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.submitted_at).num_milliseconds()
    }
}
