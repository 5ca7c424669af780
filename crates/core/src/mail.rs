//! In-game mail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{EmployeeId, MessageId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: EmployeeId,
    pub recipient_id: EmployeeId,
    pub subject: String,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

impl Message {
    /// Subject line for a reply to this message.
    pub fn reply_subject(&self) -> String {
        format!("Re: {}", self.subject)
    }
}
