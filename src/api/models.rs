use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-defined contact, persisted as one YAML record per contact.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Contact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phone_numbers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,
}

impl Contact {
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.phone_numbers.iter().chain(self.emails.iter()).map(String::as_str)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Chat {
    pub row_id: i64,
    pub chat_identifier: String,
    pub display_name: String,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: i64,
    pub participants: Vec<String>,
    pub is_group: bool,
    pub has_unread: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub row_id: i64,
    pub guid: String,
    pub text: String,
    /// Sender handle, replaced by the contact name when one resolves.
    pub sender: String,
    pub is_from_me: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub chat_id: i64,
    pub attachment_path: Option<String>,
}
