use crate::api::models::{Chat, Contact, Message};
use crate::error::Error;

/// Completion of one background store request.
#[derive(Debug)]
pub enum StoreEvent {
    ChatsLoaded(Result<Vec<Chat>, Error>),
    MessagesLoaded {
        chat_id: i64,
        result: Result<Vec<Message>, Error>,
    },
    MarkedRead {
        chat_id: i64,
        result: Result<usize, Error>,
    },
    ContactsLoaded(Result<Vec<Contact>, Error>),
}

/// Outcome of one external directory lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupEvent {
    Resolved {
        identifier: String,
        cleaned: String,
        name: String,
    },
    NotFound {
        identifier: String,
    },
    Failed {
        identifier: String,
        reason: String,
    },
}

impl LookupEvent {
    pub fn identifier(&self) -> &str {
        match self {
            LookupEvent::Resolved { identifier, .. }
            | LookupEvent::NotFound { identifier }
            | LookupEvent::Failed { identifier, .. } => identifier,
        }
    }
}
