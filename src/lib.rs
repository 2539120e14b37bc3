//! Message store access and contact resolution for a terminal iMessage
//! client.
//!
//! [`storage::MessageStore`] reads chats and messages out of the Messages
//! database, [`contacts::ContactStore`] keeps user-defined contacts on disk,
//! and [`resolver::Resolver`] turns phone numbers and emails into names.
//! [`api::client::StoreClient`] runs all of it in the background and reports
//! completions as events.

pub mod address_book;
pub mod api;
pub mod app;
pub mod attributed_body;
pub mod contacts;
pub mod error;
pub mod resolver;
pub mod storage;
pub mod utils;

pub use api::models::{Chat, Contact, Message};
pub use error::{Error, Result};
