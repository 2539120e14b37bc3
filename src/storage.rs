//! Read access to the Messages database (`~/Library/Messages/chat.db`).
//!
//! The store belongs to another application. It is opened per operation,
//! read-only except for [`MessageStore::mark_read`], and rows that fail to
//! decode are skipped so one bad record never hides the rest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, Row};

use crate::api::models::{Chat, Message};
use crate::attributed_body;
use crate::error::{Error, Result};
use crate::resolver::Resolver;

/// Nanoseconds between the Unix epoch and 2001-01-01T00:00:00Z.
pub const APPLE_EPOCH_OFFSET_NANOS: i64 = 978_307_200_000_000_000;
pub const GROUP_CHAT_PREFIX: &str = "chat";

const CHATS_QUERY: &str = r#"
    SELECT
        c.ROWID,
        COALESCE(c.chat_identifier, ''),
        COALESCE(c.display_name, ''),
        COALESCE(m.text, ''),
        m.attributedBody,
        COALESCE(m.date, 0),
        COALESCE(unread.count, 0)
    FROM chat c
    LEFT JOIN (
        SELECT cmj.chat_id, m.text, m.attributedBody, m.date
        FROM chat_message_join cmj
        JOIN message m ON cmj.message_id = m.ROWID
        WHERE cmj.message_id IN (
            SELECT MAX(message_id) FROM chat_message_join GROUP BY chat_id
        )
    ) m ON c.ROWID = m.chat_id
    LEFT JOIN (
        SELECT cmj.chat_id, COUNT(*) AS count
        FROM chat_message_join cmj
        JOIN message msg ON cmj.message_id = msg.ROWID
        WHERE msg.is_read = 0 AND msg.is_from_me = 0
        GROUP BY cmj.chat_id
    ) unread ON c.ROWID = unread.chat_id
    ORDER BY COALESCE(m.date, 0) DESC, c.ROWID DESC
"#;

const MESSAGES_QUERY: &str = r#"
    SELECT
        m.ROWID,
        m.guid,
        COALESCE(m.text, ''),
        m.attributedBody,
        COALESCE(h.id, ''),
        COALESCE(m.is_from_me, 0),
        COALESCE(m.date, 0),
        a.filename
    FROM message m
    JOIN chat_message_join cmj ON m.ROWID = cmj.message_id
    LEFT JOIN handle h ON m.handle_id = h.ROWID
    LEFT JOIN (
        SELECT message_id, MIN(attachment_id) AS attachment_id
        FROM message_attachment_join
        GROUP BY message_id
    ) maj ON m.ROWID = maj.message_id
    LEFT JOIN attachment a ON maj.attachment_id = a.ROWID
    WHERE cmj.chat_id = ?1
    ORDER BY m.date ASC, m.ROWID ASC
"#;

const MARK_READ_QUERY: &str = r#"
    UPDATE message
    SET is_read = 1
    WHERE ROWID IN (SELECT message_id FROM chat_message_join WHERE chat_id = ?1)
      AND is_from_me = 0
      AND is_read = 0
"#;

/// Convert a Messages timestamp (nanoseconds since 2001-01-01) to UTC.
/// Zero means "unset".
pub fn apple_time(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos <= 0 {
        return None;
    }
    nanos
        .checked_add(APPLE_EPOCH_OFFSET_NANOS)
        .map(|unix| Utc.timestamp_nanos(unix))
}

pub fn is_group_identifier(chat_identifier: &str) -> bool {
    chat_identifier.starts_with(GROUP_CHAT_PREFIX)
}

pub fn default_db_path() -> Option<PathBuf> {
    let base = directories::BaseDirs::new()?;
    Some(base.home_dir().join("Library").join("Messages").join("chat.db"))
}

fn message_text(text: String, body: Option<Vec<u8>>) -> String {
    match body {
        Some(body) if text.is_empty() && !body.is_empty() => attributed_body::decode(&body),
        _ => text,
    }
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(base) = directories::BaseDirs::new() {
            return base.home_dir().join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

struct ChatRow {
    row_id: i64,
    chat_identifier: String,
    display_name: String,
    text: String,
    body: Option<Vec<u8>>,
    date: i64,
    unread: i64,
}

impl ChatRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            chat_identifier: row.get(1)?,
            display_name: row.get(2)?,
            text: row.get(3)?,
            body: row.get(4)?,
            date: row.get(5)?,
            unread: row.get(6)?,
        })
    }

    fn into_chat(self) -> Chat {
        let is_group = is_group_identifier(&self.chat_identifier);
        Chat {
            row_id: self.row_id,
            last_message: message_text(self.text, self.body),
            last_message_time: apple_time(self.date),
            unread_count: self.unread,
            has_unread: self.unread > 0,
            participants: Vec::new(),
            is_group,
            display_name: self.display_name,
            chat_identifier: self.chat_identifier,
        }
    }
}

struct MessageRow {
    row_id: i64,
    guid: String,
    text: String,
    body: Option<Vec<u8>>,
    handle: String,
    is_from_me: bool,
    date: i64,
    attachment: Option<String>,
}

impl MessageRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            row_id: row.get(0)?,
            guid: row.get(1)?,
            text: row.get(2)?,
            body: row.get(3)?,
            handle: row.get(4)?,
            is_from_me: row.get(5)?,
            date: row.get(6)?,
            attachment: row.get(7)?,
        })
    }
}

pub struct MessageStore {
    path: PathBuf,
    resolver: Arc<Resolver>,
}

impl MessageStore {
    pub fn new(path: impl Into<PathBuf>, resolver: Arc<Resolver>) -> Self {
        Self {
            path: path.into(),
            resolver,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_exists(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("message store {} does not exist", self.path.display()),
            )))
        }
    }

    pub fn open_read_only(&self) -> Result<Connection> {
        self.ensure_exists()?;
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn open_read_write(&self) -> Result<Connection> {
        self.ensure_exists()?;
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    /// Every chat with its latest message and unread count, newest first.
    pub fn list_chats(&self) -> Result<Vec<Chat>> {
        let conn = self.open_read_only()?;
        let mut stmt = conn.prepare(CHATS_QUERY)?;
        let rows = stmt.query_map([], ChatRow::from_row)?;

        let mut chats = Vec::new();
        for row in rows {
            match row {
                Ok(row) => chats.push(row.into_chat()),
                Err(e) => log::warn!("skipping unreadable chat row: {}", e),
            }
        }

        let ids: Vec<i64> = chats.iter().filter(|c| c.is_group).map(|c| c.row_id).collect();
        let mut participants = chat_participants(&conn, &ids)?;

        for chat in &mut chats {
            if chat.is_group {
                chat.participants = participants.remove(&chat.row_id).unwrap_or_default();
                if chat.display_name.is_empty() && !chat.participants.is_empty() {
                    chat.display_name = chat
                        .participants
                        .iter()
                        .map(|p| self.resolver.display_name(p))
                        .collect::<Vec<_>>()
                        .join(", ");
                }
            } else {
                chat.participants = vec![chat.chat_identifier.clone()];
            }

            if chat.display_name.is_empty() {
                chat.display_name = self.resolver.display_name(&chat.chat_identifier);
            }
        }

        log::debug!("loaded {} chats from {}", chats.len(), self.path.display());
        Ok(chats)
    }

    /// Messages of one chat, oldest first, senders resolved to names.
    pub fn list_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        let conn = self.open_read_only()?;
        let mut stmt = conn.prepare(MESSAGES_QUERY)?;
        let rows = stmt.query_map(params![chat_id], MessageRow::from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    log::warn!("skipping unreadable message row in chat {}: {}", chat_id, e);
                    continue;
                }
            };

            let mut sender = row.handle;
            if !row.is_from_me && !sender.is_empty() {
                let name = self.resolver.resolve(&sender);
                if !name.is_empty() {
                    sender = name;
                }
            }

            messages.push(Message {
                row_id: row.row_id,
                guid: row.guid,
                text: message_text(row.text, row.body),
                sender,
                is_from_me: row.is_from_me,
                timestamp: apple_time(row.date),
                chat_id,
                attachment_path: row
                    .attachment
                    .filter(|a| !a.is_empty())
                    .map(|a| expand_home(&a)),
            });
        }
        Ok(messages)
    }

    /// Flag every unread incoming message of the chat as read. Returns the
    /// number of messages changed.
    pub fn mark_read(&self, chat_id: i64) -> Result<usize> {
        let conn = self.open_read_write()?;
        let changed = conn.execute(MARK_READ_QUERY, params![chat_id])?;
        log::debug!("marked {} message(s) read in chat {}", changed, chat_id);
        Ok(changed)
    }
}

/// Participants of the given chats, fetched in one query.
fn chat_participants(conn: &Connection, chat_ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
    let mut map: HashMap<i64, Vec<String>> = HashMap::new();
    if chat_ids.is_empty() {
        return Ok(map);
    }

    let placeholders = vec!["?"; chat_ids.len()].join(",");
    let sql = format!(
        "SELECT chj.chat_id, h.id
         FROM chat_handle_join chj
         JOIN handle h ON chj.handle_id = h.ROWID
         WHERE chj.chat_id IN ({})
         ORDER BY chj.chat_id, h.id",
        placeholders
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(chat_ids.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;

    for row in rows {
        match row {
            Ok((chat_id, handle)) => {
                let list = map.entry(chat_id).or_default();
                if list.last() != Some(&handle) {
                    list.push(handle);
                }
            }
            Err(e) => log::warn!("skipping unreadable participant row: {}", e),
        }
    }
    Ok(map)
}
