//! Read-only lookups against the system contacts database (the Core Data
//! store the Contacts app keeps under `~/Library/Application Support`).

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::resolver::NameSource;
use crate::utils::normalize_identifier;

const DB_VERSIONS: [&str; 3] = [
    "AddressBook-v22.abcddb",
    "AddressBook-v23.abcddb",
    "AddressBook-v24.abcddb",
];

const PHONE_QUERY: &str = "
    SELECT r.ZFIRSTNAME, r.ZLASTNAME, r.ZORGANIZATION, p.ZFULLNUMBER
    FROM ZABCDPHONENUMBER p
    JOIN ZABCDRECORD r ON p.ZOWNER = r.Z_PK";

const EMAIL_QUERY: &str = "
    SELECT r.ZFIRSTNAME, r.ZLASTNAME, r.ZORGANIZATION, e.ZADDRESS
    FROM ZABCDEMAILADDRESS e
    JOIN ZABCDRECORD r ON e.ZOWNER = r.Z_PK";

const MESSAGING_QUERY: &str = "
    SELECT r.ZFIRSTNAME, r.ZLASTNAME, r.ZORGANIZATION, m.ZADDRESS
    FROM ZABCDMESSAGINGADDRESS m
    JOIN ZABCDRECORD r ON m.ZOWNER = r.Z_PK";

pub struct AddressBook {
    paths: Vec<PathBuf>,
}

impl AddressBook {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    /// Find every contacts database under `root`: the top-level store and
    /// one per account source in `Sources/*`.
    pub fn discover(root: &Path) -> Self {
        let mut paths = Vec::new();
        if let Some(p) = DB_VERSIONS.iter().map(|v| root.join(v)).find(|p| p.is_file()) {
            paths.push(p);
        }
        if let Ok(entries) = fs::read_dir(root.join("Sources")) {
            for entry in entries.flatten() {
                if let Some(p) = DB_VERSIONS.iter().map(|v| entry.path().join(v)).find(|p| p.is_file()) {
                    paths.push(p);
                }
            }
        }
        paths.sort();
        log::debug!("found {} contacts database(s) under {}", paths.len(), root.display());
        Self { paths }
    }

    pub fn default_root() -> Option<PathBuf> {
        let base = directories::BaseDirs::new()?;
        Some(
            base.home_dir()
                .join("Library")
                .join("Application Support")
                .join("AddressBook"),
        )
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// First name found across the databases. A database that is gone or
    /// cannot be opened is logged and skipped.
    pub fn find_name(&self, identifier: &str) -> Option<String> {
        let key = normalize_identifier(identifier);
        if key.is_empty() {
            return None;
        }
        for path in &self.paths {
            match find_in(path, &key) {
                Ok(Some(name)) => return Some(name),
                Ok(None) => {}
                Err(e) => log::debug!("skipping contacts database {}: {}", path.display(), e),
            }
        }
        None
    }
}

impl NameSource for AddressBook {
    fn lookup(&self, identifier: &str) -> Option<String> {
        self.find_name(identifier)
    }

    fn label(&self) -> &str {
        "address-book"
    }
}

fn find_in(path: &Path, key: &str) -> Result<Option<String>> {
    if !path.is_file() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;

    let queries: &[&str] = if key.contains('@') {
        &[EMAIL_QUERY, MESSAGING_QUERY]
    } else {
        &[PHONE_QUERY, MESSAGING_QUERY]
    };
    for sql in queries {
        match scan(&conn, sql, key) {
            Ok(Some(name)) => return Ok(Some(name)),
            Ok(None) => {}
            // Older databases lack some of these tables.
            Err(e) => log::debug!("skipping contacts query in {}: {}", path.display(), e),
        }
    }
    Ok(None)
}

fn scan(conn: &Connection, sql: &str, key: &str) -> rusqlite::Result<Option<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<String>>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<String>>(2)?,
            row.get::<_, Option<String>>(3)?,
        ))
    })?;

    for row in rows {
        let Ok((first, last, org, value)) = row else {
            continue;
        };
        let Some(value) = value else { continue };
        if identifiers_match(key, &normalize_identifier(&value)) {
            if let Some(name) = person_name(first, last, org) {
                return Ok(Some(name));
            }
        }
    }
    Ok(None)
}

/// Emails must match exactly. Phone numbers match when either normalized
/// form contains the other, which absorbs national vs international
/// formatting at the cost of occasional false positives on short numbers.
fn identifiers_match(key: &str, candidate: &str) -> bool {
    if key.is_empty() || candidate.is_empty() {
        return false;
    }
    if key.contains('@') || candidate.contains('@') {
        return key == candidate;
    }
    key.contains(candidate) || candidate.contains(key)
}

fn person_name(first: Option<String>, last: Option<String>, org: Option<String>) -> Option<String> {
    let full = [first, last]
        .into_iter()
        .flatten()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if !full.is_empty() {
        return Some(full);
    }
    org.map(|o| o.trim().to_string()).filter(|o| !o.is_empty())
}
