//! File-backed contact directory.
//!
//! Each contact lives in `<dir>/<sanitized name>.yml`. Listing and reverse
//! lookups are served from a [`ContactCache`] snapshot that is rebuilt by a
//! single directory scan at most once per TTL window.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::api::models::Contact;
use crate::error::{Error, Result};
use crate::utils::{normalize_identifier, sanitize_filename};

pub const CONTACT_EXTENSION: &str = "yml";
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// One consistent view of the directory: the contacts and the
/// normalized-identifier index built from the same scan.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub contacts: Vec<Contact>,
    index: HashMap<String, String>,
}

impl Snapshot {
    fn build(contacts: Vec<Contact>) -> Self {
        let mut index = HashMap::new();
        for contact in &contacts {
            for id in contact.identifiers() {
                let key = normalize_identifier(id);
                if !key.is_empty() {
                    index.insert(key, contact.name.clone());
                }
            }
        }
        Self { contacts, index }
    }

    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        let key = normalize_identifier(identifier);
        if key.is_empty() {
            return None;
        }
        self.index.get(&key).map(String::as_str)
    }
}

#[derive(Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    loaded_at: Option<Instant>,
}

impl CacheState {
    fn fresh(&self, ttl: Duration) -> Option<Arc<Snapshot>> {
        match (&self.snapshot, self.loaded_at) {
            (Some(snap), Some(at)) if at.elapsed() < ttl => Some(Arc::clone(snap)),
            _ => None,
        }
    }
}

/// TTL cache over a directory scan.
///
/// Readers holding a fresh snapshot never wait on each other. When the TTL
/// has lapsed the first caller takes the write lock and rescans; racing
/// callers re-check under that lock and reuse its result.
pub struct ContactCache {
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl ContactCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn get_or_refresh<F>(&self, scan: F) -> Result<Arc<Snapshot>>
    where
        F: FnOnce() -> Result<Vec<Contact>>,
    {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(snap) = state.fresh(self.ttl) {
                return Ok(snap);
            }
        }

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(snap) = state.fresh(self.ttl) {
            return Ok(snap);
        }

        let snap = Arc::new(Snapshot::build(scan()?));
        state.snapshot = Some(Arc::clone(&snap));
        state.loaded_at = Some(Instant::now());
        Ok(snap)
    }

    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.loaded_at = None;
    }
}

impl Default for ContactCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

pub struct ContactStore {
    dir: PathBuf,
    cache: Arc<ContactCache>,
}

impl ContactStore {
    pub fn new(dir: impl Into<PathBuf>, cache: Arc<ContactCache>) -> Self {
        Self { dir: dir.into(), cache }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", sanitize_filename(name), CONTACT_EXTENSION))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Write `contact`, replacing any record stored under the same name.
    pub fn save(&self, contact: &Contact) -> Result<()> {
        if contact.name.trim().is_empty() {
            return Err(Error::Validation("contact name cannot be empty".into()));
        }
        if contact.identifiers().all(|id| id.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "contact {} needs at least one phone number or email",
                contact.name
            )));
        }

        self.ensure_dir()?;
        let yaml = serde_yaml::to_string(contact).map_err(Error::Encode)?;
        fs::write(self.record_path(&contact.name), yaml)?;
        self.cache.invalidate();
        Ok(())
    }

    pub fn load(&self, name: &str) -> Result<Contact> {
        let path = self.record_path(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("contact {}", name)));
            }
            Err(e) => return Err(e.into()),
        };
        serde_yaml::from_str(&text).map_err(|source| Error::Parse { path, source })
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.record_path(name)) {
            Ok(()) => {
                self.cache.invalidate();
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("contact {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> Result<Vec<Contact>> {
        Ok(self.snapshot()?.contacts.clone())
    }

    /// Name of the contact owning `identifier`, or an empty string.
    pub fn find_by_identifier(&self, identifier: &str) -> String {
        match self.snapshot() {
            Ok(snap) => snap.lookup(identifier).unwrap_or_default().to_string(),
            Err(e) => {
                log::warn!("contact directory unavailable: {}", e);
                String::new()
            }
        }
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        self.cache.get_or_refresh(|| self.scan())
    }

    fn scan(&self) -> Result<Vec<Contact>> {
        self.ensure_dir()?;
        log::debug!("rescanning contacts in {}", self.dir.display());

        let mut contacts = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::warn!("skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(CONTACT_EXTENSION) {
                continue;
            }

            let parsed = fs::read_to_string(&path)
                .map_err(Error::from)
                .and_then(|text| {
                    serde_yaml::from_str::<Contact>(&text).map_err(|source| Error::Parse {
                        path: path.clone(),
                        source,
                    })
                });
            match parsed {
                Ok(contact) => contacts.push(contact),
                Err(e) => log::warn!("skipping contact record: {}", e),
            }
        }

        contacts.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(contacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> ContactStore {
        ContactStore::new(tmp.path().join("contacts"), Arc::new(ContactCache::default()))
    }

    fn ana() -> Contact {
        Contact {
            name: "Ana".into(),
            phone_numbers: vec!["+15551230000".into()],
            emails: vec![],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let contact = Contact {
            name: "Bo Li".into(),
            phone_numbers: vec!["+1 555 000 1111".into(), "5552223333".into()],
            emails: vec!["bo@example.com".into()],
        };

        store.save(&contact).unwrap();
        assert_eq!(store.load("Bo Li").unwrap(), contact);
    }

    #[test]
    fn save_rejects_empty_name_and_no_identifiers() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let err = store.save(&Contact { name: "  ".into(), ..ana() }).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = store
            .save(&Contact { name: "Empty".into(), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn empty_lists_are_omitted_from_the_record() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&ana()).unwrap();

        let text = fs::read_to_string(store.dir().join("Ana.yml")).unwrap();
        assert!(text.contains("phone_numbers"));
        assert!(!text.contains("emails"));
    }

    #[test]
    fn names_with_separators_are_sanitized() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let contact = Contact { name: "AC/DC: fan".into(), ..ana() };
        store.save(&contact).unwrap();

        assert!(store.dir().join("AC-DC- fan.yml").exists());
        assert_eq!(store.load("AC/DC: fan").unwrap(), contact);
    }

    #[test]
    fn load_and_delete_missing_contact_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        assert!(store.load("nobody").unwrap_err().is_not_found());
        assert!(store.delete("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn malformed_record_fails_load_but_not_list() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&ana()).unwrap();
        fs::write(store.dir().join("Broken.yml"), "name: [unclosed").unwrap();
        fs::write(store.dir().join("notes.txt"), "ignored").unwrap();
        store.invalidate_cache();

        assert!(matches!(store.load("Broken").unwrap_err(), Error::Parse { .. }));
        let names: Vec<_> = store.list().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Ana"]);
    }

    #[test]
    fn find_by_identifier_matches_any_format() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&ana()).unwrap();
        store
            .save(&Contact {
                name: "Cy".into(),
                phone_numbers: vec![],
                emails: vec!["Cy@Example.com".into()],
            })
            .unwrap();

        assert_eq!(store.find_by_identifier("5551230000"), "Ana");
        assert_eq!(store.find_by_identifier("555-123-0000"), "Ana");
        assert_eq!(store.find_by_identifier("+15551230000"), "Ana");
        assert_eq!(store.find_by_identifier("cy@example.com"), "Cy");
        assert_eq!(store.find_by_identifier("unknown@x.com"), "");
        assert_eq!(store.find_by_identifier(""), "");
    }

    #[test]
    fn mutations_are_visible_on_next_read() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&ana()).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        store
            .save(&Contact {
                name: "Dee".into(),
                phone_numbers: vec!["5559990000".into()],
                emails: vec![],
            })
            .unwrap();
        store.invalidate_cache();
        assert_eq!(store.list().unwrap().len(), 2);
        assert_eq!(store.find_by_identifier("5559990000"), "Dee");

        store.delete("Ana").unwrap();
        store.invalidate_cache();
        assert_eq!(store.find_by_identifier("5551230000"), "");
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn cache_serves_stale_files_until_invalidated() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.save(&ana()).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        // written behind the store's back
        fs::write(store.dir().join("Eve.yml"), "name: Eve\nemails:\n- eve@x.com\n").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        store.invalidate_cache();
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn expired_ttl_triggers_rescan() {
        let cache = ContactCache::new(Duration::ZERO);
        let scans = AtomicUsize::new(0);
        let scan = || {
            scans.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ana()])
        };

        cache.get_or_refresh(scan).unwrap();
        cache.get_or_refresh(scan).unwrap();
        assert_eq!(scans.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_readers_share_one_scan() {
        let cache = Arc::new(ContactCache::default());
        let scans = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let scans = Arc::clone(&scans);
                thread::spawn(move || {
                    let snap = cache
                        .get_or_refresh(|| {
                            scans.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(20));
                            Ok(vec![ana()])
                        })
                        .unwrap();
                    assert_eq!(snap.lookup("555 123 0000"), Some("Ana"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(scans.load(Ordering::SeqCst), 1);
    }
}
