use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::address_book::AddressBook;
use crate::api::client::{ContactLookup, LookupCache, StoreClient};
use crate::api::events::{LookupEvent, StoreEvent};
use crate::contacts::{ContactCache, ContactStore};
use crate::error::{Error, Result};
use crate::resolver::Resolver;
use crate::storage::{self, MessageStore};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub chat_db: PathBuf,
    pub contacts_dir: PathBuf,
    /// Explicit system contacts database; discovered when unset.
    pub address_book: Option<PathBuf>,
    pub contact_cache_ttl_secs: u64,
    pub lookup_program: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = BaseDirs::new()
            .map(|b| b.home_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            chat_db: storage::default_db_path().unwrap_or_else(|| home.join("Library/Messages/chat.db")),
            contacts_dir: home.join(".chime").join("contacts"),
            address_book: None,
            contact_cache_ttl_secs: 30,
            lookup_program: "osascript".to_string(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("chime").join("config.toml"))
    }

    /// Read the config file, falling back to defaults when it is missing or
    /// does not parse.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::info!("config {} not readable ({}); using defaults", path.display(), e);
                return Self::new();
            }
        };
        match toml::from_str::<AppConfig>(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("failed to parse config {}: {}", path.display(), e);
                Self::new()
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().ok_or_else(|| Error::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn contact_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.contact_cache_ttl_secs)
    }

    fn address_book(&self) -> AddressBook {
        match &self.address_book {
            Some(path) => AddressBook::new(vec![path.clone()]),
            None => AddressBook::default_root()
                .map(|root| AddressBook::discover(&root))
                .unwrap_or_else(|| AddressBook::new(Vec::new())),
        }
    }
}

/// Everything a front end needs, wired in resolution order: user contacts,
/// then names learned from the directory lookups, then the system contacts
/// database.
pub struct Services {
    pub contacts: Arc<ContactStore>,
    pub lookup: ContactLookup,
    pub resolver: Arc<Resolver>,
    pub store: Arc<MessageStore>,
}

impl Services {
    pub fn build(config: &AppConfig, handle: &Handle, notify: Option<UnboundedSender<LookupEvent>>) -> Self {
        let cache = Arc::new(ContactCache::new(config.contact_cache_ttl()));
        let contacts = Arc::new(ContactStore::new(&config.contacts_dir, cache));
        let lookup = ContactLookup::spawn(handle, &config.lookup_program, LookupCache::new(), notify);

        let mut resolver = Resolver::new()
            .with_source(contacts.clone())
            .with_source(Arc::new(lookup.cache().clone()));
        let book = config.address_book();
        if !book.is_empty() {
            resolver.push(Arc::new(book));
        }
        let resolver = Arc::new(resolver);

        let store = Arc::new(MessageStore::new(&config.chat_db, Arc::clone(&resolver)));
        Self {
            contacts,
            lookup,
            resolver,
            store,
        }
    }

    pub fn client(&self, handle: &Handle) -> (StoreClient, UnboundedReceiver<StoreEvent>) {
        StoreClient::new(
            handle,
            Arc::clone(&self.store),
            Arc::clone(&self.contacts),
            Some(self.lookup.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Contact;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("chime").join("config.toml");
        let config = AppConfig {
            chat_db: tmp.path().join("chat.db"),
            contacts_dir: tmp.path().join("contacts"),
            address_book: Some(tmp.path().join("ab.abcddb")),
            contact_cache_ttl_secs: 5,
            lookup_program: "true".into(),
        };

        config.save_to(&path).unwrap();
        assert_eq!(AppConfig::load_from(&path), config);
    }

    #[test]
    fn partial_or_broken_config_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        fs::write(&path, "contact_cache_ttl_secs = 90\n").unwrap();
        let config = AppConfig::load_from(&path);
        assert_eq!(config.contact_cache_ttl(), Duration::from_secs(90));
        assert_eq!(config.lookup_program, "osascript");

        fs::write(&path, "contact_cache_ttl_secs = \"soon\"").unwrap();
        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
        assert_eq!(AppConfig::load_from(&tmp.path().join("missing.toml")), AppConfig::default());
    }

    #[tokio::test]
    async fn services_resolve_user_contacts_first() {
        let tmp = TempDir::new().unwrap();
        let config = AppConfig {
            chat_db: tmp.path().join("chat.db"),
            contacts_dir: tmp.path().join("contacts"),
            address_book: Some(tmp.path().join("missing.abcddb")),
            contact_cache_ttl_secs: 30,
            lookup_program: "chime-test-no-such-program".into(),
        };
        let services = Services::build(&config, &Handle::current(), None);
        services
            .contacts
            .save(&Contact {
                name: "Ana".into(),
                phone_numbers: vec!["+15551230000".into()],
                emails: vec![],
            })
            .unwrap();

        assert_eq!(
            services.resolver.labels(),
            vec!["contacts", "directory-cache", "address-book"]
        );
        assert_eq!(services.resolver.resolve("555-123-0000"), "Ana");
        assert_eq!(services.resolver.display_name("5550000000"), "5550000000");
    }
}
