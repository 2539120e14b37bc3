use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::api::events::{LookupEvent, StoreEvent};
use crate::contacts::ContactStore;
use crate::resolver::NameSource;
use crate::storage::MessageStore;
use crate::utils::{clean_phone, event_channel, run_blocking_to_channel};

/// Cleaned identifiers shorter than this never match by containment.
const MIN_FUZZY_LEN: usize = 8;

/// Names learned from the external contacts directory.
///
/// Readers never wait on a lookup; the cache is filled by
/// [`run_cache_updater`] as lookups complete.
#[derive(Clone, Default)]
pub struct LookupCache {
    names: Arc<RwLock<HashMap<String, String>>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<String> {
        if identifier.is_empty() {
            return None;
        }
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(name) = names.get(identifier) {
            return Some(name.clone());
        }

        let cleaned = clean_phone(identifier);
        if cleaned.is_empty() {
            return None;
        }
        if let Some(name) = names.get(&cleaned) {
            return Some(name.clone());
        }
        if cleaned.len() < MIN_FUZZY_LEN {
            return None;
        }
        names.iter().find_map(|(cached, name)| {
            let cached = clean_phone(cached);
            let close = cached.len() >= MIN_FUZZY_LEN && (cached.contains(&cleaned) || cleaned.contains(&cached));
            close.then(|| name.clone())
        })
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&self, event: &LookupEvent) {
        if let LookupEvent::Resolved { identifier, cleaned, name } = event {
            let mut names = self.names.write().unwrap_or_else(PoisonError::into_inner);
            names.insert(identifier.clone(), name.clone());
            if !cleaned.is_empty() {
                names.insert(cleaned.clone(), name.clone());
            }
        }
    }
}

impl NameSource for LookupCache {
    fn lookup(&self, identifier: &str) -> Option<String> {
        self.get(identifier)
    }

    fn label(&self) -> &str {
        "directory-cache"
    }
}

/// Identifiers with a lookup still running.
#[derive(Clone, Default)]
pub struct PendingLookups {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl PendingLookups {
    /// Returns false when a lookup for `identifier` is already running.
    fn begin(&self, identifier: &str) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identifier.to_string())
    }

    fn finish(&self, identifier: &str) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).remove(identifier);
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).contains(identifier)
    }
}

/// Owns every write to `cache`. Each event is applied, its identifier is
/// released from `pending`, then the event is forwarded to `notify` so a
/// caller can refresh whatever shows the identifier.
pub async fn run_cache_updater(
    cache: LookupCache,
    pending: PendingLookups,
    mut rx: UnboundedReceiver<LookupEvent>,
    notify: Option<UnboundedSender<LookupEvent>>,
) {
    while let Some(event) = rx.recv().await {
        match &event {
            LookupEvent::Resolved { identifier, name, .. } => {
                log::debug!("directory lookup resolved {} to {}", identifier, name)
            }
            LookupEvent::NotFound { identifier } => {
                log::trace!("directory lookup found nothing for {}", identifier)
            }
            LookupEvent::Failed { identifier, reason } => {
                log::debug!("directory lookup for {} failed: {}", identifier, reason)
            }
        }
        cache.apply(&event);
        pending.finish(event.identifier());
        if let Some(tx) = &notify {
            let _ = tx.send(event);
        }
    }
}

/// Fire-and-forget name lookups in the system contacts application.
#[derive(Clone)]
pub struct ContactLookup {
    program: String,
    cache: LookupCache,
    pending: PendingLookups,
    handle: Handle,
    tx: UnboundedSender<LookupEvent>,
}

impl ContactLookup {
    /// Start the cache updater on `handle` and return a lookup front end.
    pub fn spawn(
        handle: &Handle,
        program: impl Into<String>,
        cache: LookupCache,
        notify: Option<UnboundedSender<LookupEvent>>,
    ) -> Self {
        let (tx, rx) = event_channel();
        let pending = PendingLookups::default();
        handle.spawn(run_cache_updater(cache.clone(), pending.clone(), rx, notify));
        Self {
            program: program.into(),
            cache,
            pending,
            handle: handle.clone(),
            tx,
        }
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    /// Queue a lookup unless the identifier is already cached or being
    /// looked up. Returns whether a lookup was started. Never blocks.
    pub fn request(&self, identifier: &str) -> bool {
        if identifier.is_empty() || self.cache.get(identifier).is_some() {
            return false;
        }
        if !self.pending.begin(identifier) {
            return false;
        }
        let program = self.program.clone();
        let identifier = identifier.to_string();
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            let event = query_directory(&program, &identifier).await;
            let _ = tx.send(event);
        });
        true
    }
}

async fn query_directory(program: &str, identifier: &str) -> LookupEvent {
    let cleaned = clean_phone(identifier);
    let script = lookup_script(&cleaned, identifier);
    let output = tokio::process::Command::new(program)
        .arg("-e")
        .arg(&script)
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            return LookupEvent::Failed {
                identifier: identifier.to_string(),
                reason: e.to_string(),
            };
        }
    };
    if !output.status.success() {
        return LookupEvent::Failed {
            identifier: identifier.to_string(),
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
    }

    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if name.is_empty() || name == "missing value" {
        LookupEvent::NotFound {
            identifier: identifier.to_string(),
        }
    } else {
        LookupEvent::Resolved {
            identifier: identifier.to_string(),
            cleaned,
            name,
        }
    }
}

pub fn escape_applescript(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

/// Script asking the Contacts application for the person owning either a
/// phone number containing (or contained in) `number`, or exactly `email`.
pub fn lookup_script(number: &str, email: &str) -> String {
    format!(
        r#"tell application "Contacts"
    set targetNumber to "{number}"
    set targetEmail to "{email}"
    try
        repeat with aPerson in people
            if targetNumber is not "" then
                repeat with aPhone in phones of aPerson
                    set cleanPhone to do shell script "echo " & quoted form of (value of aPhone as text) & " | tr -cd '0-9+'"
                    if cleanPhone contains targetNumber or targetNumber contains cleanPhone then
                        return name of aPerson
                    end if
                end repeat
            end if
            repeat with anEmail in emails of aPerson
                if (value of anEmail as text) is targetEmail then
                    return name of aPerson
                end if
            end repeat
        end repeat
    end try
    return ""
end tell"#,
        number = escape_applescript(number),
        email = escape_applescript(email),
    )
}

/// Asynchronous front end over the stores. Every request runs off the
/// caller's thread and completes with exactly one [`StoreEvent`].
pub struct StoreClient {
    handle: Handle,
    store: Arc<MessageStore>,
    contacts: Arc<ContactStore>,
    lookup: Option<ContactLookup>,
    tx: UnboundedSender<StoreEvent>,
}

impl StoreClient {
    pub fn new(
        handle: &Handle,
        store: Arc<MessageStore>,
        contacts: Arc<ContactStore>,
        lookup: Option<ContactLookup>,
    ) -> (Self, UnboundedReceiver<StoreEvent>) {
        let (tx, rx) = event_channel();
        let client = Self {
            handle: handle.clone(),
            store,
            contacts,
            lookup,
            tx,
        };
        (client, rx)
    }

    /// Load chats. Direct chats still showing a raw identifier get a
    /// background directory lookup so a later refresh can show a name.
    pub fn fetch_chats(&self) {
        let store = Arc::clone(&self.store);
        let lookup = self.lookup.clone();
        run_blocking_to_channel(
            &self.handle,
            self.tx.clone(),
            move || {
                let chats = store.list_chats();
                if let (Ok(chats), Some(lookup)) = (&chats, &lookup) {
                    chats
                        .iter()
                        .filter(|c| !c.is_group && c.display_name == c.chat_identifier)
                        .for_each(|c| {
                            lookup.request(&c.chat_identifier);
                        });
                }
                chats
            },
            StoreEvent::ChatsLoaded,
        );
    }

    pub fn fetch_messages(&self, chat_id: i64) {
        let store = Arc::clone(&self.store);
        run_blocking_to_channel(
            &self.handle,
            self.tx.clone(),
            move || store.list_messages(chat_id),
            move |result| StoreEvent::MessagesLoaded { chat_id, result },
        );
    }

    pub fn mark_read(&self, chat_id: i64) {
        let store = Arc::clone(&self.store);
        run_blocking_to_channel(
            &self.handle,
            self.tx.clone(),
            move || store.mark_read(chat_id),
            move |result| StoreEvent::MarkedRead { chat_id, result },
        );
    }

    pub fn fetch_contacts(&self) {
        let contacts = Arc::clone(&self.contacts);
        run_blocking_to_channel(
            &self.handle,
            self.tx.clone(),
            move || contacts.list(),
            StoreEvent::ContactsLoaded,
        );
    }
}
