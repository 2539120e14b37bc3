//! Identifier to display-name resolution across several sources.

use std::sync::Arc;

use crate::contacts::ContactStore;

/// One place a name can come from. Sources must answer quickly and never
/// fail; an unavailable backend is simply a miss.
pub trait NameSource: Send + Sync {
    fn lookup(&self, identifier: &str) -> Option<String>;

    fn label(&self) -> &str {
        "unnamed"
    }
}

/// Adapts a plain function into a [`NameSource`].
pub struct FnSource<F> {
    label: &'static str,
    f: F,
}

impl<F> FnSource<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    pub fn new(label: &'static str, f: F) -> Self {
        Self { label, f }
    }
}

impl<F> NameSource for FnSource<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn lookup(&self, identifier: &str) -> Option<String> {
        (self.f)(identifier)
    }

    fn label(&self) -> &str {
        self.label
    }
}

impl NameSource for ContactStore {
    fn lookup(&self, identifier: &str) -> Option<String> {
        let name = self.find_by_identifier(identifier);
        (!name.is_empty()).then_some(name)
    }

    fn label(&self) -> &str {
        "contacts"
    }
}

/// Ordered list of sources; the first one that answers wins.
#[derive(Clone, Default)]
pub struct Resolver {
    sources: Vec<Arc<dyn NameSource>>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn NameSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn push(&mut self, source: Arc<dyn NameSource>) {
        self.sources.push(source);
    }

    pub fn labels(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.label()).collect()
    }

    /// Resolved name, or an empty string when no source knows `identifier`.
    pub fn resolve(&self, identifier: &str) -> String {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return String::new();
        }
        for source in &self.sources {
            if let Some(name) = source.lookup(identifier).filter(|n| !n.trim().is_empty()) {
                log::trace!("{} resolved by {}", identifier, source.label());
                return name;
            }
        }
        String::new()
    }

    /// Resolved name, falling back to the identifier itself.
    pub fn display_name(&self, identifier: &str) -> String {
        let name = self.resolve(identifier);
        if name.is_empty() {
            identifier.to_string()
        } else {
            name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Contact;
    use crate::contacts::ContactCache;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn fixed(label: &'static str, id: &'static str, name: &'static str) -> Arc<dyn NameSource> {
        Arc::new(FnSource::new(label, move |i: &str| (i == id).then(|| name.to_string())))
    }

    #[test]
    fn first_hit_wins() {
        let resolver = Resolver::new()
            .with_source(fixed("a", "x@y.z", "From A"))
            .with_source(fixed("b", "x@y.z", "From B"));
        assert_eq!(resolver.resolve("x@y.z"), "From A");
        assert_eq!(resolver.labels(), vec!["a", "b"]);
    }

    #[test]
    fn falls_through_to_later_sources() {
        let resolver = Resolver::new()
            .with_source(fixed("a", "other", "Nope"))
            .with_source(fixed("b", "5551234567", "Bea"));
        assert_eq!(resolver.resolve("5551234567"), "Bea");
        assert_eq!(resolver.resolve("unknown"), "");
        assert_eq!(resolver.display_name("unknown"), "unknown");
    }

    #[test]
    fn later_sources_are_not_consulted_after_a_hit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resolver = Resolver::new()
            .with_source(fixed("a", "id", "Found"))
            .with_source(Arc::new(FnSource::new("counting", move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                None
            })));

        resolver.resolve("id");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        resolver.resolve("miss");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_identifier_and_blank_names_are_misses() {
        let resolver = Resolver::new()
            .with_source(Arc::new(FnSource::new("blank", |_: &str| Some("  ".to_string()))));
        assert_eq!(resolver.resolve(""), "");
        assert_eq!(resolver.resolve("someone"), "");
    }

    #[test]
    fn contact_store_is_a_source() {
        let tmp = TempDir::new().unwrap();
        let store = ContactStore::new(tmp.path(), Arc::new(ContactCache::default()));
        store
            .save(&Contact {
                name: "Ana".into(),
                phone_numbers: vec!["+15551230000".into()],
                emails: vec![],
            })
            .unwrap();

        let resolver = Resolver::new().with_source(Arc::new(store));
        assert_eq!(resolver.resolve("(555) 123-0000"), "Ana");
    }
}
