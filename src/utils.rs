use once_cell::sync::Lazy;
use tokio::sync::mpsc;

pub static RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime")
});

pub fn event_channel<T: Send + 'static>() -> (mpsc::UnboundedSender<T>, mpsc::UnboundedReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Run blocking work (a SQLite query, a directory scan) off the caller's
/// thread and deliver its result as one event on `tx`.
pub fn run_blocking_to_channel<T, R, F, M>(handle: &tokio::runtime::Handle, tx: mpsc::UnboundedSender<T>, work: F, wrap: M)
where
    T: Send + 'static,
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
    M: FnOnce(R) -> T + Send + 'static,
{
    handle.spawn(async move {
        let event = match tokio::task::spawn_blocking(work).await {
            Ok(res) => wrap(res),
            Err(e) => {
                log::error!("background store task panicked: {}", e);
                return;
            }
        };
        // The receiver going away just means nobody is listening any more.
        let _ = tx.send(event);
    });
}

/// Canonical comparison key for a phone number or email address.
///
/// Emails are trimmed and lower-cased. Phone numbers keep only digits (and a
/// leading `+`), and a North American country code is dropped so that
/// `+1 (555) 123-4567`, `15551234567` and `5551234567` compare equal.
pub fn normalize_identifier(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }

    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        if c.is_ascii_digit() || (c == '+' && out.is_empty()) {
            out.push(c);
        }
    }

    if out.len() == 11 && out.starts_with('1') {
        out.remove(0);
    } else if out.len() == 12 && out.starts_with("+1") {
        out.drain(..2);
    }
    out
}

/// Digits and `+` only, no country-code folding.
pub fn clean_phone(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect()
}

pub fn sanitize_filename(name: &str) -> String {
    name.trim().replace(['/', '\\', ':'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_formats_collapse_to_one_key() {
        let expected = normalize_identifier("5551234567");
        assert_eq!(expected, "5551234567");
        assert_eq!(normalize_identifier("+1 (555) 123-4567"), expected);
        assert_eq!(normalize_identifier("15551234567"), expected);
        assert_eq!(normalize_identifier("555-123-4567"), expected);
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_identifier("USER@Example.com"), "user@example.com");
        assert_eq!(normalize_identifier("  a@B.io \n"), "a@b.io");
    }

    #[test]
    fn empty_input_normalizes_to_empty() {
        assert_eq!(normalize_identifier(""), "");
        assert_eq!(normalize_identifier("   "), "");
        assert_eq!(normalize_identifier("()-"), "");
    }

    #[test]
    fn international_numbers_keep_their_prefix() {
        assert_eq!(normalize_identifier("+44 20 7946 0958"), "+442079460958");
        // only a leading plus survives
        assert_eq!(normalize_identifier("33+612345678"), "33612345678");
    }

    #[test]
    fn clean_phone_keeps_every_plus() {
        assert_eq!(clean_phone("+1 (555) 123-4567"), "+15551234567");
    }

    #[test]
    fn sanitize_replaces_separators() {
        assert_eq!(sanitize_filename(" a/b\\c:d "), "a-b-c-d");
        assert_eq!(sanitize_filename("Ana"), "Ana");
    }
}
