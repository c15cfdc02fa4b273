//! Categorized log handlers.
//!
//! Hosts route diagnostic messages of the bridge and the runtime by category. A message
//! goes to the handler registered for its category, then to the handler registered for
//! [`DEFAULT_CATEGORY`], and finally to `tracing` when neither exists. Messages are for
//! diagnostics only and never change control flow.
//!
//! # Examples
//!
//! ```rust
//! use monobridge::logger::{log_message, set_log_handler};
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = seen.clone();
//! set_log_handler("docs", move |message| sink.lock().unwrap().push(message.to_string()));
//!
//! log_message("docs", "hello");
//! assert_eq!(seen.lock().unwrap().as_slice(), ["hello"]);
//! ```

use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// Category used when a message's own category has no handler.
pub const DEFAULT_CATEGORY: &str = "default";

/// A message sink for one category.
pub type LogHandler = Arc<dyn Fn(&str) + Send + Sync>;

static HANDLERS: RwLock<BTreeMap<String, LogHandler>> = RwLock::new(BTreeMap::new());

// Handlers run outside the lock, so a poisoned registry still holds a consistent map.
fn handlers() -> RwLockReadGuard<'static, BTreeMap<String, LogHandler>> {
    HANDLERS.read().unwrap_or_else(PoisonError::into_inner)
}

fn handlers_mut() -> RwLockWriteGuard<'static, BTreeMap<String, LogHandler>> {
    HANDLERS.write().unwrap_or_else(PoisonError::into_inner)
}

/// Registers `handler` for `category`, replacing the previous handler.
pub fn set_log_handler<F>(category: &str, handler: F)
where
    F: Fn(&str) + Send + Sync + 'static,
{
    handlers_mut().insert(category.to_string(), Arc::new(handler));
}

/// The handler registered for exactly `category`.
#[must_use]
pub fn get_log_handler(category: &str) -> Option<LogHandler> {
    handlers().get(category).cloned()
}

/// Removes the handler of `category`. Returns whether one was registered.
pub fn remove_log_handler(category: &str) -> bool {
    handlers_mut().remove(category).is_some()
}

/// Sends `message` to the handler of `category`, falling back to the default category.
pub fn log_message(category: &str, message: &str) {
    let handler = {
        let handlers = handlers();
        handlers
            .get(category)
            .or_else(|| handlers.get(DEFAULT_CATEGORY))
            .cloned()
    };

    // The lock is released before the call so handlers may log themselves.
    match handler {
        Some(handler) => handler(message),
        None => forward_to_tracing(category, message),
    }
}

#[inline]
fn forward_to_tracing(category: &str, message: &str) {
    match category {
        "error" => tracing::error!(target: "monobridge::managed", category, "{message}"),
        "warning" => tracing::warn!(target: "monobridge::managed", category, "{message}"),
        "trace" => tracing::trace!(target: "monobridge::managed", category, "{message}"),
        _ => tracing::info!(target: "monobridge::managed", category, "{message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |message: &str| {
            sink.lock().unwrap().push(message.to_string());
        })
    }

    #[test]
    fn test_category_handler() {
        let (seen, handler) = recorder();
        set_log_handler("test.category", handler);
        log_message("test.category", "first");
        log_message("test.category", "second");
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert!(get_log_handler("test.category").is_some());

        assert!(remove_log_handler("test.category"));
        assert!(!remove_log_handler("test.category"));
        assert!(get_log_handler("test.category").is_none());
    }

    #[test]
    fn test_replacing_handler() {
        let (first, handler) = recorder();
        set_log_handler("test.replace", handler);
        let (second, handler) = recorder();
        set_log_handler("test.replace", handler);

        log_message("test.replace", "message");
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(*second.lock().unwrap(), vec!["message"]);
        remove_log_handler("test.replace");
    }

    #[test]
    fn test_default_fallback() {
        // Only this test touches the default category.
        let (seen, handler) = recorder();
        set_log_handler(DEFAULT_CATEGORY, handler);
        log_message("test.unregistered", "to default");
        assert!(seen.lock().unwrap().iter().any(|message| message == "to default"));
        remove_log_handler(DEFAULT_CATEGORY);

        log_message("test.unregistered", "to tracing");
        assert!(!seen.lock().unwrap().iter().any(|message| message == "to tracing"));
    }

    #[test]
    fn test_handler_may_log() {
        let (seen, handler) = recorder();
        set_log_handler("test.inner", handler);
        set_log_handler("test.outer", |message| {
            log_message("test.inner", &format!("outer: {message}"));
        });
        log_message("test.outer", "nested");
        assert_eq!(*seen.lock().unwrap(), vec!["outer: nested"]);
        remove_log_handler("test.outer");
        remove_log_handler("test.inner");
    }
}
