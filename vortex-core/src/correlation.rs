//! Correlation IDs and request tracking.
//!
//! Every top-level operation opens a [`CorrelationContext`]. Contexts nest —
//! a child captures `parent_id = parent.id` — and the active context is a
//! thread-local value restored on scope exit, including when a panic or an
//! early return unwinds through the guard's `Drop`. Consolidates what
//! upstream systems this was distilled from kept as two parallel
//! implementations into a single one (spec.md §9).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

thread_local! {
    static ACTIVE: RefCell<Vec<CorrelationContext>> = const { RefCell::new(Vec::new()) };
}

/// An 8-character hex correlation ID.
pub fn new_id() -> String {
    let bytes: [u8; 4] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A nested correlation scope.
#[derive(Debug, Clone)]
pub struct CorrelationContext {
    pub id: String,
    pub parent_id: Option<String>,
    pub operation: String,
    pub provider: Option<String>,
    pub start_time: Instant,
    pub metadata: HashMap<String, String>,
}

impl CorrelationContext {
    pub fn root(operation: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            parent_id: None,
            operation: operation.into(),
            provider: None,
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn child(&self, operation: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            parent_id: Some(self.id.clone()),
            operation: operation.into(),
            provider: self.provider.clone(),
            start_time: Instant::now(),
            metadata: HashMap::new(),
        }
    }
}

/// A guard that pushes a context onto the active thread-local stack and
/// pops it on drop, restoring whatever was active before.
pub struct ScopeGuard {
    _private: (),
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        ACTIVE.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Enter a new correlation scope, nesting under the currently active one if
/// any. Returns a guard; drop it (or let it fall out of scope) to restore
/// the previous context.
pub fn enter(operation: impl Into<String>) -> ScopeGuard {
    let ctx = ACTIVE.with(|stack| {
        let stack = stack.borrow();
        match stack.last() {
            Some(parent) => parent.child(operation),
            None => CorrelationContext::root(operation),
        }
    });
    ACTIVE.with(|stack| stack.borrow_mut().push(ctx));
    ScopeGuard { _private: () }
}

/// Enter a new correlation scope tagged with a provider name.
pub fn enter_with_provider(operation: impl Into<String>, provider: impl Into<String>) -> ScopeGuard {
    let guard = enter(operation);
    ACTIVE.with(|stack| {
        if let Some(ctx) = stack.borrow_mut().last_mut() {
            ctx.provider = Some(provider.into());
        }
    });
    guard
}

/// The ID of the currently active context, if any.
pub fn current_id() -> Option<String> {
    ACTIVE.with(|stack| stack.borrow().last().map(|c| c.id.clone()))
}

/// A clone of the currently active context, if any.
pub fn current() -> Option<CorrelationContext> {
    ACTIVE.with(|stack| stack.borrow().last().cloned())
}

/// Tracks start/completion/duration of requests keyed by correlation ID, for
/// observability queries. A process-wide singleton guarded by a mutex
/// (spec.md §9, "Global state").
pub struct RequestTracker {
    entries: Mutex<HashMap<String, TrackedRequest>>,
}

#[derive(Debug, Clone)]
struct TrackedRequest {
    started_at: SystemTime,
    completed_at: Option<SystemTime>,
    duration: Option<Duration>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(&self, correlation_id: &str) {
        self.entries.lock().unwrap().insert(
            correlation_id.to_string(),
            TrackedRequest {
                started_at: SystemTime::now(),
                completed_at: None,
                duration: None,
            },
        );
    }

    pub fn complete(&self, correlation_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(correlation_id) {
            let now = SystemTime::now();
            entry.completed_at = Some(now);
            entry.duration = now.duration_since(entry.started_at).ok();
        }
    }

    pub fn duration_of(&self, correlation_id: &str) -> Option<Duration> {
        self.entries
            .lock()
            .unwrap()
            .get(correlation_id)
            .and_then(|e| e.duration)
    }

    pub fn is_tracked(&self, correlation_id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop tracker entries older than the given age (spec.md §4.7: 24h).
    pub fn cleanup(&self, max_age: Duration) {
        let now = SystemTime::now();
        self.entries.lock().unwrap().retain(|_, entry| {
            now.duration_since(entry.started_at)
                .map(|age| age < max_age)
                .unwrap_or(true)
        });
    }
}

/// Default cleanup horizon per spec.md §4.7.
pub const REQUEST_TRACKER_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_eight_hex_chars() {
        let id = new_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn nested_scopes_restore_parent() {
        assert!(current().is_none());
        let outer_id = {
            let _outer = enter("download-run");
            let outer_ctx = current().unwrap();
            assert_eq!(outer_ctx.operation, "download-run");
            assert!(outer_ctx.parent_id.is_none());

            {
                let _inner = enter("process-job");
                let inner_ctx = current().unwrap();
                assert_eq!(inner_ctx.parent_id, Some(outer_ctx.id.clone()));
            }

            // Inner scope exited — active context should be the outer one again.
            assert_eq!(current().unwrap().id, outer_ctx.id);
            outer_ctx.id
        };
        assert!(current().is_none());
        let _ = outer_id;
    }

    #[test]
    fn provider_tag_is_inherited_by_children() {
        let _outer = enter_with_provider("fetch", "yahoo_finance");
        let _inner = enter("retry-attempt");
        assert_eq!(current().unwrap().provider.as_deref(), Some("yahoo_finance"));
    }

    #[test]
    fn request_tracker_records_duration() {
        let tracker = RequestTracker::new();
        tracker.start("abc123");
        assert!(tracker.is_tracked("abc123"));
        tracker.complete("abc123");
        assert!(tracker.duration_of("abc123").is_some());
    }

    #[test]
    fn request_tracker_cleanup_drops_old_entries() {
        let tracker = RequestTracker::new();
        tracker.start("old");
        tracker.cleanup(Duration::from_secs(0));
        assert!(!tracker.is_tracked("old"));
    }
}
