use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hc_domain::Appliance;
use serde_json::Value;

/// A registered event subscriber. Callers reach this through the
/// `register_*` adapters below rather than implementing it directly, so a
/// closure's arity doesn't need to match the dispatch path by hand the way
/// the upstream registry works it out at call time via reflection.
pub trait Callback: Send + Sync {
    fn call(&self, appliance: &Appliance, key: &str, value: Option<&Value>);
}

impl<F> Callback for F
where
    F: Fn(&Appliance, &str, Option<&Value>) + Send + Sync,
{
    fn call(&self, appliance: &Appliance, key: &str, value: Option<&Value>) {
        self(appliance, key, value)
    }
}

const DEFAULT_KEY: &str = "DEFAULT";

type Subscriber = Arc<dyn Callback>;

#[derive(Default)]
struct Bucket {
    exact: HashMap<String, Vec<Subscriber>>,
    wildcard: Vec<(glob::Pattern, Subscriber)>,
}

/// Dispatches appliance events to registered subscribers.
///
/// Mirrors the upstream `CallbackRegistry`: subscribers are bucketed first
/// by `Option<ha_id>` (`None` is the global bucket, fired for every
/// appliance), then matched within that bucket by exact key, by wildcard
/// glob pattern, and finally by a `DEFAULT` fallback that only fires when
/// nothing else in that bucket matched.
#[derive(Default)]
pub struct CallbackRegistry {
    buckets: RwLock<HashMap<Option<String>, Bucket>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `key` (an exact key, a glob pattern
    /// containing `*`, or the literal `"DEFAULT"`), scoped to `ha_id` or
    /// global when `ha_id` is `None`.
    pub fn register(&self, ha_id: Option<&str>, key: &str, callback: Subscriber) {
        let mut buckets = self.buckets.write().unwrap();
        let bucket = buckets.entry(ha_id.map(String::from)).or_default();

        if key.contains('*') {
            if let Ok(pattern) = glob::Pattern::new(key) {
                bucket.wildcard.push((pattern, callback));
            }
        } else {
            bucket.exact.entry(key.to_string()).or_default().push(callback);
        }
    }

    pub fn register_default(&self, ha_id: Option<&str>, callback: Subscriber) {
        self.register(ha_id, DEFAULT_KEY, callback);
    }

    /// Register a callback that ignores appliance/key/value and just wants
    /// to know "something happened".
    pub fn on_any(&self, ha_id: Option<&str>, key: &str, callback: impl Fn() + Send + Sync + 'static) {
        self.register(ha_id, key, Arc::new(move |_: &Appliance, _: &str, _: Option<&Value>| callback()));
    }

    /// Register a callback interested only in the changed key.
    pub fn on_key(&self, ha_id: Option<&str>, key: &str, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.register(
            ha_id,
            key,
            Arc::new(move |_: &Appliance, k: &str, _: Option<&Value>| callback(k)),
        );
    }

    /// Register a callback interested in the key and its new value.
    pub fn on_key_value(
        &self,
        ha_id: Option<&str>,
        key: &str,
        callback: impl Fn(&str, Option<&Value>) + Send + Sync + 'static,
    ) {
        self.register(
            ha_id,
            key,
            Arc::new(move |_: &Appliance, k: &str, v: Option<&Value>| callback(k, v)),
        );
    }

    /// Deregister every callback for one key within one scope.
    pub fn deregister(&self, ha_id: Option<&str>, key: &str) {
        let mut buckets = self.buckets.write().unwrap();
        if let Some(bucket) = buckets.get_mut(&ha_id.map(String::from)) {
            bucket.exact.remove(key);
            bucket.wildcard.retain(|(p, _)| p.as_str() != key);
        }
    }

    pub fn clear_appliance_callbacks(&self, ha_id: &str) {
        self.buckets.write().unwrap().remove(&Some(ha_id.to_string()));
    }

    pub fn clear_all(&self) {
        self.buckets.write().unwrap().clear();
    }

    /// Broadcasts one event to every matching subscriber: the global bucket
    /// and the appliance's own bucket, each checked for an exact-key match,
    /// then a wildcard match, falling back to that bucket's `DEFAULT`
    /// subscribers only if nothing else in it matched.
    pub fn broadcast(&self, appliance: &Appliance, key: &str, value: Option<&Value>) {
        let buckets = self.buckets.read().unwrap();
        for scope in [None, Some(appliance.ha_id.as_str())] {
            let lookup = scope.map(String::from);
            let Some(bucket) = buckets.get(&lookup) else { continue };
            dispatch_bucket(bucket, appliance, key, value);
        }
    }
}

fn dispatch_bucket(bucket: &Bucket, appliance: &Appliance, key: &str, value: Option<&Value>) {
    let mut handled = false;

    if let Some(subs) = bucket.exact.get(key) {
        for sub in subs {
            sub.call(appliance, key, value);
        }
        handled = true;
    }

    for (pattern, sub) in &bucket.wildcard {
        if pattern.matches(key) {
            sub.call(appliance, key, value);
            handled = true;
        }
    }

    if !handled {
        if let Some(defaults) = bucket.exact.get(DEFAULT_KEY) {
            for sub in defaults {
                sub.call(appliance, key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn appliance() -> Appliance {
        Appliance::new("ha1", "Oven", "BSH", "Oven")
    }

    #[test]
    fn exact_key_subscriber_fires_for_matching_key() {
        let registry = CallbackRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        registry.on_any(None, "BSH.Common.Status.OperationState", move || {
            calls2.fetch_add(1, Ordering::SeqCst);
        });

        registry.broadcast(&appliance(), "BSH.Common.Status.OperationState", None);
        registry.broadcast(&appliance(), "SomeOtherKey", None);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wildcard_subscriber_matches_by_glob() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        registry.on_key(None, "BSH.Common.Option.*", move |k| {
            seen2.lock().unwrap().push(k.to_string());
        });

        registry.broadcast(&appliance(), "BSH.Common.Option.Duration", None);
        registry.broadcast(&appliance(), "BSH.Common.Root.ActiveProgram", None);

        assert_eq!(seen.lock().unwrap().as_slice(), ["BSH.Common.Option.Duration"]);
    }

    #[test]
    fn default_bucket_only_fires_when_nothing_else_matched() {
        let registry = CallbackRegistry::new();
        let specific_hits = Arc::new(AtomicUsize::new(0));
        let default_hits = Arc::new(AtomicUsize::new(0));

        let s = specific_hits.clone();
        registry.on_any(None, "Known.Key", move || {
            s.fetch_add(1, Ordering::SeqCst);
        });
        let d = default_hits.clone();
        registry.register_default(None, Arc::new(move |_: &Appliance, _: &str, _: Option<&Value>| {
            d.fetch_add(1, Ordering::SeqCst);
        }));

        registry.broadcast(&appliance(), "Known.Key", None);
        registry.broadcast(&appliance(), "Unknown.Key", None);

        assert_eq!(specific_hits.load(Ordering::SeqCst), 1);
        assert_eq!(default_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn per_appliance_scope_does_not_leak_to_other_appliances() {
        let registry = CallbackRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        registry.on_any(Some("ha1"), "Some.Key", move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        let mut other = appliance();
        other.ha_id = "ha2".to_string();

        registry.broadcast(&appliance(), "Some.Key", None);
        registry.broadcast(&other, "Some.Key", None);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_appliance_callbacks_removes_only_that_scope() {
        let registry = CallbackRegistry::new();
        let global_hits = Arc::new(AtomicUsize::new(0));
        let scoped_hits = Arc::new(AtomicUsize::new(0));

        let g = global_hits.clone();
        registry.on_any(None, "K", move || {
            g.fetch_add(1, Ordering::SeqCst);
        });
        let s = scoped_hits.clone();
        registry.on_any(Some("ha1"), "K", move || {
            s.fetch_add(1, Ordering::SeqCst);
        });

        registry.clear_appliance_callbacks("ha1");
        registry.broadcast(&appliance(), "K", None);

        assert_eq!(global_hits.load(Ordering::SeqCst), 1);
        assert_eq!(scoped_hits.load(Ordering::SeqCst), 0);
    }
}
