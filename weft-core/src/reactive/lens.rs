//! Lens accessor.
//!
//! [`focus`] binds a getter/setter pair to a dotted path such as
//! `"profile.address.city"`. The first segment names a top-level store key;
//! the rest walk into the JSON value under it. Numeric segments index arrays.
//!
//! Reading through a focus records a dependency on the top-level key only.
//! Wrap the getter in [`pick`](super::pick) to be notified only when the
//! focused value itself changes.
//!
//! Writing copies the top-level value, replaces the leaf and writes the
//! top-level key back, so the store sees a new value and notifies.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, RuntimeError};

use super::context::untracked;
use super::store::Store;

type Fallback = Arc<dyn Fn() -> Value + Send + Sync>;

/// Options for [`focus`].
#[derive(Clone, Default)]
pub struct FocusOptions {
    fallback: Option<Fallback>,
}

impl FocusOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value returned when the path does not resolve.
    pub fn fallback<F>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(fallback));
        self
    }
}

/// A getter/setter pair bound to a path in a store.
#[derive(Clone)]
pub struct Focus {
    store: Store,
    path: String,
    key: String,
    rest: Vec<String>,
    fallback: Option<Fallback>,
}

/// Bind a lens to `path` in `store`.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use weft_core::reactive::{focus, FocusOptions, Store};
///
/// let store = Store::new([("profile", json!({"name": "Ada"}))]);
/// let city = focus(
///     &store,
///     "profile.address.city",
///     FocusOptions::new().fallback(|| json!("Unknown")),
/// )
/// .unwrap();
///
/// assert_eq!(city.get(), json!("Unknown"));
/// city.set(json!("Paris")).unwrap();
/// assert_eq!(city.get(), json!("Paris"));
/// ```
pub fn focus(store: &Store, path: &str, options: FocusOptions) -> Result<Focus> {
    let mut segments = path.split('.').map(str::to_string);
    let key = segments.next().unwrap_or_default();
    let rest: Vec<String> = segments.collect();
    if key.is_empty() || rest.iter().any(String::is_empty) {
        return Err(RuntimeError::InvalidPath(path.to_string()));
    }

    Ok(Focus {
        store: store.clone(),
        path: path.to_string(),
        key,
        rest,
        fallback: options.fallback,
    })
}

impl Focus {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Resolve the path; absent or null values yield the fallback.
    pub fn get(&self) -> Value {
        let root = self.store.get(&self.key);
        match resolve(&root, &self.rest) {
            Some(value) if !value.is_null() => value.clone(),
            _ => self.fallback.as_ref().map_or(Value::Null, |fallback| fallback()),
        }
    }

    /// Write `value` at the path. Returns whether the store changed.
    ///
    /// Missing or null intermediate segments are created as objects. An array
    /// index may address an existing element or append one right after the
    /// last; anything further out is an error.
    pub fn set(&self, value: Value) -> Result<bool> {
        let mut root = self.store.get_untracked(&self.key);
        let mut cursor = &mut root;
        for segment in &self.rest {
            cursor = child_mut(cursor, segment, &self.path)?;
        }
        *cursor = value;
        Ok(self.store.set(&self.key, root))
    }

    /// Replace the focused value with `f(current)`.
    pub fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(Value) -> Value,
    {
        let current = untracked(|| self.get());
        self.set(f(current))
    }

    /// Split into independent getter and setter closures.
    pub fn split(&self) -> (impl Fn() -> Value, impl Fn(Value) -> Result<bool>) {
        let getter = self.clone();
        let setter = self.clone();
        (move || getter.get(), move |value: Value| setter.set(value))
    }
}

impl fmt::Debug for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Focus")
            .field("store", &self.store.id())
            .field("path", &self.path)
            .field("has_fallback", &self.fallback.is_some())
            .finish()
    }
}

fn resolve<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments.iter().try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn child_mut<'a>(current: &'a mut Value, segment: &str, path: &str) -> Result<&'a mut Value> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => Ok(map.entry(segment.to_string()).or_insert(Value::Null)),
        Value::Array(items) => {
            let index = segment.parse::<usize>().map_err(|_| RuntimeError::NotAContainer {
                path: path.to_string(),
                segment: segment.to_string(),
            })?;
            let len = items.len();
            if index > len {
                return Err(RuntimeError::IndexOutOfRange {
                    path: path.to_string(),
                    segment: segment.to_string(),
                    len,
                });
            }
            if index == len {
                items.push(Value::Null);
            }
            Ok(&mut items[index])
        }
        _ => Err(RuntimeError::NotAContainer {
            path: path.to_string(),
            segment: segment.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn city(store: &Store) -> Focus {
        focus(
            store,
            "profile.address.city",
            FocusOptions::new().fallback(|| json!("Unknown")),
        )
        .unwrap()
    }

    #[test]
    fn fallback_when_an_intermediate_is_missing() {
        let store = Store::new([("profile", json!({"name": "Ada"}))]);
        assert_eq!(city(&store).get(), json!("Unknown"));

        store.set("profile", json!({"address": null}));
        assert_eq!(city(&store).get(), json!("Unknown"));

        store.set("profile", Value::Null);
        assert_eq!(city(&store).get(), json!("Unknown"));
    }

    #[test]
    fn set_creates_the_path_and_get_sees_it() {
        let store = Store::new([("profile", json!({"name": "Ada"}))]);
        let lens = city(&store);

        assert!(lens.set(json!("Paris")).unwrap());
        assert_eq!(lens.get(), json!("Paris"));
        assert_eq!(
            store.get("profile"),
            json!({"name": "Ada", "address": {"city": "Paris"}})
        );
    }

    #[test]
    fn set_notifies_the_top_level_key() {
        let store = Store::new([("profile", json!({"address": {"city": "Rome"}}))]);
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let _ = store.subscribe("profile", move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let lens = city(&store);
        lens.set(json!("Oslo")).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(!lens.set(json!("Oslo")).unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn array_segments_index_arrays() {
        let store = Store::new([("todos", json!([{"done": false}]))]);
        let done = focus(&store, "todos.0.done", FocusOptions::new()).unwrap();
        assert_eq!(done.get(), json!(false));

        done.set(json!(true)).unwrap();
        assert_eq!(store.get("todos"), json!([{"done": true}]));

        let second = focus(&store, "todos.1", FocusOptions::new()).unwrap();
        second.set(json!({"done": false})).unwrap();
        assert_eq!(store.get("todos").as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn indices_past_the_end_are_rejected() {
        let store = Store::new([("todos", json!([{"done": false}]))]);
        let before = store.snapshot();

        for path in [
            "todos.3",
            "todos.100000000000",
            "todos.18446744073709551615",
            "todos.99999999999999999999999",
        ] {
            let lens = focus(&store, path, FocusOptions::new()).unwrap();
            assert!(lens.set(json!(true)).is_err(), "{path} should fail");
        }

        let err = focus(&store, "todos.3.done", FocusOptions::new())
            .unwrap()
            .set(json!(true))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::IndexOutOfRange { len: 1, .. }));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.version(), 0);
    }

    #[test]
    fn writing_through_a_scalar_fails() {
        let store = Store::new([("profile", json!({"address": 5}))]);
        let err = city(&store).set(json!("Paris")).unwrap_err();
        assert!(matches!(err, RuntimeError::NotAContainer { ref segment, .. } if segment == "city"));
        assert_eq!(store.get("profile"), json!({"address": 5}));
    }

    #[test]
    fn empty_segments_are_rejected() {
        let store = Store::new([("a", json!(1))]);
        assert!(focus(&store, "", FocusOptions::new()).is_err());
        assert!(focus(&store, "a..b", FocusOptions::new()).is_err());
    }

    #[test]
    fn top_level_focus_reads_and_writes_the_key() {
        let store = Store::new([("count", json!(1))]);
        let (get, set) = focus(&store, "count", FocusOptions::new()).unwrap().split();
        assert_eq!(get(), json!(1));
        set(json!(2)).unwrap();
        assert_eq!(store.get("count"), json!(2));
    }

    #[test]
    fn update_applies_to_the_current_value() {
        let store = Store::new([("stats", json!({"visits": 1}))]);
        let visits = focus(&store, "stats.visits", FocusOptions::new()).unwrap();
        visits
            .update(|v| json!(v.as_i64().unwrap_or(0) + 1))
            .unwrap();
        assert_eq!(visits.get(), json!(2));
    }
}
