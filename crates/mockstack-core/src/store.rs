//! Generic in-memory resource store.
//!
//! Every emulated service keeps its resources in exactly one
//! [`ResourceStore`]. The store is a keyed collection guarded by a single
//! reader/writer lock: lookups and listings share the read lock, while
//! creation, update, deletion and reset take the write lock for the whole
//! mutation. State that belongs to a resource (a queue's messages, an API's
//! routes) lives inside the resource value itself, so deleting the record
//! discards everything nested under it.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as TOKEN_ENCODING;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::StoreError;

/// How [`ResourceStore::list`] orders its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOrder {
    /// Lexicographic by [`Resource::name`], ties broken by creation order.
    Name,
    /// Creation order.
    Creation,
}

/// A value that can live in a [`ResourceStore`].
pub trait Resource: Clone + Send + Sync + 'static {
    /// Human-readable resource kind used in error messages (e.g. `"Queue"`).
    const KIND: &'static str;

    /// Listing order.
    const ORDER: ListOrder = ListOrder::Name;

    /// The resource's display name.
    fn name(&self) -> &str;

    /// Key that must be unique across the store when name uniqueness is enforced.
    fn uniqueness_key(&self) -> String {
        self.name().to_owned()
    }
}

/// Opaque optimistic-concurrency token.
///
/// A fresh token is minted on creation and on every successful mutation;
/// tokens are compared by exact match only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One stored resource plus the bookkeeping the store maintains for it.
#[derive(Debug, Clone)]
pub struct Record<T> {
    /// Identifier chosen at creation time; immutable.
    pub id: String,
    /// The resource itself.
    pub value: T,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Monotonic creation sequence number.
    pub seq: u64,
    /// Current lock token, when the store issues them.
    pub lock_token: Option<LockToken>,
}

/// Result of a successful [`ResourceStore::update`].
#[derive(Debug, Clone)]
pub struct Mutation<R> {
    /// Whatever the mutation closure returned.
    pub output: R,
    /// The newly issued lock token, when the store issues them.
    pub lock_token: Option<LockToken>,
}

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    /// Records on this page, in listing order.
    pub items: Vec<Record<T>>,
    /// Token to pass back for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

#[derive(Debug)]
struct Inner<T> {
    records: HashMap<String, Record<T>>,
    next_seq: u64,
}

impl<T> Default for Inner<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            next_seq: 0,
        }
    }
}

impl<T: Resource> Inner<T> {
    fn name_taken(&self, key: &str, except: Option<&str>) -> bool {
        self.records
            .values()
            .any(|r| Some(r.id.as_str()) != except && r.value.uniqueness_key() == key)
    }

    fn insert(&mut self, id: String, value: T, lock_tokens: bool) -> Record<T> {
        let record = Record {
            id: id.clone(),
            value,
            created_at: Utc::now(),
            seq: self.next_seq,
            lock_token: lock_tokens.then(LockToken::generate),
        };
        self.next_seq += 1;
        self.records.insert(id, record.clone());
        record
    }
}

/// Thread-safe keyed collection of one resource kind.
#[derive(Debug)]
pub struct ResourceStore<T> {
    inner: RwLock<Inner<T>>,
    lock_tokens: bool,
    unique_names: bool,
}

impl<T: Resource> Default for ResourceStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> ResourceStore<T> {
    /// A store that enforces unique names and issues no lock tokens.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            lock_tokens: false,
            unique_names: true,
        }
    }

    /// Issue and verify lock tokens on every mutation.
    #[must_use]
    pub fn with_lock_tokens(mut self) -> Self {
        self.lock_tokens = true;
        self
    }

    /// Allow several records to share a uniqueness key.
    #[must_use]
    pub fn allow_duplicate_names(mut self) -> Self {
        self.unique_names = false;
        self
    }

    /// Insert a new record under `id`.
    ///
    /// # Errors
    /// [`StoreError::AlreadyExists`] if the id is taken, or the uniqueness key
    /// is taken while names are unique.
    pub fn create(&self, id: impl Into<String>, value: T) -> Result<Record<T>, StoreError> {
        let id = id.into();
        let mut inner = self.inner.write();
        if inner.records.contains_key(&id)
            || (self.unique_names && inner.name_taken(&value.uniqueness_key(), None))
        {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                name: value.name().to_owned(),
            });
        }
        let record = inner.insert(id, value, self.lock_tokens);
        tracing::debug!(kind = T::KIND, id = %record.id, "created record");
        Ok(record)
    }

    /// Insert, or merge into the record sharing the same uniqueness key.
    ///
    /// An existing record keeps its id and creation time; `merge` receives the
    /// stored value and the incoming one. Returns the record and whether it
    /// was newly created.
    pub fn upsert(
        &self,
        value: T,
        new_id: impl FnOnce() -> String,
        merge: impl FnOnce(&mut T, T),
    ) -> (Record<T>, bool) {
        let key = value.uniqueness_key();
        let mut inner = self.inner.write();
        let lock_tokens = self.lock_tokens;
        if let Some(existing) = inner
            .records
            .values_mut()
            .find(|r| r.value.uniqueness_key() == key)
        {
            merge(&mut existing.value, value);
            if lock_tokens {
                existing.lock_token = Some(LockToken::generate());
            }
            return (existing.clone(), false);
        }
        let record = inner.insert(new_id(), value, lock_tokens);
        tracing::debug!(kind = T::KIND, id = %record.id, "created record");
        (record, true)
    }

    /// Insert, or wholesale replace the value of the record sharing the same
    /// uniqueness key while preserving its id and creation time.
    pub fn create_or_replace(&self, value: T, new_id: impl FnOnce() -> String) -> (Record<T>, bool) {
        self.upsert(value, new_id, |old, new| *old = new)
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Record<T>> {
        self.inner.read().records.get(id).cloned()
    }

    /// Look up a record by id, failing with [`StoreError::NotFound`].
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when no record has this id.
    pub fn require(&self, id: &str) -> Result<Record<T>, StoreError> {
        self.get(id).ok_or_else(|| not_found::<T>(id))
    }

    /// Borrow a record under the read lock without cloning it.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] when no record has this id.
    pub fn inspect<R>(&self, id: &str, f: impl FnOnce(&Record<T>) -> R) -> Result<R, StoreError> {
        let inner = self.inner.read();
        inner.records.get(id).map(f).ok_or_else(|| not_found::<T>(id))
    }

    /// First record (in listing order) whose value matches `pred`.
    #[must_use]
    pub fn find(&self, pred: impl Fn(&T) -> bool) -> Option<Record<T>> {
        self.list_where(pred).into_iter().next()
    }

    /// Every record, in listing order.
    #[must_use]
    pub fn list(&self) -> Vec<Record<T>> {
        self.list_where(|_| true)
    }

    /// Every record whose value matches `pred`, in listing order.
    #[must_use]
    pub fn list_where(&self, pred: impl Fn(&T) -> bool) -> Vec<Record<T>> {
        let mut items: Vec<Record<T>> = self
            .inner
            .read()
            .records
            .values()
            .filter(|r| pred(&r.value))
            .cloned()
            .collect();
        items.sort_by(compare::<T>);
        items
    }

    /// One page of the filtered listing, starting after `token`.
    ///
    /// At most `max` records are returned (at least one if any remain).
    ///
    /// # Errors
    /// [`StoreError::InvalidToken`] if `token` was not produced by this store.
    pub fn page(
        &self,
        pred: impl Fn(&T) -> bool,
        max: usize,
        token: Option<&str>,
    ) -> Result<Page<T>, StoreError> {
        let cursor = token.map(Cursor::decode).transpose()?;
        let mut items: Vec<Record<T>> = self
            .list_where(pred)
            .into_iter()
            .filter(|r| {
                cursor
                    .as_ref()
                    .is_none_or(|c| c.cmp_record::<T>(r) == Ordering::Less)
            })
            .collect();

        let max = max.max(1);
        let next_token = if items.len() > max {
            items.truncate(max);
            items.last().map(|r| Cursor::of(r).encode())
        } else {
            None
        };
        Ok(Page { items, next_token })
    }

    /// Mutate a record in place.
    ///
    /// `f` runs against a copy of the value; the copy is committed only when
    /// `f` succeeds, so a failed mutation leaves the record untouched. When
    /// the store issues lock tokens and `token` is given, it must match the
    /// current token; on success a new token is issued.
    ///
    /// # Errors
    /// [`StoreError::NotFound`], [`StoreError::LockConflict`],
    /// [`StoreError::AlreadyExists`] (if the mutation renamed onto a taken
    /// name), or whatever `f` returns.
    pub fn update<R, E>(
        &self,
        id: &str,
        token: Option<&str>,
        f: impl FnOnce(&mut T) -> Result<R, E>,
    ) -> Result<Mutation<R>, E>
    where
        E: From<StoreError>,
    {
        let mut inner = self.inner.write();
        let record = inner.records.get(id).ok_or_else(|| not_found::<T>(id))?;
        self.check_token(record, token)?;

        let mut value = record.value.clone();
        let output = f(&mut value)?;

        let key = value.uniqueness_key();
        if self.unique_names && inner.name_taken(&key, Some(id)) {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                name: value.name().to_owned(),
            }
            .into());
        }

        let lock_token = self.lock_tokens.then(LockToken::generate);
        if let Some(record) = inner.records.get_mut(id) {
            record.value = value;
            record.lock_token.clone_from(&lock_token);
        }
        Ok(Mutation { output, lock_token })
    }

    /// Remove a record and everything nested in it.
    ///
    /// # Errors
    /// [`StoreError::NotFound`] or [`StoreError::LockConflict`].
    pub fn delete(&self, id: &str, token: Option<&str>) -> Result<Record<T>, StoreError> {
        self.remove_if(id, token, |_| Ok(()))
    }

    /// Remove a record only if `check` accepts its current value.
    ///
    /// The check and the removal happen under one write lock.
    ///
    /// # Errors
    /// [`StoreError::NotFound`], [`StoreError::LockConflict`], or whatever
    /// `check` returns.
    pub fn remove_if<E>(
        &self,
        id: &str,
        token: Option<&str>,
        check: impl FnOnce(&T) -> Result<(), E>,
    ) -> Result<Record<T>, E>
    where
        E: From<StoreError>,
    {
        let mut inner = self.inner.write();
        let record = inner.records.get(id).ok_or_else(|| not_found::<T>(id))?;
        self.check_token(record, token)?;
        check(&record.value)?;
        let removed = inner.records.remove(id).ok_or_else(|| not_found::<T>(id))?;
        tracing::debug!(kind = T::KIND, id, "deleted record");
        Ok(removed)
    }

    /// Discard every record.
    pub fn reset(&self) {
        *self.inner.write() = Inner::default();
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    fn check_token(&self, record: &Record<T>, token: Option<&str>) -> Result<(), StoreError> {
        if !self.lock_tokens {
            return Ok(());
        }
        match (token, record.lock_token.as_ref()) {
            (Some(given), Some(current)) if given == current.as_str() => Ok(()),
            (_, None) => Ok(()),
            _ => Err(StoreError::LockConflict {
                kind: T::KIND,
                id: record.id.clone(),
            }),
        }
    }
}

fn not_found<T: Resource>(id: &str) -> StoreError {
    StoreError::NotFound {
        kind: T::KIND,
        id: id.to_owned(),
    }
}

fn compare<T: Resource>(a: &Record<T>, b: &Record<T>) -> Ordering {
    match T::ORDER {
        ListOrder::Name => a
            .value
            .name()
            .cmp(b.value.name())
            .then(a.seq.cmp(&b.seq)),
        ListOrder::Creation => a.seq.cmp(&b.seq),
    }
}

/// Position of the last record on a page.
#[derive(Debug, PartialEq, Eq)]
struct Cursor {
    seq: u64,
    name: String,
}

impl Cursor {
    fn of<T: Resource>(record: &Record<T>) -> Self {
        Self {
            seq: record.seq,
            name: record.value.name().to_owned(),
        }
    }

    fn encode(&self) -> String {
        TOKEN_ENCODING.encode(format!("{}:{}", self.seq, self.name))
    }

    fn decode(token: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidToken(token.to_owned());
        let raw = TOKEN_ENCODING.decode(token).map_err(|_| invalid())?;
        let raw = String::from_utf8(raw).map_err(|_| invalid())?;
        let (seq, name) = raw.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            seq: seq.parse().map_err(|_| invalid())?,
            name: name.to_owned(),
        })
    }

    /// Ordering of the cursor relative to a record, in listing order.
    fn cmp_record<T: Resource>(&self, record: &Record<T>) -> Ordering {
        match T::ORDER {
            ListOrder::Name => self
                .name
                .as_str()
                .cmp(record.value.name())
                .then(self.seq.cmp(&record.seq)),
            ListOrder::Creation => self.seq.cmp(&record.seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Widget {
        name: String,
        size: u32,
    }

    impl Resource for Widget {
        const KIND: &'static str = "Widget";

        fn name(&self) -> &str {
            &self.name
        }
    }

    #[derive(Debug, Clone)]
    struct Event {
        label: String,
    }

    impl Resource for Event {
        const KIND: &'static str = "Event";
        const ORDER: ListOrder = ListOrder::Creation;

        fn name(&self) -> &str {
            &self.label
        }
    }

    fn widget(name: &str) -> Widget {
        Widget {
            name: name.to_owned(),
            size: 1,
        }
    }

    #[test]
    fn test_should_create_list_and_delete() {
        let store = ResourceStore::new();
        store.create("id-b", widget("b")).unwrap();
        store.create("id-a", widget("a")).unwrap();

        let names: Vec<_> = store.list().into_iter().map(|r| r.value.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        store.delete("id-a", None).unwrap();
        store.delete("id-b", None).unwrap();
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_should_reject_duplicate_name() {
        let store = ResourceStore::new();
        store.create("1", widget("dup")).unwrap();
        let err = store.create("2", widget("dup")).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { kind: "Widget", .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_allow_duplicate_names_when_configured() {
        let store = ResourceStore::new().allow_duplicate_names();
        store.create("1", widget("dup")).unwrap();
        store.create("2", widget("dup")).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_should_preserve_id_on_upsert() {
        let store = ResourceStore::new();
        let (first, created) = store.create_or_replace(widget("w"), || "first".to_owned());
        assert!(created);

        let bigger = Widget {
            name: "w".to_owned(),
            size: 9,
        };
        let (second, created) = store.create_or_replace(bigger, || "second".to_owned());
        assert!(!created);
        assert_eq!(second.id, first.id);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(store.require("first").unwrap().value.size, 9);
    }

    #[test]
    fn test_should_report_missing_kind_and_id() {
        let store: ResourceStore<Widget> = ResourceStore::new();
        let err = store.delete("nope", None).unwrap_err();
        assert_eq!(err.to_string(), "Widget nope does not exist");
    }

    #[test]
    fn test_should_reject_stale_lock_token() {
        let store = ResourceStore::new().with_lock_tokens();
        let record = store.create("acl", widget("acl")).unwrap();
        let token = record.lock_token.unwrap();

        let err = store
            .update("acl", Some("stale"), |w: &mut Widget| {
                w.size = 5;
                Ok::<_, StoreError>(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::LockConflict { .. }));
        assert_eq!(store.require("acl").unwrap().value.size, 1);

        let mutation = store
            .update("acl", Some(token.as_str()), |w: &mut Widget| {
                w.size = 5;
                Ok::<_, StoreError>(())
            })
            .unwrap();
        let new_token = mutation.lock_token.unwrap();
        assert_ne!(new_token, token);
        assert_eq!(store.require("acl").unwrap().value.size, 5);

        assert!(store.delete("acl", Some(token.as_str())).is_err());
        assert_eq!(store.len(), 1);
        store.delete("acl", Some(new_token.as_str())).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_should_require_token_when_locking_enabled() {
        let store = ResourceStore::new().with_lock_tokens();
        store.create("acl", widget("acl")).unwrap();

        let err = store
            .update("acl", None, |w: &mut Widget| {
                w.size = 9;
                Ok::<_, StoreError>(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::LockConflict { .. }));
        assert_eq!(store.require("acl").unwrap().value.size, 1);

        let err = store.delete("acl", None).unwrap_err();
        assert!(matches!(err, StoreError::LockConflict { .. }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_ignore_token_when_locking_disabled() {
        let store = ResourceStore::new();
        store.create("plain", widget("plain")).unwrap();
        store.delete("plain", None).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_should_leave_value_untouched_when_closure_fails() {
        let store = ResourceStore::new();
        store.create("w", widget("w")).unwrap();
        let result = store.update("w", None, |w: &mut Widget| {
            w.size = 42;
            Err::<(), _>(StoreError::InvalidToken("boom".to_owned()))
        });
        assert!(result.is_err());
        assert_eq!(store.require("w").unwrap().value.size, 1);
    }

    #[test]
    fn test_should_reject_rename_onto_taken_name() {
        let store = ResourceStore::new();
        store.create("1", widget("a")).unwrap();
        store.create("2", widget("b")).unwrap();
        let err = store
            .update("2", None, |w: &mut Widget| {
                w.name = "a".to_owned();
                Ok::<_, StoreError>(())
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_should_paginate_in_name_order() {
        let store = ResourceStore::new();
        for name in ["d", "b", "a", "c", "e"] {
            store.create(name, widget(name)).unwrap();
        }

        let first = store.page(|_| true, 2, None).unwrap();
        let names: Vec<_> = first.items.iter().map(|r| r.value.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);

        let token = first.next_token.unwrap();
        let second = store.page(|_| true, 2, Some(&token)).unwrap();
        let names: Vec<_> = second.items.iter().map(|r| r.value.name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);

        let token = second.next_token.unwrap();
        let third = store.page(|_| true, 2, Some(&token)).unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next_token.is_none());
    }

    #[test]
    fn test_should_list_in_creation_order() {
        let store = ResourceStore::new().allow_duplicate_names();
        for (i, label) in ["z", "a", "m"].iter().enumerate() {
            store
                .create(
                    i.to_string(),
                    Event {
                        label: (*label).to_owned(),
                    },
                )
                .unwrap();
        }
        let labels: Vec<_> = store.list().into_iter().map(|r| r.value.label).collect();
        assert_eq!(labels, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_should_reject_garbage_token() {
        let store: ResourceStore<Widget> = ResourceStore::new();
        let err = store.page(|_| true, 10, Some("%%%")).unwrap_err();
        assert!(matches!(err, StoreError::InvalidToken(_)));
    }

    #[test]
    fn test_should_keep_record_when_removal_check_fails() {
        let store = ResourceStore::new();
        store.create("w", widget("w")).unwrap();
        let result = store.remove_if("w", None, |w: &Widget| {
            if w.size > 0 {
                Err(StoreError::InvalidToken("not empty".to_owned()))
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_should_reset_to_empty() {
        let store = ResourceStore::new();
        store.create("1", widget("a")).unwrap();
        store.reset();
        store.reset();
        assert!(store.is_empty());
        store.create("1", widget("a")).unwrap();
    }
}
