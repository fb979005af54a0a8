//! Abstraction over the shared real-time key-value relay store.
//!
//! The relay is an external collaborator: a multi-reader/multi-writer
//! hierarchical key-value store with change notification, used purely as a
//! transport for presence and signaling. This crate never assumes mutual
//! exclusion on it and treats every read as a snapshot, not a lock.

mod key;

use std::collections::HashMap;

use async_trait::async_trait;
use derive_more::Display;
use failure::Fail;
use futures::stream::BoxStream;
use serde_json::Value;

#[doc(inline)]
pub use self::key::Key;

/// Error of a [`RelayChannel`] operation.
///
/// Relay failures are non-fatal for the local media session: voice can
/// still be toggled locally, but connections to other peers cannot be
/// established while the relay is unreachable.
#[derive(Clone, Debug, Display, Fail)]
pub enum RelayError {
    /// Write or delete against the relay failed.
    #[display(fmt = "relay write to [key = {}] failed: {}", _0, _1)]
    WriteFailed(Key, String),

    /// Subscription against the relay could not be established.
    #[display(fmt = "relay subscription to [key = {}] failed: {}", _0, _1)]
    SubscribeFailed(Key, String),
}

/// Shared real-time key-value store with change notification.
///
/// Implementations are externally synchronized and must tolerate
/// concurrent writes from other participants.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Writes `value` at `key`, overwriting any previous value.
    ///
    /// Overwrites are last-write-wins: repeated puts of the same value are
    /// idempotent and produce no duplicate entries.
    async fn put(&self, key: &Key, value: Value) -> Result<(), RelayError>;

    /// Removes the value (or list) stored at `key`, if any.
    async fn remove(&self, key: &Key) -> Result<(), RelayError>;

    /// Appends `value` to the list stored at `key`, preserving insertion
    /// order.
    async fn append(&self, key: &Key, value: Value) -> Result<(), RelayError>;

    /// Subscribes to the value stored at `key`.
    ///
    /// The stream yields the current value (or [`None`]) immediately, then
    /// a new item on every overwrite or removal.
    fn watch(&self, key: &Key) -> BoxStream<'static, Option<Value>>;

    /// Subscribes to the direct children of `key`.
    ///
    /// The stream yields the current child map immediately, then the full
    /// updated map on every change beneath `key`. Map keys are the child
    /// path segments.
    fn watch_children(
        &self,
        key: &Key,
    ) -> BoxStream<'static, HashMap<String, Value>>;

    /// Subscribes to the list stored at `key`.
    ///
    /// Only items appended after the subscription is established are
    /// yielded, each at most once per subscription.
    fn watch_list(&self, key: &Key) -> BoxStream<'static, Value>;
}
