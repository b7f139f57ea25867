//! Seams to the hosted services.
//!
//! The synchronizer and the worker only see these traits, so tests can drive
//! them with in-memory fakes while the binary plugs in [`crate::firebase`].

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::RemoteError;
use crate::session::Session;
use crate::todo::{Draft, Item};

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, RemoteError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, RemoteError>;

    async fn sign_out(&self) -> Result<(), RemoteError>;

    /// Auth-state notifications. The receiver starts out holding the current
    /// session, so a fresh subscriber sees the state without waiting.
    fn subscribe(&self) -> watch::Receiver<Option<Session>>;
}

/// Per-user document collections, addressed by `user_id`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every item in the collection, in whatever order the store keeps them.
    async fn list_documents(&self, user_id: &str) -> Result<Vec<Item>, RemoteError>;

    async fn put_document(&self, user_id: &str, draft: &Draft) -> Result<(), RemoteError>;

    async fn delete_document(&self, user_id: &str, id: &str) -> Result<(), RemoteError>;
}
