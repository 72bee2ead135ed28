//! Store traits consumed by the review page, and their SQLite implementation.
//!
//! The page controller only sees the traits, so tests can swap in fakes and
//! the code-file store can be wrapped in a cache without the controller
//! noticing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_rusqlite::Connection;

use crate::db;
use crate::error::{Error, Result};
use crate::types::{CodeFile, Review, ReviewComments, Revision};

/// Loads and mutates reviews.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Load a review with its revisions in creation order.
    async fn get_review(&self, user: &str, review_id: &str) -> Result<Review>;

    /// Regenerate the review's cached code files from their uploaded sources.
    async fn update_review(&self, user: &str, review_id: &str) -> Result<()>;

    /// Flip the review's closed flag, returning the new state.
    async fn toggle_is_closed(&self, user: &str, review_id: &str) -> Result<bool>;
}

/// Fetches the parsed code file a revision points to.
#[async_trait]
pub trait CodeFileStore: Send + Sync {
    async fn get_code_file(&self, revision: &Revision) -> Result<Arc<CodeFile>>;
}

/// Loads a review's comment threads.
#[async_trait]
pub trait CommentStore: Send + Sync {
    async fn get_review_comments(&self, review_id: &str) -> Result<ReviewComments>;
}

/// Per-user notification subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Flip `user`'s subscription to the review, returning the new state.
    async fn toggle_subscribed(&self, user: &str, review_id: &str) -> Result<bool>;

    async fn is_subscribed(&self, user: &str, review_id: &str) -> Result<bool>;
}

/// All four stores backed by one SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[async_trait]
impl ReviewStore for SqliteStore {
    async fn get_review(&self, _user: &str, review_id: &str) -> Result<Review> {
        db::load_review(&self.conn, review_id)
            .await?
            .ok_or_else(|| Error::ReviewNotFound(review_id.to_owned()))
    }

    async fn update_review(&self, user: &str, review_id: &str) -> Result<()> {
        let refreshed = db::update_review(&self.conn, review_id).await?;
        tracing::info!(review_id, user, refreshed, "review model refreshed");
        Ok(())
    }

    async fn toggle_is_closed(&self, user: &str, review_id: &str) -> Result<bool> {
        let closed = db::toggle_review_closed(&self.conn, review_id)
            .await?
            .ok_or_else(|| Error::ReviewNotFound(review_id.to_owned()))?;
        tracing::info!(review_id, user, closed, "review closed state toggled");
        Ok(closed)
    }
}

#[async_trait]
impl CodeFileStore for SqliteStore {
    async fn get_code_file(&self, revision: &Revision) -> Result<Arc<CodeFile>> {
        db::load_code_file(&self.conn, &revision.code_file_id)
            .await?
            .map(Arc::new)
            .ok_or_else(|| Error::CodeFileNotFound(revision.code_file_id.clone()))
    }
}

#[async_trait]
impl CommentStore for SqliteStore {
    async fn get_review_comments(&self, review_id: &str) -> Result<ReviewComments> {
        Ok(db::load_review_comments(&self.conn, review_id).await?)
    }
}

#[async_trait]
impl SubscriptionStore for SqliteStore {
    async fn toggle_subscribed(&self, user: &str, review_id: &str) -> Result<bool> {
        let subscribed = db::toggle_subscription(&self.conn, review_id, user)
            .await?
            .ok_or_else(|| Error::ReviewNotFound(review_id.to_owned()))?;
        tracing::info!(review_id, user, subscribed, "subscription toggled");
        Ok(subscribed)
    }

    async fn is_subscribed(&self, user: &str, review_id: &str) -> Result<bool> {
        Ok(db::is_subscribed(&self.conn, review_id, user).await?)
    }
}

/// Read-through cache in front of another [`CodeFileStore`].
///
/// Keyed by code-file id: stored code files are never rewritten, so an entry
/// can only go stale by eviction, never by content. Oldest entries are evicted
/// first once `capacity` is reached.
pub struct CachedCodeFileStore<S> {
    inner: S,
    capacity: usize,
    entries: RwLock<CacheEntries>,
}

#[derive(Default)]
struct CacheEntries {
    files: HashMap<String, Arc<CodeFile>>,
    order: VecDeque<String>,
}

impl<S: CodeFileStore> CachedCodeFileStore<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            entries: RwLock::new(CacheEntries::default()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.files.len()
    }
}

#[async_trait]
impl<S: CodeFileStore> CodeFileStore for CachedCodeFileStore<S> {
    async fn get_code_file(&self, revision: &Revision) -> Result<Arc<CodeFile>> {
        if let Some(hit) = self.entries.read().await.files.get(&revision.code_file_id) {
            return Ok(Arc::clone(hit));
        }

        let file = self.inner.get_code_file(revision).await?;

        let mut entries = self.entries.write().await;
        if !entries.files.contains_key(&revision.code_file_id) {
            while entries.files.len() >= self.capacity {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                entries.files.remove(&oldest);
            }
            entries.order.push_back(revision.code_file_id.clone());
            entries
                .files
                .insert(revision.code_file_id.clone(), Arc::clone(&file));
        }
        Ok(file)
    }
}
