//! Shared application state handed to every request handler.

use std::sync::Arc;

use tokio_rusqlite::Connection;

use apiview_core::store::{
    CachedCodeFileStore, CodeFileStore, CommentStore, ReviewStore, SqliteStore, SubscriptionStore,
};

use crate::config::Config;
use crate::views::Views;

/// The four stores the review page reads from and writes to.
///
/// Each store is a trait object so the page controller never depends on the
/// backing database.
#[derive(Clone)]
pub struct Stores {
    pub reviews: Arc<dyn ReviewStore>,
    pub code_files: Arc<dyn CodeFileStore>,
    pub comments: Arc<dyn CommentStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
}

impl Stores {
    /// Backs every store with one SQLite connection.
    ///
    /// When `cache_capacity` is set, code files are served through a
    /// read-through cache holding at most that many entries.
    pub fn sqlite(conn: Connection, cache_capacity: Option<usize>) -> Self {
        let store = SqliteStore::new(conn);
        let code_files: Arc<dyn CodeFileStore> = match cache_capacity {
            Some(capacity) => Arc::new(CachedCodeFileStore::new(store.clone(), capacity)),
            None => Arc::new(store.clone()),
        };
        let sqlite = Arc::new(store);
        Self {
            reviews: sqlite.clone(),
            code_files,
            comments: sqlite.clone(),
            subscriptions: sqlite,
        }
    }
}

/// Axum router state. Cheap to clone: everything behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub views: Arc<Views>,
    /// Lowercased name of the header carrying the requesting user.
    pub user_header: Arc<str>,
}

impl AppState {
    pub fn new(stores: Stores, views: Views, user_header: &str) -> Self {
        Self {
            stores,
            views: Arc::new(views),
            user_header: Arc::from(user_header),
        }
    }

    /// Builds the state described by `config` on top of an open connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Template` if a bundled template fails to compile.
    pub fn from_config(config: &Config, conn: Connection) -> crate::error::Result<Self> {
        let cache = config
            .code_file_cache
            .then_some(config.code_file_cache_size);
        Ok(Self::new(
            Stores::sqlite(conn, cache),
            Views::new()?,
            &config.user_header,
        ))
    }
}
