use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::{Error, Result};
use crate::types::{CodeFile, Comment, CommentThread, Review, ReviewComments, Revision};

/// Opens (or creates) the SQLite database at `path`, configures WAL mode,
/// and applies schema migrations via the `schema_version` table.
///
/// This function is the single entry point for all database connections.
/// It sets `busy_timeout` via the `Connection` method (not a PRAGMA string) to
/// ensure the setting takes effect regardless of pragma caching.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the file cannot be opened, WAL configuration
/// fails, or schema DDL fails.
pub async fn open_db(path: &str) -> std::result::Result<Connection, tokio_rusqlite::Error> {
    let conn = Connection::open(path).await?;

    conn.call(|db| {
        db.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;",
        )?;
        db.busy_timeout(Duration::from_secs(5))?;
        Ok(())
    })
    .await?;

    conn.call(|db| {
        crate::schema::migrate(db)?;
        Ok(())
    })
    .await?;

    tracing::debug!(path, "database ready");
    Ok(conn)
}

/// Returns the current Unix timestamp in seconds.
fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn revision_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: r.get(0)?,
        review_id: r.get(1)?,
        number: r.get(2)?,
        label: r.get(3)?,
        author: r.get(4)?,
        created_at: r.get(5)?,
        code_file_id: r.get(6)?,
    })
}

/// Creates an empty review (no revisions yet).
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the insert transaction fails.
pub async fn create_review(
    conn: &Connection,
    name: &str,
    author: &str,
) -> std::result::Result<Review, tokio_rusqlite::Error> {
    let name = name.to_owned();
    let author = author.to_owned();

    conn.call(move |db| {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_secs();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO reviews (id, name, author, is_closed, created_at, updated_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?4)",
            rusqlite::params![&id, &name, &author, now],
        )?;
        tx.commit()?;
        Ok(Review {
            id,
            name,
            author,
            is_closed: false,
            created_at: now,
            updated_at: now,
            revisions: Vec::new(),
        })
    })
    .await
}

/// Appends a revision to `review_id` from an uploaded source document.
///
/// The document is parsed up front; the source bytes and the parsed code file
/// are stored together so the code file can be regenerated later by
/// [`update_review`]. The revision number is one past the current maximum.
///
/// # Errors
///
/// Returns `Error::CodeFileDecode` for an unparsable document,
/// `Error::ReviewNotFound` if the review does not exist, and
/// `Error::Database` if the write fails.
pub async fn add_revision(
    conn: &Connection,
    review_id: &str,
    author: &str,
    label: Option<&str>,
    source: &[u8],
) -> Result<Revision> {
    let code_file = CodeFile::parse(source)?;
    let content = serde_json::to_vec(&code_file)?;
    let review_id = review_id.to_owned();
    let author = author.to_owned();
    let label = label.map(str::to_owned);
    let source = source.to_vec();

    let lookup_id = review_id.clone();
    let revision = conn
        .call(move |db| -> rusqlite::Result<Option<Revision>> {
            let now = now_secs();
            let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

            let exists = tx
                .query_row(
                    "SELECT 1 FROM reviews WHERE id = ?1",
                    rusqlite::params![&review_id],
                    |_| Ok(()),
                )
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }

            let number: i64 = tx.query_row(
                "SELECT COALESCE(MAX(number), 0) + 1 FROM revisions WHERE review_id = ?1",
                rusqlite::params![&review_id],
                |r| r.get(0),
            )?;
            let code_file_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO code_files (id, content, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![&code_file_id, &content, now],
            )?;
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO revisions
                     (id, review_id, number, label, author, created_at, source, code_file_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![&id, &review_id, number, &label, &author, now, &source, &code_file_id],
            )?;
            tx.execute(
                "UPDATE reviews SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, &review_id],
            )?;
            tx.commit()?;
            Ok(Some(Revision {
                id,
                review_id,
                number,
                label,
                author,
                created_at: now,
                code_file_id,
            }))
        })
        .await?;

    revision.ok_or(Error::ReviewNotFound(lookup_id))
}

/// Loads a review and its revisions ordered by revision number.
///
/// Returns `None` when no review has that id.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if either query fails.
pub async fn load_review(
    conn: &Connection,
    review_id: &str,
) -> std::result::Result<Option<Review>, tokio_rusqlite::Error> {
    let review_id = review_id.to_owned();

    conn.call(move |db| {
        let review = db
            .query_row(
                "SELECT id, name, author, is_closed, created_at, updated_at
                 FROM reviews WHERE id = ?1",
                rusqlite::params![&review_id],
                |r| {
                    Ok(Review {
                        id: r.get(0)?,
                        name: r.get(1)?,
                        author: r.get(2)?,
                        is_closed: r.get(3)?,
                        created_at: r.get(4)?,
                        updated_at: r.get(5)?,
                        revisions: Vec::new(),
                    })
                },
            )
            .optional()?;

        let Some(mut review) = review else {
            return Ok(None);
        };

        let mut stmt = db.prepare(
            "SELECT id, review_id, number, label, author, created_at, code_file_id
             FROM revisions WHERE review_id = ?1 ORDER BY number ASC",
        )?;
        review.revisions = stmt
            .query_map(rusqlite::params![&review_id], revision_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Some(review))
    })
    .await
}

/// Loads and decodes the code file stored under `code_file_id`.
///
/// Returns `Ok(None)` when no such row exists.
///
/// # Errors
///
/// Returns `Error::Database` if the query fails and `Error::CodeFileDecode` if
/// the stored JSON does not decode.
pub async fn load_code_file(conn: &Connection, code_file_id: &str) -> Result<Option<CodeFile>> {
    let code_file_id = code_file_id.to_owned();

    let content = conn
        .call(move |db| -> rusqlite::Result<Option<Vec<u8>>> {
            let content = db
                .query_row(
                    "SELECT content FROM code_files WHERE id = ?1",
                    rusqlite::params![&code_file_id],
                    |r| r.get(0),
                )
                .optional()?;
            Ok(content)
        })
        .await?;

    match content {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Regenerates every revision's cached code file from its uploaded source.
///
/// Each revision gets a freshly inserted `code_files` row and is repointed to
/// it inside one `BEGIN IMMEDIATE` transaction; revision ids and numbers do not
/// change. Returns the number of revisions refreshed.
///
/// # Errors
///
/// Returns `Error::ReviewNotFound` for an unknown review, `Error::CodeFileDecode`
/// if a stored source no longer parses, and `Error::Database` on write failure.
pub async fn update_review(conn: &Connection, review_id: &str) -> Result<usize> {
    let id = review_id.to_owned();

    let sources = conn
        .call(move |db| -> rusqlite::Result<Option<Vec<(String, Vec<u8>)>>> {
            let exists = db
                .query_row("SELECT 1 FROM reviews WHERE id = ?1", rusqlite::params![&id], |_| {
                    Ok(())
                })
                .optional()?;
            if exists.is_none() {
                return Ok(None);
            }
            let mut stmt = db.prepare(
                "SELECT id, source FROM revisions WHERE review_id = ?1 ORDER BY number ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![&id], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(Some(rows))
        })
        .await?;

    let Some(sources) = sources else {
        return Err(Error::ReviewNotFound(review_id.to_owned()));
    };

    let mut regenerated = Vec::with_capacity(sources.len());
    for (revision_id, source) in sources {
        let code_file = CodeFile::parse(&source)?;
        regenerated.push((revision_id, serde_json::to_vec(&code_file)?));
    }

    let count = regenerated.len();
    let id = review_id.to_owned();
    conn.call(move |db| -> rusqlite::Result<()> {
        let now = now_secs();
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        for (revision_id, content) in &regenerated {
            let code_file_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO code_files (id, content, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![&code_file_id, content, now],
            )?;
            tx.execute(
                "UPDATE revisions SET code_file_id = ?1 WHERE id = ?2",
                rusqlite::params![&code_file_id, revision_id],
            )?;
        }
        tx.execute(
            "UPDATE reviews SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, &id],
        )?;
        tx.commit()?;
        Ok(())
    })
    .await?;

    Ok(count)
}

/// Flips the closed flag of `review_id` and returns the new state.
///
/// Returns `None` when the review does not exist.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the transaction fails.
pub async fn toggle_review_closed(
    conn: &Connection,
    review_id: &str,
) -> std::result::Result<Option<bool>, tokio_rusqlite::Error> {
    let review_id = review_id.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let current: Option<bool> = tx
            .query_row(
                "SELECT is_closed FROM reviews WHERE id = ?1",
                rusqlite::params![&review_id],
                |r| r.get(0),
            )
            .optional()?;

        let Some(current) = current else {
            return Ok(None);
        };

        let new_state = !current;
        tx.execute(
            "UPDATE reviews SET is_closed = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![new_state, now_secs(), &review_id],
        )?;
        tx.commit()?;
        Ok(Some(new_state))
    })
    .await
}

/// Adds a comment on `element_id`, starting a thread if none exists yet.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the insert fails (including a foreign-key
/// violation for an unknown review).
pub async fn add_comment(
    conn: &Connection,
    review_id: &str,
    revision_id: Option<&str>,
    element_id: &str,
    author: &str,
    body: &str,
) -> std::result::Result<Comment, tokio_rusqlite::Error> {
    let comment = Comment {
        id: uuid::Uuid::new_v4().to_string(),
        review_id: review_id.to_owned(),
        revision_id: revision_id.map(str::to_owned),
        element_id: element_id.to_owned(),
        author: author.to_owned(),
        body: body.to_owned(),
        created_at: now_secs(),
    };

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO comments
                 (id, review_id, revision_id, element_id, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &comment.id,
                &comment.review_id,
                &comment.revision_id,
                &comment.element_id,
                &comment.author,
                &comment.body,
                comment.created_at
            ],
        )?;
        tx.commit()?;
        Ok(comment)
    })
    .await
}

/// Marks the thread on `element_id` resolved (or reopens it).
///
/// Resolving is an upsert so the latest resolver wins; reopening deletes the row.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the transaction fails.
pub async fn set_thread_resolved(
    conn: &Connection,
    review_id: &str,
    element_id: &str,
    user: &str,
    resolved: bool,
) -> std::result::Result<(), tokio_rusqlite::Error> {
    let review_id = review_id.to_owned();
    let element_id = element_id.to_owned();
    let user = user.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        if resolved {
            tx.execute(
                "INSERT INTO thread_resolutions (review_id, element_id, resolved_by, resolved_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(review_id, element_id)
                 DO UPDATE SET resolved_by = excluded.resolved_by,
                               resolved_at = excluded.resolved_at",
                rusqlite::params![&review_id, &element_id, &user, now_secs()],
            )?;
        } else {
            tx.execute(
                "DELETE FROM thread_resolutions WHERE review_id = ?1 AND element_id = ?2",
                rusqlite::params![&review_id, &element_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
    .await
}

/// Loads all comments of `review_id` grouped into threads by element id.
///
/// Threads appear in the order of their first comment. A thread is resolved
/// when `thread_resolutions` has a row for its element id.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if either query fails.
pub async fn load_review_comments(
    conn: &Connection,
    review_id: &str,
) -> std::result::Result<ReviewComments, tokio_rusqlite::Error> {
    let id = review_id.to_owned();

    let (comments, resolutions) = conn
        .call(move |db| -> rusqlite::Result<(Vec<Comment>, HashMap<String, String>)> {
            let mut stmt = db.prepare(
                "SELECT id, review_id, revision_id, element_id, author, body, created_at
                 FROM comments WHERE review_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )?;
            let comments = stmt
                .query_map(rusqlite::params![&id], |r| {
                    Ok(Comment {
                        id: r.get(0)?,
                        review_id: r.get(1)?,
                        revision_id: r.get(2)?,
                        element_id: r.get(3)?,
                        author: r.get(4)?,
                        body: r.get(5)?,
                        created_at: r.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            let mut stmt = db.prepare(
                "SELECT element_id, resolved_by FROM thread_resolutions WHERE review_id = ?1",
            )?;
            let resolutions = stmt
                .query_map(rusqlite::params![&id], |r| {
                    let element_id: String = r.get(0)?;
                    let resolved_by: String = r.get(1)?;
                    Ok((element_id, resolved_by))
                })?
                .collect::<rusqlite::Result<HashMap<_, _>>>()?;
            Ok((comments, resolutions))
        })
        .await?;

    let mut threads: Vec<CommentThread> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for comment in comments {
        let slot = *index.entry(comment.element_id.clone()).or_insert_with(|| {
            let resolved_by = resolutions.get(&comment.element_id).cloned();
            threads.push(CommentThread {
                element_id: comment.element_id.clone(),
                comments: Vec::new(),
                is_resolved: resolved_by.is_some(),
                resolved_by,
            });
            threads.len() - 1
        });
        threads[slot].comments.push(comment);
    }

    Ok(ReviewComments::new(review_id, threads))
}

/// Toggles `user`'s subscription to `review_id` and returns the new state.
///
/// Returns `None` when the review does not exist.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the transaction fails.
pub async fn toggle_subscription(
    conn: &Connection,
    review_id: &str,
    user: &str,
) -> std::result::Result<Option<bool>, tokio_rusqlite::Error> {
    let review_id = review_id.to_owned();
    let user = user.to_owned();

    conn.call(move |db| {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM reviews WHERE id = ?1",
                rusqlite::params![&review_id],
                |_| Ok(()),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let removed = tx.execute(
            "DELETE FROM subscriptions WHERE review_id = ?1 AND user_name = ?2",
            rusqlite::params![&review_id, &user],
        )?;
        if removed == 0 {
            tx.execute(
                "INSERT INTO subscriptions (review_id, user_name, created_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![&review_id, &user, now_secs()],
            )?;
        }
        tx.commit()?;
        Ok(Some(removed == 0))
    })
    .await
}

/// Returns whether `user` is subscribed to `review_id`.
///
/// # Errors
///
/// Returns `tokio_rusqlite::Error` if the query fails.
pub async fn is_subscribed(
    conn: &Connection,
    review_id: &str,
    user: &str,
) -> std::result::Result<bool, tokio_rusqlite::Error> {
    let review_id = review_id.to_owned();
    let user = user.to_owned();

    conn.call(move |db| {
        let found = db
            .query_row(
                "SELECT 1 FROM subscriptions WHERE review_id = ?1 AND user_name = ?2",
                rusqlite::params![&review_id, &user],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    })
    .await
}
