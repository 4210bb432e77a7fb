//! New-style feed storage: two related tables keyed by internal pk.
//!
//! Post and comment ids exposed to callers ARE the internal pks. Unlike every
//! other collection, where the stable `id` field inside the doc is the
//! authoritative key, the new-style feed has no separate stable id; the stored
//! doc's `id` field is overridden from the pk on every read.

use sqlx::SqlitePool;

use crate::models::{FeedComment, FeedPage, FeedPost, NewFeedComment, NewFeedPost};
use crate::{now_millis, PersistenceError};

pub(crate) async fn create_post(
    pool: &SqlitePool,
    post: NewFeedPost,
) -> Result<FeedPost, PersistenceError> {
    let mut created = FeedPost {
        id: 0,
        author_id: post.author_id,
        author_name: post.author_name,
        body: post.body,
        image_url: post.image_url,
        hearts: 0,
        created_at: now_millis(),
        comments: Vec::new(),
    };
    let result = sqlx::query("INSERT INTO feed_posts (doc, created_at) VALUES (?, ?)")
        .bind(serde_json::to_string(&created)?)
        .bind(created.created_at)
        .execute(pool)
        .await?;
    created.id = result.last_insert_rowid();
    Ok(created)
}

/// Build a substring-match LIKE pattern. `%`, `_` and the escape character in
/// the query are escaped so they match literally, the way the file backend's
/// `contains` search treats them.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

pub(crate) async fn get_posts(
    pool: &SqlitePool,
    limit: u32,
    offset: u32,
    query: Option<&str>,
) -> Result<FeedPage, PersistenceError> {
    let pattern = query.map(like_pattern);

    let total: (i64,) = match &pattern {
        Some(p) => {
            sqlx::query_as(
                "SELECT COUNT(*) FROM feed_posts \
                 WHERE json_extract(doc, '$.body') LIKE ? ESCAPE '\\' \
                    OR json_extract(doc, '$.authorName') LIKE ? ESCAPE '\\'",
            )
            .bind(p)
            .bind(p)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT COUNT(*) FROM feed_posts")
                .fetch_one(pool)
                .await?
        }
    };

    let rows: Vec<(i64, String)> = match &pattern {
        Some(p) => {
            sqlx::query_as(
                "SELECT pk, doc FROM feed_posts \
                 WHERE json_extract(doc, '$.body') LIKE ? ESCAPE '\\' \
                    OR json_extract(doc, '$.authorName') LIKE ? ESCAPE '\\' \
                 ORDER BY created_at DESC, pk DESC LIMIT ? OFFSET ?",
            )
            .bind(p)
            .bind(p)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as(
                "SELECT pk, doc FROM feed_posts \
                 ORDER BY created_at DESC, pk DESC LIMIT ? OFFSET ?",
            )
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(pool)
            .await?
        }
    };

    let mut posts = Vec::with_capacity(rows.len());
    for (pk, doc) in rows {
        posts.push(hydrate_post(pool, pk, &doc).await?);
    }

    Ok(FeedPage {
        posts,
        total: total.0 as u64,
    })
}

pub(crate) async fn get_post_by_id(
    pool: &SqlitePool,
    id: i64,
) -> Result<Option<FeedPost>, PersistenceError> {
    let row: Option<(i64, String)> =
        sqlx::query_as("SELECT pk, doc FROM feed_posts WHERE pk = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
    match row {
        Some((pk, doc)) => Ok(Some(hydrate_post(pool, pk, &doc).await?)),
        None => Ok(None),
    }
}

/// Deleting a post cascades to its comments via the foreign key.
pub(crate) async fn delete_post(pool: &SqlitePool, id: i64) -> Result<bool, PersistenceError> {
    let result = sqlx::query("DELETE FROM feed_posts WHERE pk = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn create_comment(
    pool: &SqlitePool,
    comment: NewFeedComment,
) -> Result<FeedComment, PersistenceError> {
    let parent: Option<(i64,)> = sqlx::query_as("SELECT pk FROM feed_posts WHERE pk = ?")
        .bind(comment.post_id)
        .fetch_optional(pool)
        .await?;
    if parent.is_none() {
        return Err(PersistenceError::NotFound(format!(
            "feed post {}",
            comment.post_id
        )));
    }

    let mut created = FeedComment {
        id: 0,
        post_id: comment.post_id,
        author_id: comment.author_id,
        author_name: comment.author_name,
        body: comment.body,
        hearts: 0,
        created_at: now_millis(),
    };
    let result =
        sqlx::query("INSERT INTO feed_comments (post_pk, doc, created_at) VALUES (?, ?, ?)")
            .bind(created.post_id)
            .bind(serde_json::to_string(&created)?)
            .bind(created.created_at)
            .execute(pool)
            .await?;
    created.id = result.last_insert_rowid();
    Ok(created)
}

pub(crate) async fn delete_comment(pool: &SqlitePool, id: i64) -> Result<bool, PersistenceError> {
    let result = sqlx::query("DELETE FROM feed_comments WHERE pk = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn increment_post_hearts(
    pool: &SqlitePool,
    id: i64,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "UPDATE feed_posts SET doc = json_set(doc, '$.hearts', \
         COALESCE(json_extract(doc, '$.hearts'), 0) + 1) WHERE pk = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn increment_comment_hearts(
    pool: &SqlitePool,
    id: i64,
) -> Result<(), PersistenceError> {
    sqlx::query(
        "UPDATE feed_comments SET doc = json_set(doc, '$.hearts', \
         COALESCE(json_extract(doc, '$.hearts'), 0) + 1) WHERE pk = ?",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Parse a stored post doc, stamp its authoritative pk id, and attach its
/// comments oldest-first.
async fn hydrate_post(
    pool: &SqlitePool,
    pk: i64,
    doc: &str,
) -> Result<FeedPost, PersistenceError> {
    let mut post: FeedPost = serde_json::from_str(doc)?;
    post.id = pk;

    let rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT pk, doc FROM feed_comments WHERE post_pk = ? ORDER BY created_at ASC, pk ASC",
    )
    .bind(pk)
    .fetch_all(pool)
    .await?;

    post.comments = rows
        .into_iter()
        .map(|(comment_pk, comment_doc)| {
            let mut comment: FeedComment = serde_json::from_str(&comment_doc)?;
            comment.id = comment_pk;
            comment.post_id = pk;
            Ok(comment)
        })
        .collect::<Result<Vec<_>, PersistenceError>>()?;

    Ok(post)
}
