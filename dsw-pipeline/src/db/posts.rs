//! Post persistence (write-once)

use dsw_common::models::Post;
use dsw_common::time::{from_epoch_millis, to_epoch_millis};
use dsw_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{from_json_list, parse_uuid, to_json_list};

/// Save a post. Re-saving the same id is a no-op; posts are immutable.
pub async fn save_post(pool: &SqlitePool, post: &Post) -> Result<()> {
    let images = to_json_list(&post.images)?;

    sqlx::query(
        r#"
        INSERT INTO posts (id, text, author, source, timestamp_ms, images, location)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO NOTHING
        "#,
    )
    .bind(post.id.to_string())
    .bind(&post.text)
    .bind(&post.author)
    .bind(&post.source)
    .bind(to_epoch_millis(post.timestamp))
    .bind(images)
    .bind(&post.location)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn load_post(pool: &SqlitePool, id: Uuid) -> Result<Option<Post>> {
    let row = sqlx::query(
        "SELECT id, text, author, source, timestamp_ms, images, location FROM posts WHERE id = ?",
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let id: String = row.get("id");
            let images: String = row.get("images");
            Ok(Some(Post {
                id: parse_uuid(&id)?,
                text: row.get("text"),
                author: row.get("author"),
                source: row.get("source"),
                timestamp: from_epoch_millis(row.get("timestamp_ms")),
                images: from_json_list(&images)?,
                location: row.get("location"),
            }))
        }
        None => Ok(None),
    }
}
