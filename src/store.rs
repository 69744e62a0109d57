use crate::{
    chat::{title_from_query, Chat, ChatMessage, ChatSummary},
    entity::{Sender, User},
    error::{ApiError, ApiResult},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqliteConnection, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Create a new Store instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        Ok(Self { pool })
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at DATETIME NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                title TEXT NOT NULL DEFAULT 'New Chat',
                created_at DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_chats_user_created ON chats(user_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id TEXT NOT NULL REFERENCES chats(id),
                sender TEXT NOT NULL CHECK (sender IN ('user', 'bot')),
                text TEXT NOT NULL,
                timestamp DATETIME NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize database schema")?;

        Ok(())
    }

    /// Insert a new user. A taken username is a `Conflict`, whether it is
    /// caught here or by the UNIQUE constraint under a concurrent insert.
    pub async fn create_user(&self, username: &str, password_hash: &str) -> ApiResult<User> {
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, username, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(ApiError::Conflict("User already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> ApiResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE username = ?
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    /// All chats owned by `user_id`, newest first.
    pub async fn list_chats(&self, user_id: &str) -> ApiResult<Vec<ChatSummary>> {
        let chats = sqlx::query_as::<_, ChatSummary>(
            r#"
            SELECT id, title, created_at
            FROM chats
            WHERE user_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(chats)
    }

    /// Load a chat and its transcript. Absent and foreign chats both yield
    /// `NotFound`.
    pub async fn get_chat(&self, chat_id: &str, user_id: &str) -> ApiResult<Chat> {
        let mut conn = self.pool.acquire().await?;
        let summary = find_owned_chat(&mut *conn, chat_id, user_id).await?;

        let rows = sqlx::query(
            r#"
            SELECT sender, text, timestamp
            FROM messages
            WHERE chat_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(&summary.id)
        .fetch_all(&mut *conn)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let sender: String = row.try_get("sender")?;
            messages.push(ChatMessage {
                sender: sender.parse()?,
                text: row.try_get("text")?,
                timestamp: row.try_get("timestamp")?,
            });
        }

        Ok(Chat {
            id: summary.id,
            title: summary.title,
            created_at: summary.created_at,
            messages,
        })
    }

    /// Append one exchange (`user` message, then `bot` message) to a chat.
    ///
    /// With no `chat_id` a new chat owned by `user_id` is created and titled
    /// after `user_text`. Otherwise the chat must exist and belong to
    /// `user_id`. Everything happens in one transaction, so a rejected or
    /// failed append leaves the store untouched.
    pub async fn append_exchange(
        &self,
        chat_id: Option<&str>,
        user_id: &str,
        user_text: &str,
        bot_text: &str,
    ) -> ApiResult<String> {
        let mut tx = self.pool.begin().await?;

        let chat_id = match chat_id {
            Some(id) => find_owned_chat(&mut *tx, id, user_id).await?.id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO chats (id, user_id, title, created_at)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(user_id)
                .bind(title_from_query(user_text))
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                debug!("Created chat {} for user {}", id, user_id);
                id
            }
        };

        for msg in [
            ChatMessage::new(Sender::User, user_text),
            ChatMessage::new(Sender::Bot, bot_text),
        ] {
            sqlx::query(
                r#"
                INSERT INTO messages (chat_id, sender, text, timestamp)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&chat_id)
            .bind(msg.sender.as_str())
            .bind(&msg.text)
            .bind(msg.timestamp)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(chat_id)
    }
}

/// The single ownership check every chat access goes through. A chat that
/// is missing and a chat owned by someone else are reported identically.
async fn find_owned_chat(
    conn: &mut SqliteConnection,
    chat_id: &str,
    user_id: &str,
) -> ApiResult<ChatSummary> {
    if Uuid::parse_str(chat_id).is_err() {
        return Err(ApiError::NotFound);
    }

    let row = sqlx::query(
        r#"
        SELECT id, user_id, title, created_at
        FROM chats
        WHERE id = ?
        "#,
    )
    .bind(chat_id)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Err(ApiError::NotFound);
    };

    let owner: String = row.try_get("user_id")?;
    if owner != user_id {
        debug!("User {} denied access to chat {}", user_id, chat_id);
        return Err(ApiError::NotFound);
    }

    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    Ok(ChatSummary {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        created_at,
    })
}
