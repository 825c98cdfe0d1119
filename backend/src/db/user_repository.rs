use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    pub username: String,
    /// Salted hash, never the plaintext.
    pub password: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("User already exists")]
    Conflict,
}

#[derive(Clone, Debug)]
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    /// Opens (creating if needed) the SQLite database at `url` and makes sure
    /// the schema exists.
    pub async fn connect(url: &str) -> Result<Self, RepositoryError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    async fn create_schema(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS "user" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT,
                username TEXT NOT NULL,
                password TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(r#"CREATE UNIQUE INDEX IF NOT EXISTS user_email_unique ON "user" (email)"#)
            .execute(&self.pool)
            .await?;
        log::info!("Database tables ready");
        Ok(())
    }

    pub async fn create_user(
        &self,
        email: &str,
        username: &str,
        password_hash: &str,
    ) -> Result<User, RepositoryError> {
        if self.find_by_email(email).await?.is_some() {
            return Err(RepositoryError::Conflict);
        }

        let rec = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO "user" (email, username, password, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, email, username, password, created_at
            "#,
        )
        .bind(email)
        .bind(username)
        .bind(password_hash)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent registration for the same email.
            sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
            other => RepositoryError::Database(other),
        })?;
        Ok(rec)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        let rec = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, username, password, created_at
            FROM "user" WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rec)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn creates_and_finds_users() {
        let dir = tempfile::tempdir().unwrap();
        let repo = testing::temp_repository(dir.path()).await;

        let user = repo.create_user("a@example.com", "alice", "hash").await.unwrap();
        assert_eq!(user.email.as_deref(), Some("a@example.com"));
        assert_eq!(user.username, "alice");

        let found = repo.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.find_by_email("b@example.com").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn duplicate_email_is_a_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let repo = testing::temp_repository(dir.path()).await;
        repo.create_user("a@example.com", "alice", "hash").await.unwrap();
        let err = repo
            .create_user("a@example.com", "other", "hash")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict));
    }

    #[actix_web::test]
    async fn schema_creation_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("database.db").display());
        let first = UserRepository::connect(&url).await.unwrap();
        first.create_user("a@example.com", "alice", "hash").await.unwrap();
        drop(first);

        let second = UserRepository::connect(&url).await.unwrap();
        assert!(second.find_by_email("a@example.com").await.unwrap().is_some());
    }
}
