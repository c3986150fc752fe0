//! SQLite implementation of the `CredentialStore` port.

use std::sync::Arc;

use async_trait::async_trait;
use calsync_core::CredentialStore;
use calsync_domain::{Credential, Result, SyncEngineError};
use chrono::DateTime;
use rusqlite::{params, Error as SqlError, OptionalExtension};

use super::manager::SqlitePool;
use crate::errors::InfraError;

/// SQLite implementation of the credential store.
pub struct SqliteCredentialStore {
    pool: Arc<SqlitePool>,
}

impl SqliteCredentialStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn load_credential(&self, user_id: &str, provider: &str) -> Result<Option<Credential>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT user_id, provider, access_token, refresh_token, expires_at, invalidated
                 FROM credentials WHERE user_id = ?1 AND provider = ?2",
                params![user_id, provider],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()
            .map_err(|error: SqlError| InfraError::from(error))?;

        match row {
            None => Ok(None),
            Some((user_id, provider, access_token, refresh_token, expires_at, invalidated)) => {
                let expires_at = DateTime::from_timestamp(expires_at, 0).ok_or_else(|| {
                    SyncEngineError::Database(format!("timestamp out of range: {expires_at}"))
                })?;
                Ok(Some(Credential {
                    user_id,
                    provider,
                    access_token,
                    refresh_token,
                    expires_at,
                    invalidated,
                }))
            }
        }
    }

    async fn save_credential(&self, credential: &Credential) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO credentials (
                user_id, provider, access_token, refresh_token, expires_at, invalidated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                invalidated = excluded.invalidated",
            params![
                credential.user_id,
                credential.provider,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.timestamp(),
                credential.invalidated,
            ],
        )
        .map_err(InfraError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use calsync_domain::{DatabaseConfig, TokenGrant};
    use tempfile::TempDir;

    use super::*;

    fn store() -> (SqliteCredentialStore, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            path: dir.path().join("test.db").to_string_lossy().into_owned(),
            pool_size: 2,
        };
        let pool = Arc::new(SqlitePool::new(&config).unwrap());
        (SqliteCredentialStore::new(pool), dir)
    }

    #[tokio::test]
    async fn missing_credential_loads_as_none() {
        let (store, _dir) = store();
        assert!(store.load_credential("user-1", "google").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn credential_roundtrip_and_upsert() {
        let (store, _dir) = store();
        let grant = TokenGrant {
            access_token: "at-1".into(),
            refresh_token: Some("rt-1".into()),
            expires_in: 3_600,
        };
        let mut credential = grant.into_credential("user-1", "google");
        store.save_credential(&credential).await.unwrap();

        let loaded = store.load_credential("user-1", "google").await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "at-1");
        assert_eq!(loaded.refresh_token.as_deref(), Some("rt-1"));
        assert!(!loaded.invalidated);
        // Second precision survives the roundtrip.
        assert_eq!(loaded.expires_at.timestamp(), credential.expires_at.timestamp());

        // Overwrite with an invalidated version.
        credential.invalidated = true;
        credential.access_token = "at-2".into();
        store.save_credential(&credential).await.unwrap();

        let reloaded = store.load_credential("user-1", "google").await.unwrap().unwrap();
        assert_eq!(reloaded.access_token, "at-2");
        assert!(reloaded.invalidated);
    }
}
