//! Credential and policy persistence interfaces + backends (C9).

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("a policy named '{0}' already exists")]
    DuplicateName(String),
    #[error("backend error: {0}")]
    Backend(String),
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
}

/// A row of the `client_api_keys` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientApiKey {
    pub id: i64,
    pub key_value: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: i64,
    pub metadata: Option<Value>,
}

/// A row of the `policies` table — a named, typed, JSON-configured
/// policy that the registry can instantiate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    pub config: Value,
    pub is_active: bool,
    pub description: Option<String>,
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Exact-value lookup. Returns inactive records too — the calling
    /// policy decides whether inactivity is disqualifying.
    async fn find_api_key(&self, key_value: &str) -> Result<Option<ClientApiKey>, RepositoryError>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Active-only lookup by name.
    async fn find_policy(&self, name: &str) -> Result<Option<PolicyConfig>, RepositoryError>;

    async fn list_policies(&self, active_only: bool) -> Result<Vec<PolicyConfig>, RepositoryError>;

    /// Fails with `DuplicateName` if a policy with this name exists.
    async fn create_policy(&self, policy: PolicyConfig) -> Result<PolicyConfig, RepositoryError>;

    /// Returns `None` if no policy with that id exists.
    async fn update_policy(
        &self,
        id: i64,
        policy: PolicyConfig,
    ) -> Result<Option<PolicyConfig>, RepositoryError>;
}

/// Always-available in-memory backend, backed by `RwLock<HashMap<..>>`
/// the way the teacher's fallback auth store works when no storage
/// feature is enabled.
#[derive(Default)]
pub struct InMemoryRepository {
    api_keys: RwLock<HashMap<String, ClientApiKey>>,
    policies: RwLock<HashMap<String, PolicyConfig>>,
    next_policy_id: std::sync::atomic::AtomicI64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_api_key(&self, key: ClientApiKey) {
        self.api_keys
            .write()
            .expect("api key store poisoned")
            .insert(key.key_value.clone(), key);
    }

    pub fn insert_policy(&self, policy: PolicyConfig) {
        self.policies
            .write()
            .expect("policy store poisoned")
            .insert(policy.name.clone(), policy);
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryRepository {
    async fn find_api_key(&self, key_value: &str) -> Result<Option<ClientApiKey>, RepositoryError> {
        Ok(self
            .api_keys
            .read()
            .expect("api key store poisoned")
            .get(key_value)
            .cloned())
    }
}

#[async_trait]
impl PolicyRepository for InMemoryRepository {
    async fn find_policy(&self, name: &str) -> Result<Option<PolicyConfig>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .expect("policy store poisoned")
            .get(name)
            .filter(|p| p.is_active)
            .cloned())
    }

    async fn list_policies(&self, active_only: bool) -> Result<Vec<PolicyConfig>, RepositoryError> {
        Ok(self
            .policies
            .read()
            .expect("policy store poisoned")
            .values()
            .filter(|p| !active_only || p.is_active)
            .cloned()
            .collect())
    }

    async fn create_policy(&self, mut policy: PolicyConfig) -> Result<PolicyConfig, RepositoryError> {
        let mut guard = self.policies.write().expect("policy store poisoned");
        if guard.contains_key(&policy.name) {
            return Err(RepositoryError::DuplicateName(policy.name));
        }
        policy.id = self
            .next_policy_id
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        guard.insert(policy.name.clone(), policy.clone());
        Ok(policy)
    }

    async fn update_policy(
        &self,
        id: i64,
        mut policy: PolicyConfig,
    ) -> Result<Option<PolicyConfig>, RepositoryError> {
        let mut guard = self.policies.write().expect("policy store poisoned");
        let existing_name = guard
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(name, _)| name.clone());
        let Some(existing_name) = existing_name else {
            return Ok(None);
        };
        guard.remove(&existing_name);
        policy.id = id;
        guard.insert(policy.name.clone(), policy.clone());
        Ok(Some(policy))
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub mod sql {
    //! SQL-backed repository, gated behind the `sqlite`/`postgres`
    //! features and built on a shared `sqlx::any::AnyPool`.

    use super::*;
    use sqlx::any::AnyPool;
    use sqlx::Row;

    pub struct SqlRepository {
        pool: AnyPool,
    }

    impl SqlRepository {
        pub async fn connect(database_url: &str) -> Result<Self, RepositoryError> {
            sqlx::any::install_default_drivers();
            let pool = AnyPool::connect(database_url).await?;
            Ok(Self { pool })
        }

        /// Creates the `policies`/`client_api_keys` tables if absent.
        /// Exercised by the conformance tests below; a real deployment is
        /// expected to run its own migration tooling ahead of startup.
        async fn ensure_schema(&self) -> Result<(), RepositoryError> {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS policies (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    type TEXT NOT NULL,
                    config TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL,
                    description TEXT
                )",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS client_api_keys (
                    id INTEGER PRIMARY KEY,
                    key_value TEXT NOT NULL UNIQUE,
                    name TEXT NOT NULL,
                    is_active BOOLEAN NOT NULL,
                    created_at INTEGER NOT NULL,
                    metadata_ TEXT
                )",
            )
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ApiKeyRepository for SqlRepository {
        async fn find_api_key(
            &self,
            key_value: &str,
        ) -> Result<Option<ClientApiKey>, RepositoryError> {
            let row = sqlx::query(
                "SELECT id, key_value, name, is_active, created_at, metadata_ FROM client_api_keys WHERE key_value = ?",
            )
            .bind(key_value)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(|r| ClientApiKey {
                id: r.get::<i64, _>("id"),
                key_value: r.get::<String, _>("key_value"),
                name: r.get::<String, _>("name"),
                is_active: r.get::<bool, _>("is_active"),
                created_at: r.get::<i64, _>("created_at"),
                metadata: r
                    .get::<Option<String>, _>("metadata_")
                    .and_then(|s| serde_json::from_str(&s).ok()),
            }))
        }
    }

    #[async_trait]
    impl PolicyRepository for SqlRepository {
        async fn find_policy(&self, name: &str) -> Result<Option<PolicyConfig>, RepositoryError> {
            let row = sqlx::query(
                "SELECT id, name, type, config, is_active, description FROM policies WHERE name = ? AND is_active = 1",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.map(row_to_policy))
        }

        async fn list_policies(&self, active_only: bool) -> Result<Vec<PolicyConfig>, RepositoryError> {
            let sql = if active_only {
                "SELECT id, name, type, config, is_active, description FROM policies WHERE is_active = 1"
            } else {
                "SELECT id, name, type, config, is_active, description FROM policies"
            };
            let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
            Ok(rows.into_iter().map(row_to_policy).collect())
        }

        async fn create_policy(&self, policy: PolicyConfig) -> Result<PolicyConfig, RepositoryError> {
            let existing = self.find_policy(&policy.name).await?;
            if existing.is_some() {
                return Err(RepositoryError::DuplicateName(policy.name));
            }
            let config_str = serde_json::to_string(&policy.config).unwrap_or_default();
            let result = sqlx::query(
                "INSERT INTO policies (name, type, config, is_active, description) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&policy.name)
            .bind(&policy.policy_type)
            .bind(&config_str)
            .bind(policy.is_active)
            .bind(&policy.description)
            .execute(&self.pool)
            .await?;
            Ok(PolicyConfig {
                id: result.last_insert_id().unwrap_or(0),
                ..policy
            })
        }

        async fn update_policy(
            &self,
            id: i64,
            policy: PolicyConfig,
        ) -> Result<Option<PolicyConfig>, RepositoryError> {
            let config_str = serde_json::to_string(&policy.config).unwrap_or_default();
            let result = sqlx::query(
                "UPDATE policies SET name = ?, type = ?, config = ?, is_active = ?, description = ? WHERE id = ?",
            )
            .bind(&policy.name)
            .bind(&policy.policy_type)
            .bind(&config_str)
            .bind(policy.is_active)
            .bind(&policy.description)
            .bind(id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                Ok(None)
            } else {
                Ok(Some(PolicyConfig { id, ..policy }))
            }
        }
    }

    fn row_to_policy(r: sqlx::any::AnyRow) -> PolicyConfig {
        let config_str: String = r.get("config");
        PolicyConfig {
            id: r.get::<i64, _>("id"),
            name: r.get::<String, _>("name"),
            policy_type: r.get::<String, _>("type"),
            config: serde_json::from_str(&config_str).unwrap_or(Value::Null),
            is_active: r.get::<bool, _>("is_active"),
            description: r.get::<Option<String>, _>("description"),
        }
    }

    /// Conformance tests run against an in-memory SQLite pool, matching
    /// the teacher's `sqlite::memory:` test convention
    /// (`chat_history_sqlite.rs`) rather than a `tempfile`-backed file.
    #[cfg(all(test, feature = "sqlite"))]
    mod tests {
        use super::*;
        use crate::repository::ApiKeyRepository;
        use crate::repository::PolicyRepository;

        async fn repo() -> SqlRepository {
            let repo = SqlRepository::connect("sqlite::memory:").await.unwrap();
            repo.ensure_schema().await.unwrap();
            repo
        }

        fn sample_policy(name: &str) -> PolicyConfig {
            PolicyConfig {
                id: 0,
                name: name.to_string(),
                policy_type: "noop".to_string(),
                config: Value::Object(Default::default()),
                is_active: true,
                description: None,
            }
        }

        #[tokio::test]
        async fn create_then_find_policy_round_trips() {
            let repo = repo().await;
            let created = repo.create_policy(sample_policy("root")).await.unwrap();
            let found = repo.find_policy("root").await.unwrap().unwrap();
            assert_eq!(found.id, created.id);
            assert_eq!(found.policy_type, "noop");
        }

        #[tokio::test]
        async fn create_policy_rejects_duplicate_names() {
            let repo = repo().await;
            repo.create_policy(sample_policy("root")).await.unwrap();
            let err = repo.create_policy(sample_policy("root")).await.unwrap_err();
            assert!(matches!(err, RepositoryError::DuplicateName(n) if n == "root"));
        }

        #[tokio::test]
        async fn find_policy_only_returns_active() {
            let repo = repo().await;
            let mut inactive = sample_policy("disabled");
            inactive.is_active = false;
            repo.create_policy(inactive).await.unwrap();
            assert!(repo.find_policy("disabled").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn update_policy_returns_none_when_missing() {
            let repo = repo().await;
            let result = repo.update_policy(999, sample_policy("x")).await.unwrap();
            assert!(result.is_none());
        }

        #[tokio::test]
        async fn find_api_key_returns_inactive_records_too() {
            let repo = repo().await;
            sqlx::query(
                "INSERT INTO client_api_keys (key_value, name, is_active, created_at, metadata_) VALUES (?, ?, ?, ?, ?)",
            )
            .bind("sk-test")
            .bind("test key")
            .bind(false)
            .bind(0_i64)
            .bind(Option::<String>::None)
            .execute(&repo.pool)
            .await
            .unwrap();
            let found = repo.find_api_key("sk-test").await.unwrap();
            assert!(found.is_some());
            assert!(!found.unwrap().is_active);
        }
    }
}

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub use sql::SqlRepository;

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_policy(name: &str) -> PolicyConfig {
        PolicyConfig {
            id: 0,
            name: name.to_string(),
            policy_type: "noop".to_string(),
            config: Value::Object(Default::default()),
            is_active: true,
            description: None,
        }
    }

    #[tokio::test]
    async fn find_api_key_returns_inactive_records_too() {
        let repo = InMemoryRepository::new();
        repo.insert_api_key(ClientApiKey {
            id: 1,
            key_value: "sk-test".into(),
            name: "test key".into(),
            is_active: false,
            created_at: 0,
            metadata: None,
        });
        let found = repo.find_api_key("sk-test").await.unwrap();
        assert!(found.is_some());
        assert!(!found.unwrap().is_active);
    }

    #[tokio::test]
    async fn create_policy_rejects_duplicate_names() {
        let repo = InMemoryRepository::new();
        repo.create_policy(sample_policy("root")).await.unwrap();
        let err = repo.create_policy(sample_policy("root")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::DuplicateName(n) if n == "root"));
    }

    #[tokio::test]
    async fn find_policy_only_returns_active() {
        let repo = InMemoryRepository::new();
        let mut inactive = sample_policy("disabled");
        inactive.is_active = false;
        repo.insert_policy(inactive);
        assert!(repo.find_policy("disabled").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_policy_returns_none_when_missing() {
        let repo = InMemoryRepository::new();
        let result = repo.update_policy(999, sample_policy("x")).await.unwrap();
        assert!(result.is_none());
    }
}
