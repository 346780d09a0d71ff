use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::accessor::ResourceAccessor;
use crate::acl::PrincipalError;
use crate::auth::{Authorizer, RoleConfig, RoleRegistry, StaticGroups};
use crate::cache::{CacheConfig, CacheMode, ConcurrentCache, LockingCache};
use crate::lock::{LockConfig, PathLockManager};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("invalid principal: {0}")]
    Principal(#[from] PrincipalError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Everything needed to assemble a repository around a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub locks: LockConfig,
    /// Start in read-only mode
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub roles: RoleConfig,
    /// Group name → members (`user:x`, `group:y` or a bare user name)
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl RepositoryConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));
        let open_unit = |value: f64| value > 0.0 && value < 1.0;

        if self.cache.max_items == 0 {
            return invalid("cache.max_items must be positive");
        }
        if !open_unit(self.cache.evict_ratio) {
            return invalid("cache.evict_ratio must be between 0 and 1 (exclusive)");
        }
        if !open_unit(self.cache.children_load_threshold) {
            return invalid("cache.children_load_threshold must be between 0 and 1 (exclusive)");
        }
        if self.locks.max_retries == 0 {
            return invalid("locks.max_retries must be positive");
        }
        if self.locks.wait_timeout_ms == 0 {
            return invalid("locks.wait_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn authorizer(&self) -> Result<Authorizer, ConfigError> {
        let roles = RoleRegistry::from_config(&self.roles)?;
        let groups = StaticGroups::from_config(&self.groups)?;
        Ok(Authorizer::new(roles, Arc::new(groups), self.read_only))
    }

    pub fn lock_manager(&self) -> PathLockManager {
        PathLockManager::new(self.locks)
    }

    /// Put the configured cache in front of `accessor`.
    pub fn layer<A>(&self, accessor: A) -> Arc<dyn ResourceAccessor>
    where
        A: ResourceAccessor + 'static,
    {
        match self.cache.mode {
            CacheMode::None => Arc::new(accessor),
            CacheMode::Locking => Arc::new(LockingCache::new(
                accessor,
                self.cache,
                self.lock_manager(),
            )),
            CacheMode::Concurrent => Arc::new(ConcurrentCache::new(accessor, self.cache)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Principal, Role};
    use std::io::Write;

    const SAMPLE: &str = r#"
read_only = true

[cache]
mode = "locking"
max_items = 50
evict_ratio = 0.2

[locks]
max_retries = 5

[roles]
root = ["root@localhost"]
read_everything = ["user:indexer"]

[groups]
staff = ["alice", "group:editors"]
editors = ["user:carol"]
"#;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::from_toml_str("").unwrap();
        assert_eq!(config, RepositoryConfig::default());
        assert_eq!(config.cache.max_items, 1000);
        assert_eq!(config.cache.children_load_threshold, 0.05);
        assert_eq!(config.cache.mode, CacheMode::Concurrent);
        assert_eq!(config.locks.wait_timeout_ms, 500);
        assert!(!config.read_only);
    }

    #[test]
    fn test_parse_sample() {
        let config = RepositoryConfig::from_toml_str(SAMPLE).unwrap();
        assert!(config.read_only);
        assert_eq!(config.cache.mode, CacheMode::Locking);
        assert_eq!(config.cache.max_items, 50);
        assert_eq!(config.cache.evict_ratio, 0.2);
        // unspecified fields keep their defaults
        assert_eq!(config.cache.children_load_threshold, 0.05);
        assert_eq!(config.locks.max_retries, 5);
        assert_eq!(config.locks.wait_timeout_ms, 500);

        let authorizer = config.authorizer().unwrap();
        assert!(authorizer.is_read_only());
        assert!(authorizer
            .roles()
            .has_role(&Principal::user("root@localhost"), Role::Root));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        for raw in [
            "[cache]\nmax_items = 0",
            "[cache]\nevict_ratio = 1.0",
            "[cache]\nchildren_load_threshold = 0.0",
            "[locks]\nmax_retries = 0",
            "[locks]\nwait_timeout_ms = 0",
        ] {
            assert!(
                matches!(
                    RepositoryConfig::from_toml_str(raw),
                    Err(ConfigError::Invalid(_))
                ),
                "accepted {}",
                raw
            );
        }
        assert!(matches!(
            RepositoryConfig::from_toml_str("[cache]\nmode = \"lru\""),
            Err(ConfigError::TomlDe(_))
        ));
    }

    #[test]
    fn test_bad_principal() {
        let config =
            RepositoryConfig::from_toml_str("[roles]\nroot = [\"pseudo:nobody\"]").unwrap();
        assert!(matches!(
            config.authorizer(),
            Err(ConfigError::Principal(_))
        ));
    }

    #[test]
    fn test_from_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = RepositoryConfig::from_file(file.path()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arbor.toml");
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(RepositoryConfig::from_file(&path).unwrap(), config);

        assert!(matches!(
            RepositoryConfig::from_file(dir.path().join("missing.toml")),
            Err(ConfigError::Io(_))
        ));
    }
}
