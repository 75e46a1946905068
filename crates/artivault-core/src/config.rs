use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::checksum::ChecksumPolicy;
use crate::error::{RepoError, RepoResult};
use crate::path_policy::PathPolicyMatcher;

/// Lock acquisition settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub timeout_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Descriptor of a remote repository and its local cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteRepoConfig {
    pub key: String,
    pub url: String,
    pub retrieval_cache_period_secs: u64,
    pub missed_retrieval_cache_period_secs: u64,
    pub includes_pattern: String,
    pub excludes_pattern: String,
    pub handle_releases: bool,
    pub handle_snapshots: bool,
    pub checksum_policy: ChecksumPolicy,
}

impl Default for RemoteRepoConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            url: String::new(),
            retrieval_cache_period_secs: 7200,
            missed_retrieval_cache_period_secs: 1800,
            includes_pattern: String::from("**/*"),
            excludes_pattern: String::new(),
            handle_releases: true,
            handle_snapshots: true,
            checksum_policy: ChecksumPolicy::default(),
        }
    }
}

impl RemoteRepoConfig {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn retrieval_cache_period(&self) -> Duration {
        Duration::from_secs(self.retrieval_cache_period_secs)
    }

    pub fn missed_retrieval_cache_period(&self) -> Duration {
        Duration::from_secs(self.missed_retrieval_cache_period_secs)
    }

    pub fn path_policy(&self) -> RepoResult<PathPolicyMatcher> {
        PathPolicyMatcher::new(
            &self.includes_pattern,
            &self.excludes_pattern,
            self.handle_releases,
            self.handle_snapshots,
        )
    }
}

/// An aggregating repository over an ordered list of members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VirtualRepoConfig {
    pub key: String,
    pub repositories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtiVaultConfig {
    pub lock: LockConfig,
    /// How often the daemon evicts expired cached files.
    pub cleanup_interval_secs: u64,
    pub remote_repos: Vec<RemoteRepoConfig>,
    pub virtual_repos: Vec<VirtualRepoConfig>,
}

impl Default for ArtiVaultConfig {
    fn default() -> Self {
        Self {
            lock: LockConfig::default(),
            cleanup_interval_secs: 3600,
            remote_repos: Vec::new(),
            virtual_repos: Vec::new(),
        }
    }
}

impl ArtiVaultConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: ArtiVaultConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty or duplicate keys, bad patterns, and virtual members that
    /// are not remote repositories.
    pub fn validate(&self) -> RepoResult<()> {
        let mut keys = HashSet::new();
        for repo in &self.remote_repos {
            if repo.key.is_empty() {
                return Err(RepoError::Config("remote repository with empty key".to_string()));
            }
            if !keys.insert(repo.key.as_str()) {
                return Err(RepoError::Config(format!("duplicate repository key '{}'", repo.key)));
            }
            repo.path_policy()?;
        }
        let remote_keys = keys.clone();
        for virt in &self.virtual_repos {
            if virt.key.is_empty() {
                return Err(RepoError::Config("virtual repository with empty key".to_string()));
            }
            if !keys.insert(virt.key.as_str()) {
                return Err(RepoError::Config(format!("duplicate repository key '{}'", virt.key)));
            }
        }
        for virt in &self.virtual_repos {
            for member in &virt.repositories {
                if !keys.contains(member.as_str()) {
                    return Err(RepoError::Config(format!(
                        "virtual repository '{}' references unknown repository '{}'",
                        virt.key, member
                    )));
                }
                if !remote_keys.contains(member.as_str()) {
                    return Err(RepoError::Config(format!(
                        "virtual repository '{}' member '{}' is not a remote repository",
                        virt.key, member
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn remote_repo(&self, key: &str) -> Option<&RemoteRepoConfig> {
        self.remote_repos.iter().find(|r| r.key == key)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}
