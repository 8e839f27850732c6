use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordination::LockPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub storage: StorageConfig,
    pub lock: LockPolicy,
    pub signals: SignalsConfig,
    pub engine: EngineConfig,
    pub git: GitConfig,
    pub agents: AgentsConfig,
    pub prompt: PromptConfig,
    pub loops: LoopsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Loop-state root; relative paths resolve against the project directory
    pub state_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".turnloop/loops"),
        }
    }
}

impl StorageConfig {
    pub fn resolve_state_dir(&self, project_dir: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            project_dir.join(&self.state_dir)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Lines of each hook run surfaced into the next prompt
    pub tail_lines: usize,
    pub timeout_ms: u64,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            tail_lines: 80,
            timeout_ms: 300000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: String,
    /// Launch the engine detached and poll it on later turn-ends
    pub background: bool,
    pub timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "gptdiff-apply".to_string(),
            background: false,
            timeout_ms: 600000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub auto_commit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub search_paths: Vec<PathBuf>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        let search_paths = dirs::home_dir()
            .map(|home| home.join(".claude").join("plugins"))
            .filter(|path| path.is_dir())
            .into_iter()
            .collect();
        Self { search_paths }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    pub max_listed_files: usize,
    pub ignore_file: String,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_listed_files: 40,
            ignore_file: ".gptignore".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopsConfig {
    pub default_max_iterations: u32,
}

impl Default for LoopsConfig {
    fn default() -> Self {
        Self {
            default_max_iterations: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            storage: StorageConfig::default(),
            lock: LockPolicy::default(),
            signals: SignalsConfig::default(),
            engine: EngineConfig::default(),
            git: GitConfig::default(),
            agents: AgentsConfig::default(),
            prompt: PromptConfig::default(),
            loops: LoopsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::{OrphanPolicy, OwnershipPolicy};
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.log_level.as_deref(), Some("info"));
        assert_eq!(config.lock.orphan_policy, OrphanPolicy::Strict);
        assert_eq!(config.lock.ownership, OwnershipPolicy::Strict);
        assert_eq!(config.lock.pending_window_secs, 30);
        assert_eq!(config.lock.resume_ceiling_secs, Some(1800));
        assert_eq!(config.signals.tail_lines, 80);
        assert_eq!(config.engine.command, "gptdiff-apply");
        assert!(!config.engine.background);
        assert!(!config.git.auto_commit);
        assert_eq!(config.prompt.ignore_file, ".gptignore");
        assert_eq!(config.loops.default_max_iterations, 10);
    }

    #[test]
    fn test_load_explicit_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("turnloop.yml");
        fs::write(
            &path,
            "lock:\n  ownership: stale-takeover\n  stale_timeout_secs: 60\nengine:\n  background: true\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.lock.ownership, OwnershipPolicy::StaleTakeover);
        assert_eq!(config.lock.stale_timeout_secs, 60);
        assert_eq!(config.lock.pending_window_secs, 30);
        assert!(config.engine.background);
        assert_eq!(config.engine.command, "gptdiff-apply");
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_explicit_invalid_file_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yml");
        fs::write(&path, "lock: [not, a, map]\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_resolve_state_dir() {
        let storage = StorageConfig::default();
        assert_eq!(
            storage.resolve_state_dir(Path::new("/work/project")),
            PathBuf::from("/work/project/.turnloop/loops")
        );

        let absolute = StorageConfig {
            state_dir: PathBuf::from("/var/lib/turnloop"),
        };
        assert_eq!(
            absolute.resolve_state_dir(Path::new("/work/project")),
            PathBuf::from("/var/lib/turnloop")
        );
    }
}
