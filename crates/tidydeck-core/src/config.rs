use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dedup::{DEFAULT_MAX_WORD_LENGTH, DEFAULT_STOP_WORDS, ExactFieldMatcher, WordOverlapMatcher};
use crate::error::Result;
use crate::package::{default_output_path, output_file_name};

pub const CONFIG_ENV: &str = "TIDYDECK_CONFIG";
pub const COLLECTION_ENV: &str = "TIDYDECK_COLLECTION";

/// Collection file looked for in the working directory.
const LOCAL_COLLECTION: &str = "anki.db";
const PROFILE_COLLECTION: &str = "collection.anki2";

// ─── Config structs ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collection: CollectionConfig,
    pub export: ExportConfig,
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub field_index: usize,
    pub max_word_length: usize,
    pub stop_words: Vec<String>,
}

// ─── Defaults ───────────────────────────────────────────────

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            field_index: 0,
            max_word_length: DEFAULT_MAX_WORD_LENGTH,
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
        }
    }
}

impl DedupConfig {
    pub fn word_matcher(&self) -> WordOverlapMatcher {
        WordOverlapMatcher::new()
            .with_max_word_length(self.max_word_length)
            .with_stop_words(self.stop_words.iter().cloned())
    }

    pub fn exact_matcher(&self) -> ExactFieldMatcher {
        ExactFieldMatcher::new(self.field_index)
    }
}

impl ExportConfig {
    /// Where a package for `deck_name` goes when no explicit path is given.
    pub fn output_path_for(&self, deck_name: &str, suffix: &str) -> PathBuf {
        match &self.output_dir {
            Some(dir) => PathBuf::from(dir).join(output_file_name(deck_name, suffix)),
            None => default_output_path(deck_name, suffix),
        }
    }
}

// ─── Loading and discovery ──────────────────────────────────

impl AppConfig {
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidydeck")
            .join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Live collection to read: `$TIDYDECK_COLLECTION`, the configured path,
    /// `./anki.db`, then the first Anki profile's `collection.anki2`.
    /// `None` when none of them exists.
    pub fn collection_path(&self) -> Option<PathBuf> {
        let env = std::env::var_os(COLLECTION_ENV).map(PathBuf::from);
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let anki_base = dirs::data_dir().map(|dir| dir.join("Anki2"));
        resolve_collection_path(
            env,
            self.collection.path.as_deref().map(Path::new),
            &cwd,
            anki_base.as_deref(),
        )
    }
}

fn resolve_collection_path(
    env: Option<PathBuf>,
    configured: Option<&Path>,
    cwd: &Path,
    anki_base: Option<&Path>,
) -> Option<PathBuf> {
    let explicit = env
        .into_iter()
        .chain(configured.map(Path::to_path_buf))
        .chain(std::iter::once(cwd.join(LOCAL_COLLECTION)));

    for candidate in explicit {
        if candidate.is_file() {
            debug!("using collection {}", candidate.display());
            return Some(candidate);
        }
    }

    anki_base.and_then(find_profile_collection)
}

/// First profile directory (by name) holding a collection.
fn find_profile_collection(anki_base: &Path) -> Option<PathBuf> {
    let mut profiles: Vec<PathBuf> = std::fs::read_dir(anki_base)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    profiles.sort();

    profiles
        .into_iter()
        .map(|profile| profile.join(PROFILE_COLLECTION))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.collection.path.is_none());
        assert_eq!(cfg.dedup.field_index, 0);
        assert_eq!(cfg.dedup.max_word_length, 20);
        assert_eq!(cfg.dedup.stop_words, vec!["item", "sentence", "plain"]);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.collection.path = Some("/data/collection.anki2".to_string());
        cfg.dedup.field_index = 2;
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.collection.path, cfg.collection.path);
        assert_eq!(loaded.dedup.field_index, 2);
        assert!(loaded.export.output_dir.is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[dedup]\nmax_word_length = 12\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.dedup.max_word_length, 12);
        assert_eq!(loaded.dedup.stop_words.len(), 3);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = AppConfig::load_from(Path::new("/tmp/nonexistent_tidydeck_config.toml")).unwrap();
        assert_eq!(cfg.dedup.max_word_length, 20);
    }

    #[test]
    fn test_word_matcher_follows_config() {
        let mut cfg = DedupConfig::default();
        cfg.stop_words = vec!["noun".to_string()];
        cfg.max_word_length = 5;
        let matcher = cfg.word_matcher();
        let words = matcher.normalize_and_split("noun, item, elephant");
        assert_eq!(words.len(), 1);
        assert!(words.contains("item"));
    }

    #[test]
    fn test_output_path_for() {
        let cfg = ExportConfig {
            output_dir: Some("/srv/decks".to_string()),
        };
        assert_eq!(
            cfg.output_path_for("My Deck", ""),
            PathBuf::from("/srv/decks/My_Deck.apkg")
        );
        assert_eq!(
            ExportConfig::default().output_path_for("My Deck", "_vocab"),
            default_output_path("My Deck", "_vocab")
        );
    }

    #[test]
    fn test_collection_resolution_order() {
        let dir = TempDir::new().unwrap();
        let cwd = dir.path().join("cwd");
        let base = dir.path().join("Anki2");
        std::fs::create_dir_all(base.join("User 2")).unwrap();
        std::fs::create_dir_all(base.join("User 1")).unwrap();
        std::fs::create_dir_all(&cwd).unwrap();

        assert_eq!(resolve_collection_path(None, None, &cwd, Some(&base)), None);

        let profile = base.join("User 2").join("collection.anki2");
        std::fs::write(&profile, b"").unwrap();
        assert_eq!(
            resolve_collection_path(None, None, &cwd, Some(&base)),
            Some(profile.clone())
        );

        let local = cwd.join("anki.db");
        std::fs::write(&local, b"").unwrap();
        assert_eq!(
            resolve_collection_path(None, None, &cwd, Some(&base)),
            Some(local.clone())
        );

        let configured = dir.path().join("configured.anki2");
        std::fs::write(&configured, b"").unwrap();
        assert_eq!(
            resolve_collection_path(None, Some(&configured), &cwd, Some(&base)),
            Some(configured.clone())
        );

        let from_env = dir.path().join("env.anki2");
        std::fs::write(&from_env, b"").unwrap();
        assert_eq!(
            resolve_collection_path(Some(from_env.clone()), Some(&configured), &cwd, Some(&base)),
            Some(from_env)
        );
    }

    #[test]
    fn test_missing_configured_path_falls_through() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("gone.anki2");
        assert_eq!(
            resolve_collection_path(None, Some(&missing), dir.path(), None),
            None
        );
    }
}
