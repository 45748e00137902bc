//! Path configuration shared by the training and evaluation binaries.
//!
//! Values come from an optional TOML file; explicit CLI flags override them in `util`.

use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG_NAME: &str = "constrained-det.toml";
const CONFIG_ENV: &str = "CONSTRAINED_DET_CONFIG";
const WEIGHTS_PREFIX_ENV: &str = "WEIGHTS_PREFIX";

#[derive(Debug, Clone, PartialEq)]
pub struct PathConfig {
    /// Directory holding cached pretrained backbones.
    pub weights_prefix: PathBuf,
    /// Base URL pretrained backbones are downloaded from.
    pub weights_url: Option<String>,
    pub checkpoint: PathBuf,
    pub train_root: PathBuf,
    /// Separate validation dataset; when absent the training set is split.
    pub val_root: Option<PathBuf>,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            weights_prefix: default_weights_prefix(),
            weights_url: None,
            checkpoint: PathBuf::from("checkpoints/constrained_detector.bin"),
            train_root: PathBuf::from("assets/datasets/train"),
            val_root: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct PathConfigFile {
    weights_prefix: Option<String>,
    weights_url: Option<String>,
    checkpoint: Option<String>,
    train_root: Option<String>,
    val_root: Option<String>,
}

impl PathConfig {
    /// `$CONSTRAINED_DET_CONFIG` if set, else `constrained-det.toml` in the working directory.
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_NAME.to_string());
        let cfg = Self::from_path(Path::new(&path)).unwrap_or_default();
        cfg.warn_if_invalid();
        cfg
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "could not read config");
                return None;
            }
        };
        Self::from_toml(&raw)
            .map_err(|err| {
                tracing::warn!(path = %path.display(), %err, "ignoring malformed config");
            })
            .ok()
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        let file: PathConfigFile = toml::from_str(raw)?;
        Ok(Self::from_file(file))
    }

    fn from_file(file: PathConfigFile) -> Self {
        let defaults = Self::default();
        Self {
            weights_prefix: file
                .weights_prefix
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.weights_prefix),
            weights_url: file
                .weights_url
                .map(|v| expand_env(&v))
                .filter(|v| !v.trim().is_empty()),
            checkpoint: file
                .checkpoint
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.checkpoint),
            train_root: file
                .train_root
                .map(|v| expand_path(&v))
                .unwrap_or(defaults.train_root),
            val_root: file.val_root.map(|v| expand_path(&v)),
        }
    }

    fn warn_if_invalid(&self) {
        if self.checkpoint.as_os_str().is_empty() {
            tracing::warn!("config: checkpoint is empty; saving the best model will fail");
        }
        if !self.weights_prefix.is_dir() {
            tracing::warn!(
                prefix = %self.weights_prefix.display(),
                "config: weights_prefix does not exist yet; it is created on first download"
            );
        }
    }
}

/// `$WEIGHTS_PREFIX`, falling back to the working directory.
pub fn default_weights_prefix() -> PathBuf {
    std::env::var(WEIGHTS_PREFIX_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(|v| expand_path(&v))
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_path(raw: &str) -> PathBuf {
    let mut out = raw.to_string();
    if let Some(stripped) = out.strip_prefix('~') {
        if let Ok(home) = std::env::var("HOME") {
            out = format!("{home}{stripped}");
        }
    }
    PathBuf::from(expand_env(&out))
}

fn expand_env(input: &str) -> String {
    let mut out = String::new();
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let key = &rest[start + 2..start + 2 + len];
        match std::env::var(key) {
            Ok(val) => out.push_str(&val),
            Err(_) => out.push_str(&rest[start..start + 3 + len]),
        }
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let cfg = PathConfig::from_toml(
            r#"
            weights_prefix = "/opt/weights"
            weights_url = "https://example.invalid/backbones"
            checkpoint = "runs/best.bin"
            val_root = "data/val"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.weights_prefix, PathBuf::from("/opt/weights"));
        assert_eq!(
            cfg.weights_url.as_deref(),
            Some("https://example.invalid/backbones")
        );
        assert_eq!(cfg.checkpoint, PathBuf::from("runs/best.bin"));
        assert_eq!(cfg.train_root, PathConfig::default().train_root);
        assert_eq!(cfg.val_root, Some(PathBuf::from("data/val")));
    }

    #[test]
    fn blank_url_means_no_download() {
        let cfg = PathConfig::from_toml("weights_url = \"  \"").unwrap();
        assert_eq!(cfg.weights_url, None);
    }

    #[test]
    fn malformed_file_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.toml");
        std::fs::write(&path, "checkpoint = [").unwrap();
        assert!(PathConfig::from_path(&path).is_none());
        assert!(PathConfig::from_path(&tmp.path().join("missing.toml")).is_none());
    }

    #[test]
    fn env_placeholders_expand() {
        std::env::set_var("CONSTRAINED_DET_TEST_ROOT", "/data/det");
        assert_eq!(
            expand_path("${CONSTRAINED_DET_TEST_ROOT}/train"),
            PathBuf::from("/data/det/train")
        );
        assert_eq!(
            expand_env("${CONSTRAINED_DET_UNSET_VAR}/x"),
            "${CONSTRAINED_DET_UNSET_VAR}/x"
        );
        assert_eq!(expand_env("plain/${unterminated"), "plain/${unterminated");
    }
}
