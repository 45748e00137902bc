//! Pretrained backbone weight lookup and caching.
//!
//! Only four (input channels, alpha) combinations have published weights. Anything else
//! resolves to `None` and the caller keeps the random initialisation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("download of {url} failed: {msg}")]
    Download { url: String, msg: String },
    #[error("{file} is not cached under {prefix} and no download URL is configured")]
    NoSource { file: String, prefix: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PretrainedWeights {
    pub channels: usize,
    pub alpha: f32,
    /// Backbone record file name, relative to the cache prefix and the download base URL.
    pub file_name: &'static str,
}

pub static PRETRAINED_BACKBONES: &[PretrainedWeights] = &[
    PretrainedWeights {
        channels: 1,
        alpha: 0.1,
        file_name: "mobilenet_v2_gray_0.1_backbone.bin",
    },
    PretrainedWeights {
        channels: 1,
        alpha: 0.35,
        file_name: "mobilenet_v2_gray_0.35_backbone.bin",
    },
    PretrainedWeights {
        channels: 3,
        alpha: 0.1,
        file_name: "mobilenet_v2_rgb_0.1_backbone.bin",
    },
    PretrainedWeights {
        channels: 3,
        alpha: 0.35,
        file_name: "mobilenet_v2_rgb_0.35_backbone.bin",
    },
];

/// Exact whitelist match on (channels, alpha).
pub fn lookup(channels: usize, alpha: f32) -> Option<&'static PretrainedWeights> {
    PRETRAINED_BACKBONES
        .iter()
        .find(|w| w.channels == channels && (w.alpha - alpha).abs() < 1e-6)
}

/// Retrieves a remote file into `dest`.
pub trait WeightFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), WeightsError>;
}

/// Blocking HTTP download, single attempt.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    pub timeout: Duration,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
        }
    }
}

impl WeightFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<(), WeightsError> {
        let download_err = |msg: String| WeightsError::Download {
            url: url.to_string(),
            msg,
        };
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| download_err(e.to_string()))?;
        let bytes = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.bytes())
            .map_err(|e| download_err(e.to_string()))?;

        // Write next to the destination and rename so a partial download is never cached.
        let partial = dest.with_extension("part");
        fs::write(&partial, &bytes).map_err(|source| WeightsError::Io {
            path: partial.clone(),
            source,
        })?;
        fs::rename(&partial, dest).map_err(|source| WeightsError::Io {
            path: dest.to_path_buf(),
            source,
        })
    }
}

/// Path of the cached backbone weights for (channels, alpha), downloading them if needed.
///
/// Returns `Ok(None)` when the combination has no published weights.
pub fn resolve(
    prefix: &Path,
    channels: usize,
    alpha: f32,
    base_url: Option<&str>,
    fetcher: &dyn WeightFetcher,
) -> Result<Option<PathBuf>, WeightsError> {
    let Some(entry) = lookup(channels, alpha) else {
        tracing::info!(channels, alpha, "no pretrained backbone for this combination");
        return Ok(None);
    };
    let dest = prefix.join(entry.file_name);
    if dest.exists() {
        tracing::info!(path = %dest.display(), "using cached pretrained backbone");
        return Ok(Some(dest));
    }
    let Some(base) = base_url else {
        return Err(WeightsError::NoSource {
            file: entry.file_name.to_string(),
            prefix: prefix.to_path_buf(),
        });
    };
    fs::create_dir_all(prefix).map_err(|source| WeightsError::Io {
        path: prefix.to_path_buf(),
        source,
    })?;
    let url = format!("{}/{}", base.trim_end_matches('/'), entry.file_name);
    tracing::info!(%url, dest = %dest.display(), "downloading pretrained backbone");
    fetcher.fetch(&url, &dest)?;
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingFetcher {
        urls: RefCell<Vec<String>>,
    }

    impl WeightFetcher for RecordingFetcher {
        fn fetch(&self, url: &str, dest: &Path) -> Result<(), WeightsError> {
            self.urls.borrow_mut().push(url.to_string());
            fs::write(dest, b"weights").map_err(|source| WeightsError::Io {
                path: dest.to_path_buf(),
                source,
            })
        }
    }

    #[test]
    fn only_whitelisted_pairs_match() {
        assert!(lookup(1, 0.1).is_some());
        assert!(lookup(1, 0.35).is_some());
        assert!(lookup(3, 0.1).is_some());
        assert!(lookup(3, 0.35).is_some());
        assert!(lookup(3, 0.5).is_none());
        assert!(lookup(2, 0.35).is_none());
        assert!(lookup(1, 1.0).is_none());
    }

    #[test]
    fn unknown_pair_resolves_to_none_without_fetching() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = RecordingFetcher::default();
        let got = resolve(tmp.path(), 3, 0.5, Some("https://weights.invalid"), &fetcher).unwrap();
        assert!(got.is_none());
        assert!(fetcher.urls.borrow().is_empty());
    }

    #[test]
    fn cached_file_is_reused() {
        let tmp = tempfile::tempdir().unwrap();
        let entry = lookup(1, 0.35).unwrap();
        fs::write(tmp.path().join(entry.file_name), b"cached").unwrap();
        let fetcher = RecordingFetcher::default();
        let got = resolve(tmp.path(), 1, 0.35, None, &fetcher).unwrap();
        assert_eq!(got, Some(tmp.path().join(entry.file_name)));
        assert!(fetcher.urls.borrow().is_empty());
    }

    #[test]
    fn missing_file_is_downloaded_once() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path().join("cache");
        let fetcher = RecordingFetcher::default();
        let got = resolve(&prefix, 3, 0.1, Some("https://weights.invalid/v1/"), &fetcher)
            .unwrap()
            .unwrap();
        assert!(got.exists());
        assert_eq!(
            fetcher.urls.borrow().as_slice(),
            ["https://weights.invalid/v1/mobilenet_v2_rgb_0.1_backbone.bin"]
        );
    }

    #[test]
    fn missing_file_without_url_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = RecordingFetcher::default();
        assert!(matches!(
            resolve(tmp.path(), 1, 0.1, None, &fetcher),
            Err(WeightsError::NoSource { .. })
        ));
    }
}
