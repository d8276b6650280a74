//! File manifest discovery
//!
//! Lists the firmware directory through the contents API and keeps the
//! installable files. When the listing cannot be obtained a fixed list of
//! known firmware files is used instead.

use super::source::ReleaseSource;
use super::transport::{HttpClient, RetryingTransport, TransportError, API_HEADERS};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

pub const VERSION_MARKER_FILE: &str = "version.txt";

/// Device credentials. Never downloaded, never overwritten.
pub const SECRETS_FILE: &str = "secrets.py";

/// Used when the contents listing is unavailable
pub const FALLBACK_FILES: &[&str] = &[
    "main.py",
    "config.py",
    "device_config.py",
    "ota_updater.py",
    "web_interface.py",
    "logger.py",
    "recovery.py",
    VERSION_MARKER_FILE,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Source,
    VersionMarker,
    Data,
}

impl FileKind {
    pub fn of(filename: &str) -> Self {
        if filename == VERSION_MARKER_FILE {
            Self::VersionMarker
        } else if filename.ends_with(".py") {
            Self::Source
        } else {
            Self::Data
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileManifestEntry {
    pub filename: String,
    pub remote_path: String,
    pub kind: FileKind,
}

impl FileManifestEntry {
    pub fn new(filename: &str, remote_path: &str) -> Self {
        Self {
            filename: filename.to_string(),
            remote_path: remote_path.to_string(),
            kind: FileKind::of(filename),
        }
    }

    /// Only the version marker may be missing remotely
    pub fn is_optional(&self) -> bool {
        self.kind == FileKind::VersionMarker
    }
}

/// Whether a file from the firmware directory belongs on the device
pub fn is_firmware_file(filename: &str) -> bool {
    filename != SECRETS_FILE && (filename.ends_with(".py") || filename == VERSION_MARKER_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    entries: Vec<FileManifestEntry>,
    /// False when built from the fallback list
    pub discovered: bool,
}

impl Manifest {
    /// Build a manifest, dropping the secrets file and duplicate names
    pub fn new(entries: Vec<FileManifestEntry>, discovered: bool) -> Self {
        let mut seen = HashSet::new();
        let entries = entries
            .into_iter()
            .filter(|e| e.filename != SECRETS_FILE && !e.filename.contains('/'))
            .filter(|e| seen.insert(e.filename.clone()))
            .collect();
        Self { entries, discovered }
    }

    pub fn fallback(source: &ReleaseSource) -> Self {
        let entries = FALLBACK_FILES
            .iter()
            .map(|name| FileManifestEntry::new(name, &source.remote_path(name)))
            .collect();
        Self::new(entries, false)
    }

    pub fn entries(&self) -> &[FileManifestEntry] {
        &self.entries
    }

    pub fn filenames(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.filename.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected contents listing: {0}")]
    Parse(String),

    #[error("contents listing has no firmware files")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ContentsItem {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
}

pub struct ManifestResolver<C> {
    transport: RetryingTransport<C>,
    source: ReleaseSource,
}

impl<C: HttpClient> ManifestResolver<C> {
    pub fn new(transport: RetryingTransport<C>, source: ReleaseSource) -> Self {
        Self { transport, source }
    }

    /// List the firmware directory on the configured branch
    pub async fn discover(&self) -> Result<Manifest, ManifestError> {
        let body = self
            .transport
            .request(&self.source.contents_url(), API_HEADERS)
            .await?
            .bytes()
            .await?;
        let items: Vec<ContentsItem> =
            serde_json::from_slice(&body).map_err(|e| ManifestError::Parse(e.to_string()))?;

        let entries: Vec<FileManifestEntry> = items
            .into_iter()
            .filter(|item| item.item_type == "file" && is_firmware_file(&item.name))
            .map(|item| {
                let remote = item
                    .path
                    .unwrap_or_else(|| self.source.remote_path(&item.name));
                FileManifestEntry::new(&item.name, &remote)
            })
            .collect();

        if entries.is_empty() {
            return Err(ManifestError::Empty);
        }
        Ok(Manifest::new(entries, true))
    }

    /// Discovered manifest, or the fallback list when discovery fails
    pub async fn resolve(&self) -> Manifest {
        match self.discover().await {
            Ok(manifest) => {
                info!(files = manifest.len(), "Discovered firmware files");
                manifest
            }
            Err(e) => {
                warn!(error = %e, "File discovery failed, using fallback list");
                Manifest::fallback(&self.source)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::testing::{FakeClient, Scripted};
    use crate::engine::updater::transport::RetryPolicy;
    use std::sync::Arc;

    const CONTENTS: &str = "https://api.test/repos/acme/sensor/contents/firmware?ref=main";

    fn resolver(client: FakeClient) -> ManifestResolver<Arc<FakeClient>> {
        let source = ReleaseSource::new("https://api.test", "https://raw.test", "acme", "sensor", "main")
            .with_firmware_path("firmware");
        ManifestResolver::new(
            RetryingTransport::new(Arc::new(client), RetryPolicy::immediate(1)),
            source,
        )
    }

    #[tokio::test]
    async fn test_discovery_filters_listing() {
        let listing = r#"[
            {"name": "main.py", "path": "firmware/main.py", "type": "file"},
            {"name": "secrets.py", "path": "firmware/secrets.py", "type": "file"},
            {"name": "README.md", "path": "firmware/README.md", "type": "file"},
            {"name": "lib", "path": "firmware/lib", "type": "dir"},
            {"name": "version.txt", "path": "firmware/version.txt", "type": "file"},
            {"name": "sensor.py", "type": "file"}
        ]"#;
        let manifest = resolver(FakeClient::new().with(CONTENTS, Scripted::ok(listing)))
            .resolve()
            .await;

        assert!(manifest.discovered);
        assert_eq!(manifest.filenames(), vec!["main.py", "version.txt", "sensor.py"]);
        assert_eq!(manifest.entries()[2].remote_path, "firmware/sensor.py");
        assert_eq!(manifest.entries()[1].kind, FileKind::VersionMarker);
    }

    #[tokio::test]
    async fn test_discovery_failure_uses_fallback() {
        let manifest = resolver(FakeClient::new().with(CONTENTS, Scripted::status(403)))
            .resolve()
            .await;

        assert!(!manifest.discovered);
        assert_eq!(manifest.len(), FALLBACK_FILES.len());
        assert!(!manifest.filenames().contains(&SECRETS_FILE));
        assert_eq!(manifest.entries()[0].remote_path, "firmware/main.py");
    }

    #[tokio::test]
    async fn test_empty_listing_uses_fallback() {
        let manifest = resolver(FakeClient::new().with(CONTENTS, Scripted::ok("[]")))
            .resolve()
            .await;
        assert!(!manifest.discovered);
    }

    #[test]
    fn test_manifest_never_contains_secrets() {
        let manifest = Manifest::new(
            vec![
                FileManifestEntry::new("secrets.py", "firmware/secrets.py"),
                FileManifestEntry::new("main.py", "firmware/main.py"),
                FileManifestEntry::new("main.py", "firmware/main.py"),
            ],
            true,
        );
        assert_eq!(manifest.filenames(), vec!["main.py"]);
    }

    #[test]
    fn test_file_kinds() {
        assert_eq!(FileKind::of("main.py"), FileKind::Source);
        assert_eq!(FileKind::of("version.txt"), FileKind::VersionMarker);
        assert_eq!(FileKind::of("index.html"), FileKind::Data);
        assert!(FileManifestEntry::new("version.txt", "version.txt").is_optional());
        assert!(!FileManifestEntry::new("main.py", "main.py").is_optional());
    }
}
