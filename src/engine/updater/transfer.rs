//! File Transfer Engine
//!
//! Streams manifest files from the raw content endpoint into the staging
//! directory. Memory use is bounded by one reusable chunk buffer: bodies are
//! never held whole.

use super::layout::{clear_directory, temp_path, LayoutError};
use super::manifest::{FileManifestEntry, Manifest};
use super::source::ReleaseSource;
use super::transport::{HttpClient, Response, RetryingTransport, TransportError, RAW_HEADERS};
use super::verify::{check_body_prefix, ContentError, HTML_PROBE_LEN};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("{file}: {source}")]
    Transport {
        file: String,
        #[source]
        source: TransportError,
    },

    #[error("{file}: content integrity check failed: {reason}")]
    Integrity { file: String, reason: ContentError },

    #[error(transparent)]
    Filesystem(#[from] LayoutError),

    #[error("{file}: staged file missing after rename")]
    Missing { file: String },
}

impl TransferError {
    /// The manifest file the failure belongs to, when there is one
    pub fn file(&self) -> Option<&str> {
        match self {
            Self::Transport { file, .. } | Self::Integrity { file, .. } | Self::Missing { file } => {
                Some(file)
            }
            Self::Filesystem(_) => None,
        }
    }
}

/// Outcome of a successful download
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub files: usize,
    pub bytes: u64,
    /// Optional files that could not be fetched
    pub skipped: Vec<String>,
}

/// Buffers writes into fixed-size chunks.
///
/// `N` bytes pushed with capacity `C` reach the inner writer in exactly
/// `ceil(N / C)` `write_all` calls.
pub struct ChunkWriter<W: Write> {
    inner: W,
    buffer: Vec<u8>,
    capacity: usize,
    writes: usize,
    written: u64,
}

impl<W: Write> ChunkWriter<W> {
    pub fn new(inner: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner,
            buffer: Vec::with_capacity(capacity),
            capacity,
            writes: 0,
            written: 0,
        }
    }

    pub fn push(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            let room = self.capacity - self.buffer.len();
            let take = room.min(data.len());
            self.buffer.extend_from_slice(&data[..take]);
            data = &data[take..];
            if self.buffer.len() == self.capacity {
                self.flush_chunk()?;
            }
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.buffer)?;
        self.writes += 1;
        self.written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Write the partial last chunk and hand back the writer and byte count
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        self.flush_chunk()?;
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}

pub struct FileTransferEngine<C> {
    transport: RetryingTransport<C>,
    source: ReleaseSource,
    chunk_size: usize,
}

impl<C: HttpClient> FileTransferEngine<C> {
    pub fn new(transport: RetryingTransport<C>, source: ReleaseSource, chunk_size: usize) -> Self {
        Self {
            transport,
            source,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Download every manifest file into `staging_dir`.
    ///
    /// Staging is cleared first. Any required file failing aborts the whole
    /// call; files staged before it stay in staging. `on_file(done, total)`
    /// runs after each file.
    pub async fn download<F>(
        &self,
        manifest: &Manifest,
        staging_dir: &Path,
        mut on_file: F,
    ) -> Result<TransferReport, TransferError>
    where
        F: FnMut(usize, usize) + Send,
    {
        let removed = clear_directory(staging_dir)?;
        if removed > 0 {
            debug!(removed, "Cleared stale staging files");
        }

        let total = manifest.len();
        let mut report = TransferReport::default();
        info!(files = total, "Downloading firmware files");

        for (index, entry) in manifest.entries().iter().enumerate() {
            match self.download_file(entry, staging_dir).await {
                Ok(bytes) => {
                    info!(file = %entry.filename, bytes, "Staged file");
                    report.files += 1;
                    report.bytes += bytes;
                }
                Err(e) if entry.is_optional() => {
                    warn!(file = %entry.filename, error = %e, "Skipping optional file");
                    report.skipped.push(entry.filename.clone());
                }
                Err(e) => {
                    warn!(file = %entry.filename, error = %e, "Download failed");
                    return Err(e);
                }
            }
            on_file(index + 1, total);
        }

        Ok(report)
    }

    async fn download_file(
        &self,
        entry: &FileManifestEntry,
        staging_dir: &Path,
    ) -> Result<u64, TransferError> {
        let url = self.source.raw_url(&entry.remote_path);
        let mut response = self
            .transport
            .request(&url, RAW_HEADERS)
            .await
            .map_err(|source| TransferError::Transport {
                file: entry.filename.clone(),
                source,
            })?;

        let final_path = staging_dir.join(&entry.filename);
        let tmp = temp_path(&final_path);

        let bytes = match self.stream_to_file(&mut response, entry, &tmp).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        drop(response);

        if let Err(e) = fs::rename(&tmp, &final_path) {
            let _ = fs::remove_file(&tmp);
            return Err(LayoutError::io("renaming", &tmp)(e).into());
        }
        if !final_path.is_file() {
            return Err(TransferError::Missing {
                file: entry.filename.clone(),
            });
        }
        Ok(bytes)
    }

    /// Stream the body into `tmp`. The first bytes are inspected before the
    /// file is created, so a rejected body never touches the disk.
    async fn stream_to_file(
        &self,
        response: &mut Response,
        entry: &FileManifestEntry,
        tmp: &Path,
    ) -> Result<u64, TransferError> {
        let file_name = || entry.filename.clone();
        let body_error = |source| TransferError::Transport {
            file: file_name(),
            source,
        };

        let mut head: Vec<u8> = Vec::with_capacity(HTML_PROBE_LEN);
        let mut rest: Option<Vec<u8>> = None;
        while head.len() < HTML_PROBE_LEN {
            match response.next_chunk().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(body_error)?;
                    let take = (HTML_PROBE_LEN - head.len()).min(chunk.len());
                    head.extend_from_slice(&chunk[..take]);
                    if take < chunk.len() {
                        rest = Some(chunk[take..].to_vec());
                        break;
                    }
                }
                None => break,
            }
        }

        check_body_prefix(&head).map_err(|reason| TransferError::Integrity {
            file: file_name(),
            reason,
        })?;

        let handle = File::create(tmp).map_err(LayoutError::io("creating", tmp))?;
        let mut writer = ChunkWriter::new(handle, self.chunk_size);
        writer.push(&head).map_err(LayoutError::io("writing", tmp))?;
        if let Some(rest) = rest {
            writer.push(&rest).map_err(LayoutError::io("writing", tmp))?;
        }

        while let Some(chunk) = response.next_chunk().await {
            let chunk = chunk.map_err(body_error)?;
            writer.push(&chunk).map_err(LayoutError::io("writing", tmp))?;
        }

        let (_, written) = writer.finish().map_err(LayoutError::io("writing", tmp))?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::updater::testing::{FakeClient, Scripted};
    use crate::engine::updater::transport::RetryPolicy;
    use std::sync::Arc;
    use tempfile::tempdir;

    const RAW: &str = "https://raw.test/acme/sensor/main/firmware/";
    const MAIN: &str = "import machine\n\ndef main():\n    print('hello')\n";

    fn source() -> ReleaseSource {
        ReleaseSource::new("https://api.test", "https://raw.test", "acme", "sensor", "main")
            .with_firmware_path("firmware")
    }

    fn engine(client: Arc<FakeClient>, chunk_size: usize) -> FileTransferEngine<Arc<FakeClient>> {
        FileTransferEngine::new(
            RetryingTransport::new(client, RetryPolicy::immediate(2)),
            source(),
            chunk_size,
        )
    }

    fn manifest(names: &[&str]) -> Manifest {
        let source = source();
        Manifest::new(
            names
                .iter()
                .map(|n| FileManifestEntry::new(n, &source.remote_path(n)))
                .collect(),
            true,
        )
    }

    fn url(name: &str) -> String {
        format!("{}{}", RAW, name)
    }

    /// Counts write calls
    struct CountingWriter {
        data: Vec<u8>,
        calls: usize,
    }

    impl Write for CountingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_chunk_writer_write_count() {
        for (n, c) in [(0usize, 4usize), (1, 4), (4, 4), (5, 4), (4095, 1024), (4096, 1024)] {
            let data: Vec<u8> = (0..n).map(|i| (i % 251) as u8).collect();
            let mut writer = ChunkWriter::new(CountingWriter { data: vec![], calls: 0 }, c);
            // feed in uneven pieces
            for piece in data.chunks(3) {
                writer.push(piece).unwrap();
            }
            let writes = writer.writes();
            let (inner, written) = writer.finish().unwrap();
            assert_eq!(inner.calls, n.div_ceil(c), "n={} c={}", n, c);
            assert!(writes <= inner.calls);
            assert_eq!(written, n as u64);
            assert_eq!(inner.data, data);
        }
    }

    #[tokio::test]
    async fn test_download_streams_all_files() {
        let big: Vec<u8> = MAIN.bytes().cycle().take(5000).collect();
        let client = Arc::new(
            FakeClient::new()
                .with(&url("main.py"), Scripted::chunks(big.chunks(700).map(|c| c.to_vec()).collect()))
                .with(&url("config.py"), Scripted::ok("WIFI_SSID = 'x'\n"))
                .with(&url("version.txt"), Scripted::ok("v1.3.0")),
        );
        let dir = tempdir().unwrap();
        let staging = dir.path().join("temp");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("stale.py"), "old").unwrap();

        let mut progress = Vec::new();
        let report = engine(client, 1024)
            .download(&manifest(&["main.py", "config.py", "version.txt"]), &staging, |done, total| {
                progress.push((done, total))
            })
            .await
            .unwrap();

        assert_eq!(report.files, 3);
        assert!(report.skipped.is_empty());
        assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(fs::read(staging.join("main.py")).unwrap(), big);
        assert_eq!(fs::read_to_string(staging.join("version.txt")).unwrap(), "v1.3.0");
        assert!(!staging.join("stale.py").exists());
        assert!(!staging.join("main.py.tmp").exists());
    }

    #[tokio::test]
    async fn test_html_body_rejected_before_write() {
        let client = Arc::new(
            FakeClient::new()
                .with(&url("main.py"), Scripted::chunks(vec![b"<!DOC".to_vec(), b"TYPE html><p>rate limited</p>".to_vec()])),
        );
        let dir = tempdir().unwrap();

        let err = engine(client, 1024)
            .download(&manifest(&["main.py"]), dir.path(), |_, _| {})
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::Integrity { ref reason, .. } if *reason == ContentError::HtmlErrorPage
        ));
        assert_eq!(err.file(), Some("main.py"));
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_required_failure_aborts() {
        let client = Arc::new(
            FakeClient::new()
                .with(&url("main.py"), Scripted::ok(MAIN))
                .with(&url("config.py"), Scripted::status(500)),
        );
        let dir = tempdir().unwrap();

        let err = engine(client.clone(), 1024)
            .download(&manifest(&["main.py", "config.py", "logger.py"]), dir.path(), |_, _| {})
            .await
            .unwrap_err();

        assert_eq!(err.file(), Some("config.py"));
        assert!(dir.path().join("main.py").exists());
        assert!(!dir.path().join("config.py").exists());
        // aborted before the third file
        assert_eq!(client.calls_to(&url("logger.py")), 0);
        assert_eq!(client.calls_to(&url("config.py")), 2);
    }

    #[tokio::test]
    async fn test_missing_version_marker_is_skipped() {
        let client = Arc::new(FakeClient::new().with(&url("main.py"), Scripted::ok(MAIN)));
        let dir = tempdir().unwrap();

        let report = engine(client, 16)
            .download(&manifest(&["main.py", "version.txt"]), dir.path(), |_, _| {})
            .await
            .unwrap();

        assert_eq!(report.files, 1);
        assert_eq!(report.skipped, vec!["version.txt".to_string()]);
        assert_eq!(fs::read_to_string(dir.path().join("main.py")).unwrap(), MAIN);
    }

    #[tokio::test]
    async fn test_empty_body_rejected() {
        let client = Arc::new(FakeClient::new().with(&url("main.py"), Scripted::ok("")));
        let dir = tempdir().unwrap();

        let err = engine(client, 1024)
            .download(&manifest(&["main.py"]), dir.path(), |_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransferError::Integrity { ref reason, .. } if *reason == ContentError::Empty
        ));
    }
}
