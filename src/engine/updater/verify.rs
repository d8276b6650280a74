//! Content Verification
//!
//! Integrity checks on downloaded bodies and staged files: non-empty, not an
//! HTML error page, large enough, and for source files some recognisable
//! code structure. Files are scanned through a small fixed buffer.

use super::manifest::FileKind;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use thiserror::Error;

/// Bytes inspected when sniffing for an HTML document
pub const HTML_PROBE_LEN: usize = 64;

/// Smallest plausible source file
pub const MIN_SOURCE_BYTES: u64 = 10;

/// At least one must appear in a source file
pub const SOURCE_MARKERS: &[&str] = &["import ", "def ", "class ", " = "];

const SCAN_BUFFER: usize = 512;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("empty body")]
    Empty,

    #[error("body is an HTML error page")]
    HtmlErrorPage,

    #[error("too small ({size} bytes, need at least {min})")]
    TooSmall { size: u64, min: u64 },

    #[error("no recognisable source structure")]
    MissingStructure,

    #[error("unreadable: {0}")]
    Unreadable(String),
}

impl From<io::Error> for ContentError {
    fn from(e: io::Error) -> Self {
        Self::Unreadable(e.to_string())
    }
}

/// Whether the start of a body looks like an HTML document
pub fn looks_like_html(prefix: &[u8]) -> bool {
    let prefix = prefix.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(prefix);
    let start = prefix
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(prefix.len());
    let head: Vec<u8> = prefix[start..]
        .iter()
        .take(HTML_PROBE_LEN)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    head.starts_with(b"<!doctype html") || head.starts_with(b"<html")
}

/// Check the first bytes of a body before anything is written
pub fn check_body_prefix(prefix: &[u8]) -> Result<(), ContentError> {
    if prefix.is_empty() {
        return Err(ContentError::Empty);
    }
    if looks_like_html(prefix) {
        return Err(ContentError::HtmlErrorPage);
    }
    Ok(())
}

pub fn min_size(kind: FileKind) -> u64 {
    match kind {
        FileKind::Source => MIN_SOURCE_BYTES,
        FileKind::VersionMarker | FileKind::Data => 1,
    }
}

/// Validate a staged file before it may be promoted. Returns its size.
pub fn validate_staged_file(path: &Path, kind: FileKind) -> Result<u64, ContentError> {
    let size = path.metadata()?.len();
    if size == 0 {
        return Err(ContentError::Empty);
    }
    let min = min_size(kind);
    if size < min {
        return Err(ContentError::TooSmall { size, min });
    }

    let mut file = File::open(path)?;
    let mut head = [0u8; HTML_PROBE_LEN];
    let read = read_up_to(&mut file, &mut head)?;
    check_body_prefix(&head[..read])?;

    if kind == FileKind::Source {
        let file = File::open(path)?;
        if !contains_any(file, SOURCE_MARKERS)? {
            return Err(ContentError::MissingStructure);
        }
    }
    Ok(size)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Stream `reader` looking for any of `needles`, keeping a short overlap so
/// matches spanning two reads are found
pub fn contains_any<R: Read>(mut reader: R, needles: &[&str]) -> io::Result<bool> {
    let overlap = needles.iter().map(|n| n.len()).max().unwrap_or(1).saturating_sub(1);
    let mut window: Vec<u8> = Vec::with_capacity(SCAN_BUFFER + overlap);
    let mut buffer = [0u8; SCAN_BUFFER];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            return Ok(false);
        }
        window.extend_from_slice(&buffer[..n]);

        if needles
            .iter()
            .any(|needle| window.windows(needle.len()).any(|w| w == needle.as_bytes()))
        {
            return Ok(true);
        }

        let keep = window.len().min(overlap);
        window.drain(..window.len() - keep);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_html_detection() {
        assert!(looks_like_html(b"<!DOCTYPE html><html><body>404</body></html>"));
        assert!(looks_like_html(b"\n   <HTML lang=\"en\">"));
        assert!(looks_like_html(b"\xEF\xBB\xBF<html>"));
        assert!(!looks_like_html(b"import machine\n"));
        assert!(!looks_like_html(b"# <html> in a comment"));
    }

    #[test]
    fn test_body_prefix() {
        assert_eq!(check_body_prefix(b""), Err(ContentError::Empty));
        assert_eq!(check_body_prefix(b"<html>"), Err(ContentError::HtmlErrorPage));
        assert_eq!(check_body_prefix(b"v1.2.0"), Ok(()));
    }

    #[test]
    fn test_marker_split_across_reads() {
        let mut text = vec![b'#'; SCAN_BUFFER - 3];
        text.extend_from_slice(b"import machine\n");
        assert!(contains_any(Cursor::new(text), SOURCE_MARKERS).unwrap());
        assert!(!contains_any(Cursor::new(b"just some words".to_vec()), SOURCE_MARKERS).unwrap());
    }

    #[test]
    fn test_validate_source_file() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("main.py");
        fs::write(&good, "import time\n\ndef main():\n    pass\n").unwrap();
        assert!(validate_staged_file(&good, FileKind::Source).is_ok());

        let tiny = dir.path().join("tiny.py");
        fs::write(&tiny, "x=1").unwrap();
        assert_eq!(
            validate_staged_file(&tiny, FileKind::Source),
            Err(ContentError::TooSmall { size: 3, min: MIN_SOURCE_BYTES })
        );

        let prose = dir.path().join("prose.py");
        fs::write(&prose, "this is not code at all").unwrap();
        assert_eq!(
            validate_staged_file(&prose, FileKind::Source),
            Err(ContentError::MissingStructure)
        );

        let html = dir.path().join("page.py");
        fs::write(&html, "<!DOCTYPE html>\n<title>import x = 1</title>").unwrap();
        assert_eq!(
            validate_staged_file(&html, FileKind::Source),
            Err(ContentError::HtmlErrorPage)
        );
    }

    #[test]
    fn test_validate_marker_and_missing() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("version.txt");
        fs::write(&marker, "v2").unwrap();
        assert_eq!(validate_staged_file(&marker, FileKind::VersionMarker), Ok(2));

        let empty = dir.path().join("empty.txt");
        fs::write(&empty, "").unwrap();
        assert_eq!(validate_staged_file(&empty, FileKind::Data), Err(ContentError::Empty));

        assert!(matches!(
            validate_staged_file(&dir.path().join("missing.py"), FileKind::Source),
            Err(ContentError::Unreadable(_))
        ));
    }
}
