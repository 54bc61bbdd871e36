//! Media classification by extension, optionally refined by file signature.

use crate::record::MediaKind;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Default image extensions.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".bmp", ".webp", ".apng", ".tiff", ".tif",
];

/// Default video extensions.
pub const DEFAULT_VIDEO_EXTENSIONS: &[&str] = &[
    ".webm", ".mp4", ".ogv", ".mov", ".avi", ".mkv", ".m4v", ".wmv",
];

const MIB: u64 = 1024 * 1024;

/// Bytes read from the head of a file for signature matching.
const SNIFF_LEN: u64 = 16;

/// Extension set and size ceiling for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindRule {
    extensions: HashSet<String>,
    /// Size ceiling in bytes (0 = unlimited)
    max_size: u64,
}

impl KindRule {
    /// Create a rule; extensions are normalised to `.lowercase`.
    pub fn new<I, S>(extensions: I, max_size: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .filter_map(|e| normalize_extension(e.as_ref()))
                .collect(),
            max_size,
        }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn matches(&self, extension: &str) -> bool {
        self.extensions.contains(extension)
    }
}

/// Maps files to a [`MediaKind`] and enforces per-kind size ceilings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    image: KindRule,
    video: KindRule,
    sniff_content: bool,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(
            KindRule::new(DEFAULT_IMAGE_EXTENSIONS, 5 * MIB),
            KindRule::new(DEFAULT_VIDEO_EXTENSIONS, 100 * MIB),
        )
    }
}

impl Classifier {
    /// Extension-only classifier.
    pub fn new(image: KindRule, video: KindRule) -> Self {
        Self {
            image,
            video,
            sniff_content: false,
        }
    }

    /// Enable or disable signature sniffing.
    pub fn with_sniffing(mut self, enabled: bool) -> Self {
        self.sniff_content = enabled;
        self
    }

    pub fn rule(&self, kind: MediaKind) -> &KindRule {
        match kind {
            MediaKind::Image => &self.image,
            MediaKind::Video => &self.video,
        }
    }

    /// Classify by file name alone.
    pub fn classify_name(&self, name: &str) -> Option<MediaKind> {
        let ext = extension_of(name)?;
        if self.image.matches(&ext) {
            Some(MediaKind::Image)
        } else if self.video.matches(&ext) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Classify a file on disk.
    ///
    /// The extension decides whether the file is media at all. With sniffing
    /// enabled, a recognised signature overrides the extension's kind; an
    /// unreadable file or unknown signature keeps the extension's answer.
    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let name = path.file_name()?.to_str()?;
        let by_extension = self.classify_name(name)?;

        if !self.sniff_content {
            return Some(by_extension);
        }

        match sniff_file(path) {
            Some(sniffed) if sniffed != by_extension => {
                debug!(path = ?path, extension = %by_extension, content = %sniffed, "Signature disagrees with extension");
                Some(sniffed)
            }
            _ => Some(by_extension),
        }
    }

    /// Whether `size_bytes` is within the ceiling for `kind` (inclusive).
    pub fn within_limit(&self, kind: MediaKind, size_bytes: u64) -> bool {
        let max = self.rule(kind).max_size;
        max == 0 || size_bytes <= max
    }
}

/// Lower-cased extension with a leading dot, or `None` for empty input.
pub fn normalize_extension(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}

fn extension_of(name: &str) -> Option<String> {
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(name[idx..].to_lowercase())
}

/// A byte signature: every `(offset, bytes)` part must match.
struct Signature {
    parts: &'static [(usize, &'static [u8])],
    kind: MediaKind,
}

impl Signature {
    fn matches(&self, buf: &[u8]) -> bool {
        self.parts.iter().all(|(offset, bytes)| {
            buf.len() >= offset + bytes.len() && &buf[*offset..offset + bytes.len()] == *bytes
        })
    }
}

const SIGNATURES: &[Signature] = &[
    // jpeg
    Signature {
        parts: &[(0, &[0xFF, 0xD8, 0xFF])],
        kind: MediaKind::Image,
    },
    // png, apng
    Signature {
        parts: &[(0, &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A])],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(0, b"GIF87a")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(0, b"GIF89a")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(0, b"RIFF"), (8, b"WEBP")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(0, b"II*\0")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(0, b"MM\0*")],
        kind: MediaKind::Image,
    },
    // ISO-BMFF still-image brands must precede the generic ftyp rule
    Signature {
        parts: &[(4, b"ftypavif")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(4, b"ftypheic")],
        kind: MediaKind::Image,
    },
    Signature {
        parts: &[(4, b"ftyp")],
        kind: MediaKind::Video,
    },
    Signature {
        parts: &[(0, b"RIFF"), (8, b"AVI ")],
        kind: MediaKind::Video,
    },
    // matroska, webm
    Signature {
        parts: &[(0, &[0x1A, 0x45, 0xDF, 0xA3])],
        kind: MediaKind::Video,
    },
    Signature {
        parts: &[(0, b"OggS")],
        kind: MediaKind::Video,
    },
    // asf, wmv
    Signature {
        parts: &[(0, &[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11])],
        kind: MediaKind::Video,
    },
    Signature {
        parts: &[(0, b"BM")],
        kind: MediaKind::Image,
    },
];

/// Match a buffer against the known signatures.
pub fn sniff_bytes(buf: &[u8]) -> Option<MediaKind> {
    SIGNATURES.iter().find(|s| s.matches(buf)).map(|s| s.kind)
}

/// Read the head of `path` and match it. Any read failure yields `None`.
pub fn sniff_file(path: &Path) -> Option<MediaKind> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!(path = ?path, error = %e, "Sniff failed to open file");
            return None;
        }
    };
    let mut buf = Vec::with_capacity(SNIFF_LEN as usize);
    if let Err(e) = file.take(SNIFF_LEN).read_to_end(&mut buf) {
        debug!(path = ?path, error = %e, "Sniff failed to read file");
        return None;
    }
    sniff_bytes(&buf)
}
