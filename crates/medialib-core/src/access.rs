//! Resolution of client-supplied relative paths to servable files.

use crate::error::AccessError;
use medialib_indexer::{ScanSettings, Walker};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Resolve `requested` (already URL-decoded) against the scan root.
///
/// Anything that could leave the root is rejected lexically before the file
/// system is touched. The result is canonical, lies under the canonical root,
/// is a regular file reached without a final symlink, and is something a
/// scan would index: not hidden or ignored, a recognised media extension,
/// within its size ceiling.
pub fn resolve_media_path(settings: &ScanSettings, requested: &str) -> Result<PathBuf, AccessError> {
    let relative = lexically_safe(requested)?;
    let root = settings.root.as_path();
    let classifier = &settings.classifier;

    let candidate = root.join(&relative);
    let meta = match std::fs::symlink_metadata(&candidate) {
        Ok(meta) => meta,
        Err(e) => {
            debug!(path = ?candidate, error = %e, "Requested media not found");
            return Err(AccessError::NotFound(requested.to_string()));
        }
    };
    if meta.file_type().is_symlink() {
        warn!(path = ?candidate, "Refusing to serve symlink");
        return Err(AccessError::Forbidden(requested.to_string()));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|_| AccessError::NotFound(requested.to_string()))?;
    let canonical = candidate
        .canonicalize()
        .map_err(|_| AccessError::NotFound(requested.to_string()))?;
    if !canonical.starts_with(&canonical_root) {
        warn!(requested, resolved = ?canonical, "Resolved path escapes scan root");
        return Err(AccessError::Forbidden(requested.to_string()));
    }

    if !meta.is_file() {
        return Err(AccessError::NotAFile(canonical));
    }

    let walker = Walker::new(&canonical_root, &settings.ignore_patterns).map_err(|e| {
        warn!(error = %e, "Invalid ignore patterns");
        AccessError::NotFound(requested.to_string())
    })?;
    if walker.is_ignored(&canonical) {
        warn!(requested, "Refusing to serve ignored file");
        return Err(AccessError::Forbidden(requested.to_string()));
    }

    let kind = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| classifier.classify_name(n));
    let Some(kind) = kind else {
        warn!(requested, "Refusing to serve non-media file");
        return Err(AccessError::Forbidden(requested.to_string()));
    };
    if !classifier.within_limit(kind, meta.len()) {
        warn!(requested, size = meta.len(), "Refusing to serve file over size ceiling");
        return Err(AccessError::Forbidden(requested.to_string()));
    }

    Ok(canonical)
}

/// Keep only normal components; `..`, roots and drive prefixes are refused.
fn lexically_safe(requested: &str) -> Result<PathBuf, AccessError> {
    if requested.contains('\0') {
        warn!(requested, "Rejected path with NUL byte");
        return Err(AccessError::Forbidden(requested.to_string()));
    }

    let mut relative = PathBuf::new();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                warn!(requested, "Rejected path traversal attempt");
                return Err(AccessError::Forbidden(requested.to_string()));
            }
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(AccessError::NotFound(requested.to_string()));
    }
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use medialib_indexer::{Classifier, DEFAULT_IGNORE_PATTERNS};
    use std::fs;
    use tempfile::tempdir;

    fn settings(root: &Path) -> ScanSettings {
        ScanSettings {
            root: root.to_path_buf(),
            classifier: Classifier::default(),
            ignore_patterns: DEFAULT_IGNORE_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_traversal_rejected_before_io() {
        // Root does not exist: any file system access would yield NotFound
        let root = Path::new("/data/media");

        for attempt in ["../../etc/passwd", "a/../../b.jpg", "/etc/passwd", "./../x.jpg"] {
            assert_eq!(
                resolve_media_path(&settings(root), attempt),
                Err(AccessError::Forbidden(attempt.to_string())),
                "{attempt}"
            );
        }
    }

    #[test]
    fn test_empty_path_not_found() {
        let temp_dir = tempdir().unwrap();
        let result = resolve_media_path(&settings(temp_dir.path()), "./");
        assert!(matches!(result, Err(AccessError::NotFound(_))));
    }

    #[test]
    fn test_resolves_nested_media() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir_all(temp_dir.path().join("trips/2024")).unwrap();
        fs::write(temp_dir.path().join("trips/2024/beach day.jpg"), b"x").unwrap();

        let resolved =
            resolve_media_path(&settings(temp_dir.path()), "trips/2024/beach day.jpg").unwrap();
        assert_eq!(
            resolved,
            temp_dir.path().canonicalize().unwrap().join("trips/2024/beach day.jpg")
        );
    }

    #[test]
    fn test_missing_directory_and_non_media() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir(temp_dir.path().join("album.jpg")).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"x").unwrap();

        assert!(matches!(
            resolve_media_path(&settings(temp_dir.path()), "missing.jpg"),
            Err(AccessError::NotFound(_))
        ));
        assert!(matches!(
            resolve_media_path(&settings(temp_dir.path()), "album.jpg"),
            Err(AccessError::NotAFile(_))
        ));
        assert!(matches!(
            resolve_media_path(&settings(temp_dir.path()), "notes.txt"),
            Err(AccessError::Forbidden(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_rejected() {
        let temp_dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.jpg"), b"x").unwrap();
        fs::write(temp_dir.path().join("inside.jpg"), b"x").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.jpg"), temp_dir.path().join("link.jpg")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("inside.jpg"), temp_dir.path().join("alias.jpg")).unwrap();
        std::os::unix::fs::symlink(outside.path(), temp_dir.path().join("linked")).unwrap();

        for attempt in ["link.jpg", "alias.jpg", "linked/secret.jpg"] {
            assert!(
                matches!(
                    resolve_media_path(&settings(temp_dir.path()), attempt),
                    Err(AccessError::Forbidden(_))
                ),
                "{attempt}"
            );
        }
    }

    #[test]
    fn test_ignored_and_oversized_rejected() {
        let temp_dir = tempdir().unwrap();
        fs::create_dir(temp_dir.path().join(".private")).unwrap();
        fs::write(temp_dir.path().join(".private/x.jpg"), b"x").unwrap();
        fs::write(temp_dir.path().join("~draft.jpg"), b"x").unwrap();
        fs::write(temp_dir.path().join("huge.jpg"), vec![0u8; 6 * 1024 * 1024]).unwrap();
        fs::write(temp_dir.path().join("fine.jpg"), b"x").unwrap();
        let settings = settings(temp_dir.path());

        for attempt in [".private/x.jpg", "~draft.jpg", "huge.jpg"] {
            assert!(
                matches!(resolve_media_path(&settings, attempt), Err(AccessError::Forbidden(_))),
                "{attempt}"
            );
        }
        assert!(resolve_media_path(&settings, "fine.jpg").is_ok());
    }
}
