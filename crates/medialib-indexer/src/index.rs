//! Thread-safe in-memory media index.
//!
//! Every operation takes the lock once, so readers always observe the state
//! before or after a whole merge/remove, never a partial one. Reads copy out;
//! callers never hold references into the index.

use crate::record::{path_key, MediaCounts, MediaFilter, MediaKind, MediaRecord};
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Collection of known media, kept sorted newest first.
#[derive(Debug, Default)]
pub struct MediaIndex {
    records: RwLock<Vec<MediaRecord>>,
}

impl MediaIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filtered, paginated copy of the index, newest first.
    ///
    /// `limit == 0` means no limit.
    pub fn snapshot(&self, filter: MediaFilter, limit: usize, offset: usize) -> Vec<MediaRecord> {
        page_locked(&self.records.read(), filter, limit, offset)
    }

    /// A page and the counts it belongs to, from one read.
    pub fn page(&self, filter: MediaFilter, limit: usize, offset: usize) -> (Vec<MediaRecord>, MediaCounts) {
        let records = self.records.read();
        (page_locked(&records, filter, limit, offset), counts_locked(&records))
    }

    /// Merge the result of a full scan.
    ///
    /// Existing records whose file is gone, or that `keep` rejects, are
    /// dropped; then every incoming record replaces any entry with the same
    /// path. Returns the number dropped.
    pub fn merge<F>(&self, incoming: Vec<MediaRecord>, keep: F) -> usize
    where
        F: Fn(&MediaRecord) -> bool,
    {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| keep(r) && still_on_disk(&r.absolute_path));
        let dropped = before - records.len();

        upsert_locked(&mut records, incoming);

        debug!(dropped, total = records.len(), "Merged full scan");
        dropped
    }

    /// Union incoming records into the index without dropping anything.
    pub fn upsert(&self, incoming: Vec<MediaRecord>) {
        if incoming.is_empty() {
            return;
        }
        let mut records = self.records.write();
        upsert_locked(&mut records, incoming);
    }

    /// Remove the record for `path`. Returns whether one was removed.
    pub fn remove(&self, path: &Path) -> bool {
        let key = path_key(path);
        let mut records = self.records.write();
        match records.iter().position(|r| r.key() == key) {
            Some(idx) => {
                records.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Drop every record for which `keep` returns false. Returns the number removed.
    pub fn prune<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&MediaRecord) -> bool,
    {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|r| keep(r));
        before - records.len()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Counts from a single read of the index.
    pub fn counts(&self) -> MediaCounts {
        counts_locked(&self.records.read())
    }

    /// One record chosen uniformly at random among those matching `filter`.
    pub fn pick_random(&self, filter: MediaFilter) -> Option<MediaRecord> {
        let records = self.records.read();
        records
            .iter()
            .filter(|r| filter.accepts(r.kind))
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    /// Look up one record by path.
    pub fn get(&self, path: &Path) -> Option<MediaRecord> {
        let key = path_key(path);
        self.records.read().iter().find(|r| r.key() == key).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn page_locked(records: &[MediaRecord], filter: MediaFilter, limit: usize, offset: usize) -> Vec<MediaRecord> {
    let matching = records
        .iter()
        .filter(|r| filter.accepts(r.kind))
        .skip(offset);
    if limit == 0 {
        matching.cloned().collect()
    } else {
        matching.take(limit).cloned().collect()
    }
}

fn counts_locked(records: &[MediaRecord]) -> MediaCounts {
    let image = records.iter().filter(|r| r.kind == MediaKind::Image).count();
    MediaCounts {
        total: records.len(),
        image,
        video: records.len() - image,
    }
}

fn upsert_locked(records: &mut Vec<MediaRecord>, incoming: Vec<MediaRecord>) {
    let mut by_key: HashMap<String, MediaRecord> = records.drain(..).map(|r| (r.key(), r)).collect();
    for record in incoming {
        by_key.insert(record.key(), record);
    }
    records.extend(by_key.into_values());
    records.sort_by(newest_first);
}

fn newest_first(a: &MediaRecord, b: &MediaRecord) -> Ordering {
    b.modified_at
        .total_cmp(&a.modified_at)
        .then_with(|| a.absolute_path.cmp(&b.absolute_path))
}

/// Existence check; errors count as "gone".
fn still_on_disk(path: &Path) -> bool {
    match path.try_exists() {
        Ok(exists) => exists,
        Err(e) => {
            warn!(path = ?path, error = %e, "Cannot stat indexed file, dropping it");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn record(root: &Path, name: &str, kind: MediaKind, modified_at: f64) -> MediaRecord {
        MediaRecord::new(root, &root.join(name), kind, 1024, modified_at).unwrap()
    }

    fn names(records: &[MediaRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_upsert_sorts_newest_first() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(vec![
            record(&root, "old.jpg", MediaKind::Image, 10.0),
            record(&root, "new.mp4", MediaKind::Video, 30.0),
            record(&root, "mid.png", MediaKind::Image, 20.0),
        ]);

        let all = index.snapshot(MediaFilter::All, 0, 0);
        assert_eq!(names(&all), vec!["new.mp4", "mid.png", "old.jpg"]);
    }

    #[test]
    fn test_snapshot_filter_and_pagination() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(
            (0..6)
                .map(|i| record(&root, &format!("{i}.jpg"), MediaKind::Image, i as f64))
                .chain([record(&root, "clip.mp4", MediaKind::Video, 100.0)])
                .collect(),
        );

        assert_eq!(index.snapshot(MediaFilter::Image, 0, 0).len(), 6);
        assert_eq!(names(&index.snapshot(MediaFilter::Video, 0, 0)), vec!["clip.mp4"]);
        assert_eq!(names(&index.snapshot(MediaFilter::Image, 2, 1)), vec!["4.jpg", "3.jpg"]);
        assert!(index.snapshot(MediaFilter::Image, 5, 10).is_empty());
    }

    #[test]
    fn test_upsert_replaces_same_path() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(vec![record(&root, "a.jpg", MediaKind::Image, 1.0)]);

        let mut updated = record(&root, "a.jpg", MediaKind::Image, 2.0);
        updated.size_bytes = 4096;
        index.upsert(vec![updated.clone(), updated]);

        assert_eq!(index.len(), 1);
        let all = index.snapshot(MediaFilter::All, 0, 0);
        assert_eq!(all[0].size_bytes, 4096);
        assert_eq!(all[0].modified_at, 2.0);
    }

    #[test]
    fn test_merge_drops_missing_files() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("kept.jpg"), b"x").unwrap();

        let index = MediaIndex::new();
        index.upsert(vec![
            record(root, "kept.jpg", MediaKind::Image, 1.0),
            record(root, "gone.jpg", MediaKind::Image, 2.0),
        ]);

        fs::write(root.join("new.mp4"), b"x").unwrap();
        let dropped = index.merge(vec![record(root, "new.mp4", MediaKind::Video, 3.0)], |_| true);

        let all = index.snapshot(MediaFilter::All, 0, 0);
        assert_eq!(names(&all), vec!["new.mp4", "kept.jpg"]);
        assert_eq!(dropped, 1);
    }

    #[test]
    fn test_merge_drops_rejected_records() {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("small.jpg"), b"x").unwrap();
        fs::write(root.join("large.jpg"), b"x").unwrap();

        let index = MediaIndex::new();
        index.upsert(vec![
            record(root, "small.jpg", MediaKind::Image, 1.0),
            record(root, "large.jpg", MediaKind::Image, 2.0),
        ]);

        let dropped = index.merge(Vec::new(), |r| r.name != "large.jpg");
        assert_eq!(dropped, 1);
        assert_eq!(names(&index.snapshot(MediaFilter::All, 0, 0)), vec!["small.jpg"]);
    }

    #[test]
    fn test_page_matches_counts() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(vec![
            record(&root, "a.jpg", MediaKind::Image, 3.0),
            record(&root, "b.mp4", MediaKind::Video, 2.0),
            record(&root, "c.jpg", MediaKind::Image, 1.0),
        ]);

        let (page, counts) = index.page(MediaFilter::Image, 1, 1);
        assert_eq!(names(&page), vec!["c.jpg"]);
        assert_eq!(counts.image, 2);
        assert_eq!(counts.total, 3);
    }

    #[test]
    fn test_remove_exactly_one() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(vec![
            record(&root, "a.jpg", MediaKind::Image, 3.0),
            record(&root, "b.jpg", MediaKind::Image, 2.0),
            record(&root, "c.mp4", MediaKind::Video, 1.0),
        ]);

        assert!(index.remove(&root.join("b.jpg")));
        assert_eq!(names(&index.snapshot(MediaFilter::All, 0, 0)), vec!["a.jpg", "c.mp4"]);

        assert!(!index.remove(&root.join("d.jpg")));
        assert_eq!(names(&index.snapshot(MediaFilter::All, 0, 0)), vec!["a.jpg", "c.mp4"]);
    }

    #[test]
    fn test_counts() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        assert_eq!(index.counts(), MediaCounts::default());

        index.upsert(vec![
            record(&root, "a.jpg", MediaKind::Image, 3.0),
            record(&root, "b.mp4", MediaKind::Video, 2.0),
            record(&root, "c.mp4", MediaKind::Video, 1.0),
        ]);
        assert_eq!(
            index.counts(),
            MediaCounts {
                total: 3,
                image: 1,
                video: 2
            }
        );
    }

    #[test]
    fn test_prune_and_clear() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        index.upsert(vec![
            record(&root, "a.jpg", MediaKind::Image, 3.0),
            record(&root, "b.mp4", MediaKind::Video, 2.0),
        ]);

        assert_eq!(index.prune(|r| r.kind == MediaKind::Video), 1);
        assert_eq!(index.len(), 1);

        index.clear();
        assert!(index.is_empty());
    }

    #[test]
    fn test_pick_random_respects_filter() {
        let root = PathBuf::from("/data/media");
        let index = MediaIndex::new();
        assert!(index.pick_random(MediaFilter::All).is_none());

        index.upsert(vec![
            record(&root, "a.jpg", MediaKind::Image, 3.0),
            record(&root, "b.mp4", MediaKind::Video, 2.0),
        ]);
        for _ in 0..20 {
            let picked = index.pick_random(MediaFilter::Video).unwrap();
            assert_eq!(picked.name, "b.mp4");
        }
        assert!(index.get(&root.join("a.jpg")).is_some());
    }
}
