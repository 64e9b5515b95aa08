//! Integration tests for the resource catalog: caching, eviction and the
//! sandbox boundary.

use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mcp_learning_server::resources::{
    CacheLimits, ContentSource, FileMetadata, FsSource, ResourceCatalog, ResourceEntry,
    ResourceError, ResourceIndex, Sandbox,
};

/// Counts reads that reach the file system.
#[derive(Debug, Default)]
struct CountingSource {
    reads: AtomicUsize,
}

impl CountingSource {
    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ContentSource for CountingSource {
    fn metadata(&self, path: &Path) -> io::Result<FileMetadata> {
        FsSource.metadata(path)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        FsSource.read(path)
    }
}

fn entry(id: &str, path: &str) -> ResourceEntry {
    ResourceEntry {
        id: id.to_string(),
        path: path.to_string(),
        title: id.to_string(),
        description: String::new(),
        mime_type: "text/plain".to_string(),
        tags: Vec::new(),
    }
}

fn catalog(root: &Path, max_bytes: usize, source: Arc<CountingSource>) -> ResourceCatalog {
    let index = ResourceIndex::from_entries([
        entry("a", "a.txt"),
        entry("b", "b.txt"),
        entry("c", "c.txt"),
        entry("escape", "../outside.txt"),
    ]);
    ResourceCatalog::with_source(
        Arc::new(Sandbox::new(root).unwrap()),
        index,
        CacheLimits {
            max_bytes,
            max_resource_size: 1024,
        },
        source,
    )
}

fn populate(root: &Path) {
    std::fs::write(root.join("a.txt"), "aaaa").unwrap();
    std::fs::write(root.join("b.txt"), "bbbb").unwrap();
    std::fs::write(root.join("c.txt"), "cccc").unwrap();
}

#[test]
fn repeated_reads_hit_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let source = Arc::new(CountingSource::default());
    let catalog = catalog(dir.path(), 1024, Arc::clone(&source));

    let first = catalog.read("a").unwrap();
    let second = catalog.read("a").unwrap();
    let third = catalog.read("a").unwrap();

    assert_eq!(source.reads(), 1);
    assert_eq!(&*first.bytes, b"aaaa");
    assert_eq!(first.bytes, second.bytes);
    assert_eq!(second.bytes, third.bytes);

    let stats = catalog.cache_stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.misses, 1);
}

#[test]
fn invalidation_forces_a_fresh_read() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let source = Arc::new(CountingSource::default());
    let catalog = catalog(dir.path(), 1024, Arc::clone(&source));

    catalog.read("b").unwrap();
    std::fs::write(dir.path().join("b.txt"), "BBBB-updated").unwrap();
    assert!(catalog.invalidate("b"));

    let content = catalog.read("b").unwrap();
    assert_eq!(content.text(), Some("BBBB-updated"));
    assert_eq!(source.reads(), 2);
}

#[test]
fn least_recently_used_is_evicted_first() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let source = Arc::new(CountingSource::default());
    // Room for two four-byte resources.
    let catalog = catalog(dir.path(), 10, Arc::clone(&source));

    catalog.read("a").unwrap();
    catalog.read("b").unwrap();
    catalog.read("a").unwrap();
    catalog.read("c").unwrap();

    let stats = catalog.cache_stats();
    assert_eq!(stats.entries, 2);
    assert!(stats.total_bytes <= stats.max_bytes);
    assert_eq!(stats.evictions, 1);

    // `a` stayed cached, `b` must come from disk again.
    let before = source.reads();
    catalog.read("a").unwrap();
    assert_eq!(source.reads(), before);
    catalog.read("b").unwrap();
    assert_eq!(source.reads(), before + 1);
}

#[test]
fn escapes_never_reach_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(dir.path().join("outside.txt"), "secret").unwrap();
    let source = Arc::new(CountingSource::default());
    let catalog = catalog(&root, 1024, Arc::clone(&source));

    let error = catalog.read("escape").unwrap_err();
    assert!(matches!(error, ResourceError::Access { .. }), "{error:?}");
    assert_eq!(source.reads(), 0);
}

#[test]
fn concurrent_reads_keep_the_bound() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());
    let source = Arc::new(CountingSource::default());
    let catalog = Arc::new(catalog(dir.path(), 10, source));

    let threads: Vec<_> = (0..8)
        .map(|t| {
            let catalog = Arc::clone(&catalog);
            std::thread::spawn(move || {
                for n in 0..200 {
                    let id = ["a", "b", "c"][(t + n) % 3];
                    let content = catalog.read(id).unwrap();
                    assert_eq!(content.bytes.len(), 4);
                    let stats = catalog.cache_stats();
                    assert!(stats.total_bytes <= stats.max_bytes);
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    let stats = catalog.cache_stats();
    assert_eq!(stats.total_bytes, stats.entries * 4);
}
