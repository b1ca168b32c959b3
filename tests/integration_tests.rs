//! End-to-end: file-backed fetching, disk persistence across cache
//! instances, and a scrolling list on top.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tempfile::TempDir;

use lazy_asset_cache::config::Config;
use lazy_asset_cache::{
    AssetCache, BindingState, BytesDecoder, FileFetcher, Locator, RowBindingCoordinator, RowSource,
};

struct Gallery {
    rows: HashMap<usize, Locator>,
}

impl RowSource<usize, Bytes> for Gallery {
    fn locator_for(&self, row: &usize) -> Option<Locator> {
        self.rows.get(row).cloned()
    }

    fn visible_rows(&self) -> Vec<usize> {
        let mut rows: Vec<usize> = self.rows.keys().copied().collect();
        rows.sort_unstable();
        rows
    }
}

async fn wait_for<F: FnMut() -> bool>(mut cond: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_persisted_assets_survive_a_new_cache_instance() {
    let tmp = TempDir::new().unwrap();
    let source_dir = tmp.path().join("originals");
    std::fs::create_dir_all(&source_dir).unwrap();
    std::fs::write(source_dir.join("one.bin"), b"first image").unwrap();

    let mut config = Config::default();
    config.cache.directory = tmp.path().join("cache");

    let fetcher = Arc::new(FileFetcher::with_root(&source_dir));
    let cache = AssetCache::from_config(&config, fetcher.clone(), BytesDecoder)
        .await
        .unwrap();
    let loc = Locator::new("one.bin");
    assert_eq!(&cache.resolve(loc.clone()).await.unwrap()[..], b"first image");
    drop(cache);

    // The original is gone; only the disk tier can answer now.
    std::fs::remove_file(source_dir.join("one.bin")).unwrap();

    let restarted = AssetCache::from_config(&config, fetcher, BytesDecoder)
        .await
        .unwrap();
    assert_eq!(&restarted.resolve(loc).await.unwrap()[..], b"first image");

    let stats = restarted.stats();
    assert_eq!(stats.disk_hits, 1);
    assert_eq!(stats.fetches, 0);
}

#[tokio::test]
async fn test_scrolling_gallery_shows_each_row_its_own_image() {
    let tmp = TempDir::new().unwrap();
    let mut rows = HashMap::new();
    for i in 0..20usize {
        let name = format!("img-{i}.bin");
        std::fs::write(tmp.path().join(&name), format!("pixels-{i}")).unwrap();
        rows.insert(i, Locator::new(name));
    }
    let gallery = Arc::new(Gallery { rows });

    let cache = AssetCache::builder(Arc::new(FileFetcher::with_root(tmp.path())), BytesDecoder).build();
    let coord = RowBindingCoordinator::new(cache.clone(), Default::default());
    coord.attach_source(&gallery);

    // Simulate recycled cells: one shown slot per visible row, rebound as the
    // list scrolls past all twenty rows.
    let shown: Arc<Mutex<HashMap<usize, Bytes>>> = Arc::default();
    coord.on_drag_begin();
    for first_visible in 0..16usize {
        for row in first_visible..first_visible + 5 {
            let shown = shown.clone();
            coord.bind_row(row, move |asset| {
                if let Some(asset) = asset {
                    shown.lock().insert(row, Bytes::clone(&asset));
                }
            });
        }
    }
    coord.on_drag_end(false);

    wait_for(|| {
        (0..20).all(|row| coord.binding_state(&row) == Some(BindingState::Delivered))
    })
    .await;
    cache.settled().await;

    let shown = shown.lock();
    for row in 0..20usize {
        assert_eq!(shown[&row], Bytes::from(format!("pixels-{row}")));
    }
    assert_eq!(cache.stats().fetches, 20);
}
