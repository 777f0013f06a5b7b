use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;

use crate::{
    cache::store::{KeyValueStore, StoreResult},
    fingerprint::Fingerprint,
    frame::{FrameSet, RasterImage},
};

// Three keys per logical slot; only one slot is ever populated.
const KEY_FRAME_BUNDLE: &str = "preview-frames";
const KEY_WRITE_STAMP: &str = "preview-stamp";
const KEY_FINGERPRINT_TAG: &str = "preview-tag";

#[derive(Clone, Debug)]
pub struct FrameCacheConfig {
    /// Down-sampled frame count persisted to tier 2.
    pub persisted_frame_cap: usize,
    /// Persisted entries older than this read as absent and are purged.
    pub persist_ttl: Duration,
    /// JPEG quality for the persisted frames.
    pub jpeg_quality: u8,
}

impl Default for FrameCacheConfig {
    fn default() -> Self {
        Self {
            persisted_frame_cap: 15,
            persist_ttl: Duration::from_secs(24 * 60 * 60),
            jpeg_quality: 60,
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct PersistedBundle {
    jpeg_frames: Vec<Vec<u8>>,
}

/// Two-tier frame cache.
///
/// Tier 1 keeps full-resolution [`FrameSet`]s in memory for the process
/// lifetime. Tier 2 persists a JPEG-compressed, evenly down-sampled subset
/// through the injected [`KeyValueStore`] so a later process can rebuild a
/// reduced-fidelity set without re-capturing. Store failures never propagate:
/// the store is purged and the write retried once, after which the cache
/// quietly runs tier-1-only.
pub struct FrameCache {
    tier1: Mutex<HashMap<Fingerprint, Arc<FrameSet>>>,
    store: Arc<dyn KeyValueStore>,
    cfg: FrameCacheConfig,
}

impl FrameCache {
    pub fn new(store: Arc<dyn KeyValueStore>, cfg: FrameCacheConfig) -> Self {
        Self {
            tier1: Mutex::new(HashMap::new()),
            store,
            cfg,
        }
    }

    pub async fn get(&self, fingerprint: Fingerprint) -> Option<Arc<FrameSet>> {
        if let Some(set) = self.tier1.lock().get(&fingerprint) {
            return Some(Arc::clone(set));
        }

        let set = self.load_persisted(fingerprint).await?;
        let set = Arc::new(set);
        self.tier1.lock().insert(fingerprint, Arc::clone(&set));
        Some(set)
    }

    pub async fn put(&self, set: Arc<FrameSet>) {
        self.tier1
            .lock()
            .insert(set.fingerprint(), Arc::clone(&set));

        let Some(payload) = self.encode_bundle(&set) else {
            return;
        };

        if let Err(first) = self.persist(&payload, set.fingerprint()).await {
            tracing::warn!(error = %first, "tier-2 write failed, purging store and retrying");
            let _ = self.store.clear().await;
            if let Err(second) = self.persist(&payload, set.fingerprint()).await {
                tracing::warn!(
                    error = %second,
                    "tier-2 write failed after purge, caching in memory only"
                );
            }
        }
    }

    pub async fn clear(&self) {
        self.tier1.lock().clear();
        if let Err(e) = self.store.clear().await {
            tracing::warn!(error = %e, "failed to clear persistent frame store");
        }
    }

    async fn persist(&self, bundle: &[u8], fingerprint: Fingerprint) -> StoreResult<()> {
        self.store.set(KEY_FRAME_BUNDLE, bundle).await?;
        self.store
            .set(KEY_WRITE_STAMP, &now_millis().to_le_bytes())
            .await?;
        // The tag goes last: a slot without a matching tag is never read.
        self.store
            .set(KEY_FINGERPRINT_TAG, fingerprint.to_hex().as_bytes())
            .await?;
        Ok(())
    }

    fn encode_bundle(&self, set: &FrameSet) -> Option<Vec<u8>> {
        if set.is_empty() {
            return None;
        }
        let frames = set.frames();
        let cap = self.cfg.persisted_frame_cap.max(1).min(frames.len());
        let jpeg_frames: Vec<Vec<u8>> = (0..cap)
            .map(|i| &frames[i * frames.len() / cap])
            .map(|frame| encode_jpeg(frame, self.cfg.jpeg_quality))
            .collect::<Option<Vec<_>>>()?;

        bincode::serialize(&PersistedBundle { jpeg_frames })
            .map_err(|e| tracing::warn!(error = %e, "failed to serialize frame bundle"))
            .ok()
    }

    async fn load_persisted(&self, fingerprint: Fingerprint) -> Option<FrameSet> {
        let tag = self.read_key(KEY_FINGERPRINT_TAG).await?;
        if tag != fingerprint.to_hex().as_bytes() {
            return None;
        }

        let stamp_bytes = self.read_key(KEY_WRITE_STAMP).await?;
        let stamp = u64::from_le_bytes(stamp_bytes.try_into().ok()?);
        let age = now_millis().saturating_sub(stamp);
        if age > self.cfg.persist_ttl.as_millis() as u64 {
            tracing::debug!(age_ms = age, "persisted frames expired, purging");
            self.purge_slot().await;
            return None;
        }

        let bundle_bytes = self.read_key(KEY_FRAME_BUNDLE).await?;
        let bundle: PersistedBundle = match bincode::deserialize(&bundle_bytes) {
            Ok(bundle) => bundle,
            Err(e) => {
                tracing::warn!(error = %e, "corrupt persisted frame bundle, purging");
                self.purge_slot().await;
                return None;
            }
        };

        let mut frames = Vec::with_capacity(bundle.jpeg_frames.len());
        for jpeg in &bundle.jpeg_frames {
            match decode_jpeg(jpeg) {
                Some(frame) => frames.push(frame),
                None => {
                    tracing::warn!("undecodable persisted frame, purging");
                    self.purge_slot().await;
                    return None;
                }
            }
        }
        if frames.is_empty() {
            return None;
        }

        let captured_at = UNIX_EPOCH + Duration::from_millis(stamp);
        Some(FrameSet::reconstructed(fingerprint, frames, captured_at))
    }

    async fn read_key(&self, key: &str) -> Option<Vec<u8>> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key, error = %e, "persistent store read failed");
                None
            }
        }
    }

    async fn purge_slot(&self) {
        for key in [KEY_FRAME_BUNDLE, KEY_WRITE_STAMP, KEY_FINGERPRINT_TAG] {
            let _ = self.store.delete(key).await;
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn encode_jpeg(frame: &RasterImage, quality: u8) -> Option<Vec<u8>> {
    use image::ImageEncoder;

    let rgb: Vec<u8> = frame
        .data
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .write_image(&rgb, frame.width, frame.height, image::ExtendedColorType::Rgb8)
        .map_err(|e| tracing::warn!(error = %e, "jpeg encode failed"))
        .ok()?;
    Some(out)
}

fn decode_jpeg(bytes: &[u8]) -> Option<RasterImage> {
    let decoded = image::load_from_memory(bytes).ok()?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    RasterImage::from_rgba8(width, height, rgba.into_raw()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;

    fn frame(shade: u8) -> RasterImage {
        RasterImage::from_rgba8(4, 4, vec![shade; 4 * 4 * 4]).unwrap()
    }

    fn set_with(fp: Fingerprint, count: usize) -> Arc<FrameSet> {
        let frames = (0..count).map(|i| frame((i % 255) as u8)).collect();
        Arc::new(FrameSet::new(fp, frames))
    }

    fn fp(hi: u64) -> Fingerprint {
        Fingerprint { hi, lo: 1 }
    }

    #[tokio::test]
    async fn tier1_round_trip() {
        let cache = FrameCache::new(Arc::new(MemoryStore::new()), FrameCacheConfig::default());
        let set = set_with(fp(1), 30);
        cache.put(Arc::clone(&set)).await;

        let hit = cache.get(fp(1)).await.unwrap();
        assert_eq!(hit.len(), 30);
        assert!(!hit.reduced_fidelity());
        assert!(cache.get(fp(2)).await.is_none());
    }

    #[tokio::test]
    async fn tier2_reconstruction_survives_a_new_cache() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = FrameCache::new(Arc::clone(&store), FrameCacheConfig::default());
        first.put(set_with(fp(3), 40)).await;

        // A fresh cache over the same store stands in for a new process.
        let second = FrameCache::new(store, FrameCacheConfig::default());
        let rebuilt = second.get(fp(3)).await.unwrap();
        assert!(rebuilt.reduced_fidelity());
        assert!(rebuilt.len() <= 15);
        assert!(!rebuilt.is_empty());
    }

    #[tokio::test]
    async fn mismatched_fingerprint_reads_as_absent() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let first = FrameCache::new(Arc::clone(&store), FrameCacheConfig::default());
        first.put(set_with(fp(4), 20)).await;

        let second = FrameCache::new(store, FrameCacheConfig::default());
        assert!(second.get(fp(5)).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_purged_on_read() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cfg = FrameCacheConfig {
            persist_ttl: Duration::from_millis(0),
            ..FrameCacheConfig::default()
        };
        let first = FrameCache::new(Arc::clone(&store), cfg.clone());
        first.put(set_with(fp(6), 20)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = FrameCache::new(Arc::clone(&store), cfg);
        assert!(second.get(fp(6)).await.is_none());
        // The slot was purged, not just skipped.
        assert!(store.get(KEY_FRAME_BUNDLE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quota_failure_degrades_to_tier1_only() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::with_quota(8));
        let cache = FrameCache::new(Arc::clone(&store), FrameCacheConfig::default());

        // put must not fail even though every tier-2 write hits the quota.
        let set = set_with(fp(7), 25);
        cache.put(Arc::clone(&set)).await;
        assert!(cache.get(fp(7)).await.is_some());

        let fresh = FrameCache::new(store, FrameCacheConfig::default());
        assert!(fresh.get(fp(7)).await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_both_tiers() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let cache = FrameCache::new(Arc::clone(&store), FrameCacheConfig::default());
        cache.put(set_with(fp(8), 10)).await;

        cache.clear().await;
        assert!(cache.get(fp(8)).await.is_none());
        assert!(store.get(KEY_FRAME_BUNDLE).await.unwrap().is_none());
    }
}
