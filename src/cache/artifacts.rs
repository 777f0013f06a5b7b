use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::fingerprint::Fingerprint;

/// The two output encodings the pipeline produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    LoopImage,
    Video,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::LoopImage, OutputFormat::Video];

    pub fn tag(self) -> &'static str {
        match self {
            OutputFormat::LoopImage => "loop-image",
            OutputFormat::Video => "video",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            OutputFormat::LoopImage => "gif",
            OutputFormat::Video => "mp4",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// One finished encode.
#[derive(Clone, Debug)]
pub struct EncodedArtifact {
    pub format: OutputFormat,
    pub fingerprint: Fingerprint,
    pub bytes: Vec<u8>,
}

/// In-process cache of the finished artifacts for the currently-active
/// fingerprint. A put for a different fingerprint supersedes everything held
/// for the old one.
pub struct ArtifactCache {
    inner: Mutex<Option<Slot>>,
}

struct Slot {
    fingerprint: Fingerprint,
    artifacts: HashMap<OutputFormat, Arc<EncodedArtifact>>,
}

impl ArtifactCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn get(&self, fingerprint: Fingerprint, format: OutputFormat) -> Option<Arc<EncodedArtifact>> {
        let inner = self.inner.lock();
        let slot = inner.as_ref()?;
        if slot.fingerprint != fingerprint {
            return None;
        }
        slot.artifacts.get(&format).cloned()
    }

    pub fn put(&self, artifact: EncodedArtifact) {
        let mut inner = self.inner.lock();
        let slot = match inner.as_mut() {
            Some(slot) if slot.fingerprint == artifact.fingerprint => slot,
            _ => inner.insert(Slot {
                fingerprint: artifact.fingerprint,
                artifacts: HashMap::new(),
            }),
        };
        slot.artifacts.insert(artifact.format, Arc::new(artifact));
    }

    /// True when every output format is already cached for `fingerprint`.
    pub fn has_all(&self, fingerprint: Fingerprint) -> bool {
        let inner = self.inner.lock();
        match inner.as_ref() {
            Some(slot) if slot.fingerprint == fingerprint => OutputFormat::ALL
                .iter()
                .all(|format| slot.artifacts.contains_key(format)),
            _ => false,
        }
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(fp: Fingerprint, format: OutputFormat) -> EncodedArtifact {
        EncodedArtifact {
            format,
            fingerprint: fp,
            bytes: vec![1, 2, 3],
        }
    }

    fn fp(hi: u64) -> Fingerprint {
        Fingerprint { hi, lo: 0 }
    }

    #[test]
    fn stores_and_reports_completeness() {
        let cache = ArtifactCache::new();
        assert!(!cache.has_all(fp(1)));

        cache.put(artifact(fp(1), OutputFormat::LoopImage));
        assert!(cache.get(fp(1), OutputFormat::LoopImage).is_some());
        assert!(cache.get(fp(1), OutputFormat::Video).is_none());
        assert!(!cache.has_all(fp(1)));

        cache.put(artifact(fp(1), OutputFormat::Video));
        assert!(cache.has_all(fp(1)));
    }

    #[test]
    fn new_fingerprint_supersedes_old_artifacts() {
        let cache = ArtifactCache::new();
        cache.put(artifact(fp(1), OutputFormat::LoopImage));
        cache.put(artifact(fp(1), OutputFormat::Video));

        cache.put(artifact(fp(2), OutputFormat::LoopImage));
        assert!(cache.get(fp(1), OutputFormat::LoopImage).is_none());
        assert!(cache.get(fp(1), OutputFormat::Video).is_none());
        assert!(cache.get(fp(2), OutputFormat::LoopImage).is_some());
        assert!(!cache.has_all(fp(2)));
    }

    #[test]
    fn clear_invalidates_everything() {
        let cache = ArtifactCache::new();
        cache.put(artifact(fp(3), OutputFormat::LoopImage));
        cache.clear();
        assert!(cache.get(fp(3), OutputFormat::LoopImage).is_none());
    }
}
