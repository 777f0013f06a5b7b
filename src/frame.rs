use std::time::SystemTime;

use crate::{
    error::{PreviewError, PreviewResult},
    fingerprint::Fingerprint,
};

/// One captured still, RGBA8.
///
/// Captures come off an opaque rendering surface, so alpha is carried but
/// expected to be 255 everywhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RasterImage {
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> PreviewResult<Self> {
        if width == 0 || height == 0 {
            return Err(PreviewError::validation(
                "raster dimensions must be non-zero",
            ));
        }
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(PreviewError::validation(format!(
                "raster buffer size mismatch: got {} bytes, expected {expected}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }
}

/// Ordered, immutable-once-built sequence of captures for one full pass
/// through a carousel plus its transitions.
#[derive(Clone, Debug)]
pub struct FrameSet {
    fingerprint: Fingerprint,
    frames: Vec<RasterImage>,
    captured_at: SystemTime,
    reduced_fidelity: bool,
}

impl FrameSet {
    pub fn new(fingerprint: Fingerprint, frames: Vec<RasterImage>) -> Self {
        Self {
            fingerprint,
            frames,
            captured_at: SystemTime::now(),
            reduced_fidelity: false,
        }
    }

    /// A set rebuilt from the persistent tier: fewer frames, recompressed.
    pub fn reconstructed(
        fingerprint: Fingerprint,
        frames: Vec<RasterImage>,
        captured_at: SystemTime,
    ) -> Self {
        Self {
            fingerprint,
            frames,
            captured_at,
            reduced_fidelity: true,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn frames(&self) -> &[RasterImage] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn reduced_fidelity(&self) -> bool {
        self.reduced_fidelity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_validation_catches_bad_buffers() {
        assert!(RasterImage::from_rgba8(0, 4, vec![]).is_err());
        assert!(RasterImage::from_rgba8(2, 2, vec![0u8; 15]).is_err());
        assert!(RasterImage::from_rgba8(2, 2, vec![0u8; 16]).is_ok());
    }

    #[test]
    fn reconstructed_sets_are_flagged() {
        let fp = Fingerprint { hi: 1, lo: 2 };
        let img = RasterImage::from_rgba8(1, 1, vec![0u8; 4]).unwrap();
        let full = FrameSet::new(fp, vec![img.clone()]);
        assert!(!full.reduced_fidelity());

        let rebuilt = FrameSet::reconstructed(fp, vec![img], SystemTime::now());
        assert!(rebuilt.reduced_fidelity());
        assert_eq!(rebuilt.fingerprint(), fp);
        assert_eq!(rebuilt.len(), 1);
    }
}
