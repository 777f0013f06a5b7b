//! Animated carousel preview pipeline.
//!
//! Drives a live card sequence through every card and transition, captures
//! raster snapshots at scripted moments, caches the resulting frame sets in
//! two tiers, and encodes budget-limited frame selections into a looping
//! image and a video, without re-paying capture or encode cost for content
//! that has already been rendered.
#![forbid(unsafe_code)]

pub mod cache;
pub mod capture;
pub mod content;
pub mod encode;
pub mod error;
pub mod fingerprint;
pub mod frame;
pub mod scheduler;
pub mod select;
pub mod surface;

pub use cache::artifacts::{ArtifactCache, EncodedArtifact, OutputFormat};
pub use cache::frames::{FrameCache, FrameCacheConfig};
pub use cache::store::{DirStore, KeyValueStore, MemoryStore, StoreError};
pub use capture::{CaptureConfig, CaptureOrchestrator};
pub use content::{CardContent, MediaKind, MediaRef, SequenceContent};
pub use encode::{EncodeConfig, EncoderBackend, FfmpegRunner, FormatEncoder, ProgressFn};
pub use error::{PreviewError, PreviewResult};
pub use fingerprint::{Fingerprint, fingerprint_content};
pub use frame::{FrameSet, RasterImage};
pub use scheduler::{
    FormatReport, PipelineConfig, PreviewHandle, PreviewPipeline, RenderStatus, SlotState,
};
pub use select::{SelectConfig, select_loop_frames, select_video_frames};
pub use surface::{InteractionGate, PreviewSurface, SequenceController};
