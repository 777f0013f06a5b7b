use std::{collections::HashMap, path::PathBuf, sync::Arc};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex as AsyncMutex, watch};

use crate::{
    cache::{
        artifacts::{ArtifactCache, EncodedArtifact, OutputFormat},
        frames::{FrameCache, FrameCacheConfig},
        store::KeyValueStore,
    },
    capture::{CaptureConfig, CaptureOrchestrator},
    content::SequenceContent,
    encode::{EncodeConfig, EncoderBackend, FormatEncoder},
    error::PreviewResult,
    fingerprint::{Fingerprint, fingerprint_content},
    frame::FrameSet,
    select::{SelectConfig, select_loop_frames, select_video_frames},
    surface::{PreviewSurface, SequenceController},
};

/// Per-format outcome inside a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Ready,
    Failed(String),
}

/// Which formats are ready, failed, or still pending. Carried by every
/// status that has per-format information.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormatReport {
    pub loop_image: SlotState,
    pub video: SlotState,
}

impl FormatReport {
    fn pending() -> Self {
        Self {
            loop_image: SlotState::Pending,
            video: SlotState::Pending,
        }
    }

    pub fn slot(&self, format: OutputFormat) -> &SlotState {
        match format {
            OutputFormat::LoopImage => &self.loop_image,
            OutputFormat::Video => &self.video,
        }
    }

    fn set(&mut self, format: OutputFormat, state: SlotState) {
        match format {
            OutputFormat::LoopImage => self.loop_image = state,
            OutputFormat::Video => self.video = state,
        }
    }

    fn ready_count(&self) -> usize {
        OutputFormat::ALL
            .iter()
            .filter(|f| *self.slot(**f) == SlotState::Ready)
            .count()
    }

    fn settled_count(&self) -> usize {
        OutputFormat::ALL
            .iter()
            .filter(|f| *self.slot(**f) != SlotState::Pending)
            .count()
    }
}

/// Externally observable state of one fingerprint's run.
#[derive(Clone, Debug)]
pub enum RenderStatus {
    Idle,
    Capturing,
    /// A full-fidelity frame set is available (fresh capture or tier-1 hit).
    FramesReady,
    /// Frames were rebuilt from the persistent tier; formats still pending.
    FramesStored,
    Encoding {
        message: String,
        percent: Option<f32>,
        report: FormatReport,
    },
    /// Exactly one format is usable; the other is pending or failed.
    CompletedPartial { report: FormatReport },
    CompletedAll,
    /// Both artifacts were already cached when the request arrived.
    Cached,
    Failed { reason: String },
}

impl RenderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RenderStatus::CompletedAll
                | RenderStatus::Cached
                | RenderStatus::Failed { .. }
        ) || matches!(
            self,
            // Partial completion is terminal once nothing is pending.
            RenderStatus::CompletedPartial { report } if report.settled_count() == 2
        )
    }
}

/// A claim on one fingerprint's run. Cheap to clone; every clone observes
/// the same status channel.
#[derive(Clone)]
pub struct PreviewHandle {
    fingerprint: Fingerprint,
    status_rx: watch::Receiver<RenderStatus>,
}

impl PreviewHandle {
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// Current status. Compatibility wrapper for callers that poll; prefer
    /// [`PreviewHandle::settled`].
    pub fn status(&self) -> RenderStatus {
        self.status_rx.borrow().clone()
    }

    /// Resolves on the first terminal status, driven by the scheduler's
    /// state transitions rather than an interval.
    pub async fn settled(&mut self) -> RenderStatus {
        loop {
            let status = self.status_rx.borrow_and_update().clone();
            if status.is_terminal() {
                return status;
            }
            if self.status_rx.changed().await.is_err() {
                return self.status_rx.borrow().clone();
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub select: SelectConfig,
    pub encode: EncodeConfig,
    pub frame_cache: FrameCacheConfig,
    /// Directory the encoder workspace lives in.
    pub workspace_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            select: SelectConfig::default(),
            encode: EncodeConfig::default(),
            frame_cache: FrameCacheConfig::default(),
            workspace_root: std::env::temp_dir().join("carousel-preview-workspace"),
        }
    }
}

struct RunEntry {
    status_rx: watch::Receiver<RenderStatus>,
}

struct PipelineShared {
    controller: Arc<AsyncMutex<SequenceController>>,
    orchestrator: CaptureOrchestrator,
    frame_cache: FrameCache,
    artifact_cache: ArtifactCache,
    encoder: FormatEncoder,
    select_cfg: SelectConfig,
    runs: SyncMutex<HashMap<Fingerprint, RunEntry>>,
}

/// The preview pipeline: fingerprinting, cache lookups, capture, selection,
/// both format encodes, and status reporting, coordinated so that repeated
/// and concurrent requests for the same content share one underlying run.
pub struct PreviewPipeline {
    shared: Arc<PipelineShared>,
}

impl PreviewPipeline {
    pub fn new(
        surface: Box<dyn PreviewSurface>,
        store: Arc<dyn KeyValueStore>,
        backend: Arc<dyn EncoderBackend>,
        cfg: PipelineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                controller: Arc::new(AsyncMutex::new(SequenceController::new(surface))),
                orchestrator: CaptureOrchestrator::new(cfg.capture),
                frame_cache: FrameCache::new(store, cfg.frame_cache),
                artifact_cache: ArtifactCache::new(),
                encoder: FormatEncoder::new(backend, cfg.workspace_root, cfg.encode),
                select_cfg: cfg.select,
                runs: SyncMutex::new(HashMap::new()),
            }),
        }
    }

    /// The controller backing the live carousel; manual navigation goes
    /// through here and is gate-checked against in-flight captures.
    pub fn controller(&self) -> Arc<AsyncMutex<SequenceController>> {
        Arc::clone(&self.shared.controller)
    }

    /// Request an animated preview for `content`.
    ///
    /// Returns immediately with a handle; capture and encoding run in the
    /// background. A request for a fingerprint that already has a live run
    /// joins that run instead of starting a second one.
    pub fn request_preview(&self, content: &SequenceContent) -> PreviewResult<PreviewHandle> {
        content.validate()?;
        let fingerprint = fingerprint_content(content);

        let mut runs = self.shared.runs.lock();
        if let Some(entry) = runs.get(&fingerprint) {
            if !entry.status_rx.borrow().is_terminal() {
                return Ok(PreviewHandle {
                    fingerprint,
                    status_rx: entry.status_rx.clone(),
                });
            }
            // A settled run is not joined: either its artifacts are still
            // cached (fast path below) or it is re-run from whatever the
            // frame cache kept.
        }

        if self.shared.artifact_cache.has_all(fingerprint) {
            let (_tx, rx) = watch::channel(RenderStatus::Cached);
            runs.insert(
                fingerprint,
                RunEntry {
                    status_rx: rx.clone(),
                },
            );
            return Ok(PreviewHandle {
                fingerprint,
                status_rx: rx,
            });
        }

        let (tx, rx) = watch::channel(RenderStatus::Idle);
        runs.insert(
            fingerprint,
            RunEntry {
                status_rx: rx.clone(),
            },
        );
        drop(runs);

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            run_pipeline(shared, fingerprint, tx).await;
        });

        Ok(PreviewHandle {
            fingerprint,
            status_rx: rx,
        })
    }

    /// Compatibility wrapper over the handle's status channel.
    pub fn poll_status(&self, handle: &PreviewHandle) -> RenderStatus {
        handle.status()
    }

    pub fn artifact(
        &self,
        handle: &PreviewHandle,
        format: OutputFormat,
    ) -> Option<Arc<EncodedArtifact>> {
        self.shared.artifact_cache.get(handle.fingerprint, format)
    }

    /// Drop both cache tiers, all finished artifacts, and all remembered
    /// runs.
    pub async fn clear_cache(&self) {
        self.shared.frame_cache.clear().await;
        self.shared.artifact_cache.clear();
        self.shared.runs.lock().clear();
    }
}

async fn run_pipeline(
    shared: Arc<PipelineShared>,
    fingerprint: Fingerprint,
    tx: watch::Sender<RenderStatus>,
) {
    let frames: Arc<FrameSet> = match shared.frame_cache.get(fingerprint).await {
        Some(set) => {
            if set.reduced_fidelity() {
                let _ = tx.send(RenderStatus::FramesStored);
            } else {
                let _ = tx.send(RenderStatus::FramesReady);
            }
            set
        }
        None => {
            let _ = tx.send(RenderStatus::Capturing);
            match shared
                .orchestrator
                .capture_sequence(&shared.controller, fingerprint)
                .await
            {
                Ok(set) => {
                    let set = Arc::new(set);
                    shared.frame_cache.put(Arc::clone(&set)).await;
                    let _ = tx.send(RenderStatus::FramesReady);
                    set
                }
                Err(e) => {
                    tracing::warn!(error = %e, "capture run failed");
                    let _ = tx.send(RenderStatus::Failed {
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }
    };

    let card_count = shared.controller.lock().await.card_count();
    let report = SyncMutex::new(FormatReport::pending());
    let _ = tx.send(RenderStatus::Encoding {
        message: "starting encoders".to_string(),
        percent: None,
        report: report.lock().clone(),
    });

    // Both formats run concurrently on this task; they interleave at
    // suspension points and serialize through the encoder workspace lock.
    // One format failing never stops the other.
    tokio::join!(
        encode_one(
            &shared,
            &frames,
            card_count,
            OutputFormat::LoopImage,
            &tx,
            &report
        ),
        encode_one(
            &shared,
            &frames,
            card_count,
            OutputFormat::Video,
            &tx,
            &report
        ),
    );
}

async fn encode_one(
    shared: &PipelineShared,
    frames: &Arc<FrameSet>,
    card_count: usize,
    format: OutputFormat,
    tx: &watch::Sender<RenderStatus>,
    report: &SyncMutex<FormatReport>,
) {
    let indices = match format {
        OutputFormat::LoopImage => {
            select_loop_frames(frames.len(), card_count, &shared.select_cfg)
        }
        OutputFormat::Video => select_video_frames(frames.len(), card_count, &shared.select_cfg),
    };

    let progress = |message: &str, percent: Option<f32>| {
        let _ = tx.send(RenderStatus::Encoding {
            message: format!("{format}: {message}"),
            percent,
            report: report.lock().clone(),
        });
    };

    match shared.encoder.encode(frames, &indices, format, &progress).await {
        Ok(artifact) => {
            shared.artifact_cache.put(artifact);
            report.lock().set(format, SlotState::Ready);
        }
        Err(e) => {
            tracing::warn!(format = %format, error = %e, "format encode failed");
            report.lock().set(format, SlotState::Failed(e.to_string()));
        }
    }

    let snapshot = report.lock().clone();
    let _ = tx.send(status_for(snapshot));
}

/// Status after a format settles: partial as soon as one artifact is
/// usable, terminal once both formats have settled.
fn status_for(report: FormatReport) -> RenderStatus {
    let settled = report.settled_count();
    let ready = report.ready_count();

    if settled == 2 {
        return match ready {
            2 => RenderStatus::CompletedAll,
            1 => RenderStatus::CompletedPartial { report },
            _ => {
                let mut reasons = Vec::new();
                for format in OutputFormat::ALL {
                    if let SlotState::Failed(msg) = report.slot(format) {
                        reasons.push(format!("{format}: {msg}"));
                    }
                }
                RenderStatus::Failed {
                    reason: format!("all formats failed ({})", reasons.join("; ")),
                }
            }
        };
    }

    if ready == 1 {
        RenderStatus::CompletedPartial { report }
    } else {
        RenderStatus::Encoding {
            message: "waiting on remaining format".to_string(),
            percent: None,
            report,
        }
    }
}
