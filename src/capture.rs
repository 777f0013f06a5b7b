use std::time::Duration;

use tokio::sync::Mutex;

use crate::{
    error::{PreviewError, PreviewResult},
    fingerprint::Fingerprint,
    frame::{FrameSet, RasterImage},
    surface::SequenceController,
};

/// Timing and dwell parameters for one capture run.
///
/// The defaults produce, for an n-card carousel,
/// `initial_dwell + n * (dwell + 1 + samples + 1 + dwell)` frames
/// (3 cards: 106 frames).
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    /// Settled frames of the first card before any transition.
    pub initial_dwell_frames: usize,
    /// Settled frames on either side of each transition.
    pub dwell_frames: usize,
    /// Scheduled mid-transition samples per transition.
    pub transition_samples: usize,
    /// Wait for the surface to visually settle after a jump.
    pub settle_delay: Duration,
    /// Upper bound on waiting for async media; on timeout the capture
    /// proceeds with whatever is on screen.
    pub media_wait: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            initial_dwell_frames: 10,
            dwell_frames: 5,
            transition_samples: 20,
            settle_delay: Duration::from_millis(120),
            media_wait: Duration::from_millis(500),
        }
    }
}

/// Inter-sample delays for one transition, front-loaded: half the samples
/// land in the first stretch of the animation, the rest taper off.
pub(crate) fn sample_delays(count: usize, base: Duration) -> Vec<Duration> {
    (0..count)
        .map(|i| {
            if i < count / 2 {
                base
            } else if i < count * 3 / 4 {
                base * 2
            } else {
                base * 4
            }
        })
        .collect()
}

/// Walks the controller through every card and every card-to-card
/// transition (including the wrap-around back to the first card), capturing
/// at scripted moments, and assembles the ordered frames into a [`FrameSet`].
pub struct CaptureOrchestrator {
    cfg: CaptureConfig,
}

impl CaptureOrchestrator {
    pub fn new(cfg: CaptureConfig) -> Self {
        Self { cfg }
    }

    /// Run the full capture protocol. The interaction gate is engaged for
    /// the duration and released on success and on failure; any capture
    /// failure aborts the whole run and no partial set is returned.
    #[tracing::instrument(skip(self, controller))]
    pub async fn capture_sequence(
        &self,
        controller: &Mutex<SequenceController>,
        fingerprint: Fingerprint,
    ) -> PreviewResult<FrameSet> {
        let gate = controller.lock().await.gate();
        gate.engage();
        let result = self.run(controller, fingerprint).await;
        gate.release();
        result
    }

    async fn run(
        &self,
        controller: &Mutex<SequenceController>,
        fingerprint: Fingerprint,
    ) -> PreviewResult<FrameSet> {
        let card_count = controller.lock().await.card_count();
        if card_count == 0 {
            return Err(PreviewError::capture("surface has no cards to capture"));
        }

        let mut frames: Vec<RasterImage> = Vec::new();

        // Initial dwell on the first card.
        controller.lock().await.orchestrated_jump_to(0);
        let first = self.settled_capture(controller).await?;
        push_repeated(&mut frames, first, self.cfg.initial_dwell_frames);

        // Every transition, ending with the wrap-around back to card 0.
        for from in 0..card_count {
            let to = (from + 1) % card_count;

            controller.lock().await.orchestrated_jump_to(from);
            let settled_from = self.settled_capture(controller).await?;
            push_repeated(&mut frames, settled_from, self.cfg.dwell_frames);

            // Jump and grab the very first transition frame in the same
            // critical section, before any scheduling gap.
            {
                let mut ctrl = controller.lock().await;
                ctrl.orchestrated_jump_to(to);
                frames.push(ctrl.capture_frame()?);
            }

            let schedule = sample_delays(self.cfg.transition_samples, self.sample_base());
            for delay in schedule {
                tokio::time::sleep(delay).await;
                frames.push(controller.lock().await.capture_frame()?);
            }

            let settled_to = self.settled_capture(controller).await?;
            frames.push(settled_to.clone());
            push_repeated(&mut frames, settled_to, self.cfg.dwell_frames);
        }

        tracing::debug!(
            frames = frames.len(),
            cards = card_count,
            "capture run complete"
        );
        Ok(FrameSet::new(fingerprint, frames))
    }

    /// Settle delay, bounded media wait, then one capture of the now-stable
    /// card.
    async fn settled_capture(
        &self,
        controller: &Mutex<SequenceController>,
    ) -> PreviewResult<RasterImage> {
        tokio::time::sleep(self.cfg.settle_delay).await;
        let mut ctrl = controller.lock().await;
        if tokio::time::timeout(self.cfg.media_wait, ctrl.wait_media_ready())
            .await
            .is_err()
        {
            tracing::debug!("media wait timed out, capturing as-is");
        }
        ctrl.capture_frame()
    }

    fn sample_base(&self) -> Duration {
        // Scale the sampling grid off the settle delay so a fast test
        // config tightens the whole schedule with one knob.
        (self.cfg.settle_delay / 8).max(Duration::from_millis(1))
    }
}

fn push_repeated(frames: &mut Vec<RasterImage>, frame: RasterImage, count: usize) {
    if count == 0 {
        return;
    }
    for _ in 0..count - 1 {
        frames.push(frame.clone());
    }
    frames.push(frame);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::PreviewSurface;
    use crate::fingerprint::Fingerprint;

    struct ScriptedSurface {
        count: usize,
        captures: usize,
        fail_at: Option<usize>,
    }

    #[async_trait::async_trait]
    impl PreviewSurface for ScriptedSurface {
        fn card_count(&self) -> usize {
            self.count
        }

        fn show_card(&mut self, _index: usize) {}

        async fn wait_media_ready(&mut self) {}

        fn capture(&mut self) -> PreviewResult<RasterImage> {
            self.captures += 1;
            if self.fail_at == Some(self.captures) {
                return Err(PreviewError::capture("surface lost"));
            }
            RasterImage::from_rgba8(2, 2, vec![0u8; 16])
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            settle_delay: Duration::from_millis(1),
            media_wait: Duration::from_millis(5),
            ..CaptureConfig::default()
        }
    }

    fn fp() -> Fingerprint {
        Fingerprint { hi: 7, lo: 9 }
    }

    #[test]
    fn sample_schedule_is_front_loaded() {
        let delays = sample_delays(20, Duration::from_millis(16));
        assert_eq!(delays.len(), 20);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.first().unwrap() < delays.last().unwrap());
    }

    #[tokio::test]
    async fn three_card_run_produces_expected_frame_count() {
        let controller = Mutex::new(SequenceController::new(Box::new(ScriptedSurface {
            count: 3,
            captures: 0,
            fail_at: None,
        })));
        let orchestrator = CaptureOrchestrator::new(fast_config());

        let set = orchestrator
            .capture_sequence(&controller, fp())
            .await
            .unwrap();

        // initial 10 + 3 transitions * (5 + 1 + 20 + 1 + 5)
        assert_eq!(set.len(), 10 + 3 * 32);
        assert!(!set.reduced_fidelity());
        assert!(!controller.lock().await.gate().is_engaged());
    }

    #[tokio::test]
    async fn capture_failure_aborts_and_releases_gate() {
        let controller = Mutex::new(SequenceController::new(Box::new(ScriptedSurface {
            count: 2,
            captures: 0,
            fail_at: Some(4),
        })));
        let orchestrator = CaptureOrchestrator::new(fast_config());

        let err = orchestrator
            .capture_sequence(&controller, fp())
            .await
            .unwrap_err();
        assert!(matches!(err, PreviewError::Capture(_)));
        assert!(!controller.lock().await.gate().is_engaged());
    }
}
