use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{error::PreviewResult, frame::RasterImage};

/// The live rendering surface the carousel is displayed on.
///
/// The pipeline never draws anything itself; it drives the surface through
/// card jumps and asks it for raster snapshots. Implementations decide what
/// "settled" means for their media loading.
#[async_trait::async_trait]
pub trait PreviewSurface: Send {
    fn card_count(&self) -> usize;

    /// Display the card at `index`. Callers guarantee the index is in range.
    fn show_card(&mut self, index: usize);

    /// Resolves once asynchronously-loading media on the current card has
    /// finished loading. The orchestrator bounds this wait and proceeds on
    /// timeout, so implementations may pend indefinitely.
    async fn wait_media_ready(&mut self);

    /// Snapshot the current visual state. May fail.
    fn capture(&mut self) -> PreviewResult<RasterImage>;
}

/// Suppresses manual navigation while an orchestrated capture is running.
///
/// Single writer (the orchestrator), boolean payload, so atomic set/clear is
/// all the synchronization needed.
#[derive(Clone, Debug)]
pub struct InteractionGate {
    locked: Arc<AtomicBool>,
}

impl InteractionGate {
    pub fn new() -> Self {
        Self {
            locked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn engage(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }
}

impl Default for InteractionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the notion of "currently displayed card" and funnels all surface
/// mutation through one place.
///
/// Manual entry points (`request_next`, `request_previous`, `jump_to`) are
/// refused while the gate is engaged; the orchestrator uses the privileged
/// `orchestrated_jump_to` which bypasses it.
pub struct SequenceController {
    surface: Box<dyn PreviewSurface>,
    gate: InteractionGate,
    current: usize,
}

impl SequenceController {
    pub fn new(surface: Box<dyn PreviewSurface>) -> Self {
        Self {
            surface,
            gate: InteractionGate::new(),
            current: 0,
        }
    }

    pub fn gate(&self) -> InteractionGate {
        self.gate.clone()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn card_count(&self) -> usize {
        self.surface.card_count()
    }

    /// Manual navigation: advance one card, wrapping at the end.
    pub fn request_next(&mut self) {
        if self.gate.is_engaged() {
            return;
        }
        let count = self.surface.card_count();
        if count == 0 {
            return;
        }
        self.set_current((self.current + 1) % count);
    }

    /// Manual navigation: go back one card, wrapping at the start.
    pub fn request_previous(&mut self) {
        if self.gate.is_engaged() {
            return;
        }
        let count = self.surface.card_count();
        if count == 0 {
            return;
        }
        self.set_current((self.current + count - 1) % count);
    }

    /// Manual jump. Out-of-range indices are a no-op, as is any call while
    /// a capture run holds the gate.
    pub fn jump_to(&mut self, index: usize) {
        if self.gate.is_engaged() || index >= self.surface.card_count() {
            return;
        }
        self.set_current(index);
    }

    /// Privileged jump for the capture orchestrator. Bypasses the gate but
    /// still ignores out-of-range indices.
    pub(crate) fn orchestrated_jump_to(&mut self, index: usize) {
        if index >= self.surface.card_count() {
            return;
        }
        self.set_current(index);
    }

    pub(crate) async fn wait_media_ready(&mut self) {
        self.surface.wait_media_ready().await;
    }

    pub(crate) fn capture_frame(&mut self) -> PreviewResult<RasterImage> {
        self.surface.capture()
    }

    fn set_current(&mut self, index: usize) {
        self.current = index;
        self.surface.show_card(index);
    }
}
