//! Per-frame orchestration: ingest, optionally filter, publish.

use crate::filter::{FilterGraph, FilterParams};
use crate::frame::Frame;
use crate::gpu::GpuTexture;
use crate::ingest::TextureIngestor;
use crate::stats::PumpStats;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// The "current texture" handed from the pump to the renderer.
///
/// Replacement swaps the whole texture reference; readers get either the old
/// or the new texture, never a mix.
#[derive(Default)]
pub struct FrameSlot {
    current: Mutex<Option<Arc<GpuTexture>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, texture: Arc<GpuTexture>) {
        *self.current.lock() = Some(texture);
    }

    /// The latest published texture, if any.
    pub fn load(&self) -> Option<Arc<GpuTexture>> {
        self.current.lock().clone()
    }

    pub fn clear(&self) {
        self.current.lock().take();
    }
}

/// Filter switch and pending parameter changes, shared with the UI and the
/// config watcher. Read once per frame by the pump.
pub struct FilterControls {
    enabled: AtomicBool,
    pending: Mutex<Option<FilterParams>>,
}

impl FilterControls {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            pending: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Flips the switch and returns the new state.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    /// Queues parameters for the next frame. A later request replaces an
    /// earlier one that was not applied yet.
    pub fn request_params(&self, params: FilterParams) {
        *self.pending.lock() = Some(params);
    }

    fn take_pending(&self) -> Option<FilterParams> {
        self.pending.lock().take()
    }
}

/// What happened to one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// Ingestion failed; nothing was published
    Dropped,
    /// Published without filtering (switch off or no graph)
    Unfiltered,
    Filtered,
    /// The graph failed on this frame; the source was published instead
    FellBack,
}

/// Logs a recoverable failure at `warn` the first time it occurs, then at `debug`.
#[derive(Default)]
struct WarnOnce {
    seen: HashSet<String>,
}

impl WarnOnce {
    fn report(&mut self, cause: String, what: &str) {
        if self.seen.insert(cause.clone()) {
            warn!("{}: {} (further occurrences logged at debug level)", what, cause);
        } else {
            debug!("{}: {}", what, cause);
        }
    }
}

/// Drives one frame at a time through ingestion and the filter graph.
pub struct FramePump {
    ingestor: TextureIngestor,
    graph: Option<FilterGraph>,
    controls: Arc<FilterControls>,
    slot: Arc<FrameSlot>,
    stats: PumpStats,
    warnings: WarnOnce,
}

impl FramePump {
    /// `graph` is `None` when the effect is unavailable; every frame is then
    /// published unfiltered.
    pub fn new(
        ingestor: TextureIngestor,
        graph: Option<FilterGraph>,
        controls: Arc<FilterControls>,
        slot: Arc<FrameSlot>,
    ) -> Self {
        Self {
            ingestor,
            graph,
            controls,
            slot,
            stats: PumpStats::new(),
            warnings: WarnOnce::default(),
        }
    }

    /// Frame source entry point. Never fails: errors turn into a dropped or
    /// unfiltered frame.
    pub fn on_frame(&mut self, frame: Frame) -> PumpOutcome {
        self.apply_pending_params();

        let outcome = match self.ingestor.ingest(&frame) {
            Err(e) => {
                self.warnings.report(e.to_string(), "Dropping frame");
                PumpOutcome::Dropped
            }
            Ok(source) => self.publish(source),
        };

        if let Some(report) = self.stats.record(outcome) {
            debug!("[Perf] Pump at {}", report);
        }
        outcome
    }

    fn publish(&mut self, source: Arc<GpuTexture>) -> PumpOutcome {
        let graph = match &mut self.graph {
            Some(graph) if self.controls.is_enabled() => graph,
            _ => {
                self.slot.store(source);
                return PumpOutcome::Unfiltered;
            }
        };

        match graph.process(&source) {
            Ok(output) => {
                self.slot.store(output);
                PumpOutcome::Filtered
            }
            Err(e) => {
                self.warnings.report(e.to_string(), "Filter failed, presenting unfiltered frame");
                self.slot.store(source);
                PumpOutcome::FellBack
            }
        }
    }

    fn apply_pending_params(&mut self) {
        let Some(params) = self.controls.take_pending() else {
            return;
        };
        let Some(graph) = &mut self.graph else {
            debug!("Ignoring filter parameters, no filter graph");
            return;
        };
        if let Err(e) = graph.set_params(params) {
            warn!("Rejected filter parameters: {}", e);
        }
    }

    pub fn graph(&self) -> Option<&FilterGraph> {
        self.graph.as_ref()
    }

    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Forgets cached source textures and the published frame.
    pub fn reset(&mut self) {
        self.ingestor.reset();
        self.slot.clear();
    }
}
