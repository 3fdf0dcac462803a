// Per-frame protocol
//
// acquire -> begin -> record -> submit -> present -> (rebuild) -> advance
//
// FrameLoop owns the decisions (skip, rebuild, advance); FrameGpu performs
// the GPU side. Keeping the two apart lets the protocol run against a mock.

use anyhow::Result;

/// Result of asking the swapchain for an image. Fatal errors use `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Acquired(u32),
    /// Usable, but the swapchain should be rebuilt after this frame.
    Suboptimal(u32),
    /// Nothing acquired; rebuild and skip the frame.
    OutOfDate,
}

/// Result of queueing an image for presentation. Fatal errors use `Err`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt { render_pass_recreated: bool },
    /// The window has no area (minimized); try again later.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { frame: usize, image_index: u32 },
    Skipped,
}

/// GPU side of one frame, driven by `FrameLoop`.
pub trait FrameGpu {
    fn current_frame(&self) -> usize;

    /// Move to the next frame slot and return it.
    fn advance_frame(&mut self) -> usize;

    /// Wait on the current slot's fence, then acquire an image.
    fn acquire(&mut self) -> Result<AcquireStatus>;

    /// Reset the slot's command buffer and start recording. The slot's
    /// fence is left signaled.
    fn begin(&mut self, image_index: u32) -> Result<()>;

    /// Finish recording, reset the slot's fence and submit. The fence is
    /// signaled again when the GPU completes the frame.
    fn submit(&mut self) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentStatus>;

    fn rebuild(&mut self) -> Result<RebuildOutcome>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
    pub rebuilds: u64,
}

#[derive(Debug, Default)]
pub struct FrameLoop {
    rebuild_pending: bool,
    stats: FrameStats,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force a rebuild before the next frame (e.g. after a resize event).
    pub fn request_rebuild(&mut self) {
        self.rebuild_pending = true;
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Run one frame. `record` is called between `begin` and `submit` with
    /// the frame slot and image index.
    ///
    /// A skipped or failed frame leaves the slot index untouched and its
    /// fence signaled, so the next attempt reuses the same slot.
    pub fn draw_frame<G, F>(&mut self, gpu: &mut G, record: F) -> Result<FrameOutcome>
    where
        G: FrameGpu + ?Sized,
        F: FnOnce(&mut G, usize, u32) -> Result<()>,
    {
        if self.rebuild_pending && !self.try_rebuild(gpu)? {
            self.stats.skipped += 1;
            return Ok(FrameOutcome::Skipped);
        }

        let image_index = match gpu.acquire()? {
            AcquireStatus::Acquired(index) => index,
            AcquireStatus::Suboptimal(index) => {
                self.rebuild_pending = true;
                index
            }
            AcquireStatus::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                self.rebuild_pending = true;
                self.try_rebuild(gpu)?;
                self.stats.skipped += 1;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let frame = gpu.current_frame();
        gpu.begin(image_index)?;
        record(gpu, frame, image_index)?;
        gpu.submit()?;

        if gpu.present(image_index)? != PresentStatus::Presented {
            self.rebuild_pending = true;
        }
        if self.rebuild_pending {
            self.try_rebuild(gpu)?;
        }

        gpu.advance_frame();
        self.stats.presented += 1;
        Ok(FrameOutcome::Presented { frame, image_index })
    }

    /// Returns whether the swapchain is now usable.
    fn try_rebuild<G: FrameGpu + ?Sized>(&mut self, gpu: &mut G) -> Result<bool> {
        match gpu.rebuild()? {
            RebuildOutcome::Rebuilt { .. } => {
                self.rebuild_pending = false;
                self.stats.rebuilds += 1;
                Ok(true)
            }
            RebuildOutcome::Deferred => {
                self.rebuild_pending = true;
                Ok(false)
            }
        }
    }
}
