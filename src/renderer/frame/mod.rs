//! Per-frame submission protocol and the swapchain staleness state machine.
//!
//! [`FrameScheduler`] drives any [`FrameBackend`]: the Vulkan render context
//! in the application, a simulated GPU in tests. It never touches GPU objects
//! itself, it only decides which backend step runs next.

pub mod slot;

use ash::vk;
use crate::renderer::core::swapchain::is_zero_extent;
use crate::renderer::error::Result;

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image is usable once the slot's image-available semaphore signals
    Ready { image_index: u32, suboptimal: bool },
    /// Swapchain no longer matches the surface, nothing was acquired
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    Rebuilt,
    /// The surface currently has no area, try again after the next resize
    Deferred,
}

/// What happened to one call of [`FrameScheduler::render_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Work was submitted but the swapchain went stale before presentation
    Discarded,
    /// Swapchain was stale at acquisition, nothing was submitted
    Skipped,
    /// Drawable area is zero, waiting for a resize
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Active,
    Stale(StaleCause),
    Rebuilding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleCause {
    /// The window reported a new size; the current swapchain may still be used
    Resized,
    /// The swapchain must be rebuilt before the next acquisition
    OutOfDate,
}

/// GPU-side steps of the frame protocol
pub trait FrameBackend {
    fn frames_in_flight(&self) -> usize;

    /// Blocks until the GPU finished the previous submission made from `slot`
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Requests the next image, signaling `slot`'s image-available semaphore
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Marks `slot` as in use so the next wait blocks until this frame completes
    fn reset_slot(&mut self, slot: usize) -> Result<()>;

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Waits on image-available, signals render-finished and the slot's fence
    fn submit(&mut self, slot: usize) -> Result<()>;

    /// Presents `image_index` once `slot`'s render-finished semaphore signals
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Tears down and recreates the swapchain and its per-image objects.
    /// Only called after [`FrameBackend::wait_idle`].
    fn rebuild_swapchain(&mut self, drawable: vk::Extent2D) -> Result<RebuildOutcome>;
}

pub struct FrameScheduler<B> {
    backend: B,
    state: SwapchainState,
    drawable: vk::Extent2D,
    frame_counter: u64,
}

impl<B: FrameBackend> FrameScheduler<B> {
    pub fn new(backend: B, drawable: vk::Extent2D) -> Self {
        Self {
            backend,
            state: SwapchainState::Active,
            drawable,
            frame_counter: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Records a new drawable size; the swapchain is rebuilt after the next frame
    pub fn notify_resized(&mut self, drawable: vk::Extent2D) {
        self.drawable = drawable;
        if self.state == SwapchainState::Active {
            self.state = SwapchainState::Stale(StaleCause::Resized);
        }
    }

    pub fn wait_idle(&mut self) -> Result<()> {
        self.backend.wait_idle()
    }

    pub fn render_frame(&mut self) -> Result<FrameStatus> {
        // A swapchain that reported out-of-date cannot hand out images any more
        if self.state == SwapchainState::Stale(StaleCause::OutOfDate)
            && self.rebuild()? == RebuildOutcome::Deferred
        {
            return Ok(FrameStatus::Deferred);
        }

        let slot = (self.frame_counter % self.backend.frames_in_flight() as u64) as usize;

        self.backend.wait_for_slot(slot)?;

        let (image_index, acquire_suboptimal) = match self.backend.acquire_image(slot)? {
            AcquireOutcome::Ready { image_index, suboptimal } => (image_index, suboptimal),
            AcquireOutcome::Stale => {
                log::debug!("Swapchain out of date at acquire, skipping frame {}", self.frame_counter);
                self.state = SwapchainState::Stale(StaleCause::OutOfDate);
                self.rebuild()?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // Only reset once work is guaranteed to be submitted, otherwise the
        // next wait on this slot would never return
        self.backend.reset_slot(slot)?;
        self.backend.record_commands(slot, image_index)?;
        self.backend.submit(slot)?;

        let present = self.backend.present(slot, image_index)?;

        let status = match present {
            PresentOutcome::Stale => FrameStatus::Discarded,
            PresentOutcome::Presented | PresentOutcome::Suboptimal => FrameStatus::Presented,
        };
        let stale = present != PresentOutcome::Presented || acquire_suboptimal;
        if stale {
            self.state = SwapchainState::Stale(StaleCause::OutOfDate);
        }
        if matches!(self.state, SwapchainState::Stale(_)) {
            self.rebuild()?;
        }

        self.frame_counter += 1;

        Ok(status)
    }

    /// Rebuilds the swapchain now, or leaves it stale while the drawable has no area
    pub fn rebuild(&mut self) -> Result<RebuildOutcome> {
        if is_zero_extent(self.drawable) {
            log::debug!("Drawable area is {}x{}, deferring swapchain rebuild", self.drawable.width, self.drawable.height);
            self.state = SwapchainState::Stale(StaleCause::OutOfDate);
            return Ok(RebuildOutcome::Deferred);
        }

        self.state = SwapchainState::Rebuilding;
        let outcome = self.backend.wait_idle()
            .and_then(|_| self.backend.rebuild_swapchain(self.drawable));

        self.state = match outcome {
            Ok(RebuildOutcome::Rebuilt) => SwapchainState::Active,
            _ => SwapchainState::Stale(StaleCause::OutOfDate),
        };
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const K: usize = 2;
    const IMAGES: u32 = 3;

    /// Simulated GPU and display: submissions stay outstanding until the
    /// CPU waits on them, images rotate round-robin
    struct SimulatedGpu {
        slots: usize,
        outstanding: Vec<bool>,
        signaled: Vec<bool>,
        max_outstanding: usize,

        generation: u64,
        acquired: Vec<(u32, u64)>,
        recorded: Vec<(usize, u32, u64)>,
        next_image: u32,

        presented: usize,
        submitted: usize,
        rebuilds: usize,
        rebuild_extents: Vec<vk::Extent2D>,

        stale_acquires: usize,
        stale_presents: usize,
        suboptimal_presents: usize,
    }

    impl SimulatedGpu {
        fn new(slots: usize) -> Self {
            Self {
                slots,
                outstanding: vec![false; slots],
                signaled: vec![true; slots],
                max_outstanding: 0,
                generation: 0,
                acquired: Vec::new(),
                recorded: Vec::new(),
                next_image: 0,
                presented: 0,
                submitted: 0,
                rebuilds: 0,
                rebuild_extents: Vec::new(),
                stale_acquires: 0,
                stale_presents: 0,
                suboptimal_presents: 0,
            }
        }

        fn in_flight(&self) -> usize {
            self.outstanding.iter().filter(|o| **o).count()
        }
    }

    impl FrameBackend for SimulatedGpu {
        fn frames_in_flight(&self) -> usize {
            self.slots
        }

        fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
            // An unsignaled fence with no pending work would block forever
            assert!(self.signaled[slot] || self.outstanding[slot], "deadlock waiting on slot {slot}");
            self.outstanding[slot] = false;
            self.signaled[slot] = true;
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> Result<AcquireOutcome> {
            if self.stale_acquires > 0 {
                self.stale_acquires -= 1;
                return Ok(AcquireOutcome::Stale);
            }
            let image_index = self.next_image % IMAGES;
            self.next_image += 1;
            self.acquired.push((image_index, self.generation));
            Ok(AcquireOutcome::Ready { image_index, suboptimal: false })
        }

        fn reset_slot(&mut self, slot: usize) -> Result<()> {
            self.signaled[slot] = false;
            Ok(())
        }

        fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
            assert!(!self.outstanding[slot], "slot {slot} re-recorded while the GPU still reads it");
            self.recorded.push((slot, image_index, self.generation));
            Ok(())
        }

        fn submit(&mut self, slot: usize) -> Result<()> {
            self.outstanding[slot] = true;
            self.submitted += 1;
            self.max_outstanding = self.max_outstanding.max(self.in_flight());
            Ok(())
        }

        fn present(&mut self, _slot: usize, _image_index: u32) -> Result<PresentOutcome> {
            if self.stale_presents > 0 {
                self.stale_presents -= 1;
                return Ok(PresentOutcome::Stale);
            }
            self.presented += 1;
            if self.suboptimal_presents > 0 {
                self.suboptimal_presents -= 1;
                return Ok(PresentOutcome::Suboptimal);
            }
            Ok(PresentOutcome::Presented)
        }

        fn wait_idle(&mut self) -> Result<()> {
            for (outstanding, signaled) in self.outstanding.iter_mut().zip(self.signaled.iter_mut()) {
                if *outstanding {
                    *outstanding = false;
                    *signaled = true;
                }
            }
            Ok(())
        }

        fn rebuild_swapchain(&mut self, drawable: vk::Extent2D) -> Result<RebuildOutcome> {
            assert_eq!(self.in_flight(), 0, "swapchain rebuilt while GPU work is outstanding");
            self.rebuilds += 1;
            self.generation += 1;
            self.next_image = 0;
            self.rebuild_extents.push(drawable);
            Ok(RebuildOutcome::Rebuilt)
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn scheduler(slots: usize) -> FrameScheduler<SimulatedGpu> {
        FrameScheduler::new(SimulatedGpu::new(slots), extent(800, 600))
    }

    #[test]
    fn ten_frames_without_resize() {
        let mut frames = scheduler(K);
        for _ in 0..10 {
            assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        }
        assert_eq!(frames.backend().presented, 10);
        assert_eq!(frames.backend().rebuilds, 0);
        assert_eq!(frames.frame_counter(), 10);

        frames.wait_idle().unwrap();
        assert_eq!(frames.backend().in_flight(), 0);
    }

    #[test]
    fn outstanding_work_never_exceeds_slot_count() {
        for slots in 1..=4 {
            let mut frames = scheduler(slots);
            for i in 0..25 {
                if i % 7 == 3 {
                    frames.notify_resized(extent(640 + i, 480));
                }
                frames.render_frame().unwrap();
                assert!(frames.backend().in_flight() <= slots);
            }
            assert_eq!(frames.backend().max_outstanding, slots);
        }
    }

    #[test]
    fn slots_rotate_round_robin() {
        let mut frames = scheduler(K);
        for _ in 0..4 {
            frames.render_frame().unwrap();
        }
        let slots = frames.backend().recorded.iter().map(|(slot, _, _)| *slot).collect::<Vec<_>>();
        assert_eq!(slots, vec![0, 1, 0, 1]);
    }

    #[test]
    fn stale_presentation_rebuilds_once_and_advances() {
        let mut frames = scheduler(K);
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);

        frames.backend_mut().stale_presents = 1;
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Discarded);

        assert_eq!(frames.backend().rebuilds, 1);
        assert_eq!(frames.frame_counter(), 2);
        assert_eq!(frames.state(), SwapchainState::Active);
        // Submitted work is not rolled back
        assert_eq!(frames.backend().submitted, 2);

        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(frames.backend().rebuilds, 1);
    }

    #[test]
    fn suboptimal_presentation_still_counts_but_rebuilds() {
        let mut frames = scheduler(K);
        frames.backend_mut().suboptimal_presents = 1;
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(frames.backend().rebuilds, 1);
        assert_eq!(frames.state(), SwapchainState::Active);
    }

    #[test]
    fn stale_acquire_skips_frame_without_deadlocking_the_slot() {
        let mut frames = scheduler(K);
        frames.backend_mut().stale_acquires = 1;

        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.backend().submitted, 0);
        assert_eq!(frames.backend().rebuilds, 1);
        assert_eq!(frames.frame_counter(), 0);

        // Same slot is reused; the simulated fence asserts it is still waitable
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(frames.frame_counter(), 1);
    }

    #[test]
    fn resize_is_applied_after_the_frame_is_submitted() {
        let mut frames = scheduler(K);
        frames.render_frame().unwrap();
        frames.notify_resized(extent(1024, 768));
        assert_eq!(frames.state(), SwapchainState::Stale(StaleCause::Resized));

        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        // The frame still rendered against the old generation, then the rebuild happened
        assert_eq!(frames.backend().recorded.last().unwrap().2, 0);
        assert_eq!(frames.backend().rebuilds, 1);
        assert_eq!(frames.backend().rebuild_extents, vec![extent(1024, 768)]);
        assert_eq!(frames.state(), SwapchainState::Active);
    }

    #[test]
    fn zero_area_defers_rebuild_until_a_real_size_arrives() {
        let mut frames = scheduler(K);
        frames.render_frame().unwrap();

        frames.notify_resized(extent(0, 0));
        frames.render_frame().unwrap();
        assert_eq!(frames.backend().rebuilds, 0);
        assert_eq!(frames.state(), SwapchainState::Stale(StaleCause::OutOfDate));

        let submitted = frames.backend().submitted;
        for _ in 0..3 {
            assert_eq!(frames.render_frame().unwrap(), FrameStatus::Deferred);
        }
        assert_eq!(frames.backend().rebuilds, 0);
        assert_eq!(frames.backend().submitted, submitted);

        frames.notify_resized(extent(800, 600));
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(frames.backend().rebuilds, 1);
        assert_eq!(frames.state(), SwapchainState::Active);
    }

    #[test]
    fn minimized_between_frames_is_deferred_too() {
        let mut frames = scheduler(K);
        frames.notify_resized(extent(800, 0));
        frames.backend_mut().stale_acquires = 1;

        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Deferred);
        assert_eq!(frames.backend().rebuilds, 0);
    }

    #[test]
    fn frames_never_draw_with_a_stale_generation() {
        let mut frames = scheduler(3);
        for i in 0..40u32 {
            match i % 9 {
                2 => frames.notify_resized(extent(400 + i, 300 + i)),
                5 => frames.backend_mut().stale_presents = 1,
                7 => frames.backend_mut().stale_acquires = 1,
                _ => {}
            }
            let generation_before = frames.backend().generation;
            let recorded_before = frames.backend().recorded.len();
            frames.render_frame().unwrap();

            if let Some(&(_, _, recorded_generation)) = frames.backend().recorded.get(recorded_before) {
                assert_eq!(recorded_generation, generation_before);
            }
        }
        let gpu = frames.backend();
        for (&(image, acquired_generation), &(_, recorded_image, recorded_generation)) in gpu.acquired.iter().zip(&gpu.recorded) {
            assert_eq!(image, recorded_image);
            assert_eq!(acquired_generation, recorded_generation);
        }
    }

    #[test]
    fn rebuilding_a_valid_swapchain_only_churns_resources() {
        let mut frames = scheduler(K);
        frames.render_frame().unwrap();

        assert_eq!(frames.rebuild().unwrap(), RebuildOutcome::Rebuilt);
        assert_eq!(frames.state(), SwapchainState::Active);
        assert_eq!(frames.backend().rebuild_extents, vec![extent(800, 600)]);

        assert_eq!(frames.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(frames.backend().presented, 2);
        assert_eq!(frames.frame_counter(), 2);
    }
}
