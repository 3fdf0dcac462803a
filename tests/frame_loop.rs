// Frame protocol tests against a GPU stand-in.
//
// The mock tracks each slot's fence the way the device would: the wait in
// acquire observes it signaled, submit resets it and leaves it pending until
// the GPU finishes. Recording or submitting on a slot without that wait
// panics.

use anyhow::{bail, Result};
use std::collections::VecDeque;
use vulkan_engine::backend::sync::FrameSlots;
use vulkan_engine::frame::{FrameGpu, FrameLoop};
use vulkan_engine::{AcquireStatus, FrameOutcome, FrameStats, PresentStatus, RebuildOutcome};
use vulkan_engine::MAX_FRAMES_IN_FLIGHT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Acquire(usize),
    Begin(usize, u32),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Rebuild,
    Advance(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fence {
    Signaled,
    /// Reset and submitted; the GPU signals it later.
    Pending,
    /// Waited on and seen signaled; the slot is idle.
    Observed,
}

struct MockGpu {
    slots: FrameSlots,
    fences: [Fence; MAX_FRAMES_IN_FLIGHT],
    image_count: u32,
    next_image: u32,
    acquire_script: VecDeque<AcquireStatus>,
    present_script: VecDeque<PresentStatus>,
    rebuild_script: VecDeque<RebuildOutcome>,
    fail_acquire: bool,
    events: Vec<Event>,
}

impl MockGpu {
    fn new(image_count: u32) -> Self {
        Self {
            slots: FrameSlots::default(),
            fences: [Fence::Signaled; MAX_FRAMES_IN_FLIGHT],
            image_count,
            next_image: 0,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            rebuild_script: VecDeque::new(),
            fail_acquire: false,
            events: Vec::new(),
        }
    }

    fn take_image(&mut self) -> u32 {
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.image_count;
        image
    }

    fn count(&self, wanted: fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| wanted(e)).count()
    }
}

impl FrameGpu for MockGpu {
    fn current_frame(&self) -> usize {
        self.slots.current()
    }

    fn advance_frame(&mut self) -> usize {
        let next = self.slots.advance();
        self.events.push(Event::Advance(next));
        next
    }

    fn acquire(&mut self) -> Result<AcquireStatus> {
        let frame = self.slots.current();
        self.events.push(Event::Acquire(frame));
        if self.fail_acquire {
            bail!("device lost");
        }

        // The wait completes whatever the slot submitted last time
        self.fences[frame] = Fence::Observed;

        let status = match self.acquire_script.pop_front() {
            Some(AcquireStatus::Acquired(_)) | None => AcquireStatus::Acquired(self.take_image()),
            Some(AcquireStatus::Suboptimal(_)) => AcquireStatus::Suboptimal(self.take_image()),
            Some(AcquireStatus::OutOfDate) => AcquireStatus::OutOfDate,
        };
        Ok(status)
    }

    fn begin(&mut self, image_index: u32) -> Result<()> {
        let frame = self.slots.current();
        assert_eq!(
            self.fences[frame],
            Fence::Observed,
            "slot {} recorded without waiting on its fence",
            frame
        );
        self.events.push(Event::Begin(frame, image_index));
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let frame = self.slots.current();
        assert_eq!(self.fences[frame], Fence::Observed);
        // Reset directly followed by the submit that signals it again
        self.fences[frame] = Fence::Pending;
        self.events.push(Event::Submit(frame));
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentStatus> {
        self.events.push(Event::Present(self.slots.current(), image_index));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentStatus::Presented))
    }

    fn rebuild(&mut self) -> Result<RebuildOutcome> {
        self.events.push(Event::Rebuild);
        let outcome = self
            .rebuild_script
            .pop_front()
            .unwrap_or(RebuildOutcome::Rebuilt {
                render_pass_recreated: false,
            });
        if let RebuildOutcome::Rebuilt { .. } = outcome {
            self.next_image = 0;
        }
        Ok(outcome)
    }
}

fn record(gpu: &mut MockGpu, frame: usize, image_index: u32) -> Result<()> {
    gpu.events.push(Event::Record(frame, image_index));
    Ok(())
}

fn presented_frame(outcome: FrameOutcome) -> Option<usize> {
    match outcome {
        FrameOutcome::Presented { frame, .. } => Some(frame),
        FrameOutcome::Skipped => None,
    }
}

#[test]
fn slots_cycle_round_robin_independent_of_image_count() {
    // More swapchain images than frame slots
    let mut gpu = MockGpu::new(3);
    let mut frames = FrameLoop::new();

    let mut slots = Vec::new();
    for _ in 0..3 * MAX_FRAMES_IN_FLIGHT {
        let outcome = frames.draw_frame(&mut gpu, record).unwrap();
        slots.push(presented_frame(outcome).unwrap());
    }

    let expected: Vec<usize> = (0..3 * MAX_FRAMES_IN_FLIGHT)
        .map(|i| i % MAX_FRAMES_IN_FLIGHT)
        .collect();
    assert_eq!(slots, expected);
    assert_eq!(gpu.slots.current(), 0);
}

#[test]
fn each_frame_follows_acquire_record_submit_present_order() {
    let mut gpu = MockGpu::new(3);
    let mut frames = FrameLoop::new();

    frames.draw_frame(&mut gpu, record).unwrap();

    assert_eq!(
        gpu.events,
        vec![
            Event::Acquire(0),
            Event::Begin(0, 0),
            Event::Record(0, 0),
            Event::Submit(0),
            Event::Present(0, 0),
            Event::Advance(1),
        ]
    );
}

#[test]
fn fence_is_waited_before_every_slot_reuse() {
    // MockGpu::begin and submit panic on a slot that was not waited on
    let mut gpu = MockGpu::new(2);
    let mut frames = FrameLoop::new();

    for _ in 0..20 {
        frames.draw_frame(&mut gpu, record).unwrap();
    }
    assert_eq!(gpu.count(|e| matches!(e, Event::Begin(..))), 20);
}

#[test]
fn out_of_date_on_third_frame_rebuilds_and_skips() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script = VecDeque::from([
        AcquireStatus::Acquired(0),
        AcquireStatus::Acquired(0),
        AcquireStatus::OutOfDate,
    ]);
    let mut frames = FrameLoop::new();

    let slots: Vec<Option<usize>> = (0..5)
        .map(|_| presented_frame(frames.draw_frame(&mut gpu, record).unwrap()))
        .collect();

    // The skipped frame leaves the slot where it was
    assert_eq!(slots, vec![Some(0), Some(1), None, Some(0), Some(1)]);
    assert_eq!(
        frames.stats(),
        FrameStats {
            presented: 4,
            skipped: 1,
            rebuilds: 1,
        }
    );
    assert_eq!(gpu.count(|e| matches!(e, Event::Rebuild)), 1);
    // Nothing was recorded for the skipped frame
    assert_eq!(gpu.count(|e| matches!(e, Event::Record(..))), 4);
    assert!(!frames.rebuild_pending());
}

#[test]
fn suboptimal_acquire_draws_then_rebuilds_before_advancing() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script = VecDeque::from([AcquireStatus::Suboptimal(0)]);
    let mut frames = FrameLoop::new();

    let outcome = frames.draw_frame(&mut gpu, record).unwrap();

    assert_eq!(presented_frame(outcome), Some(0));
    assert_eq!(
        &gpu.events[gpu.events.len() - 3..],
        &[Event::Present(0, 0), Event::Rebuild, Event::Advance(1)]
    );
    assert_eq!(frames.stats().rebuilds, 1);
}

#[test]
fn out_of_date_present_rebuilds_and_still_advances() {
    for status in [PresentStatus::OutOfDate, PresentStatus::Suboptimal] {
        let mut gpu = MockGpu::new(3);
        gpu.present_script = VecDeque::from([status]);
        let mut frames = FrameLoop::new();

        let first = frames.draw_frame(&mut gpu, record).unwrap();
        let second = frames.draw_frame(&mut gpu, record).unwrap();

        assert_eq!(presented_frame(first), Some(0));
        assert_eq!(presented_frame(second), Some(1));
        assert_eq!(frames.stats().rebuilds, 1);
    }
}

#[test]
fn minimized_window_skips_frames_until_rebuild_succeeds() {
    let mut gpu = MockGpu::new(3);
    gpu.rebuild_script = VecDeque::from([RebuildOutcome::Deferred, RebuildOutcome::Deferred]);
    let mut frames = FrameLoop::new();
    frames.request_rebuild();

    assert_eq!(frames.draw_frame(&mut gpu, record).unwrap(), FrameOutcome::Skipped);
    assert_eq!(frames.draw_frame(&mut gpu, record).unwrap(), FrameOutcome::Skipped);
    assert!(frames.rebuild_pending());
    // Nothing touches the swapchain while deferred
    assert_eq!(gpu.count(|e| matches!(e, Event::Acquire(_))), 0);

    let outcome = frames.draw_frame(&mut gpu, record).unwrap();
    assert_eq!(presented_frame(outcome), Some(0));
    assert_eq!(
        frames.stats(),
        FrameStats {
            presented: 1,
            skipped: 2,
            rebuilds: 1,
        }
    );
}

#[test]
fn deferred_rebuild_after_out_of_date_keeps_slot() {
    let mut gpu = MockGpu::new(3);
    gpu.acquire_script = VecDeque::from([AcquireStatus::OutOfDate]);
    gpu.rebuild_script = VecDeque::from([RebuildOutcome::Deferred]);
    let mut frames = FrameLoop::new();

    assert_eq!(frames.draw_frame(&mut gpu, record).unwrap(), FrameOutcome::Skipped);
    assert!(frames.rebuild_pending());
    assert_eq!(gpu.slots.current(), 0);

    let outcome = frames.draw_frame(&mut gpu, record).unwrap();
    assert_eq!(presented_frame(outcome), Some(0));
}

#[test]
fn requested_rebuild_runs_before_acquire() {
    let mut gpu = MockGpu::new(3);
    let mut frames = FrameLoop::new();
    frames.draw_frame(&mut gpu, record).unwrap();
    gpu.events.clear();

    frames.request_rebuild();
    frames.draw_frame(&mut gpu, record).unwrap();

    assert_eq!(gpu.events[0], Event::Rebuild);
    assert_eq!(gpu.events[1], Event::Acquire(1));
}

#[test]
fn fatal_acquire_error_propagates_without_advancing() {
    let mut gpu = MockGpu::new(3);
    gpu.fail_acquire = true;
    let mut frames = FrameLoop::new();

    let err = frames.draw_frame(&mut gpu, record).unwrap_err();
    assert_eq!(err.to_string(), "device lost");
    assert_eq!(gpu.slots.current(), 0);
    assert_eq!(frames.stats(), FrameStats::default());
}

#[test]
fn record_failure_stops_the_frame() {
    let mut gpu = MockGpu::new(3);
    let mut frames = FrameLoop::new();

    let result = frames.draw_frame(&mut gpu, |_, _, _| bail!("descriptor pool exhausted"));

    assert!(result.is_err());
    assert_eq!(gpu.count(|e| matches!(e, Event::Submit(_))), 0);
    assert_eq!(gpu.count(|e| matches!(e, Event::Present(..))), 0);
}

#[test]
fn failed_record_leaves_slot_reusable() {
    let mut gpu = MockGpu::new(3);
    let mut frames = FrameLoop::new();

    let failed = frames.draw_frame(&mut gpu, |_, _, _| bail!("out of device memory"));
    assert!(failed.is_err());
    // Still signaled: the next wait on this slot returns
    assert_eq!(gpu.fences[0], Fence::Observed);
    assert_eq!(gpu.slots.current(), 0);

    let outcome = frames.draw_frame(&mut gpu, record).unwrap();
    assert_eq!(presented_frame(outcome), Some(0));
    assert_eq!(gpu.count(|e| matches!(e, Event::Acquire(0))), 2);
    assert_eq!(gpu.fences[0], Fence::Pending);
}
