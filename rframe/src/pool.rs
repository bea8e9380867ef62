//! The frame pool: hands out reusable [`FrameResource`] slots gated on
//! fence completion, growing lazily up to a configured capacity.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use thiserror::Error;

use crate::base::ObjectBase;
use crate::command::{CommandPool, CreateCommandPoolError, ResetCommandPoolError};
use crate::context::DeviceContext;
use crate::device::Device;
use crate::frame::{CreateFrameError, FrameResource, ResetFrameError, WaitFrameError};

/// Effectively-indefinite fence wait used by the teardown paths.
const WAIT_INDEFINITE: Duration = Duration::from_nanos(u64::MAX);

#[derive(Debug, Error)]
pub enum CreatePoolError {
    #[error("Failed to create the pool's command-buffer source: {0}")]
    CommandPool(#[from] CreateCommandPoolError),
}

#[derive(Debug, Error)]
pub enum AcquireFrameError {
    #[error(
        "Frame pool exhausted: all {capacity} frames are in flight. \
         Wait for completed work (drain_all) or raise the capacity"
    )]
    Exhausted { capacity: usize },
    #[error("Failed to grow the frame pool: {0}")]
    Create(#[from] CreateFrameError),
    #[error("Vulkan error querying frame availability: {0}")]
    Availability(vk::Result),
}

#[derive(Debug, Error)]
pub enum DrainPoolError {
    #[error("Error waiting for an in-flight frame: {0}")]
    Wait(#[from] WaitFrameError),
    #[error("Error recycling a completed frame: {0}")]
    Reset(#[from] ResetFrameError),
}

#[derive(Debug, Error)]
pub enum ResetPoolError {
    #[error(transparent)]
    Drain(#[from] DrainPoolError),
    #[error("Error bulk-resetting the command-buffer source: {0}")]
    CommandPool(#[from] ResetCommandPoolError),
}

#[derive(Debug, Clone, Copy)]
pub struct FramePoolConfig {
    /// Hard ceiling on the number of frame slots. Exceeding it surfaces as
    /// [`AcquireFrameError::Exhausted`] instead of unbounded growth.
    pub max_frames: usize,
}

impl Default for FramePoolConfig {
    fn default() -> Self {
        Self { max_frames: 8 }
    }
}

/// A growable, insertion-ordered pool of [`FrameResource`] slots.
///
/// [`acquire`](Self::acquire) returns a slot that is guaranteed not to be
/// concurrently read by the execution backend, provided the caller honors
/// the frame state machine (never resets a slot without observing its
/// fence). Entries are created lazily, never reordered or removed while
/// the pool lives, and destroyed only by the pool's drop, after their
/// in-flight work is confirmed complete.
///
/// `FramePool` is `Send + !Sync`: a single thread drives each pool and
/// there is no internal locking. The `PhantomData<Cell<()>>` marker makes
/// cross-thread sharing a compile error instead of a latent race.
/// Blocking happens only in [`drain_all`](Self::drain_all),
/// [`reset`](Self::reset) and drop; every other operation returns
/// immediately.
pub struct FramePool<C: DeviceContext = Device> {
    // Dropped in declaration order: frames release their buffers back to
    // the source, then the source itself goes, then the context.
    frames: Vec<FrameResource<C>>,
    command_pool: CommandPool<C>,
    base: ObjectBase<C>,
    max_frames: usize,
    /// Structural `!Sync` marker: the pool must stay on one thread.
    _not_sync: PhantomData<Cell<()>>,
}

impl<C: DeviceContext> std::fmt::Debug for FramePool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePool")
            .field("frames", &self.frames.len())
            .field("max_frames", &self.max_frames)
            .finish_non_exhaustive()
    }
}

impl<C: DeviceContext> FramePool<C> {
    /// Create an empty pool submitting on `queue_family`.
    pub fn new(
        context: &Arc<C>,
        queue_family: u32,
        config: FramePoolConfig,
    ) -> Result<Self, CreatePoolError> {
        let command_pool = CommandPool::new(context, queue_family, Some("frame-pool.commands"))?;

        Ok(Self {
            frames: Vec::new(),
            command_pool,
            base: ObjectBase::new(Arc::clone(context)),
            max_frames: config.max_frames,
            _not_sync: PhantomData,
        })
    }

    /// Hand out a frame slot that is safe to record into.
    ///
    /// Scans existing entries in insertion order for the first available
    /// one; if none is available, creates a new entry, up to the configured
    /// capacity. A returned slot that was previously submitted has a
    /// signaled fence and must still be [`reset`](FrameResource::reset) by
    /// the caller before recording; the transition out of InFlight is
    /// explicit, never automatic.
    ///
    /// Growth failure (out of device memory, device lost) is propagated
    /// as-is; a partially constructed entry is never stored.
    pub fn acquire(&mut self) -> Result<&mut FrameResource<C>, AcquireFrameError> {
        let mut found = None;
        for (index, frame) in self.frames.iter().enumerate() {
            if frame
                .is_available()
                .map_err(AcquireFrameError::Availability)?
            {
                found = Some(index);
                break;
            }
        }

        let index = match found {
            Some(index) => index,
            None => {
                if self.frames.len() >= self.max_frames {
                    return Err(AcquireFrameError::Exhausted {
                        capacity: self.max_frames,
                    });
                }
                let label = format!("frame{}", self.frames.len());
                let frame = FrameResource::new(self.base.context(), &self.command_pool, &label)?;
                tracing::debug!(
                    "Frame pool grew to {} of {} slots",
                    self.frames.len() + 1,
                    self.max_frames
                );
                self.frames.push(frame);
                self.frames.len() - 1
            }
        };

        Ok(&mut self.frames[index])
    }

    /// Wait for and recycle every submitted frame.
    ///
    /// After this returns, every entry is available and idle. Used before
    /// destructive operations (bulk reset, teardown).
    pub fn drain_all(&mut self) -> Result<(), DrainPoolError> {
        let _span = tracing::debug_span!("frame_pool_drain", frames = self.frames.len()).entered();
        for frame in &mut self.frames {
            if frame.submitted() {
                frame.wait(WAIT_INDEFINITE)?;
                frame.reset()?;
            }
        }
        Ok(())
    }

    /// Drain every frame, then reset the command-buffer source in one bulk
    /// operation.
    pub fn reset(&mut self) -> Result<(), ResetPoolError> {
        self.drain_all()?;
        // SAFETY: drain_all waited on every submitted frame, so no buffer
        // allocated from this source is pending.
        unsafe { self.command_pool.reset_all() }?;
        Ok(())
    }

    /// Number of frame slots created so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of frames submitted and not yet recycled. Some of them may
    /// already have signaled fences.
    pub fn in_flight(&self) -> usize {
        self.frames.iter().filter(|frame| frame.submitted()).count()
    }

    pub fn capacity(&self) -> usize {
        self.max_frames
    }

    pub fn context(&self) -> &Arc<C> {
        self.base.context()
    }

    pub fn created_at(&self) -> std::time::Instant {
        self.base.created_at()
    }
}

impl<C: DeviceContext> Drop for FramePool<C> {
    fn drop(&mut self) {
        tracing::debug!("Dropping frame pool with {} frames", self.frames.len());
        // Wait (without recycling) on every in-flight frame so no fence or
        // buffer is released while the backend might still signal it. The
        // handles themselves are released afterwards by field drop order.
        for frame in &self.frames {
            if frame.submitted()
                && let Err(e) = frame.wait(WAIT_INDEFINITE)
            {
                tracing::error!("Error waiting for in-flight frame during pool teardown: {e}");
            }
        }
    }
}

// Verified at compile time: the pool moves between threads but cannot be
// shared. FramePool: Send (all fields Send) + !Sync (PhantomData<Cell<()>>).
#[allow(dead_code)]
trait AssertSend: Send {}
impl<C: DeviceContext> AssertSend for FramePool<C> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, FakeContext, HandleKind};
    use ash::vk::Handle;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn pool_with_capacity(
        context: &Arc<FakeContext>,
        max_frames: usize,
    ) -> FramePool<FakeContext> {
        FramePool::new(context, 0, FramePoolConfig { max_frames })
            .expect("pool creation cannot fail")
    }

    fn frame_id(frame: &FrameResource<FakeContext>) -> u64 {
        frame.command_buffer().raw().as_raw()
    }

    /// Record an empty submission into `frame`'s slot.
    fn record_and_submit(frame: &mut FrameResource<FakeContext>) {
        if frame.submitted() {
            frame.reset().expect("frame was available");
        }
        // SAFETY: FakeContext does not track recording state.
        unsafe {
            frame.begin().unwrap();
            frame.end().unwrap();
            frame.submit(&FakeContext::queue()).unwrap();
        }
    }

    #[test]
    fn first_acquire_creates_one_available_entry() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);
        assert!(pool.is_empty());

        let frame = pool.acquire().expect("growth cannot fail");
        assert!(frame.is_available().unwrap());
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn growth_and_recycling_scenario() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);

        // First acquire creates entry 0.
        let frame0 = pool.acquire().expect("growth cannot fail");
        let id0 = frame_id(frame0);
        let fence0 = frame0.fence().raw();
        record_and_submit(frame0);

        // Entry 0 is in flight, so the next acquire must allocate entry 1.
        let frame1 = pool.acquire().expect("growth cannot fail");
        assert_ne!(frame_id(frame1), id0);
        assert_eq!(pool.len(), 2);

        // Once entry 0's fence signals and it is reset, it is handed out
        // again and the pool does not grow further.
        context.signal_fence(fence0);
        let reused = pool.acquire().expect("scan cannot fail");
        assert_eq!(frame_id(reused), id0);
        reused.reset().expect("entry 0 was available");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn acquire_never_returns_an_in_flight_entry() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let frame = pool.acquire().expect("growth cannot fail");
            assert!(frame.is_available().unwrap());
            seen.push(frame_id(frame));
            record_and_submit(frame);
        }

        // All three distinct, all in flight now.
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 3);
        assert_eq!(pool.in_flight(), 3);
    }

    #[test]
    fn exhausted_pool_surfaces_a_typed_error() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 1);

        let frame = pool.acquire().expect("growth cannot fail");
        record_and_submit(frame);

        match pool.acquire() {
            Err(AcquireFrameError::Exhausted { capacity }) => assert_eq!(capacity, 1),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn growth_failure_stores_no_partial_entry() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);
        context.fail_next_semaphore_create();

        let result = pool.acquire();
        assert!(matches!(
            result,
            Err(AcquireFrameError::Create(CreateFrameError::Semaphore(_)))
        ));
        assert_eq!(pool.len(), 0);

        // The handles allocated before the failure were returned.
        drop(pool);
        context.assert_no_leaks();
    }

    #[test]
    fn drain_all_waits_on_every_unsignaled_fence() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);

        let mut fences = Vec::new();
        for _ in 0..4 {
            let frame = pool.acquire().expect("growth cannot fail");
            fences.push(frame.fence().raw());
            record_and_submit(frame);
        }

        // Two complete immediately, two only after a delay.
        context.signal_fence(fences[0]);
        context.signal_fence(fences[2]);
        context.signal_fence_after(fences[1], Duration::from_millis(20));
        context.signal_fence_after(fences[3], Duration::from_millis(30));

        let started = Instant::now();
        pool.drain_all().expect("drain cannot fail");
        assert!(started.elapsed() >= Duration::from_millis(30));

        assert_eq!(pool.in_flight(), 0);
        for _ in 0..4 {
            let frame = pool.acquire().expect("scan cannot fail");
            assert!(frame.is_available().unwrap());
            record_and_submit(frame);
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn pool_reset_bulk_resets_the_source_exactly_once() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);

        let mut fences = Vec::new();
        for _ in 0..3 {
            let frame = pool.acquire().expect("growth cannot fail");
            fences.push(frame.fence().raw());
            record_and_submit(frame);
        }
        for fence in fences {
            context.signal_fence(fence);
        }

        pool.reset().expect("reset cannot fail");
        assert_eq!(context.bulk_reset_count(), 1);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn drop_blocks_on_in_flight_fences_before_releasing_handles() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 2);

        for delay_ms in [30u64, 50] {
            let frame = pool.acquire().expect("growth cannot fail");
            let fence = frame.fence().raw();
            record_and_submit(frame);
            context.signal_fence_after(fence, Duration::from_millis(delay_ms));
        }

        let started = Instant::now();
        drop(pool);
        assert!(started.elapsed() >= Duration::from_millis(50));

        // Every wait completed before the first handle was destroyed.
        let events = context.events();
        let first_destroy = events
            .iter()
            .position(|event| matches!(event, Event::Destroyed { .. }))
            .expect("teardown destroys handles");
        let last_wait = events
            .iter()
            .rposition(|event| matches!(event, Event::WaitSatisfied { .. }))
            .expect("teardown waits on fences");
        assert!(last_wait < first_destroy);

        // And the fences themselves were released only after both waits.
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(
                    event,
                    Event::Destroyed {
                        kind: HandleKind::Fence,
                        ..
                    }
                ))
                .count(),
            2
        );
        context.assert_no_leaks();
    }

    #[test]
    fn racing_fence_signals_never_alias_an_in_flight_frame() {
        let context = FakeContext::new();
        let mut pool = pool_with_capacity(&context, 4);
        let stop = Arc::new(AtomicBool::new(false));

        // The backend double: signals pending fences asynchronously while
        // the pool is driven from this thread.
        let signaler = {
            let context = Arc::clone(&context);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    context.signal_oldest_pending();
                    std::thread::sleep(Duration::from_micros(200));
                }
            })
        };

        for iteration in 0..300 {
            match pool.acquire() {
                Ok(frame) => {
                    assert!(
                        frame.is_available().unwrap(),
                        "acquire handed out an in-flight frame"
                    );
                    record_and_submit(frame);
                }
                Err(AcquireFrameError::Exhausted { .. }) => {
                    // Every slot mid-flight; wait for the backend.
                    pool.drain_all().expect("drain cannot fail");
                }
                Err(e) => panic!("unexpected acquire error: {e}"),
            }
            if iteration % 7 == 0 {
                std::thread::sleep(Duration::from_micros(100));
            }
        }

        pool.drain_all().expect("final drain cannot fail");
        assert_eq!(pool.in_flight(), 0);

        stop.store(true, Ordering::Relaxed);
        signaler.join().expect("signaler thread panicked");
        drop(pool);
        context.assert_no_leaks();
    }
}
