//! In-memory [`DeviceContext`] double for the test suite.
//!
//! Hands out fake raw handles, keeps a ledger of everything created and
//! destroyed, and lets tests control fence timing: immediate signals,
//! signal-after-delay, or an external "backend" thread signaling pending
//! fences while the pool runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ash::vk::{self, Handle};

use crate::context::DeviceContext;
use crate::handle::{HandleOwner, NonOwningHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum HandleKind {
    CommandPool,
    CommandBuffer,
    Fence,
    Semaphore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Submitted { fence: u64 },
    WaitSatisfied { fence: u64 },
    BulkReset,
    Destroyed { kind: HandleKind, raw: u64 },
}

#[derive(Debug)]
struct FenceState {
    signaled: bool,
    signal_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    next_raw: u64,
    live: HashMap<u64, HandleKind>,
    fences: HashMap<u64, FenceState>,
    /// Fences of submissions not yet observed signaled, in submit order.
    pending: Vec<u64>,
    events: Vec<Event>,
    bulk_resets: usize,
    fail_next_semaphore: bool,
}

impl State {
    fn fresh_raw(&mut self, kind: HandleKind) -> u64 {
        self.next_raw += 1;
        self.live.insert(self.next_raw, kind);
        self.next_raw
    }

    /// Apply any elapsed signal-after-delay to `fence`.
    fn refresh_fence(&mut self, fence: u64) {
        let state = self
            .fences
            .get_mut(&fence)
            .expect("fake context: unknown fence");
        if let Some(at) = state.signal_at
            && at <= Instant::now()
        {
            state.signaled = true;
            state.signal_at = None;
        }
        if state.signaled {
            self.pending.retain(|&pending| pending != fence);
        }
    }
}

pub(crate) struct FakeContext {
    state: Mutex<State>,
}

impl FakeContext {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
        })
    }

    /// A dummy queue handle; the fake never dereferences it.
    pub(crate) fn queue() -> NonOwningHandle<vk::Queue> {
        NonOwningHandle::new(vk::Queue::from_raw(0xFACE))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake context lock poisoned")
    }

    /// Mark `fence` signaled immediately.
    pub(crate) fn signal_fence(&self, fence: vk::Fence) {
        let mut state = self.lock();
        state
            .fences
            .get_mut(&fence.as_raw())
            .expect("fake context: unknown fence")
            .signaled = true;
        let raw = fence.as_raw();
        state.pending.retain(|&pending| pending != raw);
    }

    /// Mark `fence` signaled once `delay` has elapsed, observed lazily by
    /// status queries and waits.
    pub(crate) fn signal_fence_after(&self, fence: vk::Fence, delay: Duration) {
        self.lock()
            .fences
            .get_mut(&fence.as_raw())
            .expect("fake context: unknown fence")
            .signal_at = Some(Instant::now() + delay);
    }

    /// Signal the oldest still-pending submission, if any.
    pub(crate) fn signal_oldest_pending(&self) {
        let mut state = self.lock();
        if let Some(&fence) = state.pending.first() {
            state
                .fences
                .get_mut(&fence)
                .expect("fake context: unknown fence")
                .signaled = true;
            state.pending.remove(0);
        }
    }

    /// Make the next semaphore creation fail with an out-of-memory error.
    pub(crate) fn fail_next_semaphore_create(&self) {
        self.lock().fail_next_semaphore = true;
    }

    pub(crate) fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub(crate) fn bulk_reset_count(&self) -> usize {
        self.lock().bulk_resets
    }

    /// Panic if any created handle was never destroyed.
    pub(crate) fn assert_no_leaks(&self) {
        let state = self.lock();
        assert!(
            state.live.is_empty(),
            "fake context: leaked handles: {:?}",
            state.live
        );
    }

    fn destroy(&self, kind: HandleKind, raw: u64) {
        let mut state = self.lock();
        match state.live.remove(&raw) {
            Some(live_kind) => assert_eq!(
                live_kind, kind,
                "fake context: destroyed {raw:#x} as {kind:?} but it is a {live_kind:?}"
            ),
            None => panic!("fake context: double destroy of {kind:?} {raw:#x}"),
        }
        if kind == HandleKind::Fence {
            state.fences.remove(&raw);
        }
        state.events.push(Event::Destroyed { kind, raw });
    }
}

impl HandleOwner<vk::Fence> for FakeContext {
    unsafe fn destroy_handle(&self, handle: vk::Fence) {
        self.destroy(HandleKind::Fence, handle.as_raw());
    }
}

impl HandleOwner<vk::Semaphore> for FakeContext {
    unsafe fn destroy_handle(&self, handle: vk::Semaphore) {
        self.destroy(HandleKind::Semaphore, handle.as_raw());
    }
}

impl HandleOwner<vk::CommandPool> for FakeContext {
    unsafe fn destroy_handle(&self, handle: vk::CommandPool) {
        self.destroy(HandleKind::CommandPool, handle.as_raw());
    }
}

impl DeviceContext for FakeContext {
    unsafe fn create_raw_command_pool(
        &self,
        _queue_family: u32,
        _name: Option<&str>,
    ) -> Result<vk::CommandPool, vk::Result> {
        Ok(vk::CommandPool::from_raw(
            self.lock().fresh_raw(HandleKind::CommandPool),
        ))
    }

    unsafe fn allocate_raw_command_buffer(
        &self,
        pool: vk::CommandPool,
        _name: Option<&str>,
    ) -> Result<vk::CommandBuffer, vk::Result> {
        let mut state = self.lock();
        assert!(
            state.live.get(&pool.as_raw()) == Some(&HandleKind::CommandPool),
            "fake context: allocation from unknown pool"
        );
        Ok(vk::CommandBuffer::from_raw(
            state.fresh_raw(HandleKind::CommandBuffer),
        ))
    }

    unsafe fn free_raw_command_buffer(&self, _pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        self.destroy(HandleKind::CommandBuffer, buffer.as_raw());
    }

    unsafe fn reset_raw_command_pool(&self, pool: vk::CommandPool) -> Result<(), vk::Result> {
        let mut state = self.lock();
        assert!(
            state.live.get(&pool.as_raw()) == Some(&HandleKind::CommandPool),
            "fake context: bulk reset of unknown pool"
        );
        state.bulk_resets += 1;
        state.events.push(Event::BulkReset);
        Ok(())
    }

    unsafe fn reset_raw_command_buffer(
        &self,
        _buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        Ok(())
    }

    unsafe fn begin_raw_command_buffer(
        &self,
        _buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        Ok(())
    }

    unsafe fn end_raw_command_buffer(&self, _buffer: vk::CommandBuffer) -> Result<(), vk::Result> {
        Ok(())
    }

    unsafe fn create_raw_fence(
        &self,
        signaled: bool,
        _name: Option<&str>,
    ) -> Result<vk::Fence, vk::Result> {
        let mut state = self.lock();
        let raw = state.fresh_raw(HandleKind::Fence);
        state.fences.insert(
            raw,
            FenceState {
                signaled,
                signal_at: None,
            },
        );
        Ok(vk::Fence::from_raw(raw))
    }

    unsafe fn wait_for_raw_fence(
        &self,
        fence: vk::Fence,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        let deadline = Instant::now().checked_add(Duration::from_nanos(timeout_ns));
        loop {
            {
                let mut state = self.lock();
                state.refresh_fence(fence.as_raw());
                if state.fences[&fence.as_raw()].signaled {
                    state.events.push(Event::WaitSatisfied {
                        fence: fence.as_raw(),
                    });
                    return Ok(());
                }
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Err(vk::Result::TIMEOUT);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    unsafe fn raw_fence_status(&self, fence: vk::Fence) -> Result<bool, vk::Result> {
        let mut state = self.lock();
        state.refresh_fence(fence.as_raw());
        Ok(state.fences[&fence.as_raw()].signaled)
    }

    unsafe fn reset_raw_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        let mut state = self.lock();
        let raw = fence.as_raw();
        let fence_state = state
            .fences
            .get_mut(&raw)
            .expect("fake context: unknown fence");
        fence_state.signaled = false;
        fence_state.signal_at = None;
        state.pending.retain(|&pending| pending != raw);
        Ok(())
    }

    unsafe fn create_raw_semaphore(&self, _name: Option<&str>) -> Result<vk::Semaphore, vk::Result> {
        let mut state = self.lock();
        if state.fail_next_semaphore {
            state.fail_next_semaphore = false;
            return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        }
        Ok(vk::Semaphore::from_raw(
            state.fresh_raw(HandleKind::Semaphore),
        ))
    }

    unsafe fn submit_raw(
        &self,
        _queue: vk::Queue,
        _submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        let mut state = self.lock();
        let raw = fence.as_raw();
        let fence_state = state
            .fences
            .get(&raw)
            .expect("fake context: submit with unknown fence");
        assert!(
            !fence_state.signaled,
            "fake context: submit attached an already-signaled fence"
        );
        state.pending.push(raw);
        state.events.push(Event::Submitted { fence: raw });
        Ok(())
    }
}
