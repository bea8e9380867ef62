//! One frame-in-flight: a command buffer, its completion fence, and its
//! signal semaphore, plus the submit/wait/reset cycle between them.

use std::sync::Arc;
use std::time::Duration;

use ash::vk::{self, Handle};
use thiserror::Error;

use crate::command::{AllocateCommandBufferError, CommandPool, CommandPoolShared};
use crate::context::DeviceContext;
use crate::handle::{NonOwningHandle, OwnedHandle};

#[derive(Debug, Error)]
pub enum CreateFrameError {
    #[error("Failed to allocate frame command buffer: {0}")]
    CommandBuffer(#[from] AllocateCommandBufferError),
    #[error("Vulkan error creating frame fence: {0}")]
    Fence(vk::Result),
    #[error("Vulkan error creating frame semaphore: {0}")]
    Semaphore(vk::Result),
}

#[derive(Debug, Error)]
pub enum WaitFrameError {
    #[error("Frame fence wait timed out")]
    Timeout,
    #[error("Vulkan error waiting for frame fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum ResetFrameError {
    #[error("Vulkan error resetting frame: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SubmitFrameError {
    #[error("Vulkan error submitting frame: {0}")]
    Vulkan(vk::Result),
}

/// A reusable recording slot: command buffer + fence + semaphore +
/// submitted flag.
///
/// The lifecycle is a two-step caller-driven state machine:
///
/// ```text
/// Idle ── begin/record/end ──▶ Recording ── submit ──▶ InFlight
///   ▲                                                     │
///   └────── reset (only after the fence is observed) ◀────┘
/// ```
///
/// There is no automatic transition out of InFlight: the caller detects
/// completion ([`is_available`](Self::is_available) or
/// [`wait`](Self::wait)) and then explicitly calls
/// [`reset`](Self::reset).
pub struct FrameResource<C: DeviceContext> {
    // Dropped in declaration order: the command buffer frees back to its
    // pool before the sync objects are destroyed.
    command_buffer: OwnedHandle<vk::CommandBuffer, CommandPoolShared<C>>,
    fence: OwnedHandle<vk::Fence, C>,
    semaphore: OwnedHandle<vk::Semaphore, C>,
    submitted: bool,
    context: Arc<C>,
}

impl<C: DeviceContext> std::fmt::Debug for FrameResource<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResource")
            .field("command_buffer", &self.command_buffer)
            .field("fence", &self.fence)
            .field("submitted", &self.submitted)
            .finish_non_exhaustive()
    }
}

impl<C: DeviceContext> FrameResource<C> {
    /// Allocate the command buffer, fence and semaphore for one frame slot.
    ///
    /// The fence starts unsignaled and `submitted` starts false, so a fresh
    /// frame is immediately available. On any mid-construction failure the
    /// handles created so far are destroyed by their own drops; a partially
    /// constructed frame never escapes.
    ///
    /// `label` is a debug-name prefix (`<label>.cmd`, `<label>.fence`,
    /// `<label>.semaphore`).
    pub fn new(
        context: &Arc<C>,
        command_pool: &CommandPool<C>,
        label: &str,
    ) -> Result<Self, CreateFrameError> {
        let command_buffer = command_pool.allocate(Some(&format!("{label}.cmd")))?;

        // SAFETY: This context is alive for the duration of the call.
        let raw_fence = unsafe { context.create_raw_fence(false, Some(&format!("{label}.fence"))) }
            .map_err(CreateFrameError::Fence)?;
        // SAFETY: raw_fence was just created from context and is owned by
        // nothing else.
        let fence = unsafe { OwnedHandle::new(raw_fence, Arc::clone(context)) };

        // SAFETY: This context is alive for the duration of the call.
        let raw_semaphore =
            unsafe { context.create_raw_semaphore(Some(&format!("{label}.semaphore"))) }
                .map_err(CreateFrameError::Semaphore)?;
        // SAFETY: raw_semaphore was just created from context and is owned
        // by nothing else.
        let semaphore = unsafe { OwnedHandle::new(raw_semaphore, Arc::clone(context)) };

        Ok(Self {
            command_buffer,
            fence,
            semaphore,
            submitted: false,
            context: Arc::clone(context),
        })
    }

    /// True when this slot can be handed out again: never submitted, or
    /// submitted and the fence is observed signaled.
    pub fn is_available(&self) -> Result<bool, vk::Result> {
        if !self.submitted {
            return Ok(true);
        }
        // SAFETY: self.fence is a valid fence created from self.context.
        unsafe { self.context.raw_fence_status(self.fence.raw()) }
    }

    /// Block until the completion fence signals or `timeout` elapses.
    ///
    /// A timeout is transient: the wait can simply be retried. Any other
    /// error is a device fault and not recoverable at this layer. Waiting
    /// on a frame that was never submitted blocks until the timeout, so
    /// callers normally gate on [`submitted`](Self::submitted) first.
    pub fn wait(&self, timeout: Duration) -> Result<(), WaitFrameError> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        let _span = tracing::trace_span!("frame_wait", fence = self.fence.raw().as_raw()).entered();
        // SAFETY: self.fence is a valid fence created from self.context.
        unsafe { self.context.wait_for_raw_fence(self.fence.raw(), timeout_ns) }.map_err(|e| {
            if e == vk::Result::TIMEOUT {
                WaitFrameError::Timeout
            } else {
                WaitFrameError::Vulkan(e)
            }
        })
    }

    /// Return this slot to Idle: reset the command buffer's recording
    /// state, reset the fence to unsignaled, clear `submitted`.
    ///
    /// # Panics
    /// Panics if called while submitted work has not been observed
    /// complete. Continuing would let the CPU re-record a buffer the GPU
    /// may still be reading, so this is fatal rather than recoverable.
    /// Call [`wait`](Self::wait) or check [`is_available`](Self::is_available)
    /// first.
    pub fn reset(&mut self) -> Result<(), ResetFrameError> {
        let available = self.is_available().map_err(ResetFrameError::Vulkan)?;
        assert!(
            available,
            "FrameResource::reset called while the frame is still in flight"
        );

        // SAFETY: available == true means the fence has signaled (or the
        // frame was never submitted), so neither the buffer nor the fence is
        // pending.
        unsafe {
            self.context
                .reset_raw_command_buffer(self.command_buffer.raw())
                .map_err(ResetFrameError::Vulkan)?;
            self.context
                .reset_raw_fence(self.fence.raw())
                .map_err(ResetFrameError::Vulkan)?;
        }
        self.submitted = false;
        Ok(())
    }

    /// Begin recording into this frame's command buffer.
    ///
    /// # Safety
    /// The command buffer must be in the initial state (fresh or reset).
    pub unsafe fn begin(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe { self.context.begin_raw_command_buffer(self.command_buffer.raw()) }
    }

    /// End recording into this frame's command buffer.
    ///
    /// # Safety
    /// The command buffer must be in the recording state.
    pub unsafe fn end(&mut self) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the recording state.
        unsafe { self.context.end_raw_command_buffer(self.command_buffer.raw()) }
    }

    /// Submit the recorded commands to `queue`.
    ///
    /// The completion fence is attached as the submission's fence and the
    /// bundled semaphore is attached as its signal semaphore; on success
    /// the frame transitions to InFlight (`submitted == true`). Submission
    /// is fire-and-forget: there is no cancellation, only [`wait`](Self::wait).
    ///
    /// # Safety
    /// Recording must have ended ([`end`](Self::end)), the frame must be
    /// Idle-reset since its last submission, and the caller must externally
    /// synchronize access to `queue` (one thread drives a pool).
    pub unsafe fn submit(
        &mut self,
        queue: &NonOwningHandle<vk::Queue>,
    ) -> Result<(), SubmitFrameError> {
        let command_buffer_info =
            vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer.raw());
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(self.semaphore.raw())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));

        // SAFETY: All handles are owned by this frame and valid; caller
        // guarantees executable state and queue synchronization. The fence
        // is unsignaled because submit is only reachable from Idle.
        unsafe {
            self.context.submit_raw(
                queue.raw(),
                std::slice::from_ref(&submit_info),
                self.fence.raw(),
            )
        }
        .map_err(SubmitFrameError::Vulkan)?;

        self.submitted = true;
        Ok(())
    }

    /// True between a successful [`submit`](Self::submit) and the next
    /// [`reset`](Self::reset).
    pub fn submitted(&self) -> bool {
        self.submitted
    }

    /// The recording surface, borrowed. Everything recorded into it is
    /// out of this crate's scope.
    pub fn command_buffer(&self) -> NonOwningHandle<vk::CommandBuffer> {
        NonOwningHandle::new(self.command_buffer.raw())
    }

    /// The fence attached to this frame's submissions, borrowed.
    pub fn fence(&self) -> NonOwningHandle<vk::Fence> {
        NonOwningHandle::new(self.fence.raw())
    }

    /// The semaphore signaled by this frame's submissions, borrowed.
    /// The pool never waits on it; it exists to order dependent GPU work.
    pub fn semaphore(&self) -> NonOwningHandle<vk::Semaphore> {
        NonOwningHandle::new(self.semaphore.raw())
    }
}
