//! The boundary between the pool machinery and the execution backend.

use ash::vk;

use crate::handle::HandleOwner;

/// Backend operations the frame-recycling machinery is built on.
///
/// [`crate::device::Device`] is the real implementation; tests substitute a
/// double so fence timing can be controlled. Destruction of fences,
/// semaphores and command pools goes through the [`HandleOwner`]
/// supertraits so [`crate::handle::OwnedHandle`] can bind any context.
///
/// Submission is fire-and-forget: the fence attached to
/// [`submit_raw`](Self::submit_raw) is the only cross-domain
/// synchronization primitive this layer understands, and submitted work
/// can only be waited on, never cancelled.
///
/// The `name` parameters are optional debug labels; implementations must
/// treat naming failures as non-fatal.
pub trait DeviceContext:
    HandleOwner<vk::Fence>
    + HandleOwner<vk::Semaphore>
    + HandleOwner<vk::CommandPool>
    + Send
    + Sync
    + 'static
{
    /// Create a command pool whose buffers are individually resettable.
    ///
    /// # Safety
    /// `queue_family` must be a valid queue family index for this context.
    unsafe fn create_raw_command_pool(
        &self,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<vk::CommandPool, vk::Result>;

    /// Allocate one primary command buffer from `pool`.
    ///
    /// # Safety
    /// `pool` must be a valid command pool created from this context, and
    /// the caller must be the thread owning `pool`.
    unsafe fn allocate_raw_command_buffer(
        &self,
        pool: vk::CommandPool,
        name: Option<&str>,
    ) -> Result<vk::CommandBuffer, vk::Result>;

    /// Return `buffer` to `pool`.
    ///
    /// # Safety
    /// `buffer` must have been allocated from `pool`, must not be pending
    /// execution, and the caller must be the thread owning `pool`.
    unsafe fn free_raw_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer);

    /// Reset `pool` and every command buffer allocated from it in one bulk
    /// operation.
    ///
    /// # Safety
    /// No buffer allocated from `pool` may be pending execution.
    unsafe fn reset_raw_command_pool(&self, pool: vk::CommandPool) -> Result<(), vk::Result>;

    /// Reset `buffer` to the initial state.
    ///
    /// # Safety
    /// `buffer` must not be pending execution.
    unsafe fn reset_raw_command_buffer(&self, buffer: vk::CommandBuffer)
    -> Result<(), vk::Result>;

    /// Begin recording into `buffer`.
    ///
    /// # Safety
    /// `buffer` must be in the initial state (freshly allocated or reset).
    unsafe fn begin_raw_command_buffer(&self, buffer: vk::CommandBuffer)
    -> Result<(), vk::Result>;

    /// End recording into `buffer`.
    ///
    /// # Safety
    /// `buffer` must be in the recording state.
    unsafe fn end_raw_command_buffer(&self, buffer: vk::CommandBuffer) -> Result<(), vk::Result>;

    /// Create a fence, optionally already signaled.
    ///
    /// # Safety
    /// No preconditions beyond this context being alive; unsafe for
    /// symmetry with the destroy path, which has real ones.
    unsafe fn create_raw_fence(
        &self,
        signaled: bool,
        name: Option<&str>,
    ) -> Result<vk::Fence, vk::Result>;

    /// Block until `fence` is signaled or `timeout_ns` elapses.
    ///
    /// Returns `Err(vk::Result::TIMEOUT)` on timeout. Pass `u64::MAX` to
    /// wait indefinitely.
    ///
    /// # Safety
    /// `fence` must be a valid fence created from this context.
    unsafe fn wait_for_raw_fence(&self, fence: vk::Fence, timeout_ns: u64)
    -> Result<(), vk::Result>;

    /// Query whether `fence` is currently signaled, without blocking.
    ///
    /// # Safety
    /// `fence` must be a valid fence created from this context.
    unsafe fn raw_fence_status(&self, fence: vk::Fence) -> Result<bool, vk::Result>;

    /// Reset `fence` to the unsignaled state.
    ///
    /// # Safety
    /// `fence` must not be pending on any queue submission.
    unsafe fn reset_raw_fence(&self, fence: vk::Fence) -> Result<(), vk::Result>;

    /// Create a binary semaphore.
    ///
    /// # Safety
    /// No preconditions beyond this context being alive; unsafe for
    /// symmetry with the destroy path, which has real ones.
    unsafe fn create_raw_semaphore(&self, name: Option<&str>) -> Result<vk::Semaphore, vk::Result>;

    /// Submit `submits` to `queue`, signaling `fence` when all of them
    /// complete.
    ///
    /// # Safety
    /// All handles referenced by `submits` must be valid and derived from
    /// this context, every command buffer must be in the executable state,
    /// `fence` must be unsignaled and not pending, and the caller must
    /// externally synchronize access to `queue`.
    unsafe fn submit_raw(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result>;
}
