//! The command-buffer source backing a frame pool.

use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::base::ObjectBase;
use crate::context::DeviceContext;
use crate::handle::{HandleOwner, OwnedHandle};

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffer: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum ResetCommandPoolError {
    #[error("Vulkan error resetting command pool: {0}")]
    Vulkan(vk::Result),
}

/// Inner state co-owned by the pool and every buffer allocated from it.
///
/// Held via `Arc` by both [`CommandPool`] and the owned handle of each
/// allocated buffer, so the underlying pool is not destroyed until all of
/// those clones are dropped. This is what lets a buffer free itself back
/// to a pool that is guaranteed to still exist.
pub struct CommandPoolShared<C: DeviceContext> {
    context: Arc<C>,
    pool: OwnedHandle<vk::CommandPool, C>,
}

impl<C: DeviceContext> HandleOwner<vk::CommandBuffer> for CommandPoolShared<C> {
    unsafe fn destroy_handle(&self, handle: vk::CommandBuffer) {
        // SAFETY: handle was allocated from self.pool (the only way to bind
        // this owner) and the caller guarantees it is not pending.
        unsafe {
            self.context
                .free_raw_command_buffer(self.pool.raw(), handle)
        };
    }
}

/// An owned command pool that hands out individually-resettable primary
/// command buffers and supports resetting all of them in one bulk call.
pub struct CommandPool<C: DeviceContext> {
    shared: Arc<CommandPoolShared<C>>,
    base: ObjectBase<C>,
    queue_family: u32,
}

impl<C: DeviceContext> std::fmt::Debug for CommandPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("pool", &self.shared.pool)
            .field("queue_family", &self.queue_family)
            .finish_non_exhaustive()
    }
}

impl<C: DeviceContext> CommandPool<C> {
    /// Create a resettable command pool for the given queue family.
    ///
    /// `name` is an optional debug label; naming failures are logged by the
    /// context and do not cause the call to fail.
    pub fn new(
        context: &Arc<C>,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<Self, CreateCommandPoolError> {
        // SAFETY: queue_family is passed through from the caller, who got it
        // from this same context's queue selection.
        let raw = unsafe { context.create_raw_command_pool(queue_family, name) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        // SAFETY: raw was just created from context and is owned by nothing
        // else.
        let pool = unsafe { OwnedHandle::new(raw, Arc::clone(context)) };

        Ok(Self {
            shared: Arc::new(CommandPoolShared {
                context: Arc::clone(context),
                pool,
            }),
            base: ObjectBase::new(Arc::clone(context)),
            queue_family,
        })
    }

    /// Allocate one primary command buffer owned by this pool.
    ///
    /// The returned handle holds a clone of the pool's shared inner `Arc`
    /// and frees the buffer back to it on drop.
    pub fn allocate(
        &self,
        name: Option<&str>,
    ) -> Result<OwnedHandle<vk::CommandBuffer, CommandPoolShared<C>>, AllocateCommandBufferError>
    {
        // SAFETY: self.shared.pool is a valid pool created from this
        // context, and the pool is only reachable from its owning thread
        // via the FramePool's !Sync wrapper.
        let raw = unsafe {
            self.shared
                .context
                .allocate_raw_command_buffer(self.shared.pool.raw(), name)
        }
        .map_err(AllocateCommandBufferError::Vulkan)?;

        // SAFETY: raw was just allocated from this pool and is owned by
        // nothing else.
        Ok(unsafe { OwnedHandle::new(raw, Arc::clone(&self.shared)) })
    }

    /// Reset the pool and every buffer allocated from it in one bulk call.
    ///
    /// # Safety
    /// No command buffer allocated from this pool may be pending execution.
    pub unsafe fn reset_all(&self) -> Result<(), ResetCommandPoolError> {
        tracing::trace!("Bulk-resetting command pool {:?}", self.shared.pool);
        // SAFETY: Caller guarantees no allocated buffer is pending.
        unsafe {
            self.shared
                .context
                .reset_raw_command_pool(self.shared.pool.raw())
        }
        .map_err(ResetCommandPoolError::Vulkan)
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.shared.pool.raw()
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn context(&self) -> &Arc<C> {
        self.base.context()
    }

    pub fn created_at(&self) -> std::time::Instant {
        self.base.created_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Event, FakeContext, HandleKind};
    use ash::vk::Handle;

    #[test]
    fn allocated_buffer_frees_back_to_pool_on_drop() {
        let context = FakeContext::new();
        let pool =
            CommandPool::new(&context, 0, Some("test-pool")).expect("pool creation cannot fail");

        let buffer = pool.allocate(Some("cb")).expect("allocation cannot fail");
        let raw = buffer.raw();
        assert!(!buffer.is_null());

        drop(buffer);
        assert!(context.events().iter().any(|event| matches!(
            event,
            Event::Destroyed { kind: HandleKind::CommandBuffer, raw: r } if *r == raw.as_raw()
        )));
    }

    #[test]
    fn pool_outlives_buffers_via_shared_ownership() {
        let context = FakeContext::new();
        let pool = CommandPool::new(&context, 0, None).expect("pool creation cannot fail");
        let buffer = pool.allocate(None).expect("allocation cannot fail");

        // Dropping the pool wrapper must not destroy the Vulkan pool while
        // the buffer still holds its own clone of the shared state.
        drop(pool);
        assert!(!context.events().iter().any(|event| matches!(
            event,
            Event::Destroyed {
                kind: HandleKind::CommandPool,
                ..
            }
        )));

        drop(buffer);
        context.assert_no_leaks();
    }

    #[test]
    fn reset_all_is_one_bulk_operation() {
        let context = FakeContext::new();
        let pool = CommandPool::new(&context, 0, None).expect("pool creation cannot fail");
        let _buffers: Vec<_> = (0..3)
            .map(|_| pool.allocate(None).expect("allocation cannot fail"))
            .collect();

        // SAFETY: Nothing was submitted, so no buffer is pending.
        unsafe { pool.reset_all() }.expect("bulk reset cannot fail");
        assert_eq!(context.bulk_reset_count(), 1);
    }
}
