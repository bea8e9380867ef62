//! Generic ownership carriers for raw Vulkan handles.
//!
//! [`OwnedHandle`] pairs a raw handle with the `Arc` of the object that
//! knows how to destroy it, so release cannot outlive its owner and fires
//! at most once. [`NonOwningHandle`] carries a borrowed handle with no
//! destructor side effects.

use std::sync::Arc;

use ash::vk::Handle;

/// An object that can destroy raw handles of type `T`.
///
/// Implemented by [`crate::device::Device`] for fences, semaphores and
/// command pools, and by [`crate::command::CommandPool`] for the command
/// buffers allocated from it.
pub trait HandleOwner<T: Handle + Copy> {
    /// Destroy `handle`, returning its backing resources to this owner.
    ///
    /// # Safety
    /// `handle` must have been created from this owner, must not have been
    /// destroyed already, and no in-flight GPU work may still reference it.
    unsafe fn destroy_handle(&self, handle: T);
}

/// Exclusive ownership of one raw handle, destroyed through a bound owner.
///
/// The owner is held as an `Arc`, so it structurally outlives every handle
/// it issued; drop order, not caller discipline, upholds the contract.
/// Moving an `OwnedHandle` transfers the value and the owner binding; the
/// explicit [`take`](Self::take) mirrors that for slots that cannot be
/// moved out of.
pub struct OwnedHandle<T: Handle + Copy, O: HandleOwner<T>> {
    value: T,
    owner: Option<Arc<O>>,
}

impl<T: Handle + Copy, O: HandleOwner<T>> OwnedHandle<T, O> {
    /// Bind `value` to `owner` for later destruction.
    ///
    /// # Safety
    /// `value` must have been created from `owner` and must not be owned by
    /// any other `OwnedHandle`. Destroying it through `owner` once no GPU
    /// work references it must be valid.
    pub unsafe fn new(value: T, owner: Arc<O>) -> Self {
        Self {
            value,
            owner: Some(owner),
        }
    }

    /// An empty handle. Destruction is a no-op.
    pub fn null() -> Self {
        Self {
            value: T::from_raw(0),
            owner: None,
        }
    }

    pub fn raw(&self) -> T {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.as_raw() == 0
    }

    pub fn owner(&self) -> Option<&Arc<O>> {
        self.owner.as_ref()
    }

    /// Destroy the current value (if any) and leave this handle empty.
    ///
    /// The destroy fires at most once per acquired value: a second `reset`,
    /// or the drop after a `reset`, is a no-op.
    pub fn reset(&mut self) {
        if let Some(owner) = self.owner.take()
            && self.value.as_raw() != 0
        {
            tracing::trace!("Destroying {:?} {:#x}", T::TYPE, self.value.as_raw());
            // SAFETY: value was bound to owner by new/rebind and has not been
            // destroyed or released since (owner.take() clears the binding).
            unsafe { owner.destroy_handle(self.value) };
        }
        self.value = T::from_raw(0);
    }

    /// Destroy the current value (if any), then bind `value` to `owner`.
    ///
    /// # Safety
    /// Same contract as [`new`](Self::new) for the incoming pair.
    pub unsafe fn rebind(&mut self, value: T, owner: Arc<O>) {
        self.reset();
        self.value = value;
        self.owner = Some(owner);
    }

    /// Return the value and clear ownership without destroying it.
    ///
    /// Responsibility for eventual destruction passes to the caller.
    pub fn release(&mut self) -> T {
        self.owner = None;
        std::mem::replace(&mut self.value, T::from_raw(0))
    }

    /// Move the value and owner binding out, leaving this handle empty.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::null())
    }
}

impl<T: Handle + Copy, O: HandleOwner<T>> Default for OwnedHandle<T, O> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Handle + Copy, O: HandleOwner<T>> Drop for OwnedHandle<T, O> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: Handle + Copy, O: HandleOwner<T>> std::fmt::Debug for OwnedHandle<T, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("type", &T::TYPE)
            .field("value", &self.value.as_raw())
            .field("owned", &self.owner.is_some())
            .finish()
    }
}

/// A relocatable carrier for a borrowed handle.
///
/// No release responsibility: dropping it does nothing. Used where a handle
/// is borrowed from a longer-lived owner, like the device queue passed to
/// submission or the recording surface a frame exposes.
pub struct NonOwningHandle<T: Handle + Copy> {
    value: T,
}

impl<T: Handle + Copy> NonOwningHandle<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }

    pub fn null() -> Self {
        Self {
            value: T::from_raw(0),
        }
    }

    pub fn raw(&self) -> T {
        self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.as_raw() == 0
    }

    /// Move the value out, leaving this handle at the empty sentinel.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::null())
    }
}

impl<T: Handle + Copy> Default for NonOwningHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: Handle + Copy> From<T> for NonOwningHandle<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: Handle + Copy> std::fmt::Debug for NonOwningHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonOwningHandle")
            .field("type", &T::TYPE)
            .field("value", &self.value.as_raw())
            .finish()
    }
}
