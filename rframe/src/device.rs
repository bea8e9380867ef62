use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::context::DeviceContext;
use crate::handle::{HandleOwner, NonOwningHandle};
use crate::instance::{FetchPhysicalDeviceError, Instance};

/// A headless logical device with a single submission queue, implementing
/// [`DeviceContext`] for the frame-recycling machinery.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    physical_device: vk::PhysicalDevice,
    queue: vk::Queue,
    queue_family: u32,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: All objects derived from this device should be dropped
        //before this device is dropped.
        unsafe { self.handle.destroy_device(None) };
    }
}

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error(
        "Vulkan 1.3 is required (synchronization2 submission paths) but the \
         instance only supports {major}.{minor}"
    )]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("Host memory exhaustion while creating a device")]
    MemoryExhaustion,

    #[error("Unknown Vulkan error while creating a device: {0}")]
    UnknownVulkan(vk::Result),

    #[error("No suitable physical device found")]
    NoSuitableDevice,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),
}

impl From<FetchPhysicalDeviceError> for CreateDeviceError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => Self::MemoryExhaustion,
            FetchPhysicalDeviceError::UnknownVulkan(e) => Self::UnknownVulkan(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Debug utils extension is not enabled on this device")]
    DebugUtilsNotEnabled,

    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

impl Device {
    /// Select a physical device and create a logical device with one
    /// queue that can run the pool's submissions.
    ///
    /// Requires a Vulkan 1.3 instance: submission goes through
    /// `vkQueueSubmit2`, which is core there.
    pub fn create(instance: &Arc<Instance>) -> Result<Self, CreateDeviceError> {
        let ver = instance.api_version();
        let (major, minor) = (vk::api_version_major(ver), vk::api_version_minor(ver));
        if major == 1 && minor < 3 {
            return Err(CreateDeviceError::UnsupportedApiVersion { major, minor });
        }

        // Select best physical device. Score by device type; skip anything
        // without a queue family that can execute our submissions.
        let device_type_priority = |dt: vk::PhysicalDeviceType| -> u32 {
            match dt {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            }
        };

        struct Candidate {
            handle: vk::PhysicalDevice,
            props: vk::PhysicalDeviceProperties,
            queue_family: u32,
            score: u32,
        }

        let physical_devices = instance.fetch_physical_devices()?;
        let best = physical_devices
            .iter()
            .filter_map(|&dev| {
                //SAFETY: dev was derived from instance
                let props = unsafe { instance.get_raw_physical_device_properties(dev) };
                //SAFETY: dev was derived from instance
                let queue_families =
                    unsafe { instance.get_raw_physical_device_queue_family_properties(dev) };

                let queue_family = queue_families.iter().enumerate().find_map(|(idx, qf)| {
                    qf.queue_flags
                        .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                        .then_some(idx as u32)
                })?;

                Some(Candidate {
                    handle: dev,
                    score: device_type_priority(props.device_type),
                    props,
                    queue_family,
                })
            })
            .max_by_key(|candidate| candidate.score)
            .ok_or(CreateDeviceError::NoSuitableDevice)?;

        tracing::info!(
            "Selected physical device: {:?} (type: {:?}, queue family: {})",
            best.props.device_name_as_c_str().unwrap_or(c"unknown"),
            best.props.device_type,
            best.queue_family,
        );

        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(best.queue_family)
            .queue_priorities(&queue_priorities);

        let mut sync2_features =
            vk::PhysicalDeviceSynchronization2Features::default().synchronization2(true);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .push_next(&mut sync2_features);

        //SAFETY: physical_device was derived from instance, device_create_info
        //is valid
        let device = unsafe { instance.create_ash_device(best.handle, &device_create_info) }
            .map_err(CreateDeviceError::DeviceCreationFailed)?;

        //SAFETY: device was just created with this queue family at index 0
        let queue = unsafe { device.get_device_queue(best.queue_family, 0) };

        Ok(Self {
            parent: Arc::clone(instance),
            debug_utils_device: instance.create_debug_utils_device_loader(&device),
            handle: device,
            physical_device: best.handle,
            queue,
            queue_family: best.queue_family,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn get_physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn ash_handle(&self) -> &ash::Device {
        &self.handle
    }

    pub fn raw_handle(&self) -> vk::Device {
        self.handle.handle()
    }

    /// The single submission queue, borrowed. The device owns the queue
    /// for its whole lifetime; callers never release it.
    pub fn queue(&self) -> NonOwningHandle<vk::Queue> {
        NonOwningHandle::new(self.queue)
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// This may block the calling thread and should generally be used for
    /// coarse-grained transitions (shutdown, suspend) rather than hot
    /// per-frame paths.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        // SAFETY: `self.handle` is a valid logical device for the lifetime of
        // `self`, and this call has no additional pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

//Debug naming functionality
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid Vulkan handle created from this device (or a
    /// child object associated with this device) and must remain valid for
    /// the duration of the call.
    pub unsafe fn set_object_name<H>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let debug_utils = self
            .debug_utils_device
            .as_ref()
            .ok_or(NameObjectError::DebugUtilsNotEnabled)?;

        let Some(name) = name else {
            return Ok(());
        };

        let object_name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);

        // SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&object_name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Convenience helper to set a name from UTF-8 text.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_str<H>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let name = match name {
            Some(name) => Some(CString::new(name).map_err(NameObjectError::InvalidName)?),
            None => None,
        };

        // SAFETY: This method shares the same safety contract as
        // set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }

    /// Best-effort naming used by the creation paths: a missing extension
    /// is silent, anything else is logged and swallowed.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    unsafe fn name_new_object<H>(&self, object: H, name: Option<&str>)
    where
        H: vk::Handle + Copy,
    {
        // SAFETY: Caller guarantees object provenance and validity.
        match unsafe { self.set_object_name_str(object, name) } {
            Ok(()) | Err(NameObjectError::DebugUtilsNotEnabled) => {}
            Err(e) => tracing::warn!("Failed to name object {:#x}: {e}", object.as_raw()),
        }
    }
}

impl HandleOwner<vk::Fence> for Device {
    unsafe fn destroy_handle(&self, handle: vk::Fence) {
        // SAFETY: Caller guarantees handle provenance and that no GPU work
        // still references the fence.
        unsafe { self.handle.destroy_fence(handle, None) };
    }
}

impl HandleOwner<vk::Semaphore> for Device {
    unsafe fn destroy_handle(&self, handle: vk::Semaphore) {
        // SAFETY: Caller guarantees handle provenance and that no GPU work
        // is waiting on or about to signal the semaphore.
        unsafe { self.handle.destroy_semaphore(handle, None) };
    }
}

impl HandleOwner<vk::CommandPool> for Device {
    unsafe fn destroy_handle(&self, handle: vk::CommandPool) {
        // SAFETY: Caller guarantees handle provenance and drop ordering.
        // vkDestroyCommandPool implicitly frees any remaining buffers.
        unsafe { self.handle.destroy_command_pool(handle, None) };
    }
}

impl DeviceContext for Device {
    unsafe fn create_raw_command_pool(
        &self,
        queue_family: u32,
        name: Option<&str>,
    ) -> Result<vk::CommandPool, vk::Result> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        // SAFETY: Caller guarantees queue_family validity for this device.
        let pool = unsafe { self.handle.create_command_pool(&create_info, None) }?;
        // SAFETY: pool is a valid command pool created from this device.
        unsafe { self.name_new_object(pool, name) };
        Ok(pool)
    }

    unsafe fn allocate_raw_command_buffer(
        &self,
        pool: vk::CommandPool,
        name: Option<&str>,
    ) -> Result<vk::CommandBuffer, vk::Result> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        // SAFETY: allocate_info references a valid pool created from this
        // device; caller owns the pool's thread.
        let buffer = unsafe { self.handle.allocate_command_buffers(&allocate_info) }.map(
            |mut buffers| {
                debug_assert_eq!(buffers.len(), 1);
                buffers.remove(0)
            },
        )?;
        // SAFETY: buffer is a valid command buffer created from this device.
        unsafe { self.name_new_object(buffer, name) };
        Ok(buffer)
    }

    unsafe fn free_raw_command_buffer(&self, pool: vk::CommandPool, buffer: vk::CommandBuffer) {
        // SAFETY: Caller guarantees buffer was allocated from pool, is not
        // pending, and the pool's thread is the current one.
        unsafe { self.handle.free_command_buffers(pool, &[buffer]) };
    }

    unsafe fn reset_raw_command_pool(&self, pool: vk::CommandPool) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees no buffer from pool is pending.
        unsafe {
            self.handle
                .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())
        }
    }

    unsafe fn reset_raw_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is not pending.
        unsafe {
            self.handle
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
    }

    unsafe fn begin_raw_command_buffer(
        &self,
        buffer: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        // SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe { self.handle.begin_command_buffer(buffer, &begin_info) }
    }

    unsafe fn end_raw_command_buffer(&self, buffer: vk::CommandBuffer) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the buffer is in the recording state.
        unsafe { self.handle.end_command_buffer(buffer) }
    }

    unsafe fn create_raw_fence(
        &self,
        signaled: bool,
        name: Option<&str>,
    ) -> Result<vk::Fence, vk::Result> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);

        // SAFETY: create_info is fully initialised with no borrowed pointers.
        let fence = unsafe { self.handle.create_fence(&create_info, None) }?;
        // SAFETY: fence is a valid fence created from this device.
        unsafe { self.name_new_object(fence, name) };
        Ok(fence)
    }

    unsafe fn wait_for_raw_fence(
        &self,
        fence: vk::Fence,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees fence provenance.
        unsafe { self.handle.wait_for_fences(&[fence], true, timeout_ns) }
    }

    unsafe fn raw_fence_status(&self, fence: vk::Fence) -> Result<bool, vk::Result> {
        // SAFETY: Caller guarantees fence provenance.
        unsafe { self.handle.get_fence_status(fence) }
    }

    unsafe fn reset_raw_fence(&self, fence: vk::Fence) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees the fence is not pending.
        unsafe { self.handle.reset_fences(&[fence]) }
    }

    unsafe fn create_raw_semaphore(&self, name: Option<&str>) -> Result<vk::Semaphore, vk::Result> {
        let create_info = vk::SemaphoreCreateInfo::default();

        // SAFETY: create_info is fully initialised with no borrowed pointers.
        let semaphore = unsafe { self.handle.create_semaphore(&create_info, None) }?;
        // SAFETY: semaphore is a valid semaphore created from this device.
        unsafe { self.name_new_object(semaphore, name) };
        Ok(semaphore)
    }

    unsafe fn submit_raw(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo2<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        // SAFETY: Caller guarantees handle validity, executable command
        // buffers, an unsignaled fence, and external queue synchronization.
        unsafe { self.handle.queue_submit2(queue, submits, fence) }
    }
}
