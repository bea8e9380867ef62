//! Frame-in-flight resource recycling over [`ash`].
//!
//! The core loop: a [`pool::FramePool`] hands out reusable
//! [`frame::FrameResource`] slots (command buffer + fence + semaphore),
//! gated on fence completion, so new work can be recorded while older
//! submissions are still executing on the GPU.
//!
//! # Object hierarchy
//!
//! ```text
//! Instance
//! └── Device (implements DeviceContext)
//!     └── FramePool
//!         ├── CommandPool ── per-frame command buffers
//!         └── FrameResource × N ── fence / semaphore / submitted flag
//! ```
//!
//! Each wrapper holds its owner via `Arc` ([`handle::OwnedHandle`]) so
//! owners cannot be destroyed while handles into them are alive.
//!
//! # Naming conventions
//!
//! | prefix  | meaning                                   |
//! |---------|-------------------------------------------|
//! | `raw_*` | accepts or returns a raw `ash::vk` handle |
//! | `ash_*` | returns the `ash` wrapper object          |

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod base;
pub mod command;
pub mod context;
pub mod device;
pub mod frame;
pub mod handle;
pub mod instance;
pub mod log;
pub mod pool;

#[cfg(test)]
pub(crate) mod fake;

pub use ash;
