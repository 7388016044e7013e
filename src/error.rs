//! Exposes the crate's error type

use std::sync::PoisonError;

use thiserror::Error;

/// Error type returned by the capture/replay core.
///
/// Driver errors (any non-`VK_SUCCESS` return from the real driver) are passed through as
/// [`Error::VkError`] and never cause state-block mutations; invariant violations are expected
/// to be handled with `panic!`/`assert!` at the call site rather than through this enum, since
/// the specification treats them as fatal bugs in the core itself, not recoverable conditions.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to load the Vulkan loader.
    #[error("failed to load Vulkan: {0}")]
    LoadFailed(#[from] ash::LoadingError),
    /// Generic Vulkan error forwarded from the driver.
    #[error("Vulkan error: `{0}`")]
    VkError(#[from] ash::vk::Result),
    /// A handle passed to an entry point does not resolve in the owning instance/device's
    /// state block (component C, invariant 2).
    #[error("unknown handle of type `{0}` passed to {1}")]
    UnknownHandle(&'static str, &'static str),
    /// A create call tried to insert a wrapper for a handle that is already tracked
    /// (component C, `create`).
    #[error("handle of type `{0}` already tracked")]
    DuplicateHandle(&'static str),
    /// A device memory object was mapped while already mapped, violating invariant 4.
    #[error("device memory already mapped")]
    AlreadyMapped,
    /// The wire payload for a single record exceeded the fixed serialization ceiling
    /// (component B / §7 kind 3, fatal).
    #[error("payload of {0} bytes exceeds the serialization limit of {1} bytes")]
    PayloadTooLarge(usize, usize),
    /// The decoder ran out of bytes before a value was fully read (§7 kind 4).
    #[error("unexpected end of stream while decoding {0}")]
    UnexpectedEof(&'static str),
    /// The decoder encountered an extension-struct tag it does not know how to interpret
    /// (§7 kind 4).
    #[error("unknown struct tag {0} while decoding pNext chain")]
    UnknownTag(u32),
    /// No physical device on the replay machine matched a recorded `{vendorID, deviceID,
    /// driverVersion}` tuple, even with the vendor-only fallback (§7 kind 5).
    #[error("no physical device on this machine matches recorded device index {0}")]
    NoMatchingPhysicalDevice(u32),
    /// A user layer library failed to load or did not export the expected entry point.
    #[error("failed to load layer `{0}`: {1}")]
    LayerLoadFailed(String, String),
    /// Uncategorized error, used sparingly for conditions that don't deserve their own variant.
    #[error("{0}")]
    Uncategorized(&'static str),
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Error::Uncategorized("poisoned lock")
    }
}

/// Result alias used throughout the crate, pairing a `thiserror` enum with `anyhow::Result`
/// at call boundaries.
pub type Result<T> = anyhow::Result<T>;
