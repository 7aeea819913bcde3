//! Per-target ABI constants.
//!
//! `PRIVATE_WORDS` is dictated by the platform unwinder. `CAUGHT_HEADER_OFFSET` mirrors the C++ ABI
//! convention for the caught pointer; the bookkeeping applies it on handler entry and removes it on
//! lookup. Both are checked against the header layout at compile time, and lookups verify that the
//! recovered header carries the exception class recorded at handler entry.

use super::header::UnwindHeader;
use core::mem::size_of;

/// Number of pointer-sized words the unwinder reserves for its private use in every header.
#[cfg(target_arch = "x86")]
pub const PRIVATE_WORDS: usize = 5;
#[cfg(all(target_arch = "x86_64", windows))]
pub const PRIVATE_WORDS: usize = 6;
#[cfg(not(any(target_arch = "x86", all(target_arch = "x86_64", windows))))]
pub const PRIVATE_WORDS: usize = 2;

/// Distance in bytes between the start of a header and the thrown-object pointer recorded in the
/// per-thread bookkeeping.
///
/// The bookkeeping follows the C++ ABI convention of pointing right past the unwinder header, at
/// where a native exception object would start. Subtracting this offset from the caught pointer
/// yields the header, and thus the envelope, address.
#[cfg(any(target_arch = "x86", all(target_pointer_width = "64", not(windows))))]
pub const CAUGHT_HEADER_OFFSET: usize = 32;
#[cfg(all(target_arch = "x86_64", windows))]
pub const CAUGHT_HEADER_OFFSET: usize = 64;
#[cfg(all(target_pointer_width = "64", windows, not(target_arch = "x86_64")))]
pub const CAUGHT_HEADER_OFFSET: usize = 32;
#[cfg(all(target_pointer_width = "32", not(target_arch = "x86")))]
pub const CAUGHT_HEADER_OFFSET: usize = 24;

const _: () = assert!(
    CAUGHT_HEADER_OFFSET == size_of::<UnwindHeader>(),
    "CAUGHT_HEADER_OFFSET does not match the unwinder header layout on this target",
);
