use super::config::PRIVATE_WORDS;
use core::ffi::c_int;
use core::fmt;

/// Cleanup routine stored in a header, as invoked by `_Unwind_DeleteException`.
pub type CleanupFn = unsafe extern "C" fn(c_int, *mut UnwindHeader);

/// The unwinder's exception header, `_Unwind_Exception` in the Itanium EH ABI.
///
/// The unwinder only ever sees a pointer to this structure. It reads `class` to tell runtimes
/// apart, owns `private`, and calls `cleanup` when a runtime finishes handling the exception.
#[repr(C)]
#[derive(Debug)]
pub struct UnwindHeader {
    pub(crate) class: u64,
    pub(crate) cleanup: Option<CleanupFn>,
    private: [usize; PRIVATE_WORDS],
}

impl UnwindHeader {
    /// Create a header for the given exception class.
    ///
    /// Everything except the class is zeroed, including the cleanup routine.
    #[must_use]
    #[inline]
    pub const fn new(class: u64) -> Self {
        Self {
            class,
            cleanup: None,
            private: [0; PRIVATE_WORDS],
        }
    }

    /// Create a header with the cleanup routine already set.
    #[must_use]
    #[inline]
    pub const fn with_cleanup(class: u64, cleanup: CleanupFn) -> Self {
        let mut header = Self::new(class);
        header.cleanup = Some(cleanup);
        header
    }

    /// Read the exception class of a possibly foreign header.
    ///
    /// # Safety
    ///
    /// `header` must point at a live header. Only the class field is read, so no reference to the
    /// rest of the (possibly foreign) object is created.
    #[must_use]
    #[inline]
    pub const unsafe fn class_of(header: *const Self) -> u64 {
        // SAFETY: Required transitively. `class` is the first field of a `#[repr(C)]` struct.
        unsafe { header.cast::<u64>().read() }
    }

    /// Destroy an exception by calling its cleanup routine, like `_Unwind_DeleteException`.
    ///
    /// # Safety
    ///
    /// `header` must point at a live header that is no longer being propagated. It must not be
    /// accessed afterwards.
    #[inline]
    pub unsafe fn delete(header: *mut Self) {
        // SAFETY: The header is live by the safety requirement.
        let field = unsafe { &raw const (*header).cleanup };
        // SAFETY: Ditto.
        if let Some(cleanup) = unsafe { field.read() } {
            // SAFETY: The owner of the header installed this routine for exactly this purpose.
            unsafe {
                cleanup(ReasonCode::ForeignExceptionCaught.into_raw(), header);
            }
        }
    }
}

/// `_Unwind_Reason_Code`, as returned by the unwinder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReasonCode {
    NoReason,
    ForeignExceptionCaught,
    FatalPhase2Error,
    FatalPhase1Error,
    NormalStop,
    EndOfStack,
    HandlerFound,
    InstallContext,
    ContinueUnwind,
    Other(c_int),
}

impl ReasonCode {
    #[must_use]
    #[inline]
    pub const fn from_raw(code: c_int) -> Self {
        match code {
            0 => Self::NoReason,
            1 => Self::ForeignExceptionCaught,
            2 => Self::FatalPhase2Error,
            3 => Self::FatalPhase1Error,
            4 => Self::NormalStop,
            5 => Self::EndOfStack,
            6 => Self::HandlerFound,
            7 => Self::InstallContext,
            8 => Self::ContinueUnwind,
            other => Self::Other(other),
        }
    }

    #[must_use]
    #[inline]
    pub const fn into_raw(self) -> c_int {
        match self {
            Self::NoReason => 0,
            Self::ForeignExceptionCaught => 1,
            Self::FatalPhase2Error => 2,
            Self::FatalPhase1Error => 3,
            Self::NormalStop => 4,
            Self::EndOfStack => 5,
            Self::HandlerFound => 6,
            Self::InstallContext => 7,
            Self::ContinueUnwind => 8,
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for ReasonCode {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            Self::NoReason => "no reason",
            Self::ForeignExceptionCaught => "foreign exception caught",
            Self::FatalPhase2Error => "fatal error during the cleanup phase",
            Self::FatalPhase1Error => "fatal error during the search phase",
            Self::NormalStop => "normal stop",
            Self::EndOfStack => "reached the end of the stack without finding a handler",
            Self::HandlerFound => "handler found",
            Self::InstallContext => "install context",
            Self::ContinueUnwind => "continue unwinding",
            Self::Other(code) => return write!(f, "unknown reason code {code}"),
        };
        write!(f, "{what} (reason = {})", self.into_raw())
    }
}
