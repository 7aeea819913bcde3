use super::super::{
    abort::{FatalError, fatal},
    header::{ReasonCode, UnwindHeader},
};
use super::{Bookkeeping, Unwinder, bookkeeping};
use core::any::Any;
use core::ffi::c_int;
use core::mem::ManuallyDrop;
use core::panic::AssertUnwindSafe;
use std::panic::{catch_unwind, resume_unwind};

/// Exception class of Rust panics, as used by `std` on Itanium targets.
const RUST_PANIC_CLASS: u64 = u64::from_be_bytes(*b"MOZ\0RUST");

/// An emulation of the Itanium unwinder on top of Rust panics.
///
/// Raised headers travel as panic payloads. Genuine Rust panics are wrapped into headers of the
/// Rust exception class when intercepted, so that they look like any other foreign exception.
#[expect(clippy::exhaustive_structs)]
pub struct ActiveUnwinder;

// SAFETY: `resume_unwind` runs destructors and stops at the innermost `catch_unwind`, which is where
// `intercept` recovers the pointer from the payload without touching the object. Foreign panics
// are boxed into a header and unboxed again by `rethrow`, so their payload reaches the next
// interceptor unchanged.
unsafe impl Unwinder for ActiveUnwinder {
    #[inline]
    fn init_bookkeeping() {
        bookkeeping::init();
    }

    #[inline]
    fn bookkeeping_fast() -> *const Bookkeeping {
        bookkeeping::get_fast()
    }

    #[inline]
    unsafe fn raise(header: *mut UnwindHeader) -> ReasonCode {
        resume_unwind(Box::new(Raised(header)));
    }

    #[inline]
    unsafe fn rethrow(header: *mut UnwindHeader) -> ! {
        log::trace!("rethrowing exception {header:p}");
        // SAFETY: The header was produced by `intercept` and is still alive.
        if unsafe { UnwindHeader::class_of(header) } == RUST_PANIC_CLASS {
            // SAFETY: `intercept` only produces headers of this class through `ForeignPanic::wrap`.
            let payload = unsafe { ForeignPanic::unwrap(header) };
            resume_unwind(payload);
        }
        resume_unwind(Box::new(Raised(header)));
    }

    #[inline]
    fn intercept<Func: FnOnce() -> R, R>(func: Func) -> Result<R, *mut UnwindHeader> {
        catch_unwind(AssertUnwindSafe(func)).map_err(|payload| {
            match payload.downcast::<Raised>() {
                Ok(raised) => ManuallyDrop::new(*raised).0,
                Err(foreign) => ForeignPanic::wrap(foreign),
            }
        })
    }
}

/// Panic payload carrying a raised header.
struct Raised(*mut UnwindHeader);

// SAFETY: The payload never leaves the raising thread unless it escapes every interceptor, in which
// case it is only dropped, and dropping aborts.
unsafe impl Send for Raised {}

impl Drop for Raised {
    fn drop(&mut self) {
        fatal(FatalError::Escaped);
    }
}

/// A Rust panic caught by `intercept`, dressed up as a foreign exception.
#[repr(C)] // header must be the first field
struct ForeignPanic {
    header: UnwindHeader,
    payload: Box<dyn Any + Send>,
}

impl ForeignPanic {
    fn wrap(payload: Box<dyn Any + Send>) -> *mut UnwindHeader {
        let foreign = Box::new(Self {
            header: UnwindHeader::with_cleanup(RUST_PANIC_CLASS, cleanup),
            payload,
        });
        Box::into_raw(foreign).cast()
    }

    /// # Safety
    ///
    /// `header` must have been produced by [`ForeignPanic::wrap`] and not be accessed afterwards.
    unsafe fn unwrap(header: *mut UnwindHeader) -> Box<dyn Any + Send> {
        // SAFETY: Required transitively.
        unsafe { Box::from_raw(header.cast::<Self>()) }.payload
    }
}

/// Drop a wrapped Rust panic.
unsafe extern "C" fn cleanup(_reason: c_int, header: *mut UnwindHeader) {
    // SAFETY: This routine is only installed by `ForeignPanic::wrap`.
    drop(unsafe { ForeignPanic::unwrap(header) });
}
