use super::header::{ReasonCode, UnwindHeader};

pub mod bookkeeping;

pub use bookkeeping::Bookkeeping;
pub(crate) use bookkeeping::Saved;

/// An unwinding runtime.
///
/// Unwinding is a mechanism of forcefully "returning" through multiple call frames, called
/// *raising*, up until a special call frame, called *interceptor*. This roughly corresponds to the
/// `resume_unwind`/`catch_unwind` pair in Rust and the `throw`/`catch` pair in C++.
///
/// Runtimes treat exception objects as opaque, except for the [`UnwindHeader`] they start with.
/// Several exception-producing subsystems may share a runtime; they tell their objects apart by the
/// header's exception class.
///
/// The runtime also owns the per-thread [`Bookkeeping`], which the catching side uses to find the
/// exception handled by the innermost active handler.
///
/// This trait is the seam between the exception protocol and the platform, so that tests can
/// substitute a runtime of their own. [`ActiveUnwinder`] is the runtime chosen at build time.
///
/// # Safety
///
/// Implementations must ensure that when a header pointer is raised, unwinding proceeds to the
/// closest (most nested) `intercept` frame and that `intercept` returns this exact pointer
/// (including provenance). The implementation may modify the header's private words during
/// unwinding, but modifying any other data from the same allocation is forbidden.
///
/// During unwinding, all destructors of locals must be run, as if `return` was called.
///
/// Exceptions of other subsystems that reach `intercept` must be reported as header pointers too,
/// and must survive being passed back to `rethrow` unchanged.
///
/// `bookkeeping_fast` must return the same pointer for the whole lifetime of a thread once
/// `init_bookkeeping` has been called on it, and null before that.
pub unsafe trait Unwinder {
    /// Lazily initialize the calling thread's bookkeeping. Idempotent.
    fn init_bookkeeping();

    /// Get the calling thread's bookkeeping without initializing it.
    ///
    /// Returns null if [`Unwinder::init_bookkeeping`] has not run on this thread.
    fn bookkeeping_fast() -> *const Bookkeeping;

    /// Raise an exception.
    ///
    /// Does not return on success. If it returns, the reason code describes why propagation could
    /// not even start, e.g. because no handler was found or the unwind metadata is corrupt.
    ///
    /// # Safety
    ///
    /// `header` must be a unique pointer to an exception object whose header is initialized.
    unsafe fn raise(header: *mut UnwindHeader) -> ReasonCode;

    /// Re-propagate an exception caught by [`Unwinder::intercept`], unchanged.
    ///
    /// # Safety
    ///
    /// `header` must have been returned by `intercept`, and the exception must not have been
    /// destroyed or rethrown since.
    unsafe fn rethrow(header: *mut UnwindHeader) -> !;

    /// Catch an exception.
    ///
    /// This function returns `Ok` if the function returns normally, or `Err` if it unwinds (and the
    /// exception is not caught by a nested interceptor). If `Err` is returned, the pointer must
    /// match what was raised, including provenance.
    ///
    /// # Errors
    ///
    /// Returns the header of the exception that unwound out of `func`, foreign ones included.
    fn intercept<Func: FnOnce() -> R, R>(func: Func) -> Result<R, *mut UnwindHeader>;
}

#[cfg(backend = "itanium")]
#[path = "itanium.rs"]
mod imp;

#[cfg(backend = "panic")]
#[path = "panic.rs"]
mod imp;

pub use imp::ActiveUnwinder;
