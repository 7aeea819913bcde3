use super::{
    abort::{FatalError, fatal},
    backend::{ActiveUnwinder, Unwinder},
    envelope::Envelope,
};

/// Raise an exception.
///
/// The payload is moved into a freshly allocated envelope, which the platform unwinder propagates
/// up the stack until a handler established by [`intercept`](crate::intercept) or
/// [`catch`](crate::catch) receives it. Destructors of the frames in between run as usual.
///
/// If no handler exists anywhere above, the process terminates.
///
/// # Panics
///
/// Never returns. Instead of panicking, this function terminates the process if the calling thread
/// has not called [`init_bookkeeping`](crate::init_bookkeeping), or if the unwinder fails to start
/// propagation.
///
/// # Example
///
/// ```rust
/// use thorium::*;
///
/// init_bookkeeping();
/// let len = catch::<&'static str, usize>(|| raise("Oops!"), |message| message.len());
/// assert_eq!(len, 5);
/// ```
#[inline]
pub fn raise<T: 'static>(payload: T) -> ! {
    raise_in::<ActiveUnwinder, T>(payload)
}

/// Raise an exception through a specific unwinder.
///
/// This is [`raise`] with the runtime made explicit, e.g. to substitute a fake runtime in tests.
#[inline(never)]
pub fn raise_in<U: Unwinder, T: 'static>(payload: T) -> ! {
    if U::bookkeeping_fast().is_null() {
        fatal(FatalError::Uninitialized);
    }

    let header = Envelope::allocate(payload);
    // SAFETY: Just allocated, not propagating yet.
    unsafe {
        Envelope::<T>::install_cleanup(header);
    }

    log::trace!("raising exception {header:p}");
    // SAFETY: `header` is a unique pointer to a fully initialized envelope.
    let reason = unsafe { U::raise(header) };

    // Propagation never started, so the stack is in no state to continue from. The envelope is
    // leaked: nothing may run its cleanup anymore.
    fatal(FatalError::RaiseFailed(reason))
}
