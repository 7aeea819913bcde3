use super::{
    EXCEPTION_CLASS,
    abort::{FatalError, fatal},
    backend::{ActiveUnwinder, Saved, Unwinder},
    config::CAUGHT_HEADER_OFFSET,
    envelope::{Envelope, Exception, TypeTag},
    header::UnwindHeader,
};
use core::fmt;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::NonNull;

// Module invariant: while a `Handler` is alive, the exception it holds is alive, and the thread's
// bookkeeping records it as caught unless a more nested handler is active.

/// An active handler scope.
///
/// This type is returned by [`intercept`] when an exception is caught. It's akin to being inside
/// a `catch` block in C++: the exception can be inspected with [`Handler::probe`], and the scope
/// ends either by dropping the handler, which destroys the exception, or by
/// [`Handler::rethrow`], which passes it unchanged to the next handler up the stack.
///
/// Handlers must end in the reverse order of their creation. Violating this terminates the
/// process.
///
/// Dropping a handler that holds a foreign exception, i.e. one that was not raised by this crate,
/// terminates the process too: foreign exceptions must be rethrown.
pub struct Handler<U: Unwinder = ActiveUnwinder> {
    header: *mut UnwindHeader,
    saved: Saved,
    _unwinder: PhantomData<U>,
}

impl<U: Unwinder> Handler<U> {
    fn begin(header: *mut UnwindHeader) -> Self {
        U::init_bookkeeping();
        let bookkeeping = U::bookkeeping_fast();
        if bookkeeping.is_null() {
            fatal(FatalError::Uninitialized);
        }
        log::trace!("entering handler for exception {header:p}");
        // SAFETY: `U::intercept` returns live headers.
        let class = unsafe { UnwindHeader::class_of(header) };
        // SAFETY: Initialized bookkeeping stays valid for the lifetime of the thread.
        let saved = unsafe { (*bookkeeping).begin_catch(header, class) };
        Self {
            header,
            saved,
            _unwinder: PhantomData,
        }
    }

    fn end_catch(&self) {
        let bookkeeping = U::bookkeeping_fast();
        // SAFETY: `begin` has initialized the bookkeeping, which stays valid for the lifetime of
        // the thread.
        let ended = !bookkeeping.is_null()
            && unsafe { (*bookkeeping).end_catch(self.header, self.saved) };
        if !ended {
            fatal(FatalError::HandlerOrder);
        }
    }

    /// Inspect the exception held by this handler.
    ///
    /// Returns [`Probe::Claimed`] if it was raised by this crate, [`Probe::Foreign`] otherwise.
    /// Foreign exceptions must be passed on with [`Handler::rethrow`].
    ///
    /// # Panics
    ///
    /// Terminates the process instead of panicking if a more nested handler is still active.
    #[must_use]
    #[inline]
    pub fn probe(&self) -> Probe<'_> {
        let bookkeeping = U::bookkeeping_fast();
        let own = self.header.cast::<u8>().wrapping_byte_add(CAUGHT_HEADER_OFFSET);
        // SAFETY: `begin` has initialized the bookkeeping.
        if bookkeeping.is_null() || unsafe { (*bookkeeping).caught_exceptions() } != own {
            fatal(FatalError::HandlerOrder);
        }
        // SAFETY: We're the innermost active handler, and the result borrows `self`, so it cannot
        // outlive the exception.
        unsafe { probe_and_claim::<U>() }
    }

    /// Get the payload if the exception was raised by this crate with type `T`.
    ///
    /// Returns `None` for foreign exceptions and for payloads of other types; either way, the
    /// exception should usually be rethrown.
    #[must_use]
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self.probe() {
            Probe::Claimed(caught) => caught.downcast_ref::<T>(),
            Probe::Foreign => None,
        }
    }

    /// Pass the exception unchanged to the next handler up the stack.
    ///
    /// The handler scope ends without destroying the exception; whichever handler eventually
    /// finishes with it does.
    #[inline]
    pub fn rethrow(self) -> ! {
        let this = ManuallyDrop::new(self);
        this.end_catch();
        // SAFETY: The header was produced by `U::intercept` and, per the module invariant, is still
        // alive. `ManuallyDrop` guarantees we won't destroy it.
        unsafe { U::rethrow(this.header) }
    }
}

impl<U: Unwinder> Drop for Handler<U> {
    /// End the handler scope, destroying the exception.
    #[inline]
    fn drop(&mut self) {
        self.end_catch();
        // SAFETY: The exception is alive by the module invariant.
        if unsafe { UnwindHeader::class_of(self.header) } != EXCEPTION_CLASS {
            fatal(FatalError::ForeignDiscarded);
        }
        // SAFETY: This is our exception, it has not been rethrown, and the handler is done with it.
        // `drop` runs once, so the cleanup routine does too.
        unsafe { UnwindHeader::delete(self.header) }
    }
}

impl<U: Unwinder> fmt::Debug for Handler<U> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

/// Result of inspecting a caught exception.
#[derive(Debug)]
#[expect(clippy::exhaustive_enums)]
pub enum Probe<'a> {
    /// The exception was raised by this crate.
    Claimed(Caught<'a>),
    /// The exception belongs to another runtime sharing the unwinder. Its payload must not be
    /// read, and it must be rethrown.
    Foreign,
}

impl<'a> Probe<'a> {
    /// Whether the exception was raised by this crate.
    #[must_use]
    #[inline]
    pub const fn is_found(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }

    /// The claimed exception, if any.
    #[must_use]
    #[inline]
    pub const fn claimed(self) -> Option<Caught<'a>> {
        match self {
            Self::Claimed(caught) => Some(caught),
            Self::Foreign => None,
        }
    }
}

/// A borrowed view of an exception raised by this crate.
///
/// The handler keeps owning the exception; the payload is destroyed when the handler scope ends.
#[derive(Clone, Copy)]
pub struct Caught<'a> {
    // Points at the whole envelope, so that the payload can be reached from here.
    ex: NonNull<Exception>,
    _marker: PhantomData<&'a Exception>,
}

impl<'a> Caught<'a> {
    /// The tag of the payload type.
    #[must_use]
    #[inline]
    pub const fn tag(&self) -> TypeTag {
        // SAFETY: The envelope is alive for `'a`.
        unsafe { self.ex.as_ref() }.tag()
    }

    /// Whether the payload has type `T`, up to lifetimes.
    #[must_use]
    #[inline]
    pub fn is<T: ?Sized>(&self) -> bool {
        self.tag() == TypeTag::of::<T>()
    }

    /// Get the payload if it has type `T`.
    #[must_use]
    #[inline]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&'a T> {
        if !self.is::<T>() {
            return None;
        }
        // SAFETY: The tag matches, so this is an `Envelope<T>`. `ex` carries the provenance of the
        // whole allocation, and the envelope is alive for `'a`.
        Some(unsafe { Envelope::<T>::payload(self.ex.as_ptr()) })
    }
}

impl fmt::Debug for Caught<'_> {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Caught")
            .field("ex", &self.ex)
            .field("tag", &self.tag())
            .finish()
    }
}

/// Inspect the exception handled by the innermost active handler on this thread.
///
/// The exception is located through the unwinder's bookkeeping: the caught pointer recorded there
/// is turned back into an envelope address by subtracting
/// [`CAUGHT_HEADER_OFFSET`](crate::config::CAUGHT_HEADER_OFFSET). Its exception class then decides
/// whether it is ours.
///
/// Prefer [`Handler::probe`], which is safe.
///
/// # Safety
///
/// A handler established through `U` must be active on this thread, and the returned value must
/// not outlive it. Calling this outside of any handler terminates the process.
#[must_use]
#[inline]
pub unsafe fn probe_and_claim<'a, U: Unwinder>() -> Probe<'a> {
    let bookkeeping = U::bookkeeping_fast();
    if bookkeeping.is_null() {
        fatal(FatalError::NotInHandler);
    }
    // SAFETY: Initialized bookkeeping stays valid for the lifetime of the thread.
    let bookkeeping = unsafe { &*bookkeeping };
    if bookkeeping.handler_count() == 0 {
        fatal(FatalError::NotInHandler);
    }

    let caught = bookkeeping.caught_exceptions();
    if caught.is_null() {
        fatal(FatalError::NothingCaught);
    }

    let header: *mut UnwindHeader = caught.wrapping_byte_sub(CAUGHT_HEADER_OFFSET).cast();
    if !header.is_aligned() {
        fatal(FatalError::OffsetDrift);
    }

    // The class must land where it was found at handler entry.
    // SAFETY: The caught exception is alive while its handler is active. Only the class is read,
    // since the rest of a foreign object has an unknown layout.
    let class = unsafe { UnwindHeader::class_of(header) };
    if class != bookkeeping.caught_class() {
        fatal(FatalError::OffsetDrift);
    }
    if class != EXCEPTION_CLASS {
        return Probe::Foreign;
    }

    let ex = NonNull::new(header.cast::<Exception>())
        .unwrap_or_else(|| fatal(FatalError::OffsetDrift));
    Probe::Claimed(Caught {
        ex,
        _marker: PhantomData,
    })
}

/// Begin exception handling.
///
/// If `func` returns a value, this function wraps it in [`Ok`].
///
/// If `func` unwinds, whether due to [`raise`](crate::raise), a Rust panic, or an exception of
/// another runtime, the returned [`Err`] holds a [`Handler`] for it. Use it to inspect the
/// exception, then either drop it or rethrow it.
///
/// # Example
///
/// ```rust
/// use thorium::*;
///
/// init_bookkeeping();
/// match intercept(|| raise(String::from("You caught me!"))) {
///     Ok(never) => never,
///     Err(handler) => match handler.downcast_ref::<String>() {
///         Some(message) => assert_eq!(message, "You caught me!"),
///         None => handler.rethrow(),
///     },
/// }
/// ```
#[expect(clippy::missing_errors_doc)]
#[inline]
pub fn intercept<R>(func: impl FnOnce() -> R) -> Result<R, Handler> {
    intercept_in::<ActiveUnwinder, R>(func)
}

/// Begin exception handling through a specific unwinder.
///
/// This is [`intercept`] with the runtime made explicit.
#[expect(clippy::missing_errors_doc)]
#[inline]
pub fn intercept_in<U: Unwinder, R>(func: impl FnOnce() -> R) -> Result<R, Handler<U>> {
    U::intercept(func).map_err(Handler::begin)
}

/// Run `func`, handling exceptions with payload type `T`.
///
/// If `func` returns, its value is returned. If it raises a `T`, `handle` is called with the
/// payload, which is destroyed afterwards. Everything else, including Rust panics, is rethrown.
///
/// # Example
///
/// ```rust
/// use thorium::*;
///
/// struct NotFound(u32);
///
/// init_bookkeeping();
/// let id = catch::<NotFound, u32>(|| raise(NotFound(42)), |err| err.0);
/// assert_eq!(id, 42);
/// ```
#[inline]
pub fn catch<T: 'static, R>(func: impl FnOnce() -> R, handle: impl FnOnce(&T) -> R) -> R {
    let handler = match intercept(func) {
        Ok(value) => return value,
        Err(handler) => handler,
    };
    if let Some(payload) = handler.downcast_ref::<T>() {
        return handle(payload);
    }
    handler.rethrow()
}
