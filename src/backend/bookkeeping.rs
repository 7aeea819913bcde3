use super::super::config::CAUGHT_HEADER_OFFSET;
use super::super::header::UnwindHeader;
use core::cell::{Cell, OnceCell};

/// Per-thread exception state.
///
/// The first field is the thrown-object pointer of the exception handled by the innermost active
/// handler, or null. Outer handlers' state is saved by the handlers themselves, forming a chain
/// that unwinds in LIFO order. Alongside it, the bookkeeping counts active handlers and remembers
/// the exception class seen at handler entry.
#[repr(C)]
#[derive(Debug)]
pub struct Bookkeeping {
    caught_exceptions: Cell<*mut u8>,
    handler_count: Cell<usize>,
    caught_class: Cell<u64>,
}

/// Caught state of an outer handler, saved while a nested handler is active.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Saved {
    caught: *mut u8,
    class: u64,
}

impl Bookkeeping {
    const fn new() -> Self {
        Self {
            caught_exceptions: Cell::new(core::ptr::null_mut()),
            handler_count: Cell::new(0),
            caught_class: Cell::new(0),
        }
    }

    /// The thrown-object pointer of the currently caught exception, or null.
    #[must_use]
    #[inline]
    pub const fn caught_exceptions(&self) -> *mut u8 {
        self.caught_exceptions.get()
    }

    /// Number of handlers currently active on this thread.
    #[must_use]
    #[inline]
    pub const fn handler_count(&self) -> usize {
        self.handler_count.get()
    }

    /// The exception class of the currently caught exception, as read at handler entry.
    #[must_use]
    #[inline]
    pub const fn caught_class(&self) -> u64 {
        self.caught_class.get()
    }

    /// Record entry into a handler for `header` of exception class `class`, returning the state of
    /// the enclosing handler.
    pub(crate) fn begin_catch(&self, header: *mut UnwindHeader, class: u64) -> Saved {
        let thrown = header.cast::<u8>().wrapping_byte_add(CAUGHT_HEADER_OFFSET);
        self.handler_count.set(self.handler_count.get().saturating_add(1));
        Saved {
            caught: self.caught_exceptions.replace(thrown),
            class: self.caught_class.replace(class),
        }
    }

    /// Record exit from the innermost handler, restoring the enclosing handler's state.
    ///
    /// Returns `false` if `header` is not the innermost caught exception; nothing is changed then.
    #[must_use]
    pub(crate) fn end_catch(&self, header: *mut UnwindHeader, saved: Saved) -> bool {
        let thrown = header.cast::<u8>().wrapping_byte_add(CAUGHT_HEADER_OFFSET);
        if self.caught_exceptions.get() != thrown {
            return false;
        }
        self.caught_exceptions.set(saved.caught);
        self.caught_class.set(saved.class);
        self.handler_count.set(self.handler_count.get().saturating_sub(1));
        true
    }
}

#[cfg(thread_local = "std")]
std::thread_local! {
    static BOOKKEEPING: OnceCell<Bookkeeping> = const { OnceCell::new() };
}

#[cfg(thread_local = "attribute")]
#[thread_local]
static BOOKKEEPING: OnceCell<Bookkeeping> = OnceCell::new();

/// Run `f` on this thread's bookkeeping cell.
#[inline]
fn with_cell<R>(f: impl FnOnce(&OnceCell<Bookkeeping>) -> R) -> R {
    #[cfg(thread_local = "std")]
    return BOOKKEEPING.with(f);

    #[cfg(thread_local = "attribute")]
    return f(&BOOKKEEPING);
}

/// Lazily initialize this thread's bookkeeping. Idempotent.
#[inline]
pub fn init() {
    with_cell(|cell| {
        let _ = cell.get_or_init(Bookkeeping::new);
    });
}

/// Get this thread's bookkeeping without initializing it.
///
/// Returns null if [`init`] has not been called on this thread. The pointer stays valid until the
/// thread starts destroying its thread-locals.
#[must_use]
#[inline]
pub fn get_fast() -> *const Bookkeeping {
    with_cell(|cell| cell.get().map_or(core::ptr::null(), core::ptr::from_ref))
}
