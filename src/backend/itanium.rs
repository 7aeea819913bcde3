use super::super::{
    abort::{FatalError, fatal},
    header::{ReasonCode, UnwindHeader},
};
use super::{Bookkeeping, Unwinder, bookkeeping};
use core::ffi::c_int;
use core::mem::ManuallyDrop;

/// The Itanium EH ABI unwinder, as linked in by `std`.
#[expect(clippy::exhaustive_structs)]
pub struct ActiveUnwinder;

// SAFETY: `_Unwind_RaiseException` walks the same unwind tables rustc emits for `catch_unwind`, so
// the innermost interceptor receives the raised pointer as-is. The unwinder only writes to the
// private words of the header. Exceptions of other runtimes reach the interceptor the same way,
// and raising them again resumes their propagation unchanged.
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
        // SAFETY: The header is valid and unique by the safety requirement.
        #[expect(clippy::used_underscore_items)]
        let code = unsafe { _Unwind_RaiseException(header) };
        ReasonCode::from_raw(code)
    }

    #[inline]
    unsafe fn rethrow(header: *mut UnwindHeader) -> ! {
        log::trace!("rethrowing exception {header:p}");
        // A fresh two-phase search from the current frame, like `throw;` does in C++.
        // SAFETY: The header was produced by `intercept` and is still alive.
        #[expect(clippy::used_underscore_items)]
        let code = unsafe { _Unwind_RaiseException(header) };
        fatal(FatalError::RethrowFailed(ReasonCode::from_raw(code)))
    }

    #[inline(always)]
    fn intercept<Func: FnOnce() -> R, R>(func: Func) -> Result<R, *mut UnwindHeader> {
        union Data<Func, R> {
            func: ManuallyDrop<Func>,
            result: ManuallyDrop<R>,
            ex: *mut UnwindHeader,
        }

        // This function should be unsafe, but isn't due to the definition of `catch_unwind`.
        #[inline]
        fn do_call<Func: FnOnce() -> R, R>(data: *mut u8) {
            // SAFETY: `data` is provided by the `catch_unwind` intrinsic, which copies the pointer
            // to the `data` variable.
            let data: &mut Data<Func, R> = unsafe { &mut *data.cast() };
            // SAFETY: This is the first access to `data`, so `func` is still initialized.
            let func = unsafe { ManuallyDrop::take(&mut data.func) };
            data.result = ManuallyDrop::new(func());
        }

        // This function should be unsafe, but isn't due to the definition of `catch_unwind`.
        #[inline]
        fn do_catch<Func: FnOnce() -> R, R>(data: *mut u8, ex: *mut u8) {
            // SAFETY: As above.
            let data: &mut Data<Func, R> = unsafe { &mut *data.cast() };
            // On Itanium targets, rustc passes the `_Unwind_Exception` pointer here, whichever
            // runtime raised it.
            data.ex = ex.cast();
        }

        let mut data = Data {
            func: ManuallyDrop::new(func),
        };

        // SAFETY: `do_catch` only copies a pointer and cannot unwind.
        if unsafe {
            core::intrinsics::catch_unwind(
                do_call::<Func, R>,
                (&raw mut data).cast(),
                do_catch::<Func, R>,
            )
        } == 0i32
        {
            // SAFETY: No unwinding happened, so `do_call` has finished the assignment to `result`.
            return Ok(ManuallyDrop::into_inner(unsafe { data.result }));
        }

        // SAFETY: Unwinding happened, so `do_catch` has filled in `ex`.
        Err(unsafe { data.ex })
    }
}

unsafe extern "C-unwind" {
    fn _Unwind_RaiseException(header: *mut UnwindHeader) -> c_int;
}
