use std::cell::Cell;
use std::ffi::c_int;
use std::process::{Command, Output};
use std::sync::atomic::{AtomicUsize, Ordering};
use thorium::{
    ActiveUnwinder, Bookkeeping, EXCEPTION_CLASS, Probe, ReasonCode, TypeTag, UnwindHeader,
    Unwinder, catch, init_bookkeeping, intercept, probe_and_claim, raise, raise_in,
};

thread_local! {
    static DROPS: Cell<usize> = const { Cell::new(0) };
}

fn drops() -> usize {
    DROPS.with(Cell::get)
}

#[derive(Debug, PartialEq)]
struct TestException {
    what: &'static str,
}

impl TestException {
    fn new(what: &'static str) -> Self {
        Self { what }
    }
}

impl Drop for TestException {
    fn drop(&mut self) {
        DROPS.with(|drops| drops.set(drops.get() + 1));
        eprintln!("cleanup ran for {:?}", self.what);
    }
}

#[test]
fn scenario_a_round_trip() {
    init_bookkeeping();
    let before = drops();
    {
        let handler = intercept(|| raise(TestException::new("You caught me!"))).unwrap_err();
        let Probe::Claimed(caught) = handler.probe() else {
            panic!("exception was not recognized");
        };
        assert_eq!(caught.tag(), TypeTag::of::<TestException>());
        let ex = caught.downcast_ref::<TestException>().unwrap();
        assert_eq!(ex.what, "You caught me!");
        assert_eq!(drops(), before);
    }
    assert_eq!(drops(), before + 1);
}

#[test]
fn round_trip_through_frames() {
    #[inline(never)]
    fn deep(n: u32, what: &'static str) -> u32 {
        if n == 0 {
            raise(TestException::new(what));
        }
        deep(n - 1, what) + 1
    }

    init_bookkeeping();
    let before = drops();
    let what = catch::<TestException, &'static str>(
        || {
            deep(10, "deep");
            ""
        },
        |ex| ex.what,
    );
    assert_eq!(what, "deep");
    assert_eq!(drops(), before + 1);
}

#[test]
fn scenario_b_foreign_panic_is_rethrown_unchanged() {
    init_bookkeeping();
    let result = std::panic::catch_unwind(|| {
        let handler =
            intercept::<()>(|| std::panic::resume_unwind(Box::new(String::from("foreign"))))
                .unwrap_err();
        assert!(matches!(handler.probe(), Probe::Foreign));
        handler.rethrow();
    });
    let payload = result.unwrap_err();
    assert_eq!(payload.downcast_ref::<String>().unwrap(), "foreign");
}

static FOREIGN_CLEANUPS: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn count_foreign_cleanup(_reason: c_int, _header: *mut UnwindHeader) {
    FOREIGN_CLEANUPS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn scenario_b_foreign_class_reaches_outer_handler() {
    const FOREIGN_CLASS: u64 = u64::from_be_bytes(*b"GNUCC++\0");

    init_bookkeeping();
    let mut foreign = Box::new(UnwindHeader::with_cleanup(FOREIGN_CLASS, count_foreign_cleanup));
    let ex: *mut UnwindHeader = &raw mut *foreign;

    let outer = ActiveUnwinder::intercept(|| {
        let handler = intercept(|| unsafe {
            ActiveUnwinder::raise(ex);
        })
        .unwrap_err();
        assert!(!handler.probe().is_found());
        assert!(handler.downcast_ref::<TestException>().is_none());
        handler.rethrow();
    });

    let caught = outer.unwrap_err();
    assert_eq!(caught, ex);
    assert_eq!(unsafe { UnwindHeader::class_of(caught) }, FOREIGN_CLASS);
    assert_eq!(FOREIGN_CLEANUPS.load(Ordering::SeqCst), 0);
    drop(foreign);
}

#[test]
fn exactly_once_cleanup_across_rethrows() {
    init_bookkeeping();
    let before = drops();
    let what = catch::<TestException, &'static str>(
        || {
            let inner = intercept(|| raise(TestException::new("twice rethrown"))).unwrap_err();
            let middle = intercept(|| inner.rethrow()).unwrap_err();
            assert_eq!(drops(), before);
            middle.rethrow()
        },
        |ex| ex.what,
    );
    assert_eq!(what, "twice rethrown");
    assert_eq!(drops(), before + 1);
}

#[test]
fn type_discrimination() {
    struct Other;

    init_bookkeeping();
    assert_eq!(TypeTag::of::<TestException>(), TypeTag::of::<TestException>());
    assert_ne!(TypeTag::of::<TestException>(), TypeTag::of::<Other>());

    let handler = intercept(|| raise(Other)).unwrap_err();
    let caught = handler.probe().claimed().unwrap();
    assert!(caught.is::<Other>());
    assert!(!caught.is::<TestException>());
    assert!(caught.downcast_ref::<TestException>().is_none());
    assert_ne!(caught.tag(), TypeTag::of::<TestException>());
}

#[test]
fn exception_class_is_distinct() {
    assert_ne!(EXCEPTION_CLASS, u64::from_be_bytes(*b"MOZ\0RUST"));
    assert_ne!(EXCEPTION_CLASS, u64::from_be_bytes(*b"GNUCC++\0"));
    assert_ne!(EXCEPTION_CLASS, u64::from_be_bytes(*b"CLNGC++\0"));
}

#[test]
fn threads_have_separate_bookkeeping() {
    init_bookkeeping();
    let outer = intercept(|| raise(1_u32)).unwrap_err();
    std::thread::spawn(|| {
        assert!(ActiveUnwinder::bookkeeping_fast().is_null());
        init_bookkeeping();
        let value = catch::<u32, u32>(|| raise(2_u32), |value| *value);
        assert_eq!(value, 2);
    })
    .join()
    .unwrap();
    assert_eq!(outer.downcast_ref::<u32>(), Some(&1));
}

/// An unwinder whose raise primitive always fails, as it would on corrupt unwind tables.
struct FailingUnwinder;

unsafe impl Unwinder for FailingUnwinder {
    fn init_bookkeeping() {
        ActiveUnwinder::init_bookkeeping();
    }

    fn bookkeeping_fast() -> *const Bookkeeping {
        ActiveUnwinder::bookkeeping_fast()
    }

    unsafe fn raise(_header: *mut UnwindHeader) -> ReasonCode {
        ReasonCode::FatalPhase1Error
    }

    unsafe fn rethrow(header: *mut UnwindHeader) -> ! {
        unsafe { ActiveUnwinder::rethrow(header) }
    }

    fn intercept<Func: FnOnce() -> R, R>(func: Func) -> Result<R, *mut UnwindHeader> {
        ActiveUnwinder::intercept(func)
    }
}

const CHILD_ENV: &str = "THORIUM_TEST_CHILD";

fn is_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Re-run a single test of this binary in a child process, where it is expected to terminate.
fn run_child(test_name: &str) -> Output {
    Command::new(std::env::current_exe().unwrap())
        .args(["--exact", test_name, "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .unwrap()
}

#[test]
fn scenario_c_failing_raise_terminates() {
    if is_child() {
        init_bookkeeping();
        raise_in::<FailingUnwinder, _>(TestException::new("never delivered"));
    }

    let output = run_child("scenario_c_failing_raise_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("failed to raise exception: fatal error during the search phase"),
        "unexpected stderr: {stderr}",
    );
    assert!(!stderr.contains("cleanup ran"), "cleanup ran: {stderr}");
}

#[test]
fn raise_without_bookkeeping_terminates() {
    if is_child() {
        std::thread::spawn(|| {
            raise(TestException::new("uninitialized"));
        })
        .join()
        .unwrap();
        return;
    }

    let output = run_child("raise_without_bookkeeping_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("exception bookkeeping was not initialized"),
        "unexpected stderr: {stderr}",
    );
    assert!(!stderr.contains("cleanup ran"), "cleanup ran: {stderr}");
}

#[test]
fn discarding_foreign_exception_terminates() {
    if is_child() {
        init_bookkeeping();
        let handler = intercept::<()>(|| std::panic::resume_unwind(Box::new("foreign")))
            .unwrap_err();
        drop(handler);
        return;
    }

    let output = run_child("discarding_foreign_exception_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("a foreign exception was discarded instead of being rethrown"),
        "unexpected stderr: {stderr}",
    );
}

#[test]
fn claim_on_fresh_thread_terminates() {
    if is_child() {
        std::thread::spawn(|| {
            // SAFETY: None, this is the misuse under test.
            let _ = unsafe { probe_and_claim::<ActiveUnwinder>() };
        })
        .join()
        .unwrap();
        return;
    }

    let output = run_child("claim_on_fresh_thread_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("thorium: probed for an exception outside of a handler"),
        "unexpected stderr: {stderr}",
    );
}

#[test]
fn claim_outside_handler_terminates() {
    if is_child() {
        init_bookkeeping();
        // A finished handler leaves nothing behind to probe.
        drop(intercept(|| raise(TestException::new("already handled"))).unwrap_err());
        // SAFETY: None, this is the misuse under test.
        let _ = unsafe { probe_and_claim::<ActiveUnwinder>() };
        return;
    }

    let output = run_child("claim_outside_handler_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("thorium: probed for an exception outside of a handler"),
        "unexpected stderr: {stderr}",
    );
}

#[test]
fn out_of_order_handlers_terminate() {
    if is_child() {
        init_bookkeeping();
        let outer = intercept(|| raise(TestException::new("outer"))).unwrap_err();
        let inner = intercept(|| raise(TestException::new("inner"))).unwrap_err();
        drop(outer);
        drop(inner);
        return;
    }

    let output = run_child("out_of_order_handlers_terminate");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    assert!(
        stderr.contains("thorium: exception handlers were not exited in the reverse order of entry"),
        "unexpected stderr: {stderr}",
    );
    assert!(!stderr.contains("cleanup ran"), "cleanup ran: {stderr}");
}

#[test]
fn unhandled_raise_terminates() {
    if is_child() {
        init_bookkeeping();
        raise(TestException::new("nobody listens"));
    }

    let output = run_child("unhandled_raise_terminates");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!output.status.success(), "child exited normally: {stderr}");
    // Only Rust's own catch frames sit above the test, and they cannot handle our exceptions.
    assert!(
        stderr.contains("thorium: an exception was caught by a foreign catch mechanism")
            || stderr.contains("Rust cannot catch foreign exceptions"),
        "unexpected stderr: {stderr}",
    );
    assert!(!stderr.contains("cleanup ran"), "cleanup ran: {stderr}");
}
