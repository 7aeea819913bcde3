use super::header::ReasonCode;
use std::io::Write;
use thiserror::Error;

/// A condition after which no safe continuation point exists.
///
/// These are never returned to the caller: they indicate either a caller defect or a broken
/// unwinder, and end the process through [`fatal`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalError {
    #[error("exception bookkeeping was not initialized on this thread before raising")]
    Uninitialized,
    #[error("probed for an exception outside of a handler")]
    NotInHandler,
    #[error("probed for an exception while nothing is caught")]
    NothingCaught,
    #[error("caught pointer does not lead to a valid header; CAUGHT_HEADER_OFFSET is wrong for this target")]
    OffsetDrift,
    #[error("exception handlers were not exited in the reverse order of entry")]
    HandlerOrder,
    #[error("a foreign exception was discarded instead of being rethrown")]
    ForeignDiscarded,
    #[error("failed to raise exception: {0}")]
    RaiseFailed(ReasonCode),
    #[error("failed to rethrow exception: {0}")]
    RethrowFailed(ReasonCode),
    #[error("an exception was caught by a foreign catch mechanism")]
    Escaped,
}

/// Report a fatal condition and terminate the process.
#[cold]
#[inline(never)]
pub fn fatal(error: FatalError) -> ! {
    log::error!("{error}");
    let _ = writeln!(
        std::io::stderr(),
        "thorium: {error}. The process will now terminate.",
    );
    std::process::abort();
}
