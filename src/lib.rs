//! Typed exceptions over the platform unwinder.
//!
//! Thorium raises exceptions directly through the platform's stack-unwinding runtime, bypassing
//! Rust panics. Each exception is an envelope: the unwinder's own header, a tag identifying the
//! payload type, and the payload itself. A handler finds out whether a propagating exception
//! belongs to Thorium, recovers the payload with its original type, and either consumes it or
//! passes it on unchanged.
//!
//!
//! # Usage
//!
//! Initialize the per-thread bookkeeping with [`init_bookkeeping`] once on every thread that
//! raises. Raise exceptions with [`raise`], handle them with [`catch`] or the lower-level
//! [`intercept`]:
//!
//! ```rust
//! use thorium::*;
//!
//! struct TestException {
//!     what: &'static str,
//! }
//!
//! init_bookkeeping();
//!
//! let result = intercept(|| raise(TestException { what: "You caught me!" }));
//! let handler = result.unwrap_err();
//! match handler.probe() {
//!     Probe::Claimed(caught) if caught.is::<TestException>() => {
//!         let ex = caught.downcast_ref::<TestException>().unwrap();
//!         assert_eq!(ex.what, "You caught me!");
//!     }
//!     // Not ours, or not a type we know: let an outer handler deal with it.
//!     _ => handler.rethrow(),
//! }
//! // The exception is destroyed when `handler` goes out of scope.
//! ```
//!
//! Exceptions of other runtimes sharing the unwinder, including Rust panics, reach handlers too.
//! They are reported as [`Probe::Foreign`] and must be rethrown.
//!
//!
//! # Platform support
//!
//! On nightly, Unix-like targets and MinGW raise through the Itanium EH ABI unwinder directly. On
//! stable, and on other platforms, the same protocol is emulated on top of Rust panics. The
//! backend can be forced with the `THORIUM_BACKEND` environment variable at build time.
//!
//!
//! # Termination
//!
//! Some conditions leave no safe point to continue from, and end the process with a diagnostic
//! instead of returning an error. See [`FatalError`] for the list.

#![cfg_attr(thread_local = "attribute", feature(thread_local))]
#![cfg_attr(backend = "itanium", feature(core_intrinsics))]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(
    clippy::cargo,
    clippy::pedantic,
    clippy::missing_const_for_fn,
    clippy::alloc_instead_of_core,
    clippy::allow_attributes,
    clippy::as_underscore,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::decimal_literal_representation,
    clippy::default_numeric_fallback,
    clippy::deref_by_slicing,
    clippy::else_if_without_else,
    clippy::empty_drop,
    clippy::empty_enum_variants_with_brackets,
    clippy::empty_structs_with_brackets,
    clippy::exhaustive_enums,
    clippy::exhaustive_structs,
    clippy::fn_to_numeric_cast_any,
    clippy::format_push_string,
    clippy::infinite_loop,
    clippy::mem_forget, // use ManuallyDrop instead
    clippy::missing_assert_message,
    clippy::missing_inline_in_public_items,
    clippy::mixed_read_write_in_expression,
    clippy::multiple_unsafe_ops_per_block,
    clippy::needless_raw_strings,
    clippy::pub_without_shorthand,
    clippy::redundant_type_annotations,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::semicolon_inside_block,
    clippy::separated_literal_suffix,
    clippy::shadow_unrelated,
    clippy::std_instead_of_alloc,
    clippy::std_instead_of_core,
    clippy::tests_outside_test_module,
    clippy::try_err,
    clippy::undocumented_unsafe_blocks,
    clippy::unnecessary_safety_comment,
    clippy::unnecessary_safety_doc,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::unused_result_ok,
    clippy::wildcard_enum_match_arm,
)]

extern crate alloc;

mod abort;
mod backend;
mod catch;
pub mod config;
mod envelope;
mod header;
mod raise;

pub use abort::FatalError;
pub use backend::{ActiveUnwinder, Bookkeeping, Unwinder};
pub use catch::{Caught, Handler, Probe, catch, intercept, intercept_in, probe_and_claim};
pub use envelope::TypeTag;
pub use header::{CleanupFn, ReasonCode, UnwindHeader};
pub use raise::{raise, raise_in};

/// Exception class of Thorium exceptions.
///
/// Stored in the header of every raised exception. It differs from the classes of Rust panics
/// (`MOZ\0RUST`) and C++ exceptions (`GNUCC++\0`, `CLNGC++\0`), so handlers can tell them apart.
pub const EXCEPTION_CLASS: u64 = u64::from_be_bytes(*b"RUSTTHOR");

/// Initialize the calling thread's exception bookkeeping.
///
/// Must be called on every thread before its first [`raise`]. Calling it again is a no-op.
#[inline]
pub fn init_bookkeeping() {
    ActiveUnwinder::init_bookkeeping();
}
