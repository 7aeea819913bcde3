use super::{EXCEPTION_CLASS, header::UnwindHeader};
use core::any::TypeId;
use core::ffi::c_int;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::mem::offset_of;

/// Identity of a payload's declared type.
///
/// Tags of two types compare equal if and only if the types are equal. Unlike
/// [`TypeId::of`], non-`'static` types are supported.
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    /// Get the tag of `T`.
    #[must_use]
    #[inline]
    pub fn of<T: ?Sized>() -> Self {
        Self {
            id: typeid::of::<T>(),
            name: core::any::type_name::<T>(),
        }
    }

    /// The name of the type, for diagnostics only.
    #[must_use]
    #[inline]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeTag").field(&self.name).finish()
    }
}

/// The type-erased part of an envelope, shared by all payload types.
#[repr(C)] // header must be the first field
pub struct Exception {
    header: UnwindHeader,
    tag: TypeTag,
}

impl Exception {
    #[inline]
    pub(crate) const fn tag(&self) -> TypeTag {
        self.tag
    }
}

/// An exception object: the unwinder header, the payload's type tag and the payload itself.
///
/// Envelopes are only ever handled through header pointers. Because the header is the first field,
/// header and envelope addresses coincide.
#[repr(C)] // base, and thus header, must be the first field
pub struct Envelope<T> {
    base: Exception,
    payload: T,
}

const _: () = assert!(offset_of!(Exception, header) == 0, "header must lead the exception");

impl<T> Envelope<T> {
    /// Allocate an envelope on the heap and return a unique pointer to its header.
    ///
    /// The header is zeroed except for the class; no cleanup routine is installed yet.
    pub fn allocate(payload: T) -> *mut UnwindHeader {
        let envelope = Box::new(Self {
            base: Exception {
                header: UnwindHeader::new(EXCEPTION_CLASS),
                tag: TypeTag::of::<T>(),
            },
            payload,
        });
        Box::into_raw(envelope).cast()
    }

    /// Install [`cleanup`] as the envelope's deallocation routine.
    ///
    /// # Safety
    ///
    /// `header` must have been produced by [`Envelope::<T>::allocate`] and not be propagating yet.
    pub unsafe fn install_cleanup(header: *mut UnwindHeader) {
        // SAFETY: We have unique access to the header by the safety requirement.
        unsafe {
            (*header).cleanup = Some(cleanup::<T>);
        }
    }

    /// Get the payload of an envelope viewed through its type-erased part.
    ///
    /// # Safety
    ///
    /// `ex` must point at a live `Envelope<T>`, with provenance over the whole allocation. The
    /// returned reference must not outlive the envelope.
    pub const unsafe fn payload<'a>(ex: *const Exception) -> &'a T {
        let envelope: *const Self = ex.cast();
        // SAFETY: Required transitively.
        unsafe { &(*envelope).payload }
    }
}

/// Deallocate an `Envelope<T>`.
///
/// Invoked through the header exactly once, when a handler finishes without rethrowing.
unsafe extern "C" fn cleanup<T>(_reason: c_int, header: *mut UnwindHeader) {
    log::trace!("deleting exception {header:p}");
    // SAFETY: This routine is only installed on headers allocated by `Envelope::<T>::allocate`,
    // and the unwinder invokes it once, after the envelope stops propagating.
    drop(unsafe { Box::from_raw(header.cast::<Envelope<T>>()) });
}
