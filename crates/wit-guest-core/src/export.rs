//! Resources defined by the guest and registered with the host.
//!
//! An exported resource lives in a heap registration whose address the host
//! stores as the resource's representation. Destruction authority is inverted:
//!
//! ```text
//!   ExportedResourceHandle::new(value)
//!        │  box registration, resource.new(rep) ─────────────► host table
//!        ▼
//!   Owned<R> ── drop ──► resource.drop(handle) ─────────────► host table
//!        │                                                         │
//!        │ into_handle(): handle moves to the caller,              │
//!        │ dropping Owned afterwards does nothing                  ▼
//!        │                               dtor(rep) ◄──── host, now or later
//! ```
//!
//! The guest never frees a registration itself; only [`ExportedResourceHandle::dtor`],
//! invoked by the host, does. The host may run it inside the drop request, so
//! [`Owned`] touches nothing after issuing that request.

use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use tracing::{debug, trace};

use crate::handle::HandleRepr;

/// A guest-defined resource type and its host imports.
///
/// Generated bindings implement this with the component's
/// `[resource-new]` and `[resource-drop]` imports.
pub trait GuestResource: Sized + 'static {
    /// Handle representation the host uses for this type.
    type Handle: HandleRepr;

    /// Register `rep` with the host and return its handle.
    fn resource_new(rep: *mut u8) -> Self::Handle;

    /// Ask the host to drop the registration named by `handle`.
    ///
    /// The host runs the destructor in response, possibly before returning.
    fn resource_drop(handle: Self::Handle);
}

/// A registration of an `R` with the host.
///
/// Lives at a stable heap address from construction until the host runs
/// [`dtor`](Self::dtor). It is only reachable by shared reference, so it can
/// never be moved or duplicated.
pub struct ExportedResourceHandle<R: GuestResource> {
    handle: Cell<R::Handle>,
    resource: R,
}

impl<R: GuestResource> ExportedResourceHandle<R> {
    /// Register `resource` with the host.
    ///
    /// # Panics
    ///
    /// Panics if the host answers with the invalid sentinel.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(resource: R) -> Owned<R> {
        let registration = Box::new(Self {
            handle: Cell::new(R::Handle::INVALID),
            resource,
        });
        let ptr = NonNull::from(Box::leak(registration));

        let handle = R::resource_new(ptr.as_ptr().cast());
        assert!(
            handle.is_valid(),
            "host returned an invalid handle for a new {} registration",
            std::any::type_name::<R>()
        );

        // SAFETY: the registration was just leaked and the host holds only its address.
        let registration = unsafe { ptr.as_ref() };
        registration.handle.set(handle);
        trace!(?handle, resource = std::any::type_name::<R>(), "resource registered");

        Owned {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Current handle, or the invalid sentinel once transferred.
    pub fn get_handle(&self) -> R::Handle {
        self.handle.get()
    }

    /// Transfer the handle out of the registration.
    ///
    /// Only the first call yields the real handle; later calls return the
    /// invalid sentinel. The caller takes over the duty to drop it.
    /// [`Owned::into_handle`] is the safe way to do this.
    ///
    /// # Safety
    ///
    /// The [`Owned`] for this registration must be dropped or consumed before
    /// the returned handle is dropped, since the host frees the registration
    /// at that point.
    pub unsafe fn into_handle(&self) -> R::Handle {
        self.take_handle()
    }

    fn take_handle(&self) -> R::Handle {
        self.handle.replace(R::Handle::INVALID)
    }

    /// The registered value.
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// The representation the host stores for this registration.
    pub fn rep(&self) -> *mut u8 {
        std::ptr::from_ref(self).cast_mut().cast()
    }

    /// Borrow the registration behind a representation.
    ///
    /// Used by exported methods that receive a borrowed handle.
    ///
    /// # Safety
    ///
    /// `rep` must come from [`rep`](Self::rep) of a live `R` registration, and
    /// the host must not run its destructor while the borrow is held.
    pub unsafe fn from_rep<'a>(rep: *mut u8) -> &'a Self {
        // SAFETY: guaranteed by the caller.
        unsafe { &*rep.cast::<Self>() }
    }

    /// Destructor entry point the host invokes for a dropped registration.
    ///
    /// Reclaims the registration and drops the `R` inside it.
    ///
    /// # Safety
    ///
    /// `rep` must come from a live `R` registration, and this must be the
    /// host's only destructor call for it.
    pub unsafe fn dtor(rep: *mut u8) {
        // SAFETY: guaranteed by the caller; the box was leaked in `new`.
        let registration = unsafe { Box::from_raw(rep.cast::<Self>()) };
        debug!(
            handle = ?registration.get_handle(),
            resource = std::any::type_name::<R>(),
            "resource destructor invoked"
        );
        drop(registration);
    }
}

impl<R: GuestResource> Deref for ExportedResourceHandle<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.resource
    }
}

impl<R: GuestResource + fmt::Debug> fmt::Debug for ExportedResourceHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedResourceHandle")
            .field("handle", &self.get_handle())
            .field("resource", &self.resource)
            .finish()
    }
}

/// Exclusive guest-side owner of a registration.
///
/// Dropping it asks the host to drop the registration, unless the handle was
/// transferred out first. It never frees the registration itself.
pub struct Owned<R: GuestResource> {
    ptr: NonNull<ExportedResourceHandle<R>>,
    _owns: PhantomData<ExportedResourceHandle<R>>,
}

impl<R: GuestResource> Owned<R> {
    /// Re-adopt a registration whose handle the host passes back.
    ///
    /// # Safety
    ///
    /// `rep` must name a live, detached `R` registration and `handle` must be
    /// the host's handle for it. No other `Owned` may exist for it.
    ///
    /// # Panics
    ///
    /// Panics if the registration still holds a handle or `handle` is invalid.
    pub unsafe fn reattach(handle: R::Handle, rep: *mut u8) -> Self {
        assert!(handle.is_valid(), "cannot reattach the invalid handle");
        let Some(ptr) = NonNull::new(rep.cast::<ExportedResourceHandle<R>>()) else {
            panic!("cannot reattach a null representation");
        };
        // SAFETY: guaranteed by the caller.
        let registration = unsafe { ptr.as_ref() };
        assert!(
            !registration.get_handle().is_valid(),
            "registration is still attached to {:?}",
            registration.get_handle()
        );
        registration.handle.set(handle);

        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    /// The registration this owner controls.
    pub fn registration(&self) -> &ExportedResourceHandle<R> {
        // SAFETY: the host cannot run the destructor before this owner
        // requests the drop or gives the handle away.
        unsafe { self.ptr.as_ref() }
    }

    /// Current handle, or the invalid sentinel once transferred.
    pub fn get_handle(&self) -> R::Handle {
        self.registration().get_handle()
    }

    /// The representation the host stores for this registration.
    pub fn rep(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }

    /// Give the handle to the caller, typically to return it across the ABI.
    ///
    /// The registration stays alive until the host drops the handle.
    pub fn into_handle(self) -> R::Handle {
        self.registration().take_handle()
    }
}

impl<R: GuestResource> Drop for Owned<R> {
    fn drop(&mut self) {
        let handle = self.registration().take_handle();
        if handle.is_valid() {
            debug!(?handle, resource = std::any::type_name::<R>(), "requesting resource drop");
            // The destructor may run inside this call: no access to the
            // registration past this point.
            R::resource_drop(handle);
        } else {
            trace!(resource = std::any::type_name::<R>(), "owner dropped after handle transfer");
        }
    }
}

impl<R: GuestResource> Deref for Owned<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.registration().resource
    }
}

impl<R: GuestResource> DerefMut for Owned<R> {
    fn deref_mut(&mut self) -> &mut R {
        // SAFETY: `Owned` is the registration's only owner; only the `R`
        // field is exposed, so the registration itself can not be moved.
        unsafe { &mut self.ptr.as_mut().resource }
    }
}

impl<R: GuestResource + fmt::Debug> fmt::Debug for Owned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(self.registration()).finish()
    }
}
