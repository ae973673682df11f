//! Handles to resources owned by the host.
//!
//! [`ImportedResourceHandle`] is the bare, move-only handle value. It never
//! releases anything on its own: a handle that is still valid when dropped is
//! a leaked host registration, reported through `tracing` but otherwise
//! harmless to the guest.
//!
//! [`HostOwned`] is the owning wrapper generated bindings build on top of it;
//! it calls the host's drop import exactly once.

use std::fmt;
use std::marker::PhantomData;

use tracing::{debug, warn};

use crate::handle::{Handle, HandleRepr};

/// A move-only handle to a host-owned resource.
#[derive(Debug)]
pub struct ImportedResourceHandle<H: HandleRepr = Handle> {
    handle: H,
}

impl<H: HandleRepr> ImportedResourceHandle<H> {
    /// Wrap a handle value received from the host.
    pub const fn new(handle: H) -> Self {
        Self { handle }
    }

    /// An empty wrapper holding the invalid sentinel.
    pub const fn invalid() -> Self {
        Self { handle: H::INVALID }
    }

    /// Current handle value.
    pub fn get_handle(&self) -> H {
        self.handle
    }

    /// Returns `true` if a live handle is held.
    pub fn is_valid(&self) -> bool {
        self.handle.is_valid()
    }

    /// Store a handle lifted from the ABI into an empty wrapper.
    ///
    /// # Panics
    ///
    /// Panics if the wrapper already holds a live handle.
    pub fn set_handle(&mut self, handle: H) {
        assert!(
            !self.handle.is_valid(),
            "overwriting live imported handle {:?}",
            self.handle
        );
        self.handle = handle;
    }

    /// Transfer the handle out, leaving the invalid sentinel.
    ///
    /// Only the first call yields the real value.
    pub fn into_handle(&mut self) -> H {
        std::mem::replace(&mut self.handle, H::INVALID)
    }

    /// Move the handle into a new wrapper, leaving this one invalid.
    pub fn take(&mut self) -> Self {
        Self::new(self.into_handle())
    }

    /// Move-assign `source` into this wrapper.
    ///
    /// # Panics
    ///
    /// Panics if this wrapper still holds a live handle: overwriting it would
    /// leak the host registration.
    pub fn assign(&mut self, mut source: Self) {
        assert!(
            !self.handle.is_valid(),
            "assigning over live imported handle {:?}",
            self.handle
        );
        self.handle = source.into_handle();
    }
}

impl<H: HandleRepr> Default for ImportedResourceHandle<H> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<H: HandleRepr> Drop for ImportedResourceHandle<H> {
    fn drop(&mut self) {
        if self.handle.is_valid() {
            warn!(handle = ?self.handle, "imported resource handle dropped without release");
        }
    }
}

/// A host-owned resource type and its drop import.
pub trait ImportedResource: 'static {
    /// Handle representation the host uses for this type.
    type Handle: HandleRepr;

    /// Release the guest's handle; the host may destroy the resource.
    fn resource_drop(handle: Self::Handle);
}

/// Owning wrapper around an imported handle.
///
/// Releases the handle through [`ImportedResource::resource_drop`] exactly
/// once on drop, unless it was transferred with [`into_handle`](Self::into_handle).
pub struct HostOwned<R: ImportedResource> {
    handle: ImportedResourceHandle<R::Handle>,
    _resource: PhantomData<fn() -> R>,
}

impl<R: ImportedResource> HostOwned<R> {
    /// Take ownership of a handle the host gave to the guest.
    pub fn from_handle(handle: R::Handle) -> Self {
        Self {
            handle: ImportedResourceHandle::new(handle),
            _resource: PhantomData,
        }
    }

    /// The wrapped handle.
    pub fn handle(&self) -> &ImportedResourceHandle<R::Handle> {
        &self.handle
    }

    /// Current handle value.
    pub fn get_handle(&self) -> R::Handle {
        self.handle.get_handle()
    }

    /// Give the handle away, typically as an `own<T>` argument to the host.
    pub fn into_handle(mut self) -> R::Handle {
        self.handle.into_handle()
    }
}

impl<R: ImportedResource> Drop for HostOwned<R> {
    fn drop(&mut self) {
        let handle = self.handle.into_handle();
        if handle.is_valid() {
            debug!(?handle, resource = std::any::type_name::<R>(), "releasing imported resource");
            R::resource_drop(handle);
        }
    }
}

impl<R: ImportedResource> fmt::Debug for HostOwned<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostOwned")
            .field("resource", &std::any::type_name::<R>())
            .field("handle", &self.get_handle())
            .finish()
    }
}
