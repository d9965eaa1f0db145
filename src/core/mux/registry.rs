use crate::core::mux::connection::ClientId;
use crate::domain::error::{MuxError, MuxResult};
use crate::infrastructure::poll::{Event, EventSource, Handle, Interest};
use std::collections::BTreeMap;
use std::time::Duration;

/// What a registered handle belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Listener,
    Serial,
    Client(ClientId),
}

/// Handle-to-owner map that owns the event source.
///
/// Every handle armed in the event source has exactly one entry here; both
/// sides change together in [`register`](Self::register) and
/// [`unregister`](Self::unregister).
#[derive(Debug)]
pub struct HandleRegistry<E: EventSource> {
    source: E,
    owners: BTreeMap<Handle, Owner>,
}

impl<E: EventSource> HandleRegistry<E> {
    pub fn new(source: E) -> Self {
        Self {
            source,
            owners: BTreeMap::new(),
        }
    }

    /// Add a unique mapping and arm readable interest for it.
    pub fn register(&mut self, handle: Handle, owner: Owner) -> MuxResult<()> {
        if self.owners.contains_key(&handle) {
            return Err(MuxError::DuplicateHandle(handle));
        }
        self.source.register(handle, Interest::READABLE)?;
        self.owners.insert(handle, owner);
        Ok(())
    }

    /// Disarm the handle and drop its mapping.
    pub fn unregister(&mut self, handle: Handle) -> MuxResult<Owner> {
        let owner = self.resolve(handle)?;
        self.source.unregister(handle)?;
        self.owners.remove(&handle);
        Ok(owner)
    }

    pub fn resolve(&self, handle: Handle) -> MuxResult<Owner> {
        self.owners
            .get(&handle)
            .copied()
            .ok_or(MuxError::Lookup(handle))
    }

    pub fn set_interest(&mut self, handle: Handle, interest: Interest) -> MuxResult<()> {
        self.resolve(handle)?;
        self.source.reregister(handle, interest)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    pub fn wait(&mut self, timeout: Duration) -> MuxResult<Vec<Event>> {
        self.source.wait(timeout)
    }

    pub fn source(&self) -> &E {
        &self.source
    }
}
