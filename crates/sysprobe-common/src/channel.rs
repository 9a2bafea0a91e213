//! Hand-off channel contract
//!
//! A slot is reserved zeroed, filled in place, then either submitted (made
//! visible to the consumer in submit order) or discarded. Both consume the
//! slot, so a probe cannot keep it past the current invocation.

use crate::event::Event;

/// The channel has no room for another record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unavailable;

/// Exclusively owned, writable record slot
pub trait EventSlot {
    /// The zeroed record backing this slot
    fn event_mut(&mut self) -> &mut Event;

    /// Publish the record
    fn submit(self);

    /// Release the slot without publishing
    fn discard(self);
}

/// Multi-producer output buffer. `reserve` must never block.
pub trait EventChannel {
    type Slot<'a>: EventSlot
    where
        Self: 'a;

    fn reserve(&self) -> Result<Self::Slot<'_>, Unavailable>;
}
