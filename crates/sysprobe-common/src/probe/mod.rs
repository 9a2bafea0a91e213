//! Per-syscall capture routines
//!
//! Each routine reserves a slot, stamps the common identity fields, fills the
//! kind-specific fields from the caller's memory and then submits or
//! discards. Nothing here blocks and nothing is reported back to the
//! instrumented process: the worst case is a missing or partial event.

mod connect;
mod exec;
mod open;

pub use connect::{read_destination, ConnectCall, Destination};
pub use exec::{append_arg, reconstruct_command_line, ExecCall};
pub use open::OpenCall;

use crate::channel::{EventChannel, EventSlot, Unavailable};
use crate::event::EventKind;
use crate::memory::ForeignMemory;
use crate::task::{enrich, TaskIdentity};

/// What happened to the reserved record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Submitted,
    Discarded,
}

/// `Err(Unavailable)` means nothing was reserved and nothing was captured
pub type CaptureResult = Result<Outcome, Unavailable>;

/// The capabilities a probe runs against
pub struct Capture<'a, C: ?Sized, M: ?Sized, T: ?Sized> {
    channel: &'a C,
    memory: &'a M,
    task: &'a T,
}

impl<'a, C, M, T> Capture<'a, C, M, T>
where
    C: EventChannel + ?Sized,
    M: ForeignMemory + ?Sized,
    T: TaskIdentity + ?Sized,
{
    pub const fn new(channel: &'a C, memory: &'a M, task: &'a T) -> Self {
        Self {
            channel,
            memory,
            task,
        }
    }

    /// Reserve, tag and enrich. The returned slot is ready for the
    /// kind-specific view.
    #[inline(always)]
    fn begin(&self, kind: EventKind) -> Result<C::Slot<'a>, Unavailable> {
        let mut slot = self.channel.reserve()?;
        let event = slot.event_mut();
        event.kind = kind as u32;
        enrich(self.task, event);
        Ok(slot)
    }
}
