//! Process-metadata enrichment

use crate::event::{copy_terminated, Event};
use crate::COMM_LEN;

/// Identity of the task executing the instrumented call
pub trait TaskIdentity {
    /// Process id (tgid)
    fn pid(&self) -> u32;

    /// tgid of `real_parent`, if the lineage can be resolved
    fn parent_pid(&self) -> Option<u32>;

    /// Raw task comm; may lack a terminator
    fn comm(&self) -> Option<[u8; COMM_LEN]>;
}

/// Stamp pid, ppid and comm onto a freshly reserved record.
///
/// Must run before any step that can abort the probe so that a record is
/// never submitted half-identified.
#[inline(always)]
pub fn enrich<T: TaskIdentity + ?Sized>(task: &T, event: &mut Event) {
    event.pid = task.pid();
    event.ppid = task.parent_pid().unwrap_or(0);
    if let Some(comm) = task.comm() {
        copy_terminated(&mut event.comm, &comm);
    }
}
