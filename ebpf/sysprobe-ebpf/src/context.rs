//! Kernel implementations of the capture capabilities

use aya_ebpf::{
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task,
        bpf_probe_read_kernel, bpf_probe_read_user_buf, bpf_probe_read_user_str_bytes,
    },
    maps::{ring_buf::RingBufEntry, HashMap, LruHashMap, RingBuf},
};
use sysprobe_common::{
    Event, EventChannel, EventSlot, ForeignMemory, IntentTable, ReadFailure, SocketIntent,
    SocketKey, SocketMeta, SocketTable, TaskIdentity, Unavailable, COMM_LEN,
};

/// The shared ring buffer
pub struct RingChannel(pub &'static RingBuf);

pub struct RingSlot(RingBufEntry<Event>);

impl EventChannel for RingChannel {
    type Slot<'a> = RingSlot;

    #[inline(always)]
    fn reserve(&self) -> Result<RingSlot, Unavailable> {
        let mut entry = self.0.reserve::<Event>(0).ok_or(Unavailable)?;
        // Ring buffer memory is recycled, not cleared.
        unsafe { core::ptr::write_bytes(entry.as_mut_ptr(), 0, 1) };
        Ok(RingSlot(entry))
    }
}

impl EventSlot for RingSlot {
    #[inline(always)]
    fn event_mut(&mut self) -> &mut Event {
        // SAFETY: zeroed in `reserve`; all-zero is a valid Event.
        unsafe { self.0.assume_init_mut() }
    }

    #[inline(always)]
    fn submit(self) {
        self.0.submit(0);
    }

    #[inline(always)]
    fn discard(self) {
        self.0.discard(0);
    }
}

/// The calling process's user address space
pub struct UserMemory;

impl ForeignMemory for UserMemory {
    #[inline(always)]
    fn read_foreign(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFailure> {
        unsafe { bpf_probe_read_user_buf(src as *const u8, dst) }.map_err(|_| ReadFailure)
    }

    #[inline(always)]
    fn read_foreign_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFailure> {
        // The helper zero-fills `dst` on fault.
        unsafe { bpf_probe_read_user_str_bytes(src as *const u8, dst) }
            .map(|s| s.len())
            .map_err(|_| ReadFailure)
    }
}

/// `current`, with `task_struct` field offsets supplied at load time
pub struct CurrentTask {
    pub real_parent_offset: u32,
    pub tgid_offset: u32,
}

impl TaskIdentity for CurrentTask {
    #[inline(always)]
    fn pid(&self) -> u32 {
        (bpf_get_current_pid_tgid() >> 32) as u32
    }

    #[inline(always)]
    fn parent_pid(&self) -> Option<u32> {
        if self.real_parent_offset == 0 || self.tgid_offset == 0 {
            return None;
        }
        unsafe {
            let task = bpf_get_current_task() as *const u8;
            let parent: u64 =
                bpf_probe_read_kernel(task.add(self.real_parent_offset as usize) as *const u64)
                    .ok()?;
            if parent == 0 {
                return None;
            }
            let tgid: i32 = bpf_probe_read_kernel(
                (parent as *const u8).add(self.tgid_offset as usize) as *const i32,
            )
            .ok()?;
            Some(tgid as u32)
        }
    }

    #[inline(always)]
    fn comm(&self) -> Option<[u8; COMM_LEN]> {
        bpf_get_current_comm().ok()
    }
}

/// Pending socket() arguments, keyed by tgid
pub struct IntentMap(pub &'static HashMap<u32, SocketIntent>);

impl IntentTable for IntentMap {
    #[inline(always)]
    fn stash(&self, pid: u32, intent: &SocketIntent) {
        // A full map drops the new entry.
        let _ = self.0.insert(&pid, intent, 0);
    }

    #[inline(always)]
    fn pending(&self, pid: u32) -> Option<SocketIntent> {
        unsafe { self.0.get(&pid) }.copied()
    }

    #[inline(always)]
    fn clear(&self, pid: u32) {
        let _ = self.0.remove(&pid);
    }
}

/// (tgid, fd) -> protocol
pub struct SocketMetaMap(pub &'static LruHashMap<SocketKey, SocketMeta>);

impl SocketTable for SocketMetaMap {
    #[inline(always)]
    fn remember(&self, key: &SocketKey, meta: &SocketMeta) {
        let _ = self.0.insert(key, meta, 0);
    }

    #[inline(always)]
    fn recall(&self, key: &SocketKey) -> Option<SocketMeta> {
        unsafe { self.0.get(key) }.copied()
    }
}
