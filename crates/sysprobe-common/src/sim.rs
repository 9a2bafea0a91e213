//! In-process capture environment
//!
//! Deterministic stand-ins for the kernel side: a sparse address space with
//! unmapped gaps, a byte-bounded record channel, and the two correlation
//! tables with the kernel maps' capacity behavior. Used by the probe tests
//! and by userspace tests that need realistic raw records.

use lru::LruCache;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::vec::Vec;

use crate::channel::{EventChannel, EventSlot, Unavailable};
use crate::event::{Event, EVENT_SIZE};
use crate::memory::{ForeignMemory, ReadFailure};
use crate::socket::{IntentTable, SocketIntent, SocketKey, SocketMeta, SocketTable};
use crate::task::TaskIdentity;
use crate::COMM_LEN;

const FIRST_ADDRESS: u64 = 0x1000;
/// Unmapped distance between two allocations
const GUARD_GAP: u64 = 0x100;

/// Ring buffer records carry an 8-byte header and are 8-byte aligned
const RECORD_HEADER: usize = 8;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sparse foreign address space. Address 0 and everything between
/// allocations is unmapped.
#[derive(Debug)]
pub struct SimMemory {
    regions: BTreeMap<u64, Vec<u8>>,
    next: u64,
}

impl Default for SimMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimMemory {
    pub fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
            next: FIRST_ADDRESS,
        }
    }

    /// Map `bytes` at a fresh address and return it
    pub fn alloc(&mut self, bytes: &[u8]) -> u64 {
        let base = self.next;
        let end = base + bytes.len() as u64 + GUARD_GAP;
        self.next = (end + 0xf) & !0xf;
        self.regions.insert(base, bytes.to_vec());
        base
    }

    /// Map a NUL-terminated copy of `s`
    pub fn alloc_str(&mut self, s: &str) -> u64 {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.alloc(&bytes)
    }

    /// Map a pointer array exactly as given, no terminator added
    pub fn alloc_pointers(&mut self, pointers: &[u64]) -> u64 {
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_ne_bytes()).collect();
        self.alloc(&bytes)
    }

    /// Map each string and a NULL-terminated argv array pointing at them
    pub fn alloc_argv(&mut self, args: &[&str]) -> u64 {
        let mut pointers: Vec<u64> = args.iter().map(|arg| self.alloc_str(arg)).collect();
        pointers.push(0);
        self.alloc_pointers(&pointers)
    }

    /// The mapped bytes from `addr` to the end of its region
    fn mapped_from(&self, addr: u64) -> Option<&[u8]> {
        let (base, data) = self.regions.range(..=addr).next_back()?;
        let offset = usize::try_from(addr - base).ok()?;
        data.get(offset..)
    }
}

impl ForeignMemory for SimMemory {
    fn read_foreign(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFailure> {
        let mapped = self.mapped_from(src).ok_or(ReadFailure)?;
        let bytes = mapped.get(..dst.len()).ok_or(ReadFailure)?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    fn read_foreign_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFailure> {
        if dst.is_empty() {
            return Err(ReadFailure);
        }
        let limit = dst.len() - 1;
        let mapped = self.mapped_from(src).unwrap_or(&[]);

        let mut copied = 0;
        loop {
            if copied == limit {
                break;
            }
            match mapped.get(copied) {
                Some(0) => break,
                Some(&b) => {
                    dst[copied] = b;
                    copied += 1;
                }
                None => {
                    dst.fill(0);
                    return Err(ReadFailure);
                }
            }
        }
        dst[copied] = 0;
        Ok(copied)
    }
}

/// Fixed task identity
#[derive(Clone, Debug)]
pub struct SimTask {
    pid: u32,
    ppid: Option<u32>,
    comm: [u8; COMM_LEN],
}

impl SimTask {
    /// `comm` is truncated to the raw field width without a terminator,
    /// like a full-length kernel comm.
    pub fn new(pid: u32, ppid: Option<u32>, comm: &str) -> Self {
        let mut raw = [0u8; COMM_LEN];
        let len = comm.len().min(COMM_LEN);
        raw[..len].copy_from_slice(&comm.as_bytes()[..len]);
        Self {
            pid,
            ppid,
            comm: raw,
        }
    }
}

impl TaskIdentity for SimTask {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn parent_pid(&self) -> Option<u32> {
        self.ppid
    }

    fn comm(&self) -> Option<[u8; COMM_LEN]> {
        Some(self.comm)
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    in_use: usize,
    published: VecDeque<Vec<u8>>,
}

/// Byte-bounded channel. Reserved and published-but-undrained records both
/// occupy space, so a consumer that stops draining makes producers fail.
#[derive(Debug)]
pub struct SimChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
}

impl SimChannel {
    /// Bytes one record occupies
    pub const RECORD_COST: usize = (EVENT_SIZE + RECORD_HEADER + 7) & !7;

    pub fn with_capacity_bytes(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(ChannelState::default()),
        }
    }

    /// Room for exactly `records` outstanding records
    pub fn with_records(records: usize) -> Self {
        Self::with_capacity_bytes(records * Self::RECORD_COST)
    }

    /// Published records not yet drained
    pub fn published_len(&self) -> usize {
        lock(&self.state).published.len()
    }

    /// Take every published record in submit order, freeing their space
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut state = lock(&self.state);
        let records: Vec<Vec<u8>> = state.published.drain(..).collect();
        state.in_use -= records.len() * Self::RECORD_COST;
        records
    }

    /// [`drain`](Self::drain), decoded
    pub fn drain_events(&self) -> Vec<Event> {
        self.drain()
            .iter()
            .filter_map(|raw| Event::from_bytes(raw))
            .collect()
    }

    fn release(&self) {
        lock(&self.state).in_use -= Self::RECORD_COST;
    }

    fn publish(&self, record: Vec<u8>) {
        lock(&self.state).published.push_back(record);
    }
}

impl EventChannel for SimChannel {
    type Slot<'a> = SimSlot<'a>;

    fn reserve(&self) -> Result<SimSlot<'_>, Unavailable> {
        let mut state = lock(&self.state);
        if state.in_use + Self::RECORD_COST > self.capacity {
            return Err(Unavailable);
        }
        state.in_use += Self::RECORD_COST;
        Ok(SimSlot {
            channel: self,
            event: Event::zeroed(),
            finished: false,
        })
    }
}

/// Reserved record; dropping it unfinished discards it
pub struct SimSlot<'a> {
    channel: &'a SimChannel,
    event: Event,
    finished: bool,
}

impl EventSlot for SimSlot<'_> {
    fn event_mut(&mut self) -> &mut Event {
        &mut self.event
    }

    fn submit(mut self) {
        self.finished = true;
        self.channel.publish(self.event.as_bytes().to_vec());
    }

    fn discard(self) {}
}

impl Drop for SimSlot<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.channel.release();
        }
    }
}

/// Plain hash table; inserting a new pid when full is silently dropped
#[derive(Debug)]
pub struct SimIntentTable {
    capacity: usize,
    entries: Mutex<HashMap<u32, SocketIntent>>,
}

impl SimIntentTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IntentTable for SimIntentTable {
    fn stash(&self, pid: u32, intent: &SocketIntent) {
        let mut entries = lock(&self.entries);
        if entries.len() >= self.capacity && !entries.contains_key(&pid) {
            return;
        }
        entries.insert(pid, *intent);
    }

    fn pending(&self, pid: u32) -> Option<SocketIntent> {
        lock(&self.entries).get(&pid).copied()
    }

    fn clear(&self, pid: u32) {
        lock(&self.entries).remove(&pid);
    }
}

/// LRU-bounded (pid, fd) table. A capacity of zero stores nothing.
pub struct LruSocketTable {
    entries: Option<Mutex<LruCache<SocketKey, SocketMeta>>>,
}

impl LruSocketTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| lock(entries).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Presence check that does not count as a use
    pub fn contains(&self, key: &SocketKey) -> bool {
        self.entries
            .as_ref()
            .is_some_and(|entries| lock(entries).contains(key))
    }
}

impl SocketTable for LruSocketTable {
    fn remember(&self, key: &SocketKey, meta: &SocketMeta) {
        if let Some(entries) = &self.entries {
            lock(entries).put(*key, *meta);
        }
    }

    fn recall(&self, key: &SocketKey) -> Option<SocketMeta> {
        let entries = self.entries.as_ref()?;
        lock(entries).get(key).copied()
    }
}
