//! Socket correlation state
//!
//! The protocol of a socket is only visible when it is created, not when it
//! is later passed to `connect`. Creation is captured as an entry/exit pair:
//! the entry stashes the call arguments per pid ([`IntentTable`]), the exit
//! turns them into per-(pid, fd) metadata ([`SocketTable`]) once the
//! descriptor number is known.
//!
//! Two creations racing in the same process share one pending slot
//! (last writer wins). Metadata is never removed on close; it ages out of the
//! LRU table or is overwritten when the descriptor number is reused.

pub const SOCK_STREAM: u32 = 1;
pub const SOCK_DGRAM: u32 = 2;
/// Masks SOCK_NONBLOCK / SOCK_CLOEXEC off the type argument
pub const SOCK_TYPE_MASK: u32 = 0xf;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Arguments of a pending socket(2) call
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketIntent {
    pub domain: u32,
    pub sock_type: u32,
    pub protocol: u32,
}

impl SocketIntent {
    /// Explicit protocol wins; otherwise derive it from the socket type.
    pub const fn inferred_protocol(&self) -> u8 {
        if self.protocol != 0 {
            return self.protocol as u8;
        }
        match self.sock_type & SOCK_TYPE_MASK {
            SOCK_STREAM => IPPROTO_TCP,
            SOCK_DGRAM => IPPROTO_UDP,
            _ => 0,
        }
    }
}

/// Key: (pid, fd) -> SocketMeta
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SocketKey {
    pub pid: u32,
    pub fd: u32,
}

/// What is known about a descriptor from its creation
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketMeta {
    pub protocol: u8,
    _pad: [u8; 3],
}

impl SocketMeta {
    pub const fn new(protocol: u8) -> Self {
        Self {
            protocol,
            _pad: [0; 3],
        }
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SocketIntent {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SocketKey {}

#[cfg(feature = "user")]
unsafe impl aya::Pod for SocketMeta {}

/// Pending creation arguments, one per pid
pub trait IntentTable {
    /// Insert or overwrite
    fn stash(&self, pid: u32, intent: &SocketIntent);

    fn pending(&self, pid: u32) -> Option<SocketIntent>;

    fn clear(&self, pid: u32);
}

/// Capacity-bounded (pid, fd) -> metadata map with LRU eviction
pub trait SocketTable {
    /// Insert or overwrite; may evict the least recently used entry
    fn remember(&self, key: &SocketKey, meta: &SocketMeta);

    /// Lookup; counts as a use but never removes anything
    fn recall(&self, key: &SocketKey) -> Option<SocketMeta>;
}

/// socket(2) entry
#[inline(always)]
pub fn on_socket_enter<I: IntentTable + ?Sized>(intents: &I, pid: u32, intent: &SocketIntent) {
    intents.stash(pid, intent);
}

/// socket(2) exit; `ret` is the syscall return value
#[inline(always)]
pub fn on_socket_exit<I, S>(intents: &I, sockets: &S, pid: u32, ret: i64)
where
    I: IntentTable + ?Sized,
    S: SocketTable + ?Sized,
{
    let Some(intent) = intents.pending(pid) else {
        return;
    };

    let fd = ret as i32;
    if fd < 0 {
        intents.clear(pid);
        return;
    }

    let key = SocketKey {
        pid,
        fd: fd as u32,
    };
    sockets.remember(&key, &SocketMeta::new(intent.inferred_protocol()));
    intents.clear(pid);
}
