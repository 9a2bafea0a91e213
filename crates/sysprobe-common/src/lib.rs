//! Shared event schema and capture logic for sysprobe
//!
//! Everything in this crate is `no_std` so the same code runs inside the
//! kernel programs (`ebpf/sysprobe-ebpf`) and in userspace. The probes are
//! written against small capability traits ([`EventChannel`],
//! [`ForeignMemory`], [`TaskIdentity`], [`IntentTable`], [`SocketTable`]);
//! the kernel crate implements them over ring buffers, hash maps and BPF
//! helpers, while the `sim` feature provides in-process implementations.

#![no_std]

#[cfg(any(test, feature = "sim"))]
extern crate std;

pub mod channel;
pub mod event;
pub mod memory;
pub mod probe;
pub mod socket;
pub mod task;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use channel::{EventChannel, EventSlot, Unavailable};
pub use event::{ConnectRecord, Event, EventKind, ExecRecord, OpenRecord};
pub use memory::{ForeignMemory, ReadFailure};
pub use probe::{Capture, CaptureResult, ConnectCall, ExecCall, OpenCall, Outcome};
pub use socket::{IntentTable, SocketIntent, SocketKey, SocketMeta, SocketTable};
pub use task::{enrich, TaskIdentity};

/// Command name length (matches TASK_COMM_LEN in kernel)
pub const COMM_LEN: usize = 16;

/// Capacity of the path / command line field, terminator included
pub const FILENAME_LEN: usize = 256;

/// Raw destination address capacity (large enough for IPv6)
pub const ADDR_LEN: usize = 16;

/// Maximum number of argv entries joined into a command line
pub const MAX_ARGS: usize = 8;

/// Size of the shared event ring buffer (16 MiB)
pub const RING_BUFFER_BYTES: u32 = 1 << 24;

/// Pending socket() calls, keyed by pid
pub const SOCKET_INTENT_CAPACITY: u32 = 8192;

/// Tracked (pid, fd) -> protocol entries before LRU eviction
pub const SOCKET_META_CAPACITY: u32 = 16384;

/// Map and program names shared between the kernel object and the loader
pub mod names {
    pub const EVENTS_MAP: &str = "EVENTS";
    pub const SOCKET_INTENTS_MAP: &str = "SOCKET_INTENTS";
    pub const SOCKET_META_MAP: &str = "SOCKET_META";

    pub const CAPTURE_ARGV_GLOBAL: &str = "CAPTURE_ARGV";
    pub const TASK_REAL_PARENT_OFFSET_GLOBAL: &str = "TASK_REAL_PARENT_OFFSET";
    pub const TASK_TGID_OFFSET_GLOBAL: &str = "TASK_TGID_OFFSET";

    pub const TRACE_EXECVE: &str = "trace_execve";
    pub const TRACE_EXECVEAT: &str = "trace_execveat";
    pub const TRACE_OPENAT: &str = "trace_openat";
    pub const TRACE_OPEN: &str = "trace_open";
    pub const TRACE_SOCKET_ENTER: &str = "trace_socket_enter";
    pub const TRACE_SOCKET_EXIT: &str = "trace_socket_exit";
    pub const TRACE_CONNECT: &str = "trace_connect";
}
