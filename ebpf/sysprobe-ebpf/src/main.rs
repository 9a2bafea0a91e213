#![no_std]
#![no_main]

mod context;

use aya_ebpf::{
    macros::{map, tracepoint},
    maps::{HashMap, LruHashMap, RingBuf},
    programs::TracePointContext,
};
use sysprobe_common::{
    socket::{on_socket_enter, on_socket_exit},
    Capture, ConnectCall, ExecCall, OpenCall, SocketIntent, SocketKey, SocketMeta,
    RING_BUFFER_BYTES, SOCKET_INTENT_CAPACITY, SOCKET_META_CAPACITY,
};

use context::{CurrentTask, IntentMap, RingChannel, SocketMetaMap, UserMemory};

// =============================================================================
// Maps
// =============================================================================

/// Every captured event, all kinds interleaved in submit order
#[map]
static EVENTS: RingBuf = RingBuf::with_byte_size(RING_BUFFER_BYTES, 0);

/// socket() arguments between syscall entry and exit
/// Key: tgid, Value: SocketIntent
#[map]
static SOCKET_INTENTS: HashMap<u32, SocketIntent> =
    HashMap::with_max_entries(SOCKET_INTENT_CAPACITY, 0);

/// Protocol of each socket created while attached
/// Key: SocketKey (pid, fd), Value: SocketMeta
#[map]
static SOCKET_META: LruHashMap<SocketKey, SocketMeta> =
    LruHashMap::with_max_entries(SOCKET_META_CAPACITY, 0);

// =============================================================================
// Load-time configuration
// =============================================================================

/// Non-zero: join argv into the exec record
#[unsafe(no_mangle)]
static CAPTURE_ARGV: u8 = 0;

/// offsetof(struct task_struct, real_parent); 0 disables ppid
#[unsafe(no_mangle)]
static TASK_REAL_PARENT_OFFSET: u32 = 0;

/// offsetof(struct task_struct, tgid); 0 disables ppid
#[unsafe(no_mangle)]
static TASK_TGID_OFFSET: u32 = 0;

#[inline(always)]
fn capture_argv() -> bool {
    unsafe { core::ptr::read_volatile(&CAPTURE_ARGV) != 0 }
}

#[inline(always)]
fn current_task() -> CurrentTask {
    unsafe {
        CurrentTask {
            real_parent_offset: core::ptr::read_volatile(&TASK_REAL_PARENT_OFFSET),
            tgid_offset: core::ptr::read_volatile(&TASK_TGID_OFFSET),
        }
    }
}

#[inline(always)]
fn current_pid() -> u32 {
    (aya_ebpf::helpers::bpf_get_current_pid_tgid() >> 32) as u32
}

// =============================================================================
// Tracepoint layouts
// =============================================================================

/// Any syscalls/sys_enter_* tracepoint
/// See: /sys/kernel/debug/tracing/events/syscalls/sys_enter_*/format
#[repr(C)]
struct SysEnterArgs {
    /// Common tracepoint fields
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    /// Syscall number
    _syscall_nr: i32,
    /// Padding
    _pad: i32,
    /// Syscall arguments, each widened to 64 bits
    args: [u64; 6],
}

/// Any syscalls/sys_exit_* tracepoint
#[repr(C)]
struct SysExitArgs {
    /// Common tracepoint fields
    _common_type: u16,
    _common_flags: u8,
    _common_preempt_count: u8,
    _common_pid: i32,
    /// Syscall number
    _syscall_nr: i32,
    /// Padding
    _pad: i32,
    /// Return value (-errno on failure)
    ret: i64,
}

#[inline(always)]
fn enter_args(ctx: &TracePointContext) -> Result<[u64; 6], i64> {
    let args: SysEnterArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };
    Ok(args.args)
}

// =============================================================================
// Process start
// =============================================================================

/// int execve(const char *filename, const char *const argv[], const char *const envp[])
#[tracepoint]
pub fn trace_execve(ctx: TracePointContext) -> u32 {
    match try_exec(&ctx, 0) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

/// int execveat(int dfd, const char *filename, const char *const argv[], ...)
#[tracepoint]
pub fn trace_execveat(ctx: TracePointContext) -> u32 {
    match try_exec(&ctx, 1) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

/// `first` is the index of the filename argument
#[inline(always)]
fn try_exec(ctx: &TracePointContext, first: usize) -> Result<(), i64> {
    let args = enter_args(ctx)?;
    let call = ExecCall {
        filename: args[first],
        argv: args[first + 1],
        capture_argv: capture_argv(),
    };

    let channel = RingChannel(&EVENTS);
    let task = current_task();
    Capture::new(&channel, &UserMemory, &task)
        .exec(&call)
        .map_err(|_| 1i64)?;
    Ok(())
}

// =============================================================================
// File open
// =============================================================================

/// int openat(int dfd, const char *filename, int flags, umode_t mode)
#[tracepoint]
pub fn trace_openat(ctx: TracePointContext) -> u32 {
    match try_open(&ctx, 1) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

/// int open(const char *filename, int flags, umode_t mode)
///
/// Not every architecture has this syscall (arm64 only has openat).
#[tracepoint]
pub fn trace_open(ctx: TracePointContext) -> u32 {
    match try_open(&ctx, 0) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

#[inline(always)]
fn try_open(ctx: &TracePointContext, first: usize) -> Result<(), i64> {
    let args = enter_args(ctx)?;
    let call = OpenCall {
        path: args[first],
        flags: args[first + 1] as u32,
    };

    let channel = RingChannel(&EVENTS);
    let task = current_task();
    Capture::new(&channel, &UserMemory, &task)
        .open(&call)
        .map_err(|_| 1i64)?;
    Ok(())
}

// =============================================================================
// Socket creation
// =============================================================================

/// int socket(int family, int type, int protocol)
#[tracepoint]
pub fn trace_socket_enter(ctx: TracePointContext) -> u32 {
    match try_socket_enter(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_socket_enter(ctx: &TracePointContext) -> Result<(), i64> {
    let args = enter_args(ctx)?;
    let intent = SocketIntent {
        domain: args[0] as u32,
        sock_type: args[1] as u32,
        protocol: args[2] as u32,
    };
    on_socket_enter(&IntentMap(&SOCKET_INTENTS), current_pid(), &intent);
    Ok(())
}

#[tracepoint]
pub fn trace_socket_exit(ctx: TracePointContext) -> u32 {
    match try_socket_exit(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_socket_exit(ctx: &TracePointContext) -> Result<(), i64> {
    let args: SysExitArgs = unsafe { ctx.read_at(0).map_err(|_| 1i64)? };
    on_socket_exit(
        &IntentMap(&SOCKET_INTENTS),
        &SocketMetaMap(&SOCKET_META),
        current_pid(),
        args.ret,
    );
    Ok(())
}

// =============================================================================
// Network connect
// =============================================================================

/// int connect(int sockfd, const struct sockaddr *addr, socklen_t addrlen)
#[tracepoint]
pub fn trace_connect(ctx: TracePointContext) -> u32 {
    match try_connect(&ctx) {
        Ok(()) => 0,
        Err(_) => 0,
    }
}

fn try_connect(ctx: &TracePointContext) -> Result<(), i64> {
    let args = enter_args(ctx)?;
    let call = ConnectCall {
        fd: args[0] as u32,
        addr: args[1],
    };

    let channel = RingChannel(&EVENTS);
    let task = current_task();
    Capture::new(&channel, &UserMemory, &task)
        .connect(&SocketMetaMap(&SOCKET_META), &call)
        .map_err(|_| 1i64)?;
    Ok(())
}

// =============================================================================
// Required for eBPF programs
// =============================================================================

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
