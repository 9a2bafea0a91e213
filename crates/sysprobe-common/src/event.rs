//! Fixed-layout event record
//!
//! [`Event`] is the only thing that crosses the ring buffer. Probes never touch
//! it field by field; they go through a per-kind view ([`ExecRecord`],
//! [`OpenRecord`], [`ConnectRecord`]) that only exposes the fields meaningful
//! for that kind.

use crate::{ADDR_LEN, COMM_LEN, FILENAME_LEN};

/// Wire size of [`Event`]
pub const EVENT_SIZE: usize = 308;

/// AF_INET as stored in `addr_family`
pub const AF_INET: u8 = 2;

/// AF_INET6 as stored in `addr_family`
pub const AF_INET6: u8 = 10;

const O_ACCMODE: u32 = 0o3;
const O_CREAT: u32 = 0o100;

/// Event discriminant
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// execve / execveat
    ProcessStart = 1,
    /// open / openat
    FileOpen = 2,
    /// connect
    Connect = 3,
}

impl EventKind {
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::ProcessStart),
            2 => Some(Self::FileOpen),
            3 => Some(Self::Connect),
            _ => None,
        }
    }
}

/// Event sent from kernel to userspace via the ring buffer
///
/// Field order and sizes are the wire format. The struct has no padding, so
/// its in-memory bytes are exactly what the consumer reads.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Event {
    /// Raw [`EventKind`]
    pub kind: u32,
    /// Acting process id (tgid)
    pub pid: u32,
    /// Parent tgid at capture time, 0 when unresolved
    pub ppid: u32,
    /// open(2) flags; 0 for other kinds
    pub flags: u32,
    /// Destination port (host byte order)
    pub port: u16,
    /// 0, AF_INET or AF_INET6
    pub addr_family: u8,
    /// Transport protocol number, 0 when unknown
    pub proto: u8,
    /// Destination address, left-justified
    pub addr: [u8; ADDR_LEN],
    /// Process command name (null-terminated)
    pub comm: [u8; COMM_LEN],
    /// Path or reconstructed command line (null-terminated)
    pub filename: [u8; FILENAME_LEN],
}

const _: () = assert!(core::mem::size_of::<Event>() == EVENT_SIZE);

impl Event {
    /// Create a new zeroed event
    pub const fn zeroed() -> Self {
        Self {
            kind: 0,
            pid: 0,
            ppid: 0,
            flags: 0,
            port: 0,
            addr_family: 0,
            proto: 0,
            addr: [0u8; ADDR_LEN],
            comm: [0u8; COMM_LEN],
            filename: [0u8; FILENAME_LEN],
        }
    }

    pub const fn kind(&self) -> Option<EventKind> {
        EventKind::from_raw(self.kind)
    }

    /// Command name up to (not including) the terminator
    pub fn comm_bytes(&self) -> &[u8] {
        until_nul(&self.comm)
    }

    /// Path or command line up to (not including) the terminator
    pub fn filename_bytes(&self) -> &[u8] {
        until_nul(&self.filename)
    }

    /// Check if opened for writing
    pub fn is_write(&self) -> bool {
        (self.flags & O_ACCMODE) != 0
    }

    /// Check if the open may create the file
    pub fn is_create(&self) -> bool {
        (self.flags & O_CREAT) != 0
    }

    /// Wire bytes of this record
    pub fn as_bytes(&self) -> &[u8; EVENT_SIZE] {
        // SAFETY: repr(C), no padding (size asserted above), all fields are
        // plain integers.
        unsafe { &*(self as *const Event as *const [u8; EVENT_SIZE]) }
    }

    /// Read a record from wire bytes; `None` if the buffer is too short
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() < EVENT_SIZE {
            return None;
        }
        // SAFETY: length checked; every bit pattern is a valid Event.
        Some(unsafe { core::ptr::read_unaligned(data.as_ptr() as *const Event) })
    }
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for Event {}

/// Slice of `buf` before the first NUL
pub fn until_nul(buf: &[u8]) -> &[u8] {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    &buf[..end]
}

/// Copy a possibly unterminated string into `dst`, truncating so that the
/// last byte of `dst` is always a terminator. Returns bytes copied.
pub fn copy_terminated(dst: &mut [u8], src: &[u8]) -> usize {
    if dst.is_empty() {
        return 0;
    }
    let src = until_nul(src);
    let len = src.len().min(dst.len() - 1);
    dst[..len].copy_from_slice(&src[..len]);
    for b in &mut dst[len..] {
        *b = 0;
    }
    len
}

/// Process-start view over a reserved record
pub struct ExecRecord<'a> {
    event: &'a mut Event,
}

impl<'a> ExecRecord<'a> {
    pub fn new(event: &'a mut Event) -> Self {
        event.kind = EventKind::ProcessStart as u32;
        Self { event }
    }

    pub fn command_line_mut(&mut self) -> &mut [u8; FILENAME_LEN] {
        &mut self.event.filename
    }
}

/// File-open view over a reserved record
pub struct OpenRecord<'a> {
    event: &'a mut Event,
}

impl<'a> OpenRecord<'a> {
    pub fn new(event: &'a mut Event) -> Self {
        event.kind = EventKind::FileOpen as u32;
        Self { event }
    }

    pub fn set_flags(&mut self, flags: u32) {
        self.event.flags = flags;
    }

    pub fn path_mut(&mut self) -> &mut [u8; FILENAME_LEN] {
        &mut self.event.filename
    }
}

/// Connect view over a reserved record
pub struct ConnectRecord<'a> {
    event: &'a mut Event,
}

impl<'a> ConnectRecord<'a> {
    pub fn new(event: &'a mut Event) -> Self {
        event.kind = EventKind::Connect as u32;
        Self { event }
    }

    pub fn pid(&self) -> u32 {
        self.event.pid
    }

    pub fn set_protocol(&mut self, proto: u8) {
        self.event.proto = proto;
    }

    /// `port` in host byte order
    pub fn set_ipv4(&mut self, port: u16, addr: [u8; 4]) {
        self.event.addr_family = AF_INET;
        self.event.port = port;
        self.event.addr[..4].copy_from_slice(&addr);
    }

    /// `port` in host byte order
    pub fn set_ipv6(&mut self, port: u16, addr: [u8; 16]) {
        self.event.addr_family = AF_INET6;
        self.event.port = port;
        self.event.addr = addr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_offsets() {
        let mut event = Event::zeroed();
        event.kind = 3;
        event.pid = 0x0102_0304;
        event.port = 443;
        event.addr_family = AF_INET6;
        event.proto = 6;
        event.addr[0] = 0xfe;
        event.comm[0] = b'c';
        event.filename[0] = b'/';

        let bytes = event.as_bytes();
        assert_eq!(&bytes[0..4], &3u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0x0102_0304u32.to_ne_bytes());
        assert_eq!(&bytes[16..18], &443u16.to_ne_bytes());
        assert_eq!(bytes[18], AF_INET6);
        assert_eq!(bytes[19], 6);
        assert_eq!(bytes[20], 0xfe);
        assert_eq!(bytes[36], b'c');
        assert_eq!(bytes[52], b'/');
    }

    #[test]
    fn test_from_bytes_rejects_short_buffer() {
        let event = Event::zeroed();
        assert!(Event::from_bytes(&event.as_bytes()[..EVENT_SIZE - 1]).is_none());
        assert!(Event::from_bytes(event.as_bytes()).is_some());
    }

    #[test]
    fn test_copy_terminated_truncates() {
        let mut dst = [0xffu8; 4];
        assert_eq!(copy_terminated(&mut dst, b"abcdef"), 3);
        assert_eq!(&dst, b"abc\0");

        let mut dst = [0xffu8; 8];
        assert_eq!(copy_terminated(&mut dst, b"ab\0cd"), 2);
        assert_eq!(&dst, b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn test_open_flags() {
        let mut event = Event::zeroed();
        assert!(!event.is_write());
        event.flags = 0o101; // O_WRONLY | O_CREAT
        assert!(event.is_write());
        assert!(event.is_create());
    }

    #[test]
    fn test_views_set_kind() {
        let mut event = Event::zeroed();
        OpenRecord::new(&mut event).set_flags(2);
        assert_eq!(event.kind(), Some(EventKind::FileOpen));
        assert_eq!(event.flags, 2);

        let mut event = Event::zeroed();
        let mut record = ConnectRecord::new(&mut event);
        record.set_ipv4(80, [10, 0, 0, 1]);
        assert_eq!(event.kind(), Some(EventKind::Connect));
        assert_eq!(&event.addr[..4], &[10, 0, 0, 1]);
        assert_eq!(&event.addr[4..], &[0u8; 12]);
    }
}
