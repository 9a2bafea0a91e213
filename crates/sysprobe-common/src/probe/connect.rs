use super::{Capture, CaptureResult, Outcome};
use crate::channel::{EventChannel, EventSlot};
use crate::event::{ConnectRecord, EventKind, AF_INET, AF_INET6};
use crate::memory::ForeignMemory;
use crate::socket::{SocketKey, SocketTable};
use crate::task::TaskIdentity;

/// sizeof(struct sockaddr_in)
const SOCKADDR_IN_LEN: usize = 16;
/// sizeof(struct sockaddr_in6)
const SOCKADDR_IN6_LEN: usize = 28;

/// Arguments of connect
#[derive(Clone, Copy, Debug)]
pub struct ConnectCall {
    /// `int sockfd`
    pub fd: u32,
    /// `const struct sockaddr *addr`
    pub addr: u64,
}

/// Parsed destination, port in host byte order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Destination {
    V4 { port: u16, addr: [u8; 4] },
    V6 { port: u16, addr: [u8; 16] },
}

/// Interpret the caller's sockaddr, IPv4-sized read first, then IPv6-sized.
///
/// `None` when neither read succeeds with a matching family tag.
#[inline(always)]
pub fn read_destination<M: ForeignMemory + ?Sized>(memory: &M, addr: u64) -> Option<Destination> {
    // struct sockaddr_in { sa_family_t; in_port_t (be); struct in_addr; zero[8] }
    let mut sa4 = [0u8; SOCKADDR_IN_LEN];
    if memory.read_foreign(addr, &mut sa4).is_ok() && family(&sa4) == AF_INET as u16 {
        return Some(Destination::V4 {
            port: u16::from_be_bytes([sa4[2], sa4[3]]),
            addr: [sa4[4], sa4[5], sa4[6], sa4[7]],
        });
    }

    // struct sockaddr_in6 { sa_family_t; in_port_t (be); flowinfo; struct in6_addr; scope_id }
    let mut sa6 = [0u8; SOCKADDR_IN6_LEN];
    if memory.read_foreign(addr, &mut sa6).is_ok() && family(&sa6) == AF_INET6 as u16 {
        let mut ip = [0u8; 16];
        ip.copy_from_slice(&sa6[8..24]);
        return Some(Destination::V6 {
            port: u16::from_be_bytes([sa6[2], sa6[3]]),
            addr: ip,
        });
    }

    None
}

#[inline(always)]
fn family(raw: &[u8]) -> u16 {
    u16::from_ne_bytes([raw[0], raw[1]])
}

impl<'a, C, M, T> Capture<'a, C, M, T>
where
    C: EventChannel + ?Sized,
    M: ForeignMemory + ?Sized,
    T: TaskIdentity + ?Sized,
{
    /// Connect capture. Discards the record when the destination cannot be
    /// parsed; a missing socket entry only leaves the protocol at 0.
    pub fn connect<S: SocketTable + ?Sized>(&self, sockets: &S, call: &ConnectCall) -> CaptureResult {
        let mut slot = self.begin(EventKind::Connect)?;
        let mut record = ConnectRecord::new(slot.event_mut());

        let key = SocketKey {
            pid: record.pid(),
            fd: call.fd,
        };
        if let Some(meta) = sockets.recall(&key) {
            record.set_protocol(meta.protocol);
        }

        match read_destination(self.memory, call.addr) {
            Some(Destination::V4 { port, addr }) => record.set_ipv4(port, addr),
            Some(Destination::V6 { port, addr }) => record.set_ipv6(port, addr),
            None => {
                slot.discard();
                return Ok(Outcome::Discarded);
            }
        }

        slot.submit();
        Ok(Outcome::Submitted)
    }
}
