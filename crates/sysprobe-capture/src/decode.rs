//! Raw record decoding

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use sysprobe_common::event::{until_nul, AF_INET, AF_INET6, EVENT_SIZE};
use sysprobe_common::{Event, EventKind};
use thiserror::Error;

/// Errors decoding a ring buffer record
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("short record: {len} bytes, expected {}", EVENT_SIZE)]
    ShortRecord { len: usize },

    #[error("unknown event kind {0}")]
    UnknownKind(u32),

    #[error("unknown address family {0}")]
    UnknownFamily(u8),
}

/// A captured event with its strings and address decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CapturedEvent {
    ProcessStart {
        pid: u32,
        ppid: u32,
        comm: String,
        /// Joined argv, or the invoked path
        command_line: String,
    },
    FileOpen {
        pid: u32,
        ppid: u32,
        comm: String,
        path: String,
        flags: u32,
    },
    Connect {
        pid: u32,
        ppid: u32,
        comm: String,
        /// IP protocol number, 0 when the socket was not seen being created
        protocol: u8,
        destination: SocketAddr,
    },
}

impl CapturedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ProcessStart { .. } => EventKind::ProcessStart,
            Self::FileOpen { .. } => EventKind::FileOpen,
            Self::Connect { .. } => EventKind::Connect,
        }
    }

    pub fn pid(&self) -> u32 {
        match self {
            Self::ProcessStart { pid, .. } | Self::FileOpen { pid, .. } | Self::Connect { pid, .. } => {
                *pid
            }
        }
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(until_nul(bytes)).into_owned()
}

impl TryFrom<&Event> for CapturedEvent {
    type Error = DecodeError;

    fn try_from(event: &Event) -> Result<Self, DecodeError> {
        let kind = event.kind().ok_or(DecodeError::UnknownKind(event.kind))?;
        let comm = lossy(&event.comm);

        let decoded = match kind {
            EventKind::ProcessStart => Self::ProcessStart {
                pid: event.pid,
                ppid: event.ppid,
                comm,
                command_line: lossy(&event.filename),
            },
            EventKind::FileOpen => Self::FileOpen {
                pid: event.pid,
                ppid: event.ppid,
                comm,
                path: lossy(&event.filename),
                flags: event.flags,
            },
            EventKind::Connect => {
                let ip = match event.addr_family {
                    AF_INET => {
                        let [a, b, c, d, ..] = event.addr;
                        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
                    }
                    AF_INET6 => IpAddr::V6(Ipv6Addr::from(event.addr)),
                    other => return Err(DecodeError::UnknownFamily(other)),
                };
                Self::Connect {
                    pid: event.pid,
                    ppid: event.ppid,
                    comm,
                    protocol: event.proto,
                    destination: SocketAddr::new(ip, event.port),
                }
            }
        };
        Ok(decoded)
    }
}

/// Decode one ring buffer record
pub fn decode(data: &[u8]) -> Result<CapturedEvent, DecodeError> {
    let event = Event::from_bytes(data).ok_or(DecodeError::ShortRecord { len: data.len() })?;
    CapturedEvent::try_from(&event)
}
