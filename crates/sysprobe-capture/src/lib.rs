//! Linux eBPF collector for sysprobe
//!
//! Loads the compiled `ebpf/sysprobe-ebpf` object, writes its load-time
//! settings, attaches the enabled tracepoints and drains the shared ring
//! buffer into typed [`CapturedEvent`]s on a tokio channel.

pub mod attach;
pub mod btf;
pub mod collector;
pub mod config;
pub mod decode;
pub mod error;
pub mod loader;

pub use attach::{attach_plan, TracepointSpec};
pub use btf::{resolve_task_offsets, OffsetSource};
pub use collector::{CaptureStats, EbpfCollector};
pub use config::{ArgvCapture, CaptureConfig, ConfigError, ConfigLoader, ConfigResult};
pub use decode::{decode, CapturedEvent, DecodeError};
pub use error::{CaptureError, CaptureResult};
pub use loader::Preflight;
