//! `task_struct` field offsets from kernel BTF

use crate::config::TaskOffsets;
use btf_rs::{Btf, Member, Type};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Kernel BTF exported by CONFIG_DEBUG_INFO_BTF
pub const VMLINUX_BTF: &str = "/sys/kernel/btf/vmlinux";

const TASK_STRUCT: &str = "task_struct";

/// Errors from BTF offset lookup
#[derive(Debug, Error)]
pub enum BtfError {
    #[error("Failed to read BTF from {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("BTF lookup failed: {0}")]
    Lookup(String),

    #[error("struct {0} not found in BTF")]
    MissingStruct(&'static str),

    #[error("{0}.{1} not found in BTF")]
    MissingField(&'static str, &'static str),

    #[error("{0}.{1} is not byte aligned")]
    Unaligned(&'static str, &'static str),
}

/// Where the offsets handed to the kernel programs came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetSource {
    Config,
    Btf,
    Unresolved,
}

/// Offsets of `real_parent` and `tgid` in the BTF file at `path`
pub fn load_task_offsets(path: &Path) -> Result<TaskOffsets, BtfError> {
    let btf = Btf::from_file(path).map_err(|e| BtfError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    task_offsets(&btf)
}

pub fn task_offsets(btf: &Btf) -> Result<TaskOffsets, BtfError> {
    let candidates = btf
        .resolve_types_by_name(TASK_STRUCT)
        .map_err(|e| BtfError::Lookup(e.to_string()))?;

    // Forward declarations share the name; only the definition has members.
    let members = candidates
        .iter()
        .find_map(|ty| match ty {
            Type::Struct(s) => Some(&s.members),
            _ => None,
        })
        .ok_or(BtfError::MissingStruct(TASK_STRUCT))?;

    let real_parent = member_offset(btf, members, "real_parent")?
        .ok_or(BtfError::MissingField(TASK_STRUCT, "real_parent"))?;
    let tgid = member_offset(btf, members, "tgid")?
        .ok_or(BtfError::MissingField(TASK_STRUCT, "tgid"))?;

    Ok(TaskOffsets { real_parent, tgid })
}

/// Byte offset of `field`, looking through anonymous struct and union members
fn member_offset(
    btf: &Btf,
    members: &[Member],
    field: &'static str,
) -> Result<Option<u32>, BtfError> {
    for member in members {
        let name = btf
            .resolve_name(member)
            .map_err(|e| BtfError::Lookup(e.to_string()))?;

        if name == field {
            let bits = member.bit_offset();
            if bits % 8 != 0 {
                return Err(BtfError::Unaligned(TASK_STRUCT, field));
            }
            return Ok(Some(bits / 8));
        }

        if name.is_empty() {
            let nested = btf
                .resolve_chained_type(member)
                .map_err(|e| BtfError::Lookup(e.to_string()))?;
            let inner = match &nested {
                Type::Struct(s) | Type::Union(s) => &s.members,
                _ => continue,
            };
            if let Some(offset) = member_offset(btf, inner, field)? {
                return Ok(Some(member.bit_offset() / 8 + offset));
            }
        }
    }
    Ok(None)
}

/// Configured offsets win; otherwise read them from the running kernel's BTF.
pub fn resolve_task_offsets(configured: TaskOffsets) -> (TaskOffsets, OffsetSource) {
    if configured.is_configured() {
        debug!(
            "Using configured task_struct offsets: real_parent={}, tgid={}",
            configured.real_parent, configured.tgid
        );
        return (configured, OffsetSource::Config);
    }

    match load_task_offsets(Path::new(VMLINUX_BTF)) {
        Ok(offsets) => {
            info!(
                "task_struct offsets from BTF: real_parent={}, tgid={}",
                offsets.real_parent, offsets.tgid
            );
            (offsets, OffsetSource::Btf)
        }
        Err(e) => {
            warn!("Parent pid resolution disabled, ppid will be 0: {}", e);
            (TaskOffsets::default(), OffsetSource::Unresolved)
        }
    }
}
