//! Which programs attach where

use crate::config::CaptureSettings;
use sysprobe_common::names;

/// One tracepoint attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracepointSpec {
    /// Program name in the eBPF object
    pub program: &'static str,
    pub category: &'static str,
    pub name: &'static str,
    /// A required attachment failing aborts startup
    pub required: bool,
}

const fn syscall(program: &'static str, name: &'static str, required: bool) -> TracepointSpec {
    TracepointSpec {
        program,
        category: "syscalls",
        name,
        required,
    }
}

/// Tracepoints for process events
pub static PROCESS_TRACEPOINTS: &[TracepointSpec] = &[
    syscall(names::TRACE_EXECVE, "sys_enter_execve", true),
    syscall(names::TRACE_EXECVEAT, "sys_enter_execveat", true),
];

/// Tracepoints for file events. arm64 has no open(2).
pub static FILE_TRACEPOINTS: &[TracepointSpec] = &[
    syscall(names::TRACE_OPENAT, "sys_enter_openat", true),
    syscall(names::TRACE_OPEN, "sys_enter_open", false),
];

/// Tracepoints for network events. Socket creation must be attached
/// before connect so that protocols are known for new sockets.
pub static NETWORK_TRACEPOINTS: &[TracepointSpec] = &[
    syscall(names::TRACE_SOCKET_ENTER, "sys_enter_socket", true),
    syscall(names::TRACE_SOCKET_EXIT, "sys_exit_socket", true),
    syscall(names::TRACE_CONNECT, "sys_enter_connect", true),
];

/// Attachments for the enabled probe groups, in attach order
pub fn attach_plan(settings: &CaptureSettings) -> Vec<TracepointSpec> {
    let groups = [
        (settings.process, PROCESS_TRACEPOINTS),
        (settings.file, FILE_TRACEPOINTS),
        (settings.network, NETWORK_TRACEPOINTS),
    ];
    groups
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .flat_map(|(_, specs)| specs.iter().copied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(process: bool, file: bool, network: bool) -> CaptureSettings {
        CaptureSettings {
            process,
            file,
            network,
            ..Default::default()
        }
    }

    #[test]
    fn test_full_plan() {
        let plan = attach_plan(&settings(true, true, true));
        assert_eq!(plan.len(), 7);
        let programs: Vec<&str> = plan.iter().map(|s| s.program).collect();
        assert_eq!(
            programs,
            vec![
                "trace_execve",
                "trace_execveat",
                "trace_openat",
                "trace_open",
                "trace_socket_enter",
                "trace_socket_exit",
                "trace_connect",
            ]
        );
    }

    #[test]
    fn test_network_only_plan() {
        let plan = attach_plan(&settings(false, false, true));
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(|s| s.required));
        assert_eq!(plan[2].name, "sys_enter_connect");
    }

    #[test]
    fn test_open_is_the_only_optional_attachment() {
        let optional: Vec<&str> = attach_plan(&settings(true, true, true))
            .iter()
            .filter(|s| !s.required)
            .map(|s| s.name)
            .collect();
        assert_eq!(optional, vec!["sys_enter_open"]);
    }

    #[test]
    fn test_socket_exit_is_an_exit_tracepoint() {
        let exit = NETWORK_TRACEPOINTS
            .iter()
            .find(|s| s.program == names::TRACE_SOCKET_EXIT);
        assert_eq!(exit.map(|s| s.name), Some("sys_exit_socket"));
        assert!(NETWORK_TRACEPOINTS.iter().all(|s| s.category == "syscalls"));
    }
}
