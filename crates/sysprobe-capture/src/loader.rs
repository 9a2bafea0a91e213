//! Host checks before loading eBPF programs

use serde::Serialize;
use std::path::Path;
use tracing::warn;

/// Ring buffer maps need 5.8
pub const MIN_KERNEL: (u32, u32) = (5, 8);

const CAP_SYS_ADMIN: u32 = 21;
const CAP_PERFMON: u32 = 38;
const CAP_BPF: u32 = 39;

/// What the host offers for eBPF capture
#[derive(Debug, Clone, Serialize)]
pub struct Preflight {
    pub bpffs: bool,
    pub btf: bool,
    pub kernel: Option<(u32, u32, u32)>,
    pub root: bool,
    pub cap_bpf: bool,
    pub wsl: bool,
}

impl Preflight {
    /// Probe the running host
    pub fn detect() -> Self {
        Self {
            bpffs: Path::new("/sys/fs/bpf").exists(),
            btf: Path::new("/sys/kernel/btf/vmlinux").exists(),
            kernel: get_kernel_version(),
            root: is_root(),
            cap_bpf: has_cap_bpf(),
            wsl: is_wsl(),
        }
    }

    /// Conditions that prevent capture
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.bpffs {
            problems.push("BPF filesystem not mounted at /sys/fs/bpf".to_string());
        }
        match self.kernel {
            Some((major, minor, _)) if (major, minor) < MIN_KERNEL => problems.push(format!(
                "kernel {}.{} is older than {}.{} (no ring buffer maps)",
                major, minor, MIN_KERNEL.0, MIN_KERNEL.1
            )),
            Some(_) => {}
            None => problems.push("could not determine kernel version".to_string()),
        }
        if !self.root && !self.cap_bpf {
            problems.push("needs root or CAP_BPF + CAP_PERFMON".to_string());
        }
        problems
    }

    /// Conditions worth reporting that do not prevent capture
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.btf {
            warnings.push("BTF not available at /sys/kernel/btf/vmlinux".to_string());
        }
        if self.wsl {
            warnings.push("WSL kernel: argv capture disabled unless forced".to_string());
        }
        warnings
    }

    pub fn is_ready(&self) -> bool {
        self.problems().is_empty()
    }
}

/// Kernel version from /proc
pub fn get_kernel_version() -> Option<(u32, u32, u32)> {
    let release = std::fs::read_to_string("/proc/sys/kernel/osrelease").ok()?;
    parse_kernel_release(&release)
}

/// Parse a release string such as `6.8.0-45-generic` or
/// `5.15.153.1-microsoft-standard-WSL2`
pub fn parse_kernel_release(release: &str) -> Option<(u32, u32, u32)> {
    let parts: Vec<&str> = release.trim().split('.').collect();

    if parts.len() >= 2 {
        let major = parts[0].parse().ok()?;
        let minor = parts[1].split('-').next()?.parse().ok()?;
        let patch = parts
            .get(2)
            .and_then(|p| p.split('-').next())
            .and_then(|p| p.parse().ok())
            .unwrap_or(0);

        Some((major, minor, patch))
    } else {
        None
    }
}

/// Check if running as root
#[cfg(target_os = "linux")]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(target_os = "linux"))]
pub fn is_root() -> bool {
    false
}

/// Check for CAP_BPF and CAP_PERFMON (or CAP_SYS_ADMIN on older kernels)
pub fn has_cap_bpf() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| parse_effective_caps(&status))
        .map(caps_allow_bpf)
        .unwrap_or(false)
}

/// The `CapEff` mask from /proc/<pid>/status
pub fn parse_effective_caps(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("CapEff:"))?;
    let hex = line.trim_start_matches("CapEff:").trim();
    u64::from_str_radix(hex, 16).ok()
}

pub fn caps_allow_bpf(mask: u64) -> bool {
    let has = |cap: u32| mask & (1u64 << cap) != 0;
    has(CAP_SYS_ADMIN) || (has(CAP_BPF) && has(CAP_PERFMON))
}

/// Detect a WSL kernel
pub fn is_wsl() -> bool {
    ["/proc/version", "/proc/sys/kernel/osrelease"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .any(|text| mentions_microsoft(&text))
}

fn mentions_microsoft(text: &str) -> bool {
    text.to_lowercase().contains("microsoft")
}

/// Bump memlock rlimit for eBPF (required on older kernels)
#[cfg(target_os = "linux")]
pub fn bump_memlock_rlimit() -> bool {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to remove limit on locked memory (ret={})", ret);
        false
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_host() -> Preflight {
        Preflight {
            bpffs: true,
            btf: true,
            kernel: Some((6, 8, 0)),
            root: true,
            cap_bpf: true,
            wsl: false,
        }
    }

    #[test]
    fn test_parse_kernel_release() {
        assert_eq!(parse_kernel_release("6.8.0-45-generic\n"), Some((6, 8, 0)));
        assert_eq!(parse_kernel_release("5.15.153.1-microsoft-standard-WSL2"), Some((5, 15, 153)));
        assert_eq!(parse_kernel_release("6.1-rc3"), Some((6, 1, 0)));
        assert_eq!(parse_kernel_release("4.19.0"), Some((4, 19, 0)));
        assert_eq!(parse_kernel_release("linux"), None);
        assert_eq!(parse_kernel_release(""), None);
    }

    #[test]
    fn test_parse_effective_caps() {
        let status = "Name:\tsysprobe\nCapInh:\t0000000000000000\nCapEff:\t000001ffffffffff\n";
        assert_eq!(parse_effective_caps(status), Some(0x1ff_ffff_ffff));
        assert_eq!(parse_effective_caps("Name:\tx\n"), None);
    }

    #[test]
    fn test_caps_allow_bpf() {
        assert!(caps_allow_bpf(1 << CAP_SYS_ADMIN));
        assert!(caps_allow_bpf((1 << CAP_BPF) | (1 << CAP_PERFMON)));
        assert!(!caps_allow_bpf(1 << CAP_BPF));
        assert!(!caps_allow_bpf(0));
    }

    #[test]
    fn test_mentions_microsoft() {
        assert!(mentions_microsoft(
            "Linux version 5.15.153.1-microsoft-standard-WSL2 (root@1c602f52c2e4)"
        ));
        assert!(mentions_microsoft("5.4.72-Microsoft"));
        assert!(!mentions_microsoft("6.8.0-45-generic"));
    }

    #[test]
    fn test_ready_host_has_no_problems() {
        let host = ready_host();
        assert!(host.is_ready());
        assert!(host.warnings().is_empty());
    }

    #[test]
    fn test_old_kernel_is_a_problem() {
        let host = Preflight {
            kernel: Some((5, 4, 0)),
            ..ready_host()
        };
        assert!(!host.is_ready());
        assert!(host.problems()[0].contains("5.4"));
    }

    #[test]
    fn test_unprivileged_is_a_problem() {
        let host = Preflight {
            root: false,
            cap_bpf: false,
            ..ready_host()
        };
        assert_eq!(host.problems().len(), 1);

        let capable = Preflight {
            root: false,
            ..ready_host()
        };
        assert!(capable.is_ready());
    }

    #[test]
    fn test_missing_btf_and_wsl_only_warn() {
        let host = Preflight {
            btf: false,
            wsl: true,
            ..ready_host()
        };
        assert!(host.is_ready());
        assert_eq!(host.warnings().len(), 2);
    }
}
