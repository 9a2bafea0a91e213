use super::{Capture, CaptureResult, Outcome};
use crate::channel::{EventChannel, EventSlot};
use crate::event::{EventKind, ExecRecord};
use crate::memory::ForeignMemory;
use crate::task::TaskIdentity;
use crate::MAX_ARGS;

const POINTER_SIZE: u64 = core::mem::size_of::<u64>() as u64;

/// Arguments of execve / execveat
#[derive(Clone, Copy, Debug)]
pub struct ExecCall {
    /// `const char *pathname`
    pub filename: u64,
    /// `const char *const argv[]`
    pub argv: u64,
    /// Join argv into the record instead of copying the path only
    pub capture_argv: bool,
}

impl<'a, C, M, T> Capture<'a, C, M, T>
where
    C: EventChannel + ?Sized,
    M: ForeignMemory + ?Sized,
    T: TaskIdentity + ?Sized,
{
    /// Process-start capture. Always submits once a slot was reserved.
    pub fn exec(&self, call: &ExecCall) -> CaptureResult {
        let mut slot = self.begin(EventKind::ProcessStart)?;
        let mut record = ExecRecord::new(slot.event_mut());
        let dst = record.command_line_mut();

        let written = if call.capture_argv {
            reconstruct_command_line(self.memory, call.argv, dst)
        } else {
            0
        };

        if written == 0 && call.filename != 0 {
            let _ = self.memory.read_foreign_str(call.filename, dst);
        }

        slot.submit();
        Ok(Outcome::Submitted)
    }
}

/// Join up to [`MAX_ARGS`] argv strings into `dst`, space separated.
///
/// Stops at the NULL terminator or at the first unreadable pointer slot.
/// Returns the offset of the terminator, 0 if nothing was captured.
#[inline(always)]
pub fn reconstruct_command_line<M: ForeignMemory + ?Sized>(
    memory: &M,
    argv: u64,
    dst: &mut [u8],
) -> usize {
    let mut off = 0;
    for i in 0..MAX_ARGS {
        let slot = argv.wrapping_add(i as u64 * POINTER_SIZE);
        let Ok(arg) = memory.read_pointer(slot) else {
            break;
        };
        if arg == 0 {
            break;
        }
        off = append_arg(memory, dst, arg, off);
    }
    off
}

/// Append one argument at `off`, preceded by a space unless it is the first.
///
/// `dst[dst.len() - 1]` is never written so the field stays terminated. A
/// string that does not fit is truncated; one that cannot be read leaves
/// `dst` as it was, including the separator. `[curl, <fault>, example.com]`
/// therefore joins to `curl example.com`, never `curl  example.com`.
#[inline(always)]
pub fn append_arg<M: ForeignMemory + ?Sized>(
    memory: &M,
    dst: &mut [u8],
    src: u64,
    off: usize,
) -> usize {
    let limit = dst.len().saturating_sub(1);
    if off >= limit {
        return off;
    }

    let mut start = off;
    if off > 0 {
        dst[off] = b' ';
        start += 1;
        if start >= limit {
            return start;
        }
    }

    match memory.read_foreign_str(src, &mut dst[start..]) {
        Ok(copied) => start + copied,
        Err(_) => {
            if start > off {
                dst[off] = 0;
            }
            off
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::sim::{SimChannel, SimMemory, SimTask};
    use crate::FILENAME_LEN;
    use std::string::String;
    use std::vec::Vec;

    fn only_event(channel: &SimChannel) -> Event {
        let mut events = channel.drain_events();
        assert_eq!(events.len(), 1);
        events.remove(0)
    }

    fn capture_exec(memory: &SimMemory, call: ExecCall) -> Event {
        let channel = SimChannel::with_records(4);
        let task = SimTask::new(300, Some(1), "sh");
        let outcome = Capture::new(&channel, memory, &task).exec(&call);
        assert_eq!(outcome, Ok(Outcome::Submitted));
        only_event(&channel)
    }

    #[test]
    fn test_joins_arguments() {
        let mut memory = SimMemory::new();
        let path = memory.alloc_str("/bin/ls");
        let argv = memory.alloc_argv(&["/bin/ls", "-la", "/tmp"]);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: path,
                argv,
                capture_argv: true,
            },
        );

        assert_eq!(event.kind(), Some(EventKind::ProcessStart));
        assert_eq!(event.pid, 300);
        assert_eq!(event.ppid, 1);
        assert_eq!(event.comm_bytes(), b"sh");
        assert_eq!(event.filename_bytes(), b"/bin/ls -la /tmp");
    }

    #[test]
    fn test_stops_after_max_args() {
        let mut memory = SimMemory::new();
        let args: Vec<String> = (0..12).map(|i| std::format!("a{i}")).collect();
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let argv = memory.alloc_argv(&args);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: 0,
                argv,
                capture_argv: true,
            },
        );

        assert_eq!(event.filename_bytes(), b"a0 a1 a2 a3 a4 a5 a6 a7");
    }

    #[test]
    fn test_truncates_mid_argument() {
        let mut memory = SimMemory::new();
        let long = "x".repeat(300);
        let argv = memory.alloc_argv(&["/usr/bin/env", &long, "tail"]);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: 0,
                argv,
                capture_argv: true,
            },
        );

        let captured = event.filename_bytes();
        assert_eq!(captured.len(), FILENAME_LEN - 1);
        assert_eq!(event.filename[FILENAME_LEN - 1], 0);
        assert!(captured.starts_with(b"/usr/bin/env xxx"));
        assert!(captured[13..].iter().all(|&b| b == b'x'));
    }

    #[test]
    fn test_unreadable_argv_falls_back_to_path() {
        let mut memory = SimMemory::new();
        let path = memory.alloc_str("/usr/bin/python3");

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: path,
                argv: 0xdead_0000,
                capture_argv: true,
            },
        );

        assert_eq!(event.filename_bytes(), b"/usr/bin/python3");
    }

    #[test]
    fn test_unreadable_pointer_keeps_partial_result() {
        let mut memory = SimMemory::new();
        let first = memory.alloc_str("make");
        let second = memory.alloc_str("-j8");
        // Two readable slots, then the array runs into unmapped memory.
        let argv = memory.alloc_pointers(&[first, second]);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: 0,
                argv,
                capture_argv: true,
            },
        );

        assert_eq!(event.filename_bytes(), b"make -j8");
    }

    #[test]
    fn test_faulting_argument_adds_no_separator() {
        let mut memory = SimMemory::new();
        let first = memory.alloc_str("curl");
        let third = memory.alloc_str("example.com");
        let argv = memory.alloc_pointers(&[first, 0xbad0_0000, third, 0]);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: 0,
                argv,
                capture_argv: true,
            },
        );

        assert_eq!(event.filename_bytes(), b"curl example.com");
    }

    #[test]
    fn test_path_only_when_argv_capture_disabled() {
        let mut memory = SimMemory::new();
        let path = memory.alloc_str("/bin/ls");
        let argv = memory.alloc_argv(&["ls", "-la"]);

        let event = capture_exec(
            &memory,
            ExecCall {
                filename: path,
                argv,
                capture_argv: false,
            },
        );

        assert_eq!(event.filename_bytes(), b"/bin/ls");
    }

    #[test]
    fn test_submits_with_nothing_readable() {
        let memory = SimMemory::new();
        let event = capture_exec(
            &memory,
            ExecCall {
                filename: 0x1,
                argv: 0x2,
                capture_argv: true,
            },
        );

        assert_eq!(event.pid, 300);
        assert!(event.filename_bytes().is_empty());
    }

    #[test]
    fn test_full_channel_captures_nothing() {
        let mut memory = SimMemory::new();
        let argv = memory.alloc_argv(&["true"]);
        let channel = SimChannel::with_records(0);
        let task = SimTask::new(1, None, "x");

        let outcome = Capture::new(&channel, &memory, &task).exec(&ExecCall {
            filename: 0,
            argv,
            capture_argv: true,
        });

        assert!(outcome.is_err());
        assert!(channel.drain_events().is_empty());
    }
}
