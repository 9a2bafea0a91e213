use super::{Capture, CaptureResult, Outcome};
use crate::channel::{EventChannel, EventSlot};
use crate::event::{EventKind, OpenRecord};
use crate::memory::ForeignMemory;
use crate::task::TaskIdentity;

/// Arguments of open / openat
#[derive(Clone, Copy, Debug)]
pub struct OpenCall {
    /// `const char *pathname`
    pub path: u64,
    /// `int flags`
    pub flags: u32,
}

impl<'a, C, M, T> Capture<'a, C, M, T>
where
    C: EventChannel + ?Sized,
    M: ForeignMemory + ?Sized,
    T: TaskIdentity + ?Sized,
{
    /// File-open capture. The path is the payload, so whatever was copied
    /// (possibly nothing) is submitted.
    pub fn open(&self, call: &OpenCall) -> CaptureResult {
        let mut slot = self.begin(EventKind::FileOpen)?;
        let mut record = OpenRecord::new(slot.event_mut());
        record.set_flags(call.flags);
        let _ = self.memory.read_foreign_str(call.path, record.path_mut());

        slot.submit();
        Ok(Outcome::Submitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimChannel, SimMemory, SimTask};
    use crate::FILENAME_LEN;

    const O_WRONLY: u32 = 0o1;
    const O_CREAT: u32 = 0o100;
    const O_TRUNC: u32 = 0o1000;

    #[test]
    fn test_captures_path_and_flags() {
        let mut memory = SimMemory::new();
        let path = memory.alloc_str("/etc/passwd");
        let channel = SimChannel::with_records(4);
        let task = SimTask::new(55, Some(54), "cat");

        let outcome = Capture::new(&channel, &memory, &task).open(&OpenCall {
            path,
            flags: O_WRONLY | O_CREAT | O_TRUNC,
        });

        assert_eq!(outcome, Ok(Outcome::Submitted));
        let events = channel.drain_events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.kind(), Some(EventKind::FileOpen));
        assert_eq!(event.pid, 55);
        assert_eq!(event.ppid, 54);
        assert_eq!(event.filename_bytes(), b"/etc/passwd");
        assert_eq!(event.flags, O_WRONLY | O_CREAT | O_TRUNC);
        assert!(event.is_write());
        assert!(event.is_create());
        assert_eq!(event.port, 0);
        assert_eq!(event.addr_family, 0);
    }

    #[test]
    fn test_truncates_long_path() {
        let mut memory = SimMemory::new();
        let long = "/a".repeat(400);
        let path = memory.alloc_str(&long);
        let channel = SimChannel::with_records(1);
        let task = SimTask::new(1, Some(0), "find");

        Capture::new(&channel, &memory, &task)
            .open(&OpenCall { path, flags: 0 })
            .unwrap();

        let event = channel.drain_events().remove(0);
        assert_eq!(event.filename_bytes().len(), FILENAME_LEN - 1);
        assert_eq!(event.filename[FILENAME_LEN - 1], 0);
        assert_eq!(event.filename_bytes(), &long.as_bytes()[..FILENAME_LEN - 1]);
    }

    #[test]
    fn test_unreadable_path_still_submits() {
        let memory = SimMemory::new();
        let channel = SimChannel::with_records(1);
        let task = SimTask::new(8, Some(2), "daemon");

        let outcome = Capture::new(&channel, &memory, &task).open(&OpenCall {
            path: 0x4000_0000,
            flags: 0,
        });

        assert_eq!(outcome, Ok(Outcome::Submitted));
        let event = channel.drain_events().remove(0);
        assert_eq!(event.comm_bytes(), b"daemon");
        assert!(event.filename_bytes().is_empty());
    }
}
