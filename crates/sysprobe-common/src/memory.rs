//! Reads from the instrumented process's address space

/// The source range could not be read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadFailure;

/// Access to memory the capturing code does not own and which may change
/// underneath it. Failures are expected and never fatal.
pub trait ForeignMemory {
    /// Fill `dst` entirely from `src`.
    fn read_foreign(&self, src: u64, dst: &mut [u8]) -> Result<(), ReadFailure>;

    /// Copy the NUL-terminated string at `src` into `dst`, keeping at most
    /// `dst.len() - 1` bytes and always writing a terminator. Returns the
    /// number of bytes copied, terminator excluded. On failure `dst` is
    /// zero-filled.
    fn read_foreign_str(&self, src: u64, dst: &mut [u8]) -> Result<usize, ReadFailure>;

    /// Read one pointer-sized slot (64-bit tasks only)
    fn read_pointer(&self, src: u64) -> Result<u64, ReadFailure> {
        let mut raw = [0u8; 8];
        self.read_foreign(src, &mut raw)?;
        Ok(u64::from_ne_bytes(raw))
    }
}
