//! Byte-addressable memory backing the engine.
//!
//! [`Ram`] is a plain linear store. [`MappedMemory`] puts a host supplied
//! get/set pair in front of a [`Ram`] so selected addresses can be redirected,
//! e.g. to memory-map a device.

use crate::virtual_machine::errors::VMError;

/// Load-store memory access used by the engine for instruction fetch and data reads.
pub trait Memory {
    /// Size of the addressable range in bytes.
    fn len(&self) -> u64;

    fn read_u8(&self, addr: u64) -> Result<u8, VMError>;

    fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), VMError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `out.len()` consecutive bytes starting at `addr`.
    fn read_bytes(&self, addr: u64, out: &mut [u8]) -> Result<(), VMError> {
        for (i, slot) in out.iter_mut().enumerate() {
            let at = addr.checked_add(i as u64).ok_or(VMError::MemoryOutOfBounds {
                addr,
                len: self.len(),
            })?;
            *slot = self.read_u8(at)?;
        }
        Ok(())
    }

    /// Writes `bytes` consecutively starting at `addr`.
    fn write_bytes(&mut self, addr: u64, bytes: &[u8]) -> Result<(), VMError> {
        for (i, b) in bytes.iter().enumerate() {
            let at = addr.checked_add(i as u64).ok_or(VMError::MemoryOutOfBounds {
                addr,
                len: self.len(),
            })?;
            self.write_u8(at, *b)?;
        }
        Ok(())
    }
}

/// Flat, bounds-checked byte array.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Ram(Vec<u8>);

impl Ram {
    /// Zero-filled memory of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self(vec![0; size])
    }

    /// Memory holding `program` at address 0, padded with zeros to at least `size` bytes.
    pub fn from_program(program: &[u8], size: usize) -> Self {
        let mut bytes = program.to_vec();
        if bytes.len() < size {
            bytes.resize(size, 0);
        }
        Self(bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Ram {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Memory for Ram {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_u8(&self, addr: u64) -> Result<u8, VMError> {
        usize::try_from(addr)
            .ok()
            .and_then(|i| self.0.get(i))
            .copied()
            .ok_or(VMError::MemoryOutOfBounds {
                addr,
                len: self.len(),
            })
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), VMError> {
        let len = self.len();
        let slot = usize::try_from(addr)
            .ok()
            .and_then(|i| self.0.get_mut(i))
            .ok_or(VMError::MemoryOutOfBounds { addr, len })?;
        *slot = value;
        Ok(())
    }
}

/// Host read hook: returns `Some(byte)` to override the backing store.
pub type ReadHook = Box<dyn Fn(&Ram, u64) -> Option<u8>>;
/// Host write hook: returns `true` if it consumed the write.
pub type WriteHook = Box<dyn FnMut(&mut Ram, u64, u8) -> bool>;

/// [`Ram`] fronted by a custom get/set pair.
///
/// Accesses the hooks decline fall through to the backing store, bounds checks included.
pub struct MappedMemory {
    backing: Ram,
    read: ReadHook,
    write: WriteHook,
}

impl MappedMemory {
    pub fn new(
        backing: Ram,
        read: impl Fn(&Ram, u64) -> Option<u8> + 'static,
        write: impl FnMut(&mut Ram, u64, u8) -> bool + 'static,
    ) -> Self {
        Self {
            backing,
            read: Box::new(read),
            write: Box::new(write),
        }
    }

    pub fn backing(&self) -> &Ram {
        &self.backing
    }
}

impl Memory for MappedMemory {
    fn len(&self) -> u64 {
        self.backing.len()
    }

    fn read_u8(&self, addr: u64) -> Result<u8, VMError> {
        match (self.read)(&self.backing, addr) {
            Some(b) => Ok(b),
            None => self.backing.read_u8(addr),
        }
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> Result<(), VMError> {
        if (self.write)(&mut self.backing, addr, value) {
            return Ok(());
        }
        self.backing.write_u8(addr, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn ram_bounds_checked() {
        let mut ram = Ram::with_size(4);
        ram.write_u8(3, 0xAB).unwrap();
        assert_eq!(ram.read_u8(3).unwrap(), 0xAB);
        assert!(matches!(
            ram.read_u8(4),
            Err(VMError::MemoryOutOfBounds { addr: 4, len: 4 })
        ));
        assert!(matches!(
            ram.write_u8(u64::MAX, 0),
            Err(VMError::MemoryOutOfBounds { .. })
        ));
    }

    #[test]
    fn ram_from_program_pads() {
        let ram = Ram::from_program(&[1, 2, 3], 8);
        assert_eq!(ram.as_slice(), &[1, 2, 3, 0, 0, 0, 0, 0]);
        let ram = Ram::from_program(&[1, 2, 3], 2);
        assert_eq!(ram.len(), 3);
    }

    #[test]
    fn multi_byte_access() {
        let mut ram = Ram::with_size(8);
        ram.write_bytes(2, &[9, 8, 7]).unwrap();
        let mut out = [0u8; 3];
        ram.read_bytes(2, &mut out).unwrap();
        assert_eq!(out, [9, 8, 7]);
        assert!(ram.write_bytes(6, &[1, 2, 3]).is_err());
    }

    #[test]
    fn mapped_memory_redirects_hooked_addresses() {
        let written = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&written);
        let mut mem = MappedMemory::new(
            Ram::with_size(16),
            |_, addr| (addr == 0x0F).then_some(0x42),
            move |_, addr, value| {
                if addr == 0x0E {
                    sink.borrow_mut().push(value);
                    true
                } else {
                    false
                }
            },
        );

        assert_eq!(mem.read_u8(0x0F).unwrap(), 0x42);
        mem.write_u8(0x0E, 7).unwrap();
        mem.write_u8(0x01, 5).unwrap();
        assert_eq!(*written.borrow(), vec![7]);
        assert_eq!(mem.backing().as_slice()[0x0E], 0);
        assert_eq!(mem.read_u8(0x01).unwrap(), 5);
        assert!(mem.read_u8(16).is_err());
    }
}
