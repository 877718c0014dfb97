//! Mock AUX transport for testing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::{AuxTransport, TransportError};

/// Sparse DPCD register file. Unwritten registers read as zero.
#[derive(Debug, Default, Clone)]
pub struct MockRegisters {
    bytes: BTreeMap<u32, u8>,
}

impl MockRegisters {
    pub fn get(&self, offset: u32) -> u8 {
        self.bytes.get(&offset).copied().unwrap_or(0)
    }

    pub fn set(&mut self, offset: u32, value: u8) {
        self.bytes.insert(offset, value);
    }

    pub fn load(&mut self, offset: u32, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.set(offset + i as u32, *b);
        }
    }

    pub fn slice(&self, offset: u32, len: usize) -> Vec<u8> {
        (0..len as u32).map(|i| self.get(offset + i)).collect()
    }
}

/// A register access observed by the mock, handed to the responder.
#[derive(Debug)]
pub enum MockAccess<'a> {
    /// About to serve a read.
    Read { offset: u32, len: usize },
    /// A write has just been applied to the register file.
    Write { offset: u32, data: &'a [u8] },
}

/// Device simulation hook.
pub type Responder = Box<dyn FnMut(&mut MockRegisters, &MockAccess<'_>) + Send>;

/// Mock transport for unit testing engine logic.
#[derive(Clone)]
pub struct MockTransport {
    /// Simulated register space.
    registers: Arc<Mutex<MockRegisters>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
    /// Optional device model reacting to accesses.
    responder: Arc<Mutex<Option<Responder>>>,
    /// Offsets whose writes fail.
    write_faults: Arc<Mutex<HashSet<u32>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            registers: Arc::new(Mutex::new(MockRegisters::default())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            write_faults: Arc::new(Mutex::new(HashSet::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Install a device model called on every access.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&mut MockRegisters, &MockAccess<'_>) + Send + 'static,
    {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Preset a register byte.
    pub fn set_register(&self, offset: u32, value: u8) {
        lock(&self.registers).set(offset, value);
    }

    /// Preset a range of registers.
    pub fn load(&self, offset: u32, data: &[u8]) {
        lock(&self.registers).load(offset, data);
    }

    /// Current value of a register byte.
    pub fn register(&self, offset: u32) -> u8 {
        lock(&self.registers).get(offset)
    }

    /// Get all captured writes as (offset, data) pairs.
    pub fn get_writes(&self) -> Vec<(u32, Vec<u8>)> {
        lock(&self.write_log).clone()
    }

    /// Captured writes that targeted exactly `offset`.
    pub fn writes_to(&self, offset: u32) -> Vec<Vec<u8>> {
        lock(&self.write_log)
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, d)| d.clone())
            .collect()
    }

    /// Captured writes that landed in `[start, end)`.
    pub fn writes_in(&self, start: u32, end: u32) -> Vec<(u32, Vec<u8>)> {
        lock(&self.write_log)
            .iter()
            .filter(|(o, _)| *o >= start && *o < end)
            .cloned()
            .collect()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        lock(&self.write_log).clear();
    }

    /// Make every write to `offset` fail.
    pub fn fail_writes_at(&self, offset: u32) {
        lock(&self.write_faults).insert(offset);
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }

    pub fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AuxTransport for MockTransport {
    fn read(&self, offset: u32, length: usize) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let mut responder = lock(&self.responder);
        let mut registers = lock(&self.registers);
        if let Some(respond) = responder.as_mut() {
            respond(&mut *registers, &MockAccess::Read { offset, len: length });
        }
        Ok(registers.slice(offset, length))
    }

    fn write(&self, offset: u32, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        if lock(&self.write_faults).contains(&offset) {
            return Err(TransportError::WriteFailed {
                offset,
                len: data.len(),
                message: "injected fault".into(),
            });
        }
        lock(&self.write_log).push((offset, data.to_vec()));
        let mut responder = lock(&self.responder);
        let mut registers = lock(&self.registers);
        registers.load(offset, data);
        if let Some(respond) = responder.as_mut() {
            respond(&mut *registers, &MockAccess::Write { offset, data });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_register_file() {
        let mock = MockTransport::new();
        mock.write(0x300, &[0x00, 0x60, 0xAD]).unwrap();

        assert_eq!(mock.read(0x300, 3).unwrap(), vec![0x00, 0x60, 0xAD]);
        // Unwritten registers read back as zero
        assert_eq!(mock.read(0x303, 2).unwrap(), vec![0, 0]);
        assert_eq!(mock.read_u8(0x302).unwrap(), 0xAD);
    }

    #[test]
    fn test_mock_write_capture() {
        let mock = MockTransport::new();
        mock.write_u8(0x50D, 0xA4).unwrap();
        mock.write(0x80000, b"Hello").unwrap();

        let writes = mock.get_writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], (0x50D, vec![0xA4]));
        assert_eq!(mock.writes_to(0x80000), vec![b"Hello".to_vec()]);

        mock.clear_writes();
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_mock_responder_sees_writes() {
        let mock = MockTransport::new();
        mock.set_responder(|regs, access| {
            if let MockAccess::Write { offset: 0x50D, data } = access {
                regs.set(0x50D, data[0] & 0x7F);
            }
        });

        mock.write_u8(0x50D, 0xA5).unwrap();
        assert_eq!(mock.register(0x50D), 0x25);
    }

    #[test]
    fn test_mock_faults_and_disconnect() {
        let mock = MockTransport::new();
        mock.fail_writes_at(0x50D);
        assert!(mock.write_u8(0x50D, 1).is_err());
        assert!(mock.write_u8(0x50E, 1).is_ok());

        mock.disconnect();
        assert!(!mock.is_connected());
        assert!(matches!(
            mock.read(0x50E, 1),
            Err(TransportError::Disconnected)
        ));

        mock.reconnect();
        assert_eq!(mock.read_u8(0x50E).unwrap(), 1);
    }
}
