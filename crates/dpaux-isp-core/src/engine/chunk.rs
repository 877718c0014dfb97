//! Payload slicing into AUX windows and transactions.
//!
//! A payload is sent in windows of up to 32 KiB, each written at the start
//! of the AUX window and split into 16-byte register writes. The last window
//! and the last transaction carry whatever remains, without padding.

use crate::protocol::constants::{AUX_TRANSACTION_SIZE, DPCD_ADDR_AUX_WIN, DPCD_SIZE_AUX_WIN};

/// One window's worth of payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window<'a> {
    /// Position of the window within the payload.
    pub offset: usize,
    pub data: &'a [u8],
}

impl<'a> Window<'a> {
    /// `(register offset, bytes)` for each AUX write of this window.
    pub fn transactions(&self) -> impl Iterator<Item = (u32, &'a [u8])> + 'a {
        self.data
            .chunks(AUX_TRANSACTION_SIZE)
            .enumerate()
            .map(|(i, chunk)| (DPCD_ADDR_AUX_WIN + (i * AUX_TRANSACTION_SIZE) as u32, chunk))
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Iterator over the windows of a payload.
#[derive(Debug, Clone)]
pub struct WindowIter<'a> {
    data: &'a [u8],
    window_size: usize,
    offset: usize,
}

impl<'a> WindowIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_window_size(data, DPCD_SIZE_AUX_WIN)
    }

    pub fn with_window_size(data: &'a [u8], window_size: usize) -> Self {
        Self {
            data,
            window_size: window_size.max(1),
            offset: 0,
        }
    }

    /// Number of windows, counting a partial last one.
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.window_size)
    }
}

impl<'a> Iterator for WindowIter<'a> {
    type Item = Window<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let len = (self.data.len() - self.offset).min(self.window_size);
        let window = Window {
            offset: self.offset,
            data: &self.data[self.offset..self.offset + len],
        };
        self.offset += len;
        Some(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
    }

    #[test]
    fn test_every_byte_once_in_order() {
        for len in [
            1,
            15,
            16,
            17,
            DPCD_SIZE_AUX_WIN,
            DPCD_SIZE_AUX_WIN + 1,
            3 * DPCD_SIZE_AUX_WIN + 5,
        ] {
            let data = payload(len);
            let mut rebuilt = Vec::with_capacity(len);
            let windows: Vec<_> = WindowIter::new(&data).collect();
            assert_eq!(windows.len(), len.div_ceil(DPCD_SIZE_AUX_WIN));

            for window in &windows {
                assert_eq!(window.offset, rebuilt.len());
                let mut expected_reg = DPCD_ADDR_AUX_WIN;
                for (reg, bytes) in window.transactions() {
                    assert_eq!(reg, expected_reg);
                    assert!(!bytes.is_empty() && bytes.len() <= AUX_TRANSACTION_SIZE);
                    expected_reg += bytes.len() as u32;
                    rebuilt.extend_from_slice(bytes);
                }
            }
            assert_eq!(rebuilt, data, "payload of {} bytes", len);
        }
    }

    #[test]
    fn test_last_window_not_padded() {
        let data = payload(DPCD_SIZE_AUX_WIN + 21);
        let iter = WindowIter::new(&data);
        assert_eq!(iter.total(), 2);

        let last = iter.last().unwrap();
        assert_eq!(last.len(), 21);
        let tx: Vec<_> = last.transactions().collect();
        assert_eq!(tx.len(), 2);
        assert_eq!(tx[1], (DPCD_ADDR_AUX_WIN + 16, &data[DPCD_SIZE_AUX_WIN + 16..]));
    }

    #[test]
    fn test_empty_payload() {
        let iter = WindowIter::new(&[]);
        assert_eq!(iter.total(), 0);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_custom_window_size() {
        let data = payload(100);
        let sizes: Vec<_> = WindowIter::with_window_size(&data, 32).map(|w| w.len()).collect();
        assert_eq!(sizes, vec![32, 32, 32, 4]);
    }
}
