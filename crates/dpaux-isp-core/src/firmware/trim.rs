//! Padding helpers for fixed-size flash regions.

/// Length of `region` once trailing 0xFF fill bytes are stripped.
///
/// Flash regions are shipped at their full allocated size and padded with the
/// erased-flash value; only the trimmed prefix has to be transferred.
pub fn trimmed_len(region: &[u8]) -> usize {
    region
        .iter()
        .rposition(|&b| b != 0xFF)
        .map_or(0, |last| last + 1)
}

/// The trimmed prefix of `region`.
pub fn trim_padding(region: &[u8]) -> &[u8] {
    &region[..trimmed_len(region)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_strips_trailing_fill() {
        let mut buf = vec![0x5Au8; 100];
        buf[60..].fill(0xFF);
        assert_eq!(trimmed_len(&buf), 60);

        // 0xFF inside the data is kept
        buf[10] = 0xFF;
        assert_eq!(trimmed_len(&buf), 60);
        assert_eq!(trim_padding(&buf).len(), 60);
    }

    #[test]
    fn test_trim_edges() {
        assert_eq!(trimmed_len(&[]), 0);
        assert_eq!(trimmed_len(&[0xFF; 4096]), 0);
        assert_eq!(trimmed_len(&[0x00]), 1);
        assert_eq!(trimmed_len(&[0xFF, 0xFF, 0x00]), 3);
    }

    #[test]
    fn test_trim_property_over_lengths() {
        for n in 1..40usize {
            for k in 0..n {
                let mut buf = vec![0x11u8; n];
                buf[n - k..].fill(0xFF);
                assert_eq!(trimmed_len(&buf), n - k, "n={} k={}", n, k);
            }
        }
    }
}
