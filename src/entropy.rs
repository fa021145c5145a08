/// Byte-distribution heuristics used to decide whether a candidate can be
/// viewed as text.
///
/// - Shannon entropy: H = -Σ(p_i * log2(p_i)) over a 256-bin histogram
/// - Control-byte ratio for binary detection

/// Entropy above which content is treated as compressed or encrypted
pub const COMPRESSED_ENTROPY: f32 = 7.5;

/// Share of non-text control bytes above which content is treated as binary
pub const BINARY_CONTROL_RATIO: f32 = 0.10;

/// Calculate Shannon entropy of data
/// Returns value between 0.0 (predictable) and 8.0 (random)
pub fn calculate_shannon_entropy(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }

    let mut histogram = [0u32; 256];
    for &byte in data {
        histogram[byte as usize] += 1;
    }

    let total = data.len() as f32;
    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let probability = count as f32 / total;
            -probability * probability.log2()
        })
        .sum()
}

/// Check if data appears compressed or random-like based on entropy
pub fn is_compressed_like(data: &[u8]) -> bool {
    calculate_shannon_entropy(data) > COMPRESSED_ENTROPY
}

/// Share of bytes that are control characters other than tab/CR/LF/FF/ESC
pub fn control_byte_ratio(data: &[u8]) -> f32 {
    if data.is_empty() {
        return 0.0;
    }
    let control = data
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C | 0x1B))
        .count();
    control as f32 / data.len() as f32
}

/// Heuristic binary detection: NUL-heavy, control-heavy, or high-entropy
/// content that is not valid UTF-8.
pub fn looks_binary(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    if control_byte_ratio(data) > BINARY_CONTROL_RATIO {
        return true;
    }
    std::str::from_utf8(data).is_err() && is_compressed_like(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(calculate_shannon_entropy(&[]), 0.0);
        assert_eq!(calculate_shannon_entropy(&[7u8; 512]), 0.0);

        let all_bytes: Vec<u8> = (0..=255u8).collect();
        let entropy = calculate_shannon_entropy(&all_bytes);
        assert!((entropy - 8.0).abs() < 0.001);
        assert!(is_compressed_like(&all_bytes));
    }

    #[test]
    fn test_text_is_not_binary() {
        let xml = b"<?xml version='1.0'?>\n<map>\n  <long name=\"time\" value=\"1704067200\" />\n</map>\n";
        assert!(!looks_binary(xml));
        assert!(!looks_binary("초기화 완료\r\n".as_bytes()));
    }

    #[test]
    fn test_binary_detection() {
        let mut sqlite = b"SQLite format 3\0".to_vec();
        sqlite.extend_from_slice(&[0u8; 128]);
        assert!(looks_binary(&sqlite));

        let all_bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        assert!(looks_binary(&all_bytes));
    }
}
