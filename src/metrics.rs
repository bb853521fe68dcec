//! Population metrics.
//!
//! Higher-order entropy is the signal used to spot the emergence of
//! self-replicators: Shannon entropy of the byte population minus a
//! Brotli-based Kolmogorov complexity estimate. A random soup scores
//! near zero; a soup dominated by copies of one program scores high
//! because it stays high-entropy per byte yet compresses extremely well.

use brotli::enc::BrotliEncoderParams;

/// Shannon entropy of a byte string, in bits per byte
pub fn shannon_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }

    let mut counts = [0usize; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }

    let len = bytes.len() as f64;
    let mut entropy = 0.0;
    for &count in counts.iter() {
        if count > 0 {
            let frequency = count as f64 / len;
            entropy += frequency * frequency.log2();
        }
    }
    -entropy
}

/// Kolmogorov complexity estimate via Brotli, in bits per byte.
///
/// 8.0 means incompressible; 0.0 means fully compressible. Compression
/// failure reports maximum complexity.
pub fn kolmogorov_estimate(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }

    let mut compressed = Vec::new();
    let params = BrotliEncoderParams::default();

    match brotli::BrotliCompress(&mut std::io::Cursor::new(bytes), &mut compressed, &params) {
        Ok(_) => (compressed.len() as f64 / bytes.len() as f64) * 8.0,
        Err(_) => 8.0,
    }
}

/// Higher-order entropy: Shannon entropy minus the complexity estimate
pub fn higher_order_entropy(bytes: &[u8]) -> f64 {
    shannon_entropy(bytes) - kolmogorov_estimate(bytes)
}

/// Levenshtein distance normalized by the longer length
pub fn normalized_edit_distance(s1: &[u8], s2: &[u8]) -> f64 {
    let len1 = s1.len();
    let len2 = s2.len();

    if len1 == 0 && len2 == 0 {
        return 0.0;
    }
    if len1 == 0 || len2 == 0 {
        return 1.0;
    }

    let mut prev: Vec<usize> = (0..=len2).collect();
    let mut curr = vec![0usize; len2 + 1];

    for i in 1..=len1 {
        curr[0] = i;
        for j in 1..=len2 {
            curr[j] = if s1[i - 1] == s2[j - 1] {
                prev[j - 1]
            } else {
                1 + prev[j].min(curr[j - 1]).min(prev[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[len2] as f64 / len1.max(len2) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_of_uniform_bytes_is_zero() {
        assert_eq!(shannon_entropy(&[b'A'; 1024]), 0.0);
    }

    #[test]
    fn entropy_of_all_byte_values_is_eight_bits() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert!((shannon_entropy(&bytes) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn empty_input_scores_zero() {
        assert_eq!(shannon_entropy(&[]), 0.0);
        assert_eq!(kolmogorov_estimate(&[]), 0.0);
        assert_eq!(higher_order_entropy(&[]), 0.0);
    }

    #[test]
    fn repetitive_data_compresses_well() {
        let repeated: Vec<u8> = b"[[{.>]-].".iter().copied().cycle().take(4096).collect();
        assert!(kolmogorov_estimate(&repeated) < 1.0);
    }

    #[test]
    fn replicator_dominated_soup_has_high_hoe() {
        // many copies of one "program" vs. pure repetition of one byte
        let copies: Vec<u8> = b"}<]-].{[[>.".iter().copied().cycle().take(8192).collect();
        let flat = vec![b'q'; 8192];
        assert!(higher_order_entropy(&copies) > higher_order_entropy(&flat));
    }

    #[test]
    fn edit_distance_basics() {
        assert_eq!(normalized_edit_distance(b"", b""), 0.0);
        assert_eq!(normalized_edit_distance(b"abc", b""), 1.0);
        assert_eq!(normalized_edit_distance(b"abc", b"abc"), 0.0);
        assert!((normalized_edit_distance(b"abcd", b"abce") - 0.25).abs() < 1e-9);
    }
}
