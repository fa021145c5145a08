// SIMD-Optimized Byte Signature Search
// Uses AVX2/SSE4.2 first-byte filtering with a scalar fallback

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

/// SIMD-accelerated pattern search with runtime dispatch
/// Returns offset of first match, or None
#[inline]
pub fn find_pattern_simd(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }

    // Short haystacks are not worth the vector setup
    if haystack.len() < 64 {
        return find_pattern_scalar(haystack, needle);
    }

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // Safety: We checked for AVX2 support via runtime detection.
            return unsafe { find_pattern_avx2(haystack, needle) };
        } else if is_x86_feature_detected!("sse4.2") {
            // Safety: We checked for SSE4.2 support via runtime detection.
            return unsafe { find_pattern_sse42(haystack, needle) };
        }
    }

    find_pattern_scalar(haystack, needle)
}

/// Scalar pattern search (fallback)
#[inline]
fn find_pattern_scalar(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// AVX2-accelerated search (32 bytes at a time)
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2")]
unsafe fn find_pattern_avx2(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let needle_len = needle.len();
    let first_byte_vec = _mm256_set1_epi8(needle[0] as i8);

    let mut i = 0;
    let end = haystack.len() - needle_len;

    while i + 32 <= end {
        let chunk = _mm256_loadu_si256(haystack.as_ptr().add(i) as *const __m256i);
        let mut mask = _mm256_movemask_epi8(_mm256_cmpeq_epi8(chunk, first_byte_vec)) as u32;

        while mask != 0 {
            let pos = i + mask.trailing_zeros() as usize;
            if &haystack[pos..pos + needle_len] == needle {
                return Some(pos);
            }
            mask &= mask - 1;
        }

        i += 32;
    }

    haystack[i..]
        .windows(needle_len)
        .position(|window| window == needle)
        .map(|pos| i + pos)
}

/// SSE4.2-accelerated search (16 bytes at a time)
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse4.2")]
unsafe fn find_pattern_sse42(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let needle_len = needle.len();
    let first_byte_vec = _mm_set1_epi8(needle[0] as i8);

    let mut i = 0;
    let end = haystack.len() - needle_len;

    while i + 16 <= end {
        let chunk = _mm_loadu_si128(haystack.as_ptr().add(i) as *const __m128i);
        let mut mask = _mm_movemask_epi8(_mm_cmpeq_epi8(chunk, first_byte_vec)) as u32;

        while mask != 0 {
            let pos = i + mask.trailing_zeros() as usize;
            if &haystack[pos..pos + needle_len] == needle {
                return Some(pos);
            }
            mask &= mask - 1;
        }

        i += 16;
    }

    haystack[i..]
        .windows(needle_len)
        .position(|window| window == needle)
        .map(|pos| i + pos)
}

/// A byte signature with optional don't-care positions.
///
/// Without wildcards this is a plain substring search. With wildcards the
/// longest literal run is used as the SIMD anchor and every anchor hit is
/// verified against the remaining literal bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    bytes: Vec<u8>,
    wildcard: Vec<bool>,
    anchor_start: usize,
    anchor_len: usize,
}

impl BytePattern {
    pub fn exact(bytes: &[u8]) -> Self {
        Self::with_wildcards(bytes, &[])
    }

    /// Offsets outside the fragment are ignored.
    pub fn with_wildcards(bytes: &[u8], wildcard_offsets: &[usize]) -> Self {
        let mut wildcard = vec![false; bytes.len()];
        for &offset in wildcard_offsets {
            if offset < wildcard.len() {
                wildcard[offset] = true;
            }
        }

        let (mut anchor_start, mut anchor_len) = (0, 0);
        let mut run_start = 0;
        for i in 0..=bytes.len() {
            let literal = i < bytes.len() && !wildcard[i];
            if !literal {
                if i - run_start > anchor_len {
                    anchor_start = run_start;
                    anchor_len = i - run_start;
                }
                run_start = i + 1;
            }
        }

        Self {
            bytes: bytes.to_vec(),
            wildcard,
            anchor_start,
            anchor_len,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_exact(&self) -> bool {
        !self.wildcard.iter().any(|&w| w)
    }

    /// Offset of the first occurrence in `haystack`
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        if self.bytes.is_empty() || haystack.len() < self.bytes.len() {
            return None;
        }
        if self.is_exact() {
            return find_pattern_simd(haystack, &self.bytes);
        }
        if self.anchor_len == 0 {
            // every position is a wildcard
            return Some(0);
        }

        let anchor = &self.bytes[self.anchor_start..self.anchor_start + self.anchor_len];
        let last_start = haystack.len() - self.bytes.len();
        let mut search_from = self.anchor_start;

        while search_from < haystack.len() {
            let hit = search_from + find_pattern_simd(&haystack[search_from..], anchor)?;
            let start = hit - self.anchor_start;
            if start > last_start {
                return None;
            }
            if self.matches_at(haystack, start) {
                return Some(start);
            }
            search_from = hit + 1;
        }

        None
    }

    fn matches_at(&self, haystack: &[u8], start: usize) -> bool {
        self.bytes
            .iter()
            .zip(&self.wildcard)
            .zip(&haystack[start..start + self.bytes.len()])
            .all(|((&expected, &wild), &actual)| wild || expected == actual)
    }
}
