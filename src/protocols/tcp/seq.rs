//! Comparisons in sequence space, which wraps around at 2**32.

/// a < b in sequence space
pub fn seq_lt(a: u32, b: u32) -> bool {
    // k is on the opposite side of the ring from b
    let k = b.wrapping_add(u32::MAX / 2);
    (a < b) ^ (a < k) ^ (b < k)
}

/// a <= b in sequence space
pub fn seq_leq(a: u32, b: u32) -> bool {
    seq_lt(a, b.wrapping_add(1))
}

/// a > b in sequence space
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// The later of two sequence numbers.
pub fn seq_max(a: u32, b: u32) -> u32 {
    if seq_lt(a, b) {
        b
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_wrap() {
        // 2**31 = 2_147_483_648
        assert!(seq_lt(10, 20));
        assert!(!seq_lt(20, 10));
        assert!(seq_lt(2_000_000_000, 3_000_000_000));
        assert!(seq_lt(3_000_000_000, 4_000_000_000));
        assert!(!seq_lt(4_000_000_000, 3_000_000_000));
        assert!(seq_lt(u32::MAX - 5, 5));

        assert!(!seq_lt(5, 5));
        assert!(seq_leq(5, 5));
        assert!(seq_gt(20, 10));
        assert!(!seq_gt(5, 5));
        assert_eq!(seq_max(u32::MAX, 3), 3);
    }
}
