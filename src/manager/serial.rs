//! RFC 1982 serial number arithmetic for 32-bit SOA serials.

const HALF: u32 = 1 << 31;

/// `a` is strictly newer than `b`
pub fn serial_gt(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < HALF
}

/// `a` is the same as or newer than `b`
pub fn serial_gte(a: u32, b: u32) -> bool {
    a == b || serial_gt(a, b)
}

/// Sort serials newest first by their distance ahead of `base`.
///
/// Every serial must satisfy `serial_gte(serial, base)`; within that window the
/// distance is a total order, wraparound included.
pub fn sort_newest_first(serials: &mut [u32], base: u32) {
    serials.sort_by_key(|s| std::cmp::Reverse(s.wrapping_sub(base)));
}
