use std::ops::AddAssign;

/// Diagnostic counters kept by every engine.
///
/// They are never consulted by the arithmetic itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArithStats {
    /// Products whose integer part overflowed the format.
    pub multiply_carries: u64,
    /// Additions that saturated to the maximum integer value.
    pub add_carries: u64,
    /// 64-bit partial products split into 32-bit halves.
    pub splits: u64,
    /// Carry propagation passes over a set of partial-product bins.
    pub carry_passes: u64,
    /// Comparisons against the escape threshold.
    pub threshold_comparisons: u64,
}

impl AddAssign for ArithStats {
    fn add_assign(&mut self, rhs: Self) {
        self.multiply_carries += rhs.multiply_carries;
        self.add_carries += rhs.add_carries;
        self.splits += rhs.splits;
        self.carry_passes += rhs.carry_passes;
        self.threshold_comparisons += rhs.threshold_comparisons;
    }
}
