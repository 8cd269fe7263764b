/// Order-insensitive fingerprint of one target invocation.
///
/// The value is the wrapping sum of every step id the run passed through.
/// Two runs covering the same steps the same number of times collide even
/// when they take them in a different order; the key distinguishes
/// execution shapes, not paths.
pub type CoverageSignature = u64;

/// Accumulator the interpreter writes step ids into while a target runs.
///
/// One signal instance belongs to one harness; it is handed to the
/// interpreter as `&mut` for the duration of a single invocation, reset
/// before the call and read after it. Nothing about it is shared or global.
#[derive(Debug, Default, Clone)]
pub struct CoverageSignal {
    acc: u64,
}

impl CoverageSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears the accumulator ahead of an invocation.
    pub fn reset(&mut self) {
        self.acc = 0;
    }

    /// Folds one executed step into the accumulator (read, add, write back).
    pub fn record(&mut self, step: u32) {
        self.acc = self.acc.wrapping_add(u64::from(step));
    }

    pub fn value(&self) -> CoverageSignature {
        self.acc
    }
}
