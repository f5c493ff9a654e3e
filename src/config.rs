//! Index configuration

/// Configuration for a [`LippIndex`](crate::index::LippIndex).
#[derive(Debug, Clone)]
pub struct LippConfig {
    /// Left/right padding fraction applied to every bulk-built node: the
    /// slot array grows by `2 * floor(n * build_lr_remain)` slots and the
    /// model shifts right by half of that.
    pub build_lr_remain: f64,
    /// Suppress informational log output.
    pub quiet: bool,
    /// Fit bulk models with FMCD; fall back to the three-point fit when
    /// disabled or when FMCD aborts.
    pub use_fmcd: bool,
}

impl Default for LippConfig {
    fn default() -> Self {
        Self {
            build_lr_remain: 0.0,
            quiet: true,
            use_fmcd: true,
        }
    }
}

impl LippConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bulk-build padding fraction.
    pub fn with_build_lr_remain(mut self, fraction: f64) -> Self {
        self.build_lr_remain = fraction.max(0.0);
        self
    }

    /// Enable or disable informational log output.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Select the FMCD fitter or the three-point fitter.
    pub fn with_use_fmcd(mut self, use_fmcd: bool) -> Self {
        self.use_fmcd = use_fmcd;
        self
    }
}
