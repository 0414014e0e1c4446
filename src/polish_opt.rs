// Polishing options shared between the CLI and the polisher.

use std::io;

/// How overlaps of one query are treated during filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolisherKind {
    /// Contig polishing: keep only the longest overlap per query.
    Contig,
    /// Fragment correction: keep every overlap that passes the error filter.
    Fragment,
}

/// Polishing options.
#[derive(Debug, Clone)]
pub struct PolishOpt {
    pub kind: PolisherKind,

    /// Window length W; targets are polished in slices of this many bases.
    pub window_length: u32,
    /// Fraction of W by which adjacent windows overlap; 0 disables the
    /// overlap-stitch output mode. Valid range [0, 0.5).
    pub overlap_percentage: f64,

    /// Layers whose mean base quality is below this are not used.
    pub quality_threshold: f64,
    /// Overlaps with a higher approximate error are dropped.
    pub error_threshold: f64,

    // Partial-order alignment scoring
    pub match_score: i8,
    pub mismatch_score: i8,
    pub gap_score: i8,

    /// Trim low-coverage consensus flanks (default output mode only).
    pub trim: bool,

    pub num_threads: usize,
}

impl Default for PolishOpt {
    fn default() -> Self {
        PolishOpt {
            kind: PolisherKind::Contig,
            window_length: 500,
            overlap_percentage: 0.0,
            quality_threshold: 10.0,
            error_threshold: 0.3,
            match_score: 3,
            mismatch_score: -5,
            gap_score: -4,
            trim: true,
            num_threads: 1,
        }
    }
}

impl PolishOpt {
    /// Rejects option combinations the pipeline cannot run with.
    pub fn validate(&self) -> io::Result<()> {
        if self.window_length == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid window length: must be positive",
            ));
        }
        if !(0.0..0.5).contains(&self.overlap_percentage) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "invalid overlap percentage {}: valid range is [0, 0.5)",
                    self.overlap_percentage
                ),
            ));
        }
        if self.num_threads == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid thread count: must be positive",
            ));
        }
        Ok(())
    }
}
