//! Windowed adaptive-introgression statistics over genotype matrices.
//!
//! The `stats` module holds the allele-frequency engine and the four window
//! statistics (U, Q, fd, df); `process` wires them behind a parsed statistic
//! specification and assembles one result record per genomic window; `parse`
//! provides the input collaborators (VCF reading, population panels,
//! ancestral-allele calls, window building).

// Module declarations
pub mod parse;
pub mod process;
pub mod stats;

#[cfg(test)]
mod tests;
