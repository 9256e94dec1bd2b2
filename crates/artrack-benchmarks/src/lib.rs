//! Benchmark suite for artrack performance-critical code
//!
//! Criterion-based benchmarks for the hottest per-frame operations:
//! Hamming distance, vocabulary quantisation and KNN matching.

#![cfg(test)]
