//! # StateLoop Test Suite
//!
//! Cross-subsystem integration flows: the closed loop exercised with
//! real components wired over one shared store and one shared bus.

#[cfg(test)]
mod integration;
