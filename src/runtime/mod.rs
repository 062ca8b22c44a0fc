//! Runtime system
//!
//! This module contains the thread-affine operation executor.

pub mod executor;
