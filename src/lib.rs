//! Chain-of-states reaction path optimization.
//!
//! A path of images between two minima is relaxed with a growing/string
//! style optimizer: forces from per-image calculators, a steepest descent /
//! conjugate gradient step, then spline reparametrization that keeps the
//! images evenly (or energy-weighted) distributed.

pub mod coords;
pub mod core;
pub mod cos;
pub mod engine;
pub mod interface;
pub mod io;
pub mod solvers;
