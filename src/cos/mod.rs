//! Chain-of-states machinery: the path itself, its spline representation,
//! interpolation of initial guesses and reparametrization.

pub mod chain;
pub mod interpolate;
pub mod reparam;
pub mod spline;

pub use chain::{PathSnapshot, PathState, SplinedHei};
pub use reparam::{Parametrization, Reparametrizer};
