pub mod analytic;
pub mod evaluator;
pub mod external;
pub mod operators;
pub mod registry;
