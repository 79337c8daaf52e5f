pub mod chemistry;
pub mod domain;
pub mod error;
pub mod params;
pub mod spatial;
