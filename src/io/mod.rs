pub mod dump;
pub mod xyz;
