pub mod assignment;
pub mod fleet;
pub mod redistribution;
pub mod scoring;
