pub mod branch;
pub mod estimate;
pub mod lenient;
