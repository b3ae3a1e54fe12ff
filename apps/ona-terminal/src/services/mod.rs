pub mod bom;
pub mod detector;
pub mod diagnoser;
pub mod orders;
pub mod risk;
pub mod scheduler;
