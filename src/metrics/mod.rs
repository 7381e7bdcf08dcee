pub mod monitoring;
pub mod path;
pub mod process;
