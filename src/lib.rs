pub mod agent;
pub mod log;
