pub mod app;
pub mod executors;
pub mod shutdown;
