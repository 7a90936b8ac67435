pub mod opportunity;
pub mod sales;
pub mod snapshot;
pub mod store;
