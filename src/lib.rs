pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod harvester;
pub mod scheduler;
pub mod schema;
pub mod worker;
