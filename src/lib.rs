pub mod routes;
pub mod server;

pub use routes::*;

// Re-export specific items from server
pub use server::services;
