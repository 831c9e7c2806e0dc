pub mod credentials;
pub mod errors;
pub mod generation;
pub mod models;
pub mod providers;
pub mod sessions;
