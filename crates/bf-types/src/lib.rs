pub mod config;
pub mod errors;
pub mod focus;

pub use config::*;
pub use errors::*;
pub use focus::*;
