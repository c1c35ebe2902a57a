pub mod config;
pub mod speech;
pub mod tables;
pub mod translation;

pub use config::*;
pub use speech::*;
pub use tables::*;
pub use translation::*;
