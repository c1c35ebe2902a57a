//! # Braille Translation
//!
//! Text ⇄ Unicode braille behind the `BrailleTranslator` trait.
//!
//! ## Key Components:
//! - **liblouis**: forwards requests to the liblouis command-line translator
//! - **builtin**: in-process uncontracted English braille, no system packages needed
//! - **tables**: discovery of the liblouis tables installed on this machine

pub mod builtin;
pub mod liblouis;
pub mod tables;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{BrailleBackend, BrailleConfig};

pub use builtin::BuiltinTranslator;
pub use liblouis::LouisTranslator;
pub use tables::{BrailleTable, TableCatalog};

#[derive(Debug, Clone, Error)]
pub enum BrailleError {
    #[error("unknown braille table '{0}'")]
    UnknownTable(String),
    #[error("braille translation failed: {0}")]
    Translation(String),
    #[error("braille translator unavailable: {0}")]
    Unavailable(String),
}

/// Braille translation collaborator.
#[async_trait]
pub trait BrailleTranslator: Send + Sync {
    /// Text to Unicode braille using `table`.
    async fn translate(&self, text: &str, table: &str) -> Result<String, BrailleError>;

    /// Unicode braille back to text using `table`.
    async fn back_translate(&self, braille: &str, table: &str) -> Result<String, BrailleError>;

    /// Backend name and version, shown by the health endpoint.
    async fn version(&self) -> Result<String, BrailleError>;
}

/// Build the translator selected by `braille.backend`.
pub fn translator_from_config(config: &BrailleConfig) -> Arc<dyn BrailleTranslator> {
    match config.backend {
        BrailleBackend::Liblouis => Arc::new(LouisTranslator::new(config.translator_command.clone())),
        BrailleBackend::Builtin => {
            if !BuiltinTranslator::supports(&config.default_table) {
                tracing::warn!(
                    table = %config.default_table,
                    supported = ?builtin::SUPPORTED_TABLES,
                    "Default braille table is not served by the builtin backend"
                );
            }
            Arc::new(BuiltinTranslator::new())
        }
    }
}
