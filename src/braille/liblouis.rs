//! liblouis backend.
//!
//! Each call runs the liblouis command-line translator with the table list
//! `unicode.dis,<table>` so the output is Unicode braille rather than the
//! table's ASCII braille. Text goes over stdin.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{BrailleError, BrailleTranslator};

const DISPLAY_TABLE: &str = "unicode.dis";

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Backward,
}

impl Direction {
    fn flag(self) -> &'static str {
        match self {
            Direction::Forward => "--forward",
            Direction::Backward => "--backward",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LouisTranslator {
    command: String,
}

impl LouisTranslator {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn run(&self, direction: Direction, input: &str, table: &str) -> Result<String, BrailleError> {
        let table = table.trim();
        if table.is_empty() || table.contains(',') {
            return Err(BrailleError::UnknownTable(table.to_string()));
        }

        let mut child = Command::new(&self.command)
            .arg(direction.flag())
            .arg(format!("{},{}", DISPLAY_TABLE, table))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BrailleError::Unavailable(format!("{}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(|e| BrailleError::Translation(e.to_string()))?;
            stdin
                .write_all(b"\n")
                .await
                .map_err(|e| BrailleError::Translation(e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| BrailleError::Translation(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(table, status = ?output.status.code(), stderr = %stderr, "liblouis translation failed");
            let lowered = stderr.to_lowercase();
            if lowered.contains("table") && (lowered.contains("cannot") || lowered.contains("not found")) {
                return Err(BrailleError::UnknownTable(table.to_string()));
            }
            return Err(BrailleError::Translation(if stderr.is_empty() {
                format!("translator exited with {}", output.status)
            } else {
                stderr
            }));
        }

        let stdout = String::from_utf8(output.stdout)
            .map_err(|e| BrailleError::Translation(format!("translator produced invalid UTF-8: {}", e)))?;
        Ok(stdout.trim_end_matches(['\n', '\r']).to_string())
    }
}

#[async_trait]
impl BrailleTranslator for LouisTranslator {
    async fn translate(&self, text: &str, table: &str) -> Result<String, BrailleError> {
        self.run(Direction::Forward, text, table).await
    }

    async fn back_translate(&self, braille: &str, table: &str) -> Result<String, BrailleError> {
        self.run(Direction::Backward, braille, table).await
    }

    async fn version(&self) -> Result<String, BrailleError> {
        let output = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| BrailleError::Unavailable(format!("{}: {}", self.command, e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .ok_or_else(|| BrailleError::Unavailable("translator reported no version".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_command_is_unavailable() {
        let translator = LouisTranslator::new("definitely-not-lou-translate");
        assert!(matches!(
            translator.translate("hello", "en-us-g2.ctb").await,
            Err(BrailleError::Unavailable(_))
        ));
        assert!(matches!(translator.version().await, Err(BrailleError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_table_lists_are_rejected() {
        let translator = LouisTranslator::new("lou_translate");
        assert!(matches!(
            translator.translate("hello", "en-us-g2.ctb,evil.ctb").await,
            Err(BrailleError::UnknownTable(_))
        ));
        assert!(matches!(
            translator.back_translate("⠓", " ").await,
            Err(BrailleError::UnknownTable(_))
        ));
    }
}
