//! Discovery of installed liblouis tables.
//!
//! Tables are `*.ctb` files in the configured directories, the user's
//! `~/.local/share/liblouis/tables` and every entry of `LOUIS_TABLEPATH`.
//! When a filename appears in several directories the first one wins.

use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::config::BrailleConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BrailleTable {
    pub filename: String,
    pub display_name: String,
    pub language: String,
    pub grade: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct TableHeader {
    display_name: Option<String>,
    language: Option<String>,
}

const LANGUAGE_NAMES: [(&str, &str); 18] = [
    ("en", "English"),
    ("es", "Spanish"),
    ("fr", "French"),
    ("de", "German"),
    ("it", "Italian"),
    ("pt", "Portuguese"),
    ("nl", "Dutch"),
    ("sv", "Swedish"),
    ("no", "Norwegian"),
    ("da", "Danish"),
    ("fi", "Finnish"),
    ("pl", "Polish"),
    ("cs", "Czech"),
    ("ru", "Russian"),
    ("ar", "Arabic"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
];

#[derive(Debug, Clone)]
pub struct TableCatalog {
    search_path: Vec<PathBuf>,
}

impl TableCatalog {
    pub fn new(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    /// Configured directories, then the user's table directory, then `LOUIS_TABLEPATH`.
    pub fn from_config(config: &BrailleConfig) -> Self {
        let mut search_path: Vec<PathBuf> = config.table_directories.iter().map(PathBuf::from).collect();

        if let Ok(home) = std::env::var("HOME") {
            search_path.push(Path::new(&home).join(".local/share/liblouis/tables"));
        }
        if let Ok(env_path) = std::env::var("LOUIS_TABLEPATH") {
            for entry in env_path.split(':').filter(|e| !e.is_empty()) {
                let path = PathBuf::from(entry);
                if !search_path.contains(&path) {
                    search_path.push(path);
                }
            }
        }
        Self::new(search_path)
    }

    /// Search path entries that exist on disk.
    pub fn directories(&self) -> Vec<PathBuf> {
        self.search_path.iter().filter(|p| p.is_dir()).cloned().collect()
    }

    /// Every table found, sorted by display name. Does blocking file I/O.
    pub fn list(&self) -> Vec<BrailleTable> {
        let mut seen = HashSet::new();
        let mut tables = Vec::new();

        for directory in self.directories() {
            let entries = match std::fs::read_dir(&directory) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(directory = %directory.display(), error = %e, "Skipping table directory");
                    continue;
                }
            };

            let mut files: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "ctb"))
                .collect();
            files.sort();

            for path in files {
                let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                    continue;
                };
                if !seen.insert(filename.clone()) {
                    continue;
                }

                let header = read_header(&path);
                let inferred = infer_from_filename(&filename);
                tables.push(BrailleTable {
                    display_name: header.display_name.unwrap_or(inferred.display_name),
                    language: header.language.unwrap_or(inferred.language),
                    grade: inferred.grade,
                    filename,
                });
            }
        }

        tables.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        tables
    }
}

/// Reads `#-display-name:` and `#-language:` metadata lines.
fn read_header(path: &Path) -> TableHeader {
    let mut header = TableHeader::default();
    let Ok(file) = File::open(path) else {
        return header;
    };

    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if let Some(value) = line.strip_prefix("#-display-name:") {
            header.display_name = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("#-language:") {
            header.language = Some(value.trim().to_string());
        }
        if header.display_name.is_some() && header.language.is_some() {
            break;
        }
    }
    header
}

fn infer_from_filename(filename: &str) -> BrailleTable {
    let stem = filename.trim_end_matches(".ctb").trim_end_matches(".utb");
    let language = stem.split('-').next().unwrap_or(stem).to_string();

    let grade = if filename.contains("-g1") || filename.contains("_g1") {
        Some("g1".to_string())
    } else if filename.contains("-g2") || filename.contains("_g2") {
        Some("g2".to_string())
    } else {
        None
    };

    let known_name = LANGUAGE_NAMES
        .iter()
        .find(|(code, _)| *code == language)
        .map(|(_, name)| *name);

    let display_name = match (known_name, &grade) {
        (Some(name), Some(g)) => format!("{} Grade {}", name, &g[1..]),
        (Some(name), None) => name.to_string(),
        (None, Some(g)) => format!("{} Grade {}", language.to_uppercase(), &g[1..]),
        (None, None) => filename.to_string(),
    };

    BrailleTable {
        filename: filename.to_string(),
        display_name,
        language,
        grade,
    }
}
