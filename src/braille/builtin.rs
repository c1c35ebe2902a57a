//! Uncontracted English braille computed in process.
//!
//! Every letter, digit and the common punctuation marks get one cell. Capitals
//! carry a capital sign, digit runs start with a number sign, and a letter in
//! a-j right after a digit is preceded by the letter sign so the output reads
//! back unambiguously. Whitespace and other characters without a cell pass
//! through. Input that already holds braille cells is rejected, since it
//! could not be told apart from the translation.

use async_trait::async_trait;

use super::{BrailleError, BrailleTranslator};

pub const SUPPORTED_TABLES: [&str; 3] = ["en-us-g1.ctb", "en-ueb-g1.ctb", "builtin"];

const BLANK: u32 = 0x2800;
const CAPITAL_SIGN: char = '\u{2820}';
const NUMBER_SIGN: char = '\u{283C}';
const LETTER_SIGN: char = '\u{2830}';

// Dot patterns for a..z, bit n-1 set for dot n.
const LETTER_DOTS: [u8; 26] = [
    0x01, 0x03, 0x09, 0x19, 0x11, 0x0B, 0x1B, 0x13, 0x0A, 0x1A, // a-j
    0x05, 0x07, 0x0D, 0x1D, 0x15, 0x0F, 0x1F, 0x17, 0x0E, 0x1E, // k-t
    0x25, 0x27, 0x3A, 0x2D, 0x3D, 0x35, // u v w x y z
];

const PUNCTUATION: [(char, u8); 8] = [
    (',', 0x02),
    (';', 0x06),
    (':', 0x12),
    ('.', 0x32),
    ('!', 0x16),
    ('?', 0x26),
    ('\'', 0x04),
    ('-', 0x24),
];

fn cell(dots: u8) -> char {
    // 0x2800..=0x283F are all assigned braille patterns
    char::from_u32(BLANK + dots as u32).unwrap_or(' ')
}

fn dots_of(c: char) -> Option<u8> {
    let code = c as u32;
    (BLANK..=BLANK + 0x3F).contains(&code).then(|| (code - BLANK) as u8)
}

fn letter_cell(lower: char) -> char {
    cell(LETTER_DOTS[(lower as u8 - b'a') as usize])
}

fn digit_cell(digit: char) -> char {
    // 1-9 share cells with a-i, 0 with j
    let index = match digit {
        '0' => 9,
        d => (d as u8 - b'1') as usize,
    };
    cell(LETTER_DOTS[index])
}

#[derive(Debug, Default, Clone)]
pub struct BuiltinTranslator;

impl BuiltinTranslator {
    pub fn new() -> Self {
        Self
    }

    pub fn supports(table: &str) -> bool {
        SUPPORTED_TABLES.contains(&table)
    }

    fn check_table(table: &str) -> Result<(), BrailleError> {
        if Self::supports(table) {
            Ok(())
        } else {
            Err(BrailleError::UnknownTable(table.to_string()))
        }
    }

    pub fn encode(text: &str) -> Result<String, BrailleError> {
        let mut out = String::with_capacity(text.len() * 2);
        let mut numeric = false;

        for c in text.chars() {
            if dots_of(c).is_some() {
                return Err(BrailleError::Translation(format!(
                    "input already contains braille cell '{}'",
                    c
                )));
            }

            if c.is_ascii_digit() {
                if !numeric {
                    out.push(NUMBER_SIGN);
                    numeric = true;
                }
                out.push(digit_cell(c));
                continue;
            }

            if c.is_ascii_alphabetic() {
                let lower = c.to_ascii_lowercase();
                if c.is_ascii_uppercase() {
                    out.push(CAPITAL_SIGN);
                } else if numeric && lower <= 'j' {
                    out.push(LETTER_SIGN);
                }
                out.push(letter_cell(lower));
            } else if let Some((_, dots)) = PUNCTUATION.iter().find(|(p, _)| *p == c) {
                out.push(cell(*dots));
            } else {
                out.push(c);
            }
            numeric = false;
        }
        Ok(out)
    }

    pub fn decode(braille: &str) -> Result<String, BrailleError> {
        let mut out = String::with_capacity(braille.len());
        let mut numeric = false;
        let mut capital = false;

        for c in braille.chars() {
            let Some(dots) = dots_of(c) else {
                out.push(c);
                numeric = false;
                capital = false;
                continue;
            };

            match c {
                NUMBER_SIGN => {
                    numeric = true;
                    continue;
                }
                LETTER_SIGN => {
                    numeric = false;
                    continue;
                }
                CAPITAL_SIGN => {
                    numeric = false;
                    capital = true;
                    continue;
                }
                _ => {}
            }

            if let Some(index) = LETTER_DOTS.iter().position(|d| *d == dots) {
                if numeric && index < 10 {
                    out.push(if index == 9 { '0' } else { (b'1' + index as u8) as char });
                    continue;
                }
                let letter = (b'a' + index as u8) as char;
                out.push(if capital { letter.to_ascii_uppercase() } else { letter });
            } else if let Some((p, _)) = PUNCTUATION.iter().find(|(_, d)| *d == dots) {
                out.push(*p);
            } else if dots == 0 {
                out.push(' ');
            } else {
                return Err(BrailleError::Translation(format!(
                    "no back-translation for braille cell '{}'",
                    c
                )));
            }
            numeric = false;
            capital = false;
        }
        Ok(out)
    }
}

#[async_trait]
impl BrailleTranslator for BuiltinTranslator {
    async fn translate(&self, text: &str, table: &str) -> Result<String, BrailleError> {
        Self::check_table(table)?;
        Self::encode(text)
    }

    async fn back_translate(&self, braille: &str, table: &str) -> Result<String, BrailleError> {
        Self::check_table(table)?;
        Self::decode(braille)
    }

    async fn version(&self) -> Result<String, BrailleError> {
        Ok(format!("builtin {}", env!("CARGO_PKG_VERSION")))
    }
}
