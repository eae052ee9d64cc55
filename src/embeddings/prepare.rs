//! Text preparation before embedding and display.
//!
//! Two cleaning policies are kept apart on purpose:
//!
//! - **Minimal** cleaning (trim + collapse whitespace) is the only policy
//!   applied to text sent to an embedding model. It never changes case or
//!   removes characters, so the semantic content reaching the model is intact.
//! - **Light** cleaning additionally strips punctuation outside
//!   `[word, whitespace, ',', '.', '-']` and lowercases. It is used for
//!   human-facing previews and exports only.

use serde::{Deserialize, Serialize};

/// Cleaning policy applied by [`prepare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanMode {
    /// Leave text untouched
    #[default]
    None,
    /// Trim, collapse whitespace, strip punctuation, lowercase (display)
    LightClean,
    /// Trim and collapse whitespace only (embedding input)
    Minimal,
}

impl std::fmt::Display for CleanMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::LightClean => write!(f, "light-clean"),
            Self::Minimal => write!(f, "minimal"),
        }
    }
}

impl std::str::FromStr for CleanMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "light-clean" | "light" => Ok(Self::LightClean),
            "minimal" => Ok(Self::Minimal),
            _ => Err(format!("Unknown clean mode: {s}")),
        }
    }
}

/// Apply a cleaning policy to every text.
///
/// Length- and order-preserving: element `i` of the output is the cleaned
/// form of element `i` of the input. Empty strings stay empty strings.
#[must_use]
pub fn prepare<S: AsRef<str>>(texts: &[S], mode: CleanMode) -> Vec<String> {
    texts
        .iter()
        .map(|t| match mode {
            CleanMode::None => t.as_ref().to_string(),
            CleanMode::LightClean => clean_for_display(t.as_ref()),
            CleanMode::Minimal => clean_for_embedding(t.as_ref()),
        })
        .collect()
}

/// Minimal cleaning for embedding input: trim and collapse whitespace runs.
#[must_use]
pub fn clean_for_embedding(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Display cleaning: minimal cleaning, then drop disallowed characters and lowercase.
#[must_use]
pub fn clean_for_display(text: &str) -> String {
    clean_for_embedding(text)
        .chars()
        .filter(|c| is_kept_char(*c))
        .collect::<String>()
        .to_lowercase()
}

fn is_kept_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c.is_whitespace() || matches!(c, ',' | '.' | '-')
}
