//! Exclusion and masking applied to command text before it leaves the machine.
//!
//! Exclusion is always evaluated against the original text. Masking only
//! rewrites what is transmitted, so a masked form can never be used to slip
//! past an exclusion pattern.

use regex::Regex;

use crate::patterns::mask_rules;

#[derive(Debug, Default)]
pub struct CommandFilter {
    exclude: Vec<Regex>,
    masking: bool,
}

impl CommandFilter {
    /// Compiles exclusion patterns. Invalid patterns are logged and ignored so
    /// one bad config entry does not stall syncing.
    pub fn new(patterns: &[String], masking: bool) -> Self {
        let exclude = patterns
            .iter()
            .filter(|pattern| !pattern.trim().is_empty())
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(err) => {
                    tracing::warn!(pattern = %pattern, error = %err, "Ignoring invalid exclude pattern");
                    None
                }
            })
            .collect();

        CommandFilter { exclude, masking }
    }

    pub fn is_excluded(&self, text: &str) -> bool {
        self.exclude.iter().any(|pattern| pattern.is_match(text))
    }

    /// Returns the text to transmit: masked when masking is enabled.
    pub fn outbound_text(&self, text: &str) -> String {
        if self.masking {
            mask_sensitive(text)
        } else {
            text.to_string()
        }
    }
}

/// Replaces credentials in a command line with a fixed mask.
pub fn mask_sensitive(text: &str) -> String {
    let mut masked = text.to_string();
    for (pattern, replacement) in mask_rules() {
        let next = pattern.replace_all(&masked, replacement).into_owned();
        masked = next;
    }
    masked
}
