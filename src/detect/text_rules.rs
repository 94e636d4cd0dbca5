use regex::{Regex, RegexBuilder};

use crate::config::ShowRules;

/// Case-insensitive substring match against any phrase.
pub fn contains_phrases<S: AsRef<str>>(text: &str, phrases: &[S]) -> bool {
    let text = text.to_lowercase();
    phrases
        .iter()
        .any(|p| !p.as_ref().is_empty() && text.contains(&p.as_ref().to_lowercase()))
}

/// Search for any URL or price pattern. Patterns are expected to be built
/// case-insensitive (see [`compile_patterns`]).
pub fn has_url_or_price(text: &str, url_patterns: &[Regex], price_patterns: &[Regex]) -> bool {
    url_patterns
        .iter()
        .chain(price_patterns.iter())
        .any(|re| re.is_match(text))
}

/// Compile patterns case-insensitively. Invalid patterns are skipped with a
/// warning.
pub fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| {
            match RegexBuilder::new(p.as_ref()).case_insensitive(true).build() {
                Ok(re) => Some(re),
                Err(e) => {
                    log::warn!("Skipping invalid pattern {:?}: {}", p.as_ref(), e);
                    None
                }
            }
        })
        .collect()
}

/// Show rules compiled once per detection run.
pub struct TextRules {
    phrases: Vec<String>,
    url_patterns: Vec<Regex>,
    price_patterns: Vec<Regex>,
}

impl TextRules {
    pub fn new(rules: &ShowRules) -> Self {
        Self {
            phrases: rules.phrases.clone(),
            url_patterns: compile_patterns(&rules.url_patterns),
            price_patterns: compile_patterns(&rules.price_patterns),
        }
    }

    pub fn phrase_match(&self, text: &str) -> bool {
        contains_phrases(text, &self.phrases)
    }

    pub fn url_or_price_match(&self, text: &str) -> bool {
        has_url_or_price(text, &self.url_patterns, &self.price_patterns)
    }
}
