use serde::{Deserialize, Serialize};
use std::path::Path;

use super::merge::merge_values;
use super::{BacklogStrategy, TimePriors};
use crate::error::AppError;

/// How eagerly text signals are turned into cuts for a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    #[default]
    Conservative,
    Aggressive,
}

/// Per-show detection rules, layered over the global defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShowRules {
    pub phrases: Vec<String>,
    pub url_patterns: Vec<String>,
    pub price_patterns: Vec<String>,
    /// Reserved for audio-cue matching, which is not enabled.
    pub jingles: Vec<String>,
    pub time_priors: TimePriors,
    pub aggressiveness: Aggressiveness,
    pub backlog_strategy: Option<BacklogStrategy>,
    pub last_n_episodes_count: Option<usize>,
}

impl Default for ShowRules {
    fn default() -> Self {
        Self {
            phrases: [
                "brought to you by",
                "sponsored by",
                "thanks to our sponsor",
                "use code",
                "promo code",
                "free trial",
                "visit our website",
                "check out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            url_patterns: vec![
                r"\bhttps?://[\w\.-]+\.[a-z]{2,}\S*".to_string(),
                r"\b[A-Za-z0-9.-]+\.(com|io|ai|net|org|co)\b".to_string(),
                r"\b[A-Za-z0-9-]+ dot (com|io|net|org)\b".to_string(),
            ],
            price_patterns: vec![
                r"\$\d+".to_string(),
                r"\b\d+\s*(%|percent)\s*off\b".to_string(),
                r"\b\d+\s*dollars\b".to_string(),
            ],
            jingles: Vec::new(),
            time_priors: TimePriors::default(),
            aggressiveness: Aggressiveness::Conservative,
            backlog_strategy: None,
            last_n_episodes_count: None,
        }
    }
}

impl ShowRules {
    /// Number of signals a window needs, after the aggressiveness tag.
    pub fn effective_require_signals(&self, require_signals: u32) -> u32 {
        match self.aggressiveness {
            Aggressiveness::Conservative => require_signals.max(1),
            Aggressiveness::Aggressive => require_signals.saturating_sub(1).max(1),
        }
    }

    /// Layer a show-specific rules document over `self`.
    pub fn merged_with(&self, overlay: serde_yaml::Value) -> Result<ShowRules, AppError> {
        let mut base = serde_yaml::to_value(self)?;
        merge_values(&mut base, overlay);
        Ok(serde_yaml::from_value(base)?)
    }
}

/// File-name slug for a show: lowercase alphanumerics separated by `-`.
pub fn show_slug(show_name: &str) -> String {
    let mut slug = String::with_capacity(show_name.len());
    let mut last_dash = true;
    for c in show_name.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

fn read_yaml(path: &Path) -> Result<Option<serde_yaml::Value>, AppError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let value: serde_yaml::Value = serde_yaml::from_str(&content)?;
    // An empty file parses as null
    Ok(if value.is_null() { None } else { Some(value) })
}

/// Load the rules for `show_name`: built-in defaults, then
/// `shows/default.rules.yaml`, then `shows/<slug>.rules.yaml`.
pub fn load_show_rules(config_dir: &Path, show_name: Option<&str>) -> Result<ShowRules, AppError> {
    let shows_dir = config_dir.join("shows");

    let mut rules = ShowRules::default();
    if let Some(defaults) = read_yaml(&shows_dir.join("default.rules.yaml"))? {
        rules = rules.merged_with(defaults)?;
    }

    if let Some(show_name) = show_name {
        let slug = show_slug(show_name);
        if !slug.is_empty() {
            let path = shows_dir.join(format!("{}.rules.yaml", slug));
            if let Some(show) = read_yaml(&path)? {
                log::debug!("Applying show rules from {:?}", path);
                rules = rules.merged_with(show)?;
            }
        }
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_show_slug() {
        assert_eq!(show_slug("The Daily Show!"), "the-daily-show");
        assert_eq!(show_slug("  99% Invisible "), "99-invisible");
        assert_eq!(show_slug("???"), "");
    }

    #[test]
    fn test_show_lists_union_with_defaults() {
        let temp = TempDir::new().unwrap();
        let shows = temp.path().join("shows");
        std::fs::create_dir_all(&shows).unwrap();
        std::fs::write(
            shows.join("my-show.rules.yaml"),
            "phrases:\n  - \"test phrase\"\n  - \"use code\"\nurl_patterns:\n  - \"test\\\\.com\"\naggressiveness: aggressive\n",
        )
        .unwrap();

        let defaults = ShowRules::default();
        let rules = load_show_rules(temp.path(), Some("My Show")).unwrap();

        assert_eq!(rules.phrases.len(), defaults.phrases.len() + 1);
        assert!(rules.phrases.contains(&"test phrase".to_string()));
        assert_eq!(
            rules.phrases.iter().filter(|p| p.as_str() == "use code").count(),
            1
        );
        assert!(rules.url_patterns.contains(&r"test\.com".to_string()));
        assert_eq!(rules.price_patterns, defaults.price_patterns);
        assert_eq!(rules.aggressiveness, Aggressiveness::Aggressive);
    }

    #[test]
    fn test_missing_files_fall_back_to_builtin_defaults() {
        let temp = TempDir::new().unwrap();
        let rules = load_show_rules(temp.path(), Some("Unknown")).unwrap();
        assert_eq!(rules, ShowRules::default());
    }

    #[test]
    fn test_backlog_override_and_time_priors() {
        let temp = TempDir::new().unwrap();
        let shows = temp.path().join("shows");
        std::fs::create_dir_all(&shows).unwrap();
        std::fs::write(
            shows.join("default.rules.yaml"),
            "time_priors:\n  pre_roll_max_s: 90\n  post_roll_last_s: 120\n",
        )
        .unwrap();
        std::fs::write(
            shows.join("news.rules.yaml"),
            "backlog_strategy: last_n_episodes\nlast_n_episodes_count: 2\ntime_priors:\n  post_roll_last_s: 45\n",
        )
        .unwrap();

        let rules = load_show_rules(temp.path(), Some("news")).unwrap();
        assert_eq!(rules.backlog_strategy, Some(BacklogStrategy::LastNEpisodes));
        assert_eq!(rules.last_n_episodes_count, Some(2));
        assert_eq!(rules.time_priors.pre_roll_max_s, Some(90.0));
        assert_eq!(rules.time_priors.post_roll_last_s, Some(45.0));
    }

    #[test]
    fn test_aggressive_lowers_required_signals() {
        let mut rules = ShowRules::default();
        assert_eq!(rules.effective_require_signals(2), 2);
        rules.aggressiveness = Aggressiveness::Aggressive;
        assert_eq!(rules.effective_require_signals(2), 1);
        assert_eq!(rules.effective_require_signals(1), 1);
    }
}
