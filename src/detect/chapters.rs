use crate::database::Chapter;

const AD_KEYWORDS: [&str; 5] = ["ad", "sponsor", "promo", "advertisement", "commercial"];

/// Whether a chapter title marks an advertisement. Plain case-insensitive
/// substring match, so "Headlines" also matches; a miss means keep.
pub fn matches_ad_chapter(title: &str) -> bool {
    let title = title.to_lowercase();
    AD_KEYWORDS.iter().any(|keyword| title.contains(keyword))
}

/// Parse the chapter list stored on an episode. Malformed JSON, a non-array
/// document, or any entry missing `start`/`end`/`title` yields no chapters.
pub fn load_chapters_from_json(json: &str) -> Vec<Chapter> {
    if json.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<Chapter>>(json) {
        Ok(chapters) => chapters,
        Err(e) => {
            log::debug!("Ignoring invalid chapter list: {}", e);
            Vec::new()
        }
    }
}

/// Chapters that are not advertisements.
pub fn filter_ad_chapters(chapters: &[Chapter]) -> Vec<Chapter> {
    chapters
        .iter()
        .filter(|c| !matches_ad_chapter(&c.title))
        .cloned()
        .collect()
}
