//! Human-verification challenge detection.

use crate::config::CompiledSignals;
use crate::error::Result;
use crate::flow::consent::is_consent_page;
use crate::surface::Surface;

/// First challenge keyword found in `texts`. `keywords` are expected
/// lower-cased with the exclusion set already removed.
pub fn keyword_hit<'a>(texts: &[String], keywords: &'a [String]) -> Option<&'a str> {
    let haystack: Vec<String> = texts.iter().map(|t| t.to_lowercase()).collect();
    keywords
        .iter()
        .find(|keyword| haystack.iter().any(|text| text.contains(keyword.as_str())))
        .map(String::as_str)
}

/// False while the consent page is showing; otherwise a visible challenge
/// widget or a challenge keyword counts.
pub async fn detect_challenge(
    surface: &dyn Surface,
    texts: &[String],
    selectors: &[String],
    signals: &CompiledSignals,
) -> Result<bool> {
    if is_consent_page(texts, signals) {
        return Ok(false);
    }
    if surface.any_visible(selectors).await? {
        return Ok(true);
    }
    Ok(keyword_hit(texts, &signals.challenge_keywords).is_some())
}
