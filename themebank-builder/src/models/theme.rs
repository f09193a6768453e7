//! Theme definitions

use serde::{Deserialize, Serialize};

/// A theme bank: what to search for and what it should sound like
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Theme {
    /// Unique bank name, also the bank directory and sample file prefix
    pub name: String,
    /// Search phrase; comma-separated alternatives rotate. Empty = use the name.
    #[serde(default)]
    pub search: String,
    /// Text description scored against candidate audio
    pub prompt: String,
}

impl Theme {
    pub fn new(name: &str, search: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            search: search.to_string(),
            prompt: prompt.to_string(),
        }
    }

    /// Search phrase, falling back to the theme name
    pub fn search_phrase(&self) -> &str {
        let trimmed = self.search.trim();
        if trimmed.is_empty() {
            self.name.trim()
        } else {
            trimmed
        }
    }

    /// Hint handed to the fetch layer for slices gathered on this theme's behalf
    pub fn hint(&self) -> ThemeHint {
        ThemeHint {
            name: self.name.clone(),
            prompt: self.prompt.clone(),
        }
    }
}

/// Theme the fetch layer is collecting for; drives best-window scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeHint {
    pub name: String,
    pub prompt: String,
}

/// Built-in theme set used when the configuration names none
pub fn default_themes() -> Vec<Theme> {
    [
        ("Soft", "Quiet, gentle, low-intensity sound like a whisper or fabric brushing. Smooth, not harsh or piercing."),
        ("Loud", "Booming, powerful, high-volume sound that dominates space. Strong transients and presence."),
        ("Bumpy", "Uneven, jolting, irregular percussive texture like a train on rough tracks; not smooth."),
        ("Smooth", "Continuous, flowing, connected sound without rough edges. Even dynamics and rounded timbre."),
        ("Harsh", "Rough, grating, distorted or metallic noise; aggressive highs. Unpleasant or biting character."),
        ("Warm", "Full, rounded low-mids, gentle highs; cozy and intimate. Not thin or brittle."),
        ("Bright", "Emphasized highs and detail; crisp and shiny. Not dark or muffled."),
        ("Dark", "Subdued highs, weight in lows/low-mids; shadowy or muted. Not bright or sparkly."),
        ("Metallic", "Ringing, resonant metal tones; clangs, scrapes, chimes. Distinct overtones and sheen."),
        ("Woody", "Organic, resonant wood timbre like knocks, taps, or acoustic bodies. Warm transients."),
        ("Airy", "Breath, wind, or subtle high-frequency shimmer. Light, spacious, and diffuse."),
        ("Noisy", "Broadband or narrow-band noise textures (hiss, static). Texture over pitch."),
        ("Percussive", "Short, transient-rich hits or sequences; clear onsets. Minimal sustain."),
        ("Sustained", "Long, held tones or pads with steady energy. Minimal transient emphasis."),
        ("Glitchy", "Digital artifacts, stutters, buffer errors, granular pops. Non-linear rhythm."),
        ("Eerie", "Unsettling, mysterious ambience; dissonant or hollow. Suggests tension or space."),
    ]
    .iter()
    .map(|(name, prompt)| Theme::new(name, name, prompt))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_phrase_falls_back_to_name() {
        let theme = Theme::new("Soft", "  ", "quiet");
        assert_eq!(theme.search_phrase(), "Soft");

        let theme = Theme::new("Soft", "whisper, rustle", "quiet");
        assert_eq!(theme.search_phrase(), "whisper, rustle");
    }

    #[test]
    fn test_default_theme_names_unique() {
        let themes = default_themes();
        assert_eq!(themes.len(), 16);
        let mut names: Vec<String> = themes.iter().map(|t| t.name.to_lowercase()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 16);
    }
}
