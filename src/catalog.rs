use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::TrackMatch;

static VIDEO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([^&\s]+)")
        .expect("video url pattern is valid")
});

/// Looks up the best destination candidate for a source track.
#[async_trait]
pub trait TrackSearcher: Send + Sync {
    async fn search_match(&self, artists: &[String], title: &str) -> Result<Option<TrackMatch>>;
}

/// Creates destination playlists and fills them.
#[async_trait]
pub trait PlaylistWriter: Send + Sync {
    async fn create_playlist(&self, title: &str, description: &str) -> Result<PlaylistHandle>;

    async fn add_item(&self, playlist: &PlaylistHandle, external_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistHandle {
    pub id: String,
    pub url: String,
}

/// Accepts a bare video id or a pasted watch, short or embed URL.
pub fn parse_external_id(raw: &str) -> String {
    let raw = raw.trim();
    VIDEO_URL
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::parse_external_id;

    #[test]
    fn extracts_id_from_known_url_shapes() {
        for raw in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ&list=RDAMVM",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "  dQw4w9WgXcQ  ",
        ] {
            assert_eq!(parse_external_id(raw), "dQw4w9WgXcQ", "input: {raw}");
        }
    }

    #[test]
    fn unknown_input_is_kept_verbatim() {
        assert_eq!(
            parse_external_id("https://vimeo.com/12345"),
            "https://vimeo.com/12345"
        );
    }
}
