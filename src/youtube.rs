use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::debug;

use crate::{
    catalog::{PlaylistHandle, PlaylistWriter, TrackSearcher},
    models::TrackMatch,
};

const MUSIC_CATEGORY_ID: &str = "10";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchListResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItem {
    id: SearchItemId,
    snippet: Snippet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnails {
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Debug, Clone, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PlaylistResource {
    id: String,
}

/// YouTube Data API v3 client acting with the caller's access token.
#[derive(Debug, Clone)]
pub struct YoutubeClient {
    base_url: String,
    access_token: String,
}

impl YoutubeClient {
    pub fn new(base_url: &str, access_token: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    pub fn playlist_url(playlist_id: &str) -> String {
        format!("https://music.youtube.com/playlist?list={playlist_id}")
    }
}

#[async_trait]
impl TrackSearcher for YoutubeClient {
    async fn search_match(&self, artists: &[String], title: &str) -> Result<Option<TrackMatch>> {
        let url = format!("{}/search", self.base_url);
        let query = format!("{} - {}", artists.join(", "), title);
        let params = [
            ("part", "snippet"),
            ("type", "video"),
            ("videoCategoryId", MUSIC_CATEGORY_ID),
            ("maxResults", "1"),
            ("q", query.as_str()),
        ];
        let parsed = execute_curl_json(CurlRequest::Get(&params), &url, &self.access_token).await?;
        let response = serde_json::from_value::<SearchListResponse>(parsed)
            .context("Failed to decode YouTube search response")?;

        let found = response.items.into_iter().find_map(|item| {
            let video_id = item.id.video_id?;
            Some(TrackMatch {
                id: video_id,
                title: item.snippet.title,
                channel: item.snippet.channel_title,
                thumbnail: item
                    .snippet
                    .thumbnails
                    .and_then(|t| t.default)
                    .map(|t| t.url),
            })
        });
        debug!(query = %query, found = found.is_some(), "YouTube search finished");
        Ok(found)
    }
}

#[async_trait]
impl PlaylistWriter for YoutubeClient {
    async fn create_playlist(&self, title: &str, description: &str) -> Result<PlaylistHandle> {
        let url = format!("{}/playlists?part=snippet,status", self.base_url);
        let body = json!({
            "snippet": { "title": title, "description": description },
            "status": { "privacyStatus": "private" }
        });
        let parsed = execute_curl_json(CurlRequest::Post(body), &url, &self.access_token).await?;
        let playlist = serde_json::from_value::<PlaylistResource>(parsed)
            .context("Failed to decode YouTube playlist response")?;

        Ok(PlaylistHandle {
            url: Self::playlist_url(&playlist.id),
            id: playlist.id,
        })
    }

    async fn add_item(&self, playlist: &PlaylistHandle, external_id: &str) -> Result<()> {
        let url = format!("{}/playlistItems?part=snippet", self.base_url);
        let body = json!({
            "snippet": {
                "playlistId": playlist.id,
                "resourceId": { "kind": "youtube#video", "videoId": external_id }
            }
        });
        execute_curl_json(CurlRequest::Post(body), &url, &self.access_token).await?;
        Ok(())
    }
}

enum CurlRequest<'a> {
    Get(&'a [(&'a str, &'a str)]),
    Post(Value),
}

async fn execute_curl_json(request: CurlRequest<'_>, url: &str, token: &str) -> Result<Value> {
    let mut command = Command::new("curl");
    command
        .arg("-sS")
        .arg("--fail-with-body")
        .arg("--config")
        .arg("-")
        .arg("-H")
        .arg("Accept: application/json")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    match request {
        CurlRequest::Get(params) => {
            command.arg("--get");
            for (key, value) in params {
                command.arg("--data-urlencode").arg(format!("{key}={value}"));
            }
        }
        CurlRequest::Post(body) => {
            let body = serde_json::to_string(&body).context("Failed to encode request body")?;
            command
                .arg("-X")
                .arg("POST")
                .arg("-H")
                .arg("Content-Type: application/json")
                .arg("-d")
                .arg(body);
        }
    }
    command.arg(url);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to execute curl for {url}"))?;
    // The token travels on stdin so it never shows up in the process list.
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(auth_config(token).as_bytes())
            .await
            .context("Failed to pass credentials to curl")?;
    }
    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("Failed to execute curl for {url}"))?;
    let stdout = String::from_utf8(output.stdout).context("YouTube response was not valid UTF-8")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "YouTube request failed: {} {}",
            stderr.trim(),
            api_error_message(&stdout).unwrap_or_default()
        );
    }

    serde_json::from_str::<Value>(&stdout)
        .with_context(|| format!("Failed to parse YouTube JSON response for {url}"))
}

/// curl config line carrying the bearer header.
fn auth_config(token: &str) -> String {
    let escaped = token.replace('\\', "\\\\").replace('"', "\\\"");
    format!("header = \"Authorization: Bearer {escaped}\"\n")
}

fn api_error_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    value
        .pointer("/error/message")
        .and_then(Value::as_str)
        .map(str::to_string)
}
