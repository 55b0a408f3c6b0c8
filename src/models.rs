use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A track as listed by the source catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTrack {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
}

/// A candidate found in the destination catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMatch {
    pub id: String,
    pub title: String,
    pub channel: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    Pending,
    Searching,
    Found,
    NotFound,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackState {
    pub source_id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    #[serde(rename = "match")]
    pub matched: Option<TrackMatch>,
    pub manual_id: Option<String>,
    pub status: TrackStatus,
}

impl TrackState {
    pub fn from_source(track: SourceTrack) -> Self {
        Self {
            source_id: track.id,
            name: track.name,
            artists: track.artists,
            album: track.album,
            matched: None,
            manual_id: None,
            status: TrackStatus::Pending,
        }
    }

    /// Destination id to transfer: the manual override wins over the match.
    pub fn target_id(&self) -> Option<&str> {
        self.manual_id
            .as_deref()
            .or_else(|| self.matched.as_ref().map(|m| m.id.as_str()))
    }

    pub fn effective_status(&self) -> TrackStatus {
        if self.manual_id.is_some() {
            TrackStatus::Manual
        } else {
            self.status
        }
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            name: self.name.clone(),
            artists: self.artists.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    pub name: String,
    pub artists: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Analyzing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub current: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub session_id: String,
    pub playlist: PlaylistSummary,
    pub tracks: Vec<TrackState>,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    pub fn stats(&self) -> MatchStats {
        let mut stats = MatchStats {
            total: self.tracks.len(),
            ..MatchStats::default()
        };
        for track in &self.tracks {
            match track.effective_status() {
                TrackStatus::Found => stats.found += 1,
                TrackStatus::NotFound => stats.not_found += 1,
                TrackStatus::Manual => stats.manual += 1,
                TrackStatus::Pending | TrackStatus::Searching => {}
            }
        }
        stats
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchStats {
    pub found: usize,
    pub not_found: usize,
    pub manual: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub session_id: String,
    pub playlist: PlaylistSummary,
    pub tracks: Vec<SourceTrack>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub track_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverrideRequest {
    pub video_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverrideResponse {
    pub success: bool,
    pub video_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackTransferResult {
    pub index: usize,
    pub track: String,
    pub status: TransferOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReport {
    pub success: bool,
    pub playlist_id: String,
    pub playlist_url: String,
    pub success_count: usize,
    pub skip_count: usize,
    pub total: usize,
    pub results: Vec<TrackTransferResult>,
}
