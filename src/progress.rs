//! Live progress fan-out, one sink per client session.
//!
//! Delivery is best-effort: events published while a session has no
//! connected sink are dropped, and a reconnecting client only sees events
//! from the moment it subscribes again. A connected sink always receives the
//! terminal event of a run unless it stays full for `TERMINAL_SEND_TIMEOUT`.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::sync::{
    mpsc::{
        self,
        error::{SendTimeoutError, TrySendError},
    },
    RwLock,
};
use tracing::{debug, warn};

use crate::models::{MatchStats, TrackMatch, TrackStatus, TrackSummary};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ProgressEvent {
    AnalysisProgress {
        job_id: String,
        current: usize,
        total: usize,
        track: TrackSummary,
        status: TrackStatus,
    },
    AnalysisMatch {
        job_id: String,
        current: usize,
        total: usize,
        track: TrackSummary,
        #[serde(rename = "match")]
        matched: Option<TrackMatch>,
        status: TrackStatus,
    },
    AnalysisComplete {
        job_id: String,
        stats: MatchStats,
    },
    AnalysisError {
        job_id: String,
        message: String,
    },
    Status {
        message: String,
    },
    PlaylistCreated {
        playlist_id: String,
        playlist_url: String,
    },
    Processing {
        current: usize,
        total: usize,
        track: TrackSummary,
    },
    TrackAdded {
        current: usize,
        total: usize,
        track: String,
        video_id: String,
    },
    TrackFailed {
        current: usize,
        total: usize,
        track: String,
        error: String,
    },
    TrackSkipped {
        current: usize,
        total: usize,
        track: String,
    },
    Complete {
        playlist_id: String,
        playlist_url: String,
        success_count: usize,
        skip_count: usize,
        total: usize,
    },
    Error {
        message: String,
    },
}

impl ProgressEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AnalysisProgress { .. } => "analysis_progress",
            Self::AnalysisMatch { .. } => "analysis_match",
            Self::AnalysisComplete { .. } => "analysis_complete",
            Self::AnalysisError { .. } => "analysis_error",
            Self::Status { .. } => "status",
            Self::PlaylistCreated { .. } => "playlist_created",
            Self::Processing { .. } => "processing",
            Self::TrackAdded { .. } => "track_added",
            Self::TrackFailed { .. } => "track_failed",
            Self::TrackSkipped { .. } => "track_skipped",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Last event of a matching or transfer run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AnalysisComplete { .. }
                | Self::AnalysisError { .. }
                | Self::Complete { .. }
                | Self::Error { .. }
        )
    }
}

const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct ProgressHub {
    buffer: usize,
    terminal_timeout: Duration,
    sinks: RwLock<HashMap<String, mpsc::Sender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            terminal_timeout: TERMINAL_SEND_TIMEOUT,
            sinks: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the sink for `session_id`. An existing sink for the same
    /// session is dropped, which ends its stream.
    pub async fn subscribe(&self, session_id: &str) -> mpsc::Receiver<ProgressEvent> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let replaced = self
            .sinks
            .write()
            .await
            .insert(session_id.to_string(), tx)
            .is_some();
        debug!(session_id, replaced, "Progress subscriber registered");
        rx
    }

    /// Delivers `event` to the session's sink. Intermediate events are
    /// dropped when the sink is full; terminal events wait up to
    /// `terminal_timeout` for room so a slow observer still sees the outcome.
    pub async fn publish(&self, session_id: &str, event: ProgressEvent) {
        let Some(sink) = self.sinks.read().await.get(session_id).cloned() else {
            return;
        };

        let closed = if event.is_terminal() {
            match sink.send_timeout(event, self.terminal_timeout).await {
                Ok(()) => false,
                Err(SendTimeoutError::Timeout(event)) => {
                    warn!(
                        session_id,
                        kind = event.kind(),
                        "Progress sink stalled, dropping terminal event"
                    );
                    false
                }
                Err(SendTimeoutError::Closed(_)) => true,
            }
        } else {
            match sink.try_send(event) {
                Ok(()) => false,
                Err(TrySendError::Full(event)) => {
                    debug!(session_id, kind = event.kind(), "Progress sink full, dropping event");
                    false
                }
                Err(TrySendError::Closed(_)) => true,
            }
        };

        if closed {
            let mut sinks = self.sinks.write().await;
            if sinks
                .get(session_id)
                .is_some_and(|current| current.same_channel(&sink))
            {
                sinks.remove(session_id);
                debug!(session_id, "Removed disconnected progress subscriber");
            }
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sinks.read().await.len()
    }
}
