use tokio::time;
use tracing::{error, info, warn};

use crate::{
    catalog::PlaylistWriter,
    error::MigrateError,
    models::{JobStatus, TrackTransferResult, TransferOutcome, TransferReport},
    pipeline::Pipeline,
    progress::ProgressEvent,
};

const PLAYLIST_DESCRIPTION: &str = "Migrated from Spotify";

/// Materializes a completed job into a new destination playlist. Only a
/// failure to create the playlist aborts; failed inserts are recorded per
/// track and the loop carries on.
pub async fn run_transfer(
    pipeline: &Pipeline,
    job_id: &str,
    session_id: &str,
    writer: &dyn PlaylistWriter,
) -> Result<TransferReport, MigrateError> {
    let job = pipeline
        .jobs
        .get(job_id)
        .await
        .ok_or_else(|| MigrateError::JobNotFound(job_id.to_string()))?;
    if job.status != JobStatus::Complete {
        return Err(MigrateError::AnalysisIncomplete(job_id.to_string()));
    }

    let progress = &pipeline.progress;
    progress
        .publish(
            session_id,
            ProgressEvent::Status {
                message: "Creating YouTube playlist...".to_string(),
            },
        )
        .await;

    let playlist = match writer
        .create_playlist(&job.playlist.name, PLAYLIST_DESCRIPTION)
        .await
    {
        Ok(playlist) => playlist,
        Err(err) => {
            error!(job_id, session_id, "Failed to create destination playlist: {err:#}");
            progress
                .publish(
                    session_id,
                    ProgressEvent::Error {
                        message: format!("{err:#}"),
                    },
                )
                .await;
            return Err(MigrateError::Catalog(err));
        }
    };

    info!(job_id, playlist_id = %playlist.id, "Destination playlist created");
    progress
        .publish(
            session_id,
            ProgressEvent::PlaylistCreated {
                playlist_id: playlist.id.clone(),
                playlist_url: playlist.url.clone(),
            },
        )
        .await;

    let total = job.tracks.len();
    let mut success_count = 0;
    let mut skip_count = 0;
    let mut results = Vec::with_capacity(total);

    for (index, track) in job.tracks.iter().enumerate() {
        let current = index + 1;
        progress
            .publish(
                session_id,
                ProgressEvent::Processing {
                    current,
                    total,
                    track: track.summary(),
                },
            )
            .await;

        let Some(video_id) = track.target_id() else {
            skip_count += 1;
            results.push(TrackTransferResult {
                index,
                track: track.name.clone(),
                status: TransferOutcome::Skipped,
                video_id: None,
                error: None,
            });
            progress
                .publish(
                    session_id,
                    ProgressEvent::TrackSkipped {
                        current,
                        total,
                        track: track.name.clone(),
                    },
                )
                .await;
            continue;
        };

        match writer.add_item(&playlist, video_id).await {
            Ok(()) => {
                success_count += 1;
                results.push(TrackTransferResult {
                    index,
                    track: track.name.clone(),
                    status: TransferOutcome::Success,
                    video_id: Some(video_id.to_string()),
                    error: None,
                });
                progress
                    .publish(
                        session_id,
                        ProgressEvent::TrackAdded {
                            current,
                            total,
                            track: track.name.clone(),
                            video_id: video_id.to_string(),
                        },
                    )
                    .await;
            }
            Err(err) => {
                warn!(job_id, index, video_id, "Failed to add track: {err:#}");
                let message = format!("{err:#}");
                results.push(TrackTransferResult {
                    index,
                    track: track.name.clone(),
                    status: TransferOutcome::Error,
                    video_id: Some(video_id.to_string()),
                    error: Some(message.clone()),
                });
                progress
                    .publish(
                        session_id,
                        ProgressEvent::TrackFailed {
                            current,
                            total,
                            track: track.name.clone(),
                            error: message,
                        },
                    )
                    .await;
            }
        }

        if !pipeline.settings.transfer_delay.is_zero() {
            time::sleep(pipeline.settings.transfer_delay).await;
        }
    }

    info!(
        job_id,
        playlist_id = %playlist.id,
        success_count,
        skip_count,
        total,
        "Transfer finished"
    );
    progress
        .publish(
            session_id,
            ProgressEvent::Complete {
                playlist_id: playlist.id.clone(),
                playlist_url: playlist.url.clone(),
                success_count,
                skip_count,
                total,
            },
        )
        .await;

    Ok(TransferReport {
        success: true,
        playlist_id: playlist.id,
        playlist_url: playlist.url,
        success_count,
        skip_count,
        total,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::TrackStatus, pipeline::test_support::*};

    #[tokio::test]
    async fn transfer_requires_completed_analysis() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create("s", playlist(), vec![source("t1", &["A"], "Song")])
            .await
            .unwrap();

        let writer = FakeWriter::default();
        let err = run_transfer(&pipeline, &job.id, "s", &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::AnalysisIncomplete(_)));

        let err = run_transfer(&pipeline, "missing", "s", &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn playlist_creation_failure_aborts_with_error_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create("s", playlist(), vec![source("t1", &["A"], "Song")])
            .await
            .unwrap();
        pipeline
            .jobs
            .set_status(&job.id, JobStatus::Complete, None)
            .await
            .unwrap();
        let mut rx = pipeline.progress.subscribe("s").await;

        let writer = FakeWriter {
            fail_create: true,
            ..FakeWriter::default()
        };
        let err = run_transfer(&pipeline, &job.id, "s", &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Catalog(_)));

        assert!(matches!(rx.recv().await, Some(ProgressEvent::Status { .. })));
        let Some(ProgressEvent::Error { message }) = rx.recv().await else {
            panic!("expected error event");
        };
        assert!(message.contains("playlist quota reached"));
        assert!(writer.added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unmatched_tracks_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create(
                "s",
                playlist(),
                vec![source("t1", &["A"], "Hit"), source("t2", &["B"], "Miss")],
            )
            .await
            .unwrap();
        pipeline
            .jobs
            .record_match(&job.id, 0, Some(video("v1")), TrackStatus::Found)
            .await
            .unwrap();
        pipeline
            .jobs
            .record_match(&job.id, 1, None, TrackStatus::NotFound)
            .await
            .unwrap();
        pipeline
            .jobs
            .set_status(&job.id, JobStatus::Complete, None)
            .await
            .unwrap();

        let writer = FakeWriter::default();
        let report = run_transfer(&pipeline, &job.id, "s", &writer)
            .await
            .unwrap();
        assert_eq!(report.success_count, 1);
        assert_eq!(report.skip_count, 1);
        assert_eq!(report.results[1].status, TransferOutcome::Skipped);
        assert_eq!(report.playlist_id, "PL-Road Trip");
    }
}
