use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    catalog::TrackSearcher,
    error::MigrateError,
    models::{JobStatus, MatchStats, TrackMatch, TrackState, TrackStatus},
    pipeline::Pipeline,
    progress::ProgressEvent,
    search_cache::SearchCache,
};

/// Walks the job's tracks in order, resolving each through the cache or the
/// searcher. Store failures abort the run; tracks keep the state they had.
pub async fn run_analysis(
    pipeline: &Pipeline,
    job_id: &str,
    searcher: &dyn TrackSearcher,
) -> Result<MatchStats, MigrateError> {
    let job = pipeline
        .jobs
        .set_status(job_id, JobStatus::Analyzing, None)
        .await?;
    let total = job.tracks.len();
    let session_id = job.session_id.as_str();

    info!(job_id, session_id, tracks = total, "Analysis started");

    for (index, track) in job.tracks.iter().enumerate() {
        pipeline.jobs.mark_searching(job_id, index).await?;
        pipeline
            .progress
            .publish(
                session_id,
                ProgressEvent::AnalysisProgress {
                    job_id: job_id.to_string(),
                    current: index + 1,
                    total,
                    track: track.summary(),
                    status: TrackStatus::Searching,
                },
            )
            .await;

        let matched = resolve_match(&pipeline.cache, searcher, track).await;
        let searched = if matched.is_some() {
            TrackStatus::Found
        } else {
            TrackStatus::NotFound
        };
        let status = pipeline
            .jobs
            .record_match(job_id, index, matched.clone(), searched)
            .await?;

        pipeline
            .progress
            .publish(
                session_id,
                ProgressEvent::AnalysisMatch {
                    job_id: job_id.to_string(),
                    current: index + 1,
                    total,
                    track: track.summary(),
                    matched,
                    status,
                },
            )
            .await;

        if index + 1 < total && !pipeline.settings.search_delay.is_zero() {
            time::sleep(pipeline.settings.search_delay).await;
        }
    }

    let completed = pipeline
        .jobs
        .set_status(job_id, JobStatus::Complete, None)
        .await?;
    let stats = completed.stats();
    pipeline
        .progress
        .publish(
            session_id,
            ProgressEvent::AnalysisComplete {
                job_id: job_id.to_string(),
                stats,
            },
        )
        .await;

    Ok(stats)
}

/// A failed search degrades to "no match" for this track only and is not
/// cached, so a later run tries again.
async fn resolve_match(
    cache: &SearchCache,
    searcher: &dyn TrackSearcher,
    track: &TrackState,
) -> Option<TrackMatch> {
    if let Some(cached) = cache.lookup(&track.artists, &track.name).await {
        debug!(title = %track.name, found = cached.is_some(), "Search cache hit");
        return cached;
    }

    match searcher.search_match(&track.artists, &track.name).await {
        Ok(result) => {
            cache
                .store(&track.artists, &track.name, result.clone())
                .await;
            result
        }
        Err(err) => {
            warn!(
                title = %track.name,
                artists = %track.artists.join(", "),
                "Search failed, treating as no match: {err:#}"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::pipeline::test_support::*;

    #[tokio::test]
    async fn identical_tracks_are_searched_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create(
                "s",
                playlist(),
                vec![
                    source("t1", &["Simon", "Garfunkel"], "The Boxer"),
                    source("t2", &["garfunkel ", "SIMON"], " the boxer"),
                    source("t3", &["Nobody"], "Lost"),
                    source("t4", &["nobody"], "lost"),
                ],
            )
            .await
            .unwrap();
        let searcher = FakeSearcher {
            missing: HashSet::from(["Lost".to_string()]),
            ..FakeSearcher::default()
        };

        let stats = run_analysis(&pipeline, &job.id, &searcher).await.unwrap();
        assert_eq!(searcher.calls(), vec!["The Boxer".to_string(), "Lost".to_string()]);
        assert_eq!(stats.found, 2);
        assert_eq!(stats.not_found, 2);

        let job = pipeline.jobs.get(&job.id).await.unwrap();
        assert_eq!(job.tracks[1].matched, job.tracks[0].matched);
    }

    #[tokio::test]
    async fn search_error_degrades_to_not_found_and_continues() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create(
                "s",
                playlist(),
                vec![source("t1", &["A"], "Broken"), source("t2", &["B"], "Fine")],
            )
            .await
            .unwrap();
        let searcher = FakeSearcher {
            failing: HashSet::from(["Broken".to_string()]),
            ..FakeSearcher::default()
        };

        let stats = run_analysis(&pipeline, &job.id, &searcher).await.unwrap();
        assert_eq!(stats.not_found, 1);
        assert_eq!(stats.found, 1);

        let job = pipeline.jobs.get(&job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.tracks[0].status, TrackStatus::NotFound);
        assert_eq!(job.progress.current, 2);
        assert_eq!(
            pipeline
                .cache
                .lookup(&["A".to_string()], "Broken")
                .await,
            None
        );
    }

    #[tokio::test]
    async fn override_applied_before_analysis_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create("s", playlist(), vec![source("t1", &["A"], "Song")])
            .await
            .unwrap();
        assert!(pipeline.jobs.set_manual_override(&job.id, 0, "chosen").await);
        let mut rx = pipeline.progress.subscribe("s").await;

        let stats = run_analysis(&pipeline, &job.id, &FakeSearcher::default())
            .await
            .unwrap();
        assert_eq!(stats.manual, 1);
        assert_eq!(stats.found, 0);

        let mut match_statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ProgressEvent::AnalysisMatch { status, .. } = event {
                match_statuses.push(status);
            }
        }
        assert_eq!(match_statuses, vec![TrackStatus::Manual]);

        let job = pipeline.jobs.get(&job.id).await.unwrap();
        assert_eq!(job.tracks[0].target_id(), Some("chosen"));
    }

    #[tokio::test]
    async fn missing_job_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let err = run_analysis(&pipeline, "missing", &FakeSearcher::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn analysis_publishes_progress_then_match_per_track() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let mut rx = pipeline.progress.subscribe("s").await;
        let job = pipeline
            .jobs
            .create("s", playlist(), vec![source("t1", &["A"], "Song")])
            .await
            .unwrap();

        run_analysis(&pipeline, &job.id, &FakeSearcher::default())
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first,
            ProgressEvent::AnalysisProgress {
                current: 1,
                total: 1,
                status: TrackStatus::Searching,
                ..
            }
        ));
        let second = rx.recv().await.unwrap();
        let ProgressEvent::AnalysisMatch { matched, status, .. } = second else {
            panic!("expected match event, got {second:?}");
        };
        assert_eq!(status, TrackStatus::Found);
        assert_eq!(matched, Some(video("vid-Song")));
        assert!(matches!(
            rx.recv().await,
            Some(ProgressEvent::AnalysisComplete { .. })
        ));
    }

    #[tokio::test]
    async fn rerun_uses_cache_and_resets_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pipeline = pipeline(dir.path()).await;
        let job = pipeline
            .jobs
            .create("s", playlist(), vec![source("t1", &["A"], "Song")])
            .await
            .unwrap();
        let searcher = Arc::new(FakeSearcher::default());

        run_analysis(&pipeline, &job.id, searcher.as_ref()).await.unwrap();
        run_analysis(&pipeline, &job.id, searcher.as_ref()).await.unwrap();

        assert_eq!(searcher.calls().len(), 1);
        let job = pipeline.jobs.get(&job.id).await.unwrap();
        assert_eq!(job.progress.current, 1);
        assert_eq!(job.status, JobStatus::Complete);
    }
}
