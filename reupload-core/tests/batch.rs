mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reupload_core::batch::{BatchCoordinator, BatchError, ItemRunner, JobStatus, JobStore};
use reupload_core::error::{PipelineError, PipelineResult};
use reupload_core::metadata::{MetadataOverrides, VideoMetadata};
use reupload_core::pipeline::{ItemSpec, PipelineReport};
use support::{remaining_files, FakePlatform, Harness};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn failing_item_does_not_stop_the_batch() {
    let harness = Harness::new(FakePlatform::default());
    let first = harness.source("first.mp4", 64);
    let third = harness.source("third.mp4", 64);
    let missing = harness.dir.path().join("inputs/missing.mp4");
    let items = vec![
        ItemSpec::local(&first),
        ItemSpec::local(&missing),
        ItemSpec::local(&third),
    ];
    let coordinator = BatchCoordinator::new(Arc::new(harness.pipeline()), JobStore::new());

    let job = coordinator.run(items).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.total_videos, 3);
    assert_eq!(job.processed_videos, 2);
    assert_eq!(job.failed_videos, 1);
    assert_eq!(job.errors.len(), 1);
    assert!(job.errors[0].contains("missing.mp4"), "{}", job.errors[0]);
    assert!(job.errors[0].contains("(item 2)"), "{}", job.errors[0]);
    assert_eq!(job.video_ids.len(), 2);
    assert!(job.completed_at.is_some());
    assert!(remaining_files(&harness.work_dir()).is_empty());
}

#[tokio::test]
async fn unknown_job_id_is_not_found() {
    let coordinator = BatchCoordinator::new(Arc::new(ScriptedRunner::default()), JobStore::new());
    assert!(matches!(
        coordinator.status("batch_20240101_000000_deadbeef"),
        Err(BatchError::NotFound(_))
    ));
    let err: PipelineError = BatchError::NotFound("x".into()).into();
    assert!(matches!(err, PipelineError::ResourceNotFound { .. }));
}

#[tokio::test]
async fn empty_batch_completes_immediately() {
    let coordinator = BatchCoordinator::new(Arc::new(ScriptedRunner::default()), JobStore::new());
    let job = coordinator.run(Vec::new()).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.finished_items(), 0);
}

#[tokio::test]
async fn counters_add_up_under_concurrency() {
    let runner = Arc::new(ScriptedRunner {
        delay: Duration::from_millis(5),
        ..ScriptedRunner::default()
    });
    let coordinator =
        BatchCoordinator::new(runner.clone(), JobStore::new()).with_concurrency(3);
    let items: Vec<ItemSpec> = (0..12)
        .map(|n| {
            let name = if n % 4 == 0 { format!("fail-{n}.mp4") } else { format!("ok-{n}.mp4") };
            ItemSpec::local(name)
        })
        .collect();

    let job = coordinator.run(items).await.unwrap();

    assert_eq!(job.finished_items(), job.total_videos);
    assert_eq!(job.failed_videos, 3);
    assert_eq!(job.processed_videos, 9);
    assert_eq!(job.errors.len(), job.failed_videos);
    assert!(runner.peak.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn submit_returns_processing_snapshot_then_completes() {
    let runner = Arc::new(ScriptedRunner {
        delay: Duration::from_millis(20),
        ..ScriptedRunner::default()
    });
    let coordinator = BatchCoordinator::new(runner, JobStore::new());

    let (snapshot, handle) =
        coordinator.submit(vec![ItemSpec::local("ok-a.mp4"), ItemSpec::local("ok-b.mp4")]);

    assert_eq!(snapshot.status, JobStatus::Processing);
    assert_eq!(snapshot.processed_videos, 0);
    let done = handle.await.unwrap().unwrap();
    assert_eq!(done.job_id, snapshot.job_id);
    assert_eq!(done.status, JobStatus::Completed);
    let stored = coordinator.status(&snapshot.job_id).unwrap();
    assert_eq!(stored.processed_videos, 2);
}

#[tokio::test]
async fn cancelled_batch_records_remaining_items_as_failed() {
    let runner = Arc::new(ScriptedRunner {
        delay: Duration::from_secs(30),
        ..ScriptedRunner::default()
    });
    let cancel = CancellationToken::new();
    let coordinator = BatchCoordinator::new(runner, JobStore::new()).with_cancellation(cancel.clone());
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let job = coordinator
        .run(vec![ItemSpec::local("ok-a.mp4"), ItemSpec::local("ok-b.mp4")])
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed_videos, 2);
    assert!(job.errors.iter().all(|e| e.contains("cancelled")));
}

/// Succeeds unless the input file name starts with `fail`. Tracks peak parallelism.
#[derive(Default)]
struct ScriptedRunner {
    delay: Duration,
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl ItemRunner for ScriptedRunner {
    async fn run_item(
        &self,
        spec: &ItemSpec,
        cancel: CancellationToken,
    ) -> PipelineResult<PipelineReport> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let finished = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.delay) => true,
        };
        self.running.fetch_sub(1, Ordering::SeqCst);
        if !finished {
            return Err(PipelineError::Cancelled("item cancelled".into()));
        }

        let name = spec.input.to_string();
        if name.starts_with("fail") {
            return Err(PipelineError::Publish(format!("scripted failure for {name}")));
        }
        let metadata = VideoMetadata::resolve(
            &MetadataOverrides::default(),
            None,
            std::path::Path::new(&name),
            Utc::now(),
        )?;
        Ok(PipelineReport {
            item_key: format!("item-{name}"),
            input: spec.input.clone(),
            video_id: format!("video-{name}"),
            metadata,
            publish_attempts: 1,
            thumbnail_set: false,
            completed_at: Utc::now(),
        })
    }
}
