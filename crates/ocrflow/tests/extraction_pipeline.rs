//! Pipeline behavior under concurrency, partial failure, cancellation and
//! interruption.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{batch_text, pipeline_config, pipeline_config_with_timeout, Reply, ScriptedOcrService, TestHarness};

use ocrflow::aggregate::PAGE_BREAK;
use ocrflow::pipeline::progress::wave_progress;
use ocrflow::{ExtractionError, JobPhase, JobStatus, RegistryError};

fn pages(range: std::ops::Range<usize>) -> Vec<usize> {
    range.collect()
}

#[tokio::test(start_paused = true)]
async fn test_single_failed_batch_still_completes() {
    // 25 pages, batch size 10, concurrency 3: one wave of three batches.
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    ocr.fail(1, 503, "overloaded");
    let pipeline = harness.pipeline(pipeline_config(10, 3), 25, ocr.clone());
    let job = harness.registry.submit("answers/student-17.pdf").unwrap();

    let done = pipeline.run(&job.id).await.unwrap();

    let expected = [
        batch_text(0, &pages(0..10)),
        "[Error processing batch 2: pages 11-20: service error: OCR service returned 503: overloaded]"
            .to_string(),
        batch_text(2, &pages(20..25)),
    ]
    .join(PAGE_BREAK);

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.extracted_text.as_deref(), Some(expected.as_str()));
    assert_eq!(done.failed_batches, 1);
    assert_eq!(done.page_count, Some(25));
    assert!(done.has_extracted_text);
    assert_eq!(ocr.calls(), 3);
    assert_eq!(ocr.max_in_flight(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_page_order_survives_reversed_completion() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    // Later batches in each wave finish first.
    for batch in 0..9 {
        ocr.delay(batch, Duration::from_millis((10 - batch as u64) * 100));
    }
    let pipeline = harness.pipeline(pipeline_config(1, 3), 9, ocr.clone());
    let job = harness.registry.submit("reference.pdf").unwrap();

    let done = pipeline.run(&job.id).await.unwrap();

    let expected: Vec<String> = (0..9).map(|i| batch_text(i, &[i])).collect();
    assert_eq!(done.extracted_text.unwrap(), expected.join(PAGE_BREAK));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_never_exceeds_cap() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    for batch in 0..10 {
        ocr.delay(batch, Duration::from_millis(50 + 37 * batch as u64));
    }
    let pipeline = harness.pipeline(pipeline_config(2, 3), 20, ocr.clone());
    let mut events = pipeline.subscribe();
    let job = harness.registry.submit("long.pdf").unwrap();

    pipeline.run(&job.id).await.unwrap();

    assert_eq!(ocr.calls(), 10);
    assert_eq!(ocr.max_in_flight(), 3);

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let waves: Vec<&str> = events
        .iter()
        .map(|e| e.message.as_str())
        .filter(|m| m.starts_with("processing wave"))
        .collect();
    assert_eq!(
        waves,
        vec![
            "processing wave 1 of 4",
            "processing wave 2 of 4",
            "processing wave 3 of 4",
            "processing wave 4 of 4"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_progress_events_never_decrease() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    let pipeline = harness.pipeline(pipeline_config(3, 2), 14, ocr);
    let mut events = pipeline.subscribe();
    let job = harness.registry.submit("sheet.pdf").unwrap();

    pipeline.run(&job.id).await.unwrap();

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    let progress: Vec<u8> = events.iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
    assert_eq!(progress.first(), Some(&5));
    assert_eq!(progress.last(), Some(&100));

    // Processing is announced only after pages exist.
    let first_processing = events
        .iter()
        .position(|e| e.status == JobStatus::Processing)
        .unwrap();
    assert_eq!(events[first_processing].phase, JobPhase::ExtractingText);
    assert_eq!(events[first_processing].page_count, Some(14));
    assert!(events[..first_processing]
        .iter()
        .all(|e| e.status == JobStatus::Pending));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_batch_degrades_to_marker() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    ocr.reply(1, Reply::Hang);
    let pipeline = harness.pipeline(
        pipeline_config_with_timeout(5, 2, Duration::from_secs(5)),
        10,
        ocr,
    );
    let job = harness.registry.submit("slow.pdf").unwrap();

    let done = pipeline.run(&job.id).await.unwrap();

    let text = done.extracted_text.unwrap();
    assert!(text.starts_with(&batch_text(0, &pages(0..5))));
    assert!(text.ends_with("[Error processing batch 2: pages 6-10: timed out after 5s]"));
    assert_eq!(done.failed_batches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_every_batch_failing_fails_the_job() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    ocr.fail(0, 502, "bad gateway")
        .reply(1, Reply::Empty)
        .reply(2, Reply::Hang);
    let pipeline = harness.pipeline(
        pipeline_config_with_timeout(2, 3, Duration::from_secs(5)),
        6,
        ocr.clone(),
    );
    let job = harness.registry.submit("blank.pdf").unwrap();

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert!(matches!(
        err,
        ExtractionError::AllBatchesFailed { total: 3, .. }
    ));
    // Every batch was attempted before giving up.
    assert_eq!(ocr.calls(), 3);

    let stored = harness.registry.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.phase, JobPhase::Failed);
    assert_eq!(stored.failed_batches, 3);
    assert!(!stored.has_extracted_text);

    let diagnostic = stored.extracted_text.unwrap();
    assert!(diagnostic.starts_with("OCR service failed for every batch (3 of 3)"));
    assert!(diagnostic.contains("batch 1: pages 1-2: service error: OCR service returned 502: bad gateway"));
    assert!(diagnostic.contains("batch 2: pages 3-4: empty result"));
    assert!(diagnostic.contains("batch 3: pages 5-6: timed out after 5s"));
    assert_eq!(stored.message, diagnostic);
}

#[tokio::test(start_paused = true)]
async fn test_garbled_output_counts_as_failure() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    ocr.reply(0, Reply::Text("|_-~".repeat(30)));
    let pipeline = harness.pipeline(pipeline_config(10, 3), 4, ocr);
    let job = harness.registry.submit("smudge.pdf").unwrap();

    let err = pipeline.run(&job.id).await.unwrap_err();
    assert!(matches!(err, ExtractionError::AllBatchesFailed { .. }));
    assert!(harness
        .registry
        .get(&job.id)
        .unwrap()
        .extracted_text
        .unwrap()
        .contains("unreadable output"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_between_waves_keeps_partial_text() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    let pipeline = harness.pipeline(pipeline_config(1, 2), 6, ocr.clone());
    let mut events = pipeline.subscribe();
    let job = harness.registry.submit("exam.pdf").unwrap();

    let watcher = async {
        while let Ok(event) = events.recv().await {
            if event.message == "processing wave 1 of 3" {
                assert!(pipeline.cancel(&job.id));
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(pipeline.run(&job.id), watcher);

    match result {
        Err(ExtractionError::CancellationRequested {
            completed_waves,
            total_waves,
        }) => {
            assert_eq!(completed_waves, 1);
            assert_eq!(total_waves, 3);
        }
        other => panic!("Expected CancellationRequested, got {:?}", other),
    }
    assert_eq!(ocr.calls(), 2);
    assert!(!pipeline.is_running(&job.id));

    let stored = harness.registry.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        stored.extracted_text.as_deref(),
        Some("Extraction cancelled after 1 of 3 waves")
    );
    assert_eq!(
        stored.partial_text.unwrap(),
        [batch_text(0, &[0]), batch_text(1, &[1])].join(PAGE_BREAK)
    );
    assert_eq!(stored.progress, wave_progress(1, 3));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_before_first_wave_skips_ocr() {
    // 25 pages, batch size 10, concurrency 3: the whole document is one wave.
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    let pipeline = harness.pipeline(pipeline_config(10, 3), 25, ocr.clone());
    let mut events = pipeline.subscribe();
    let job = harness.registry.submit("early.pdf").unwrap();

    let watcher = async {
        while let Ok(event) = events.recv().await {
            if event.phase == JobPhase::Converting {
                assert!(pipeline.cancel(&job.id));
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(pipeline.run(&job.id), watcher);

    match result {
        Err(ExtractionError::CancellationRequested {
            completed_waves,
            total_waves,
        }) => {
            assert_eq!(completed_waves, 0);
            assert_eq!(total_waves, 1);
        }
        other => panic!("Expected CancellationRequested, got {:?}", other),
    }
    assert_eq!(ocr.calls(), 0);

    let stored = harness.registry.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(
        stored.extracted_text.as_deref(),
        Some("Extraction cancelled after 0 of 1 waves")
    );
    assert!(stored.partial_text.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_second_pipeline_cannot_run_the_same_attempt() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    let first = harness.pipeline(pipeline_config(10, 3), 25, ocr.clone());
    let second = harness.pipeline(pipeline_config(10, 3), 25, ocr.clone());
    let job = harness.registry.submit("shared.pdf").unwrap();

    let (a, b) = tokio::join!(first.run(&job.id), second.run(&job.id));

    let (winner, loser) = if a.is_ok() { (a, b) } else { (b, a) };
    let done = winner.unwrap();
    assert!(matches!(
        loser,
        Err(ExtractionError::Registry(RegistryError::AttemptInFlight { attempt: 1, .. }))
    ));
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(ocr.calls(), 3);

    let stored = harness.registry.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.extracted_text, done.extracted_text);
    assert!(!harness.registry.is_leased(&job.id));
}

#[tokio::test(start_paused = true)]
async fn test_garbled_batch_reported_as_gap_in_completed_job() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    ocr.reply(1, Reply::Text("|_-~".repeat(30)));
    let pipeline = harness.pipeline(pipeline_config(2, 3), 6, ocr);
    let job = harness.registry.submit("smudged-middle.pdf").unwrap();

    let done = pipeline.run(&job.id).await.unwrap();

    assert_eq!(done.failed_batches, 1);
    assert_eq!(
        done.extracted_text.unwrap(),
        [
            batch_text(0, &[0, 1]),
            "[Error processing batch 2: pages 3-4: unreadable output]".to_string(),
            batch_text(2, &[4, 5]),
        ]
        .join(PAGE_BREAK)
    );
}

#[tokio::test(start_paused = true)]
async fn test_interruption_after_wave_k_leaves_waves_one_to_k() {
    let harness = TestHarness::with_database();
    let ocr = Arc::new(ScriptedOcrService::new());
    // Wave 3 holds batches 4 and 5; batch 4 never answers.
    ocr.reply(4, Reply::Hang);
    let pipeline = harness.pipeline(pipeline_config(1, 2), 6, ocr);
    let job = harness.registry.submit("crash.pdf").unwrap();

    // Dropping the run future mid-wave stands in for a crashed worker.
    let interrupted = tokio::time::timeout(Duration::from_secs(30), pipeline.run(&job.id)).await;
    assert!(interrupted.is_err());

    let registry = harness.reopen_registry();
    let stored = registry.get(&job.id).unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
    assert_eq!(stored.message, "processing wave 2 of 3");
    assert_eq!(stored.progress, wave_progress(2, 3));

    let expected: Vec<String> = (0..4).map(|i| batch_text(i, &[i])).collect();
    assert_eq!(stored.partial_text.unwrap(), expected.join(PAGE_BREAK));
    let annotated = stored.extracted_text.unwrap();
    assert!(annotated.starts_with("[Processing wave 2 of 3]"));
    assert!(annotated.ends_with(&expected.join(PAGE_BREAK)));
}

#[tokio::test(start_paused = true)]
async fn test_waves_are_spaced_by_the_delay() {
    let harness = TestHarness::new();
    let ocr = Arc::new(ScriptedOcrService::new());
    let pipeline = harness.pipeline(pipeline_config(1, 2), 5, ocr);
    let job = harness.registry.submit("spaced.pdf").unwrap();

    let start = tokio::time::Instant::now();
    pipeline.run(&job.id).await.unwrap();

    // Three waves of 10 ms calls, with a one second pause between waves only.
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2030), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(2100), "{:?}", elapsed);
}
