use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};

use vidmark::detect::NoopBackend;
use vidmark::notify::JsonLinesObserver;
use vidmark::pipeline::{FileMedia, MediaFactory, Scheduler};
use vidmark::{
    CancelToken, Detection, DetectorBackend, Frame, FrameSink, FrameSource, JobEvent, JobId,
    JobReport, JobRunner, Notifier, PipelineConfig, PipelineRunner, SharedBackend, VideoMetadata,
    COCO_PERSON,
};

// -------------------- in-memory media --------------------

fn pattern(width: u32, height: u32, index: u64) -> Frame {
    let len = (width * height * 3) as usize;
    let pixels = (0..len)
        .map(|i| ((i as u64 * 3 + index * 11) % 251) as u8)
        .collect();
    Frame::new(pixels, width, height, index, 25.0).unwrap()
}

#[derive(Default)]
struct Recorder {
    written: Mutex<Vec<(u64, [u8; 32])>>,
    source_closes: AtomicUsize,
    sink_closes: AtomicUsize,
}

impl Recorder {
    fn written_indices(&self) -> Vec<u64> {
        self.written.lock().unwrap().iter().map(|(i, _)| *i).collect()
    }

    fn digest_of(&self, index: u64) -> [u8; 32] {
        self.written
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, d)| *d)
            .unwrap()
    }
}

#[derive(Clone)]
struct MemoryMedia {
    width: u32,
    height: u32,
    frames: u64,
    advertised: u64,
    fail_read_at: Option<u64>,
    fail_write_at: Option<u64>,
    panic_write_at: Option<u64>,
    fail_create: bool,
    cancel_after: Option<(u64, CancelToken)>,
    read_delay: Option<Duration>,
    recorder: Arc<Recorder>,
}

impl MemoryMedia {
    fn new(frames: u64) -> Self {
        Self {
            width: 100,
            height: 100,
            frames,
            advertised: frames,
            fail_read_at: None,
            fail_write_at: None,
            panic_write_at: None,
            fail_create: false,
            cancel_after: None,
            read_delay: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    fn tiny(frames: u64) -> Self {
        Self {
            width: 4,
            height: 4,
            ..Self::new(frames)
        }
    }
}

struct MemorySource {
    media: MemoryMedia,
    next: u64,
}

impl FrameSource for MemorySource {
    fn metadata(&self) -> VideoMetadata {
        VideoMetadata {
            width: self.media.width,
            height: self.media.height,
            frame_rate: 25.0,
            total_frames: self.media.advertised,
        }
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(delay) = self.media.read_delay {
            std::thread::sleep(delay);
        }
        if Some(self.next) == self.media.fail_read_at {
            bail!("corrupt packet");
        }
        if self.next >= self.media.frames {
            return Ok(None);
        }
        if let Some((at, token)) = &self.media.cancel_after {
            if self.next == *at {
                token.cancel();
            }
        }
        let frame = pattern(self.media.width, self.media.height, self.next);
        self.next += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        self.media.recorder.source_closes.fetch_add(1, Ordering::SeqCst);
    }
}

struct MemorySink {
    media: MemoryMedia,
    written: u64,
}

impl FrameSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if Some(frame.index) == self.media.fail_write_at {
            bail!("disk full");
        }
        if Some(frame.index) == self.media.panic_write_at {
            panic!("encoder state corrupted");
        }
        self.media
            .recorder
            .written
            .lock()
            .unwrap()
            .push((frame.index, frame.digest()));
        self.written += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.media.recorder.sink_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

impl MediaFactory for MemoryMedia {
    fn open_source(&self, _input: &str) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(MemorySource {
            media: self.clone(),
            next: 0,
        }))
    }

    fn create_sink(&self, _output: &str, _metadata: &VideoMetadata) -> Result<Box<dyn FrameSink>> {
        if self.fail_create {
            bail!("read-only filesystem");
        }
        Ok(Box::new(MemorySink {
            media: self.clone(),
            written: 0,
        }))
    }
}

// -------------------- scripted detector --------------------

#[derive(Default)]
struct ScriptedDetector {
    calls: Arc<Mutex<Vec<u64>>>,
    fail_on: Option<u64>,
}

impl DetectorBackend for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.lock().unwrap().push(frame.index);
        if Some(frame.index) == self.fail_on {
            bail!("inference failed");
        }
        Ok(vec![
            Detection::new([10.0, 20.0, 50.0, 80.0], COCO_PERSON, 0.9),
            Detection::new([0.0, 0.0, 90.0, 90.0], 3, 0.99),
        ])
    }
}

/// Backend that panics instead of returning an error.
struct PanickingDetector {
    panic_on: u64,
}

impl DetectorBackend for PanickingDetector {
    fn name(&self) -> &'static str {
        "panicking"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if frame.index == self.panic_on {
            panic!("tensor shape mismatch");
        }
        Ok(vec![Detection::new([10.0, 20.0, 50.0, 80.0], COCO_PERSON, 0.9)])
    }
}

#[derive(Default)]
struct CountingScheduler {
    yields: AtomicUsize,
}

impl Scheduler for CountingScheduler {
    fn yield_now(&self) {
        self.yields.fetch_add(1, Ordering::SeqCst);
    }
}

// -------------------- helpers --------------------

fn noop() -> SharedBackend {
    Arc::new(Mutex::new(NoopBackend::new()))
}

fn runner_with(
    config: PipelineConfig,
    backend: SharedBackend,
    media: &MemoryMedia,
) -> (PipelineRunner, Receiver<JobEvent>) {
    let notifier = Arc::new(Notifier::new());
    let (_id, rx) = notifier.subscribe();
    let runner = PipelineRunner::new(config, backend, notifier)
        .unwrap()
        .with_media(Arc::new(media.clone()));
    (runner, rx)
}

fn run(runner: &PipelineRunner, job: &str) -> JobReport {
    runner.run("in.mp4", "out.mp4", &JobId::new(job).unwrap(), &CancelToken::new())
}

fn full_progress_count(events: &[JobEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, JobEvent::Progress { progress, .. } if *progress == 100.0))
        .count()
}

fn failures(events: &[JobEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Failed { message, .. } => Some(message.clone()),
            _ => None,
        })
        .collect()
}

// -------------------- tests --------------------

#[test]
fn every_frame_is_written_once_in_order() {
    let media = MemoryMedia::new(10);
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "order");

    assert!(report.succeeded());
    assert_eq!(report.frames_processed, 10);
    assert_eq!(media.recorder.written_indices(), (0..10).collect::<Vec<u64>>());
    assert_eq!(media.recorder.source_closes.load(Ordering::SeqCst), 1);
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 1);

    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(
        events.last(),
        Some(&JobEvent::Completed {
            job_id: "order".into(),
            output_location: "out.mp4".into(),
        })
    );
}

#[test]
fn completed_job_reports_one_full_progress_event_then_completion() {
    let media = MemoryMedia::tiny(40);
    let config = PipelineConfig {
        progress_interval: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let (runner, rx) = runner_with(config, noop(), &media);

    run(&runner, "final");

    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(full_progress_count(&events), 1);
    let n = events.len();
    assert_eq!(events[n - 2].progress(), Some(100.0));
    assert!(matches!(events[n - 1], JobEvent::Completed { .. }));
    assert!(events[..n - 2]
        .iter()
        .all(|e| matches!(e, JobEvent::Progress { progress, .. } if *progress < 100.0)));
    assert_eq!(n - 1, 40, "one progress per frame except the last, plus the final pair");
}

#[test]
fn underestimated_total_still_yields_single_full_progress() {
    let mut media = MemoryMedia::tiny(12);
    media.advertised = 5;
    let config = PipelineConfig {
        progress_interval: Duration::ZERO,
        ..PipelineConfig::default()
    };
    let (runner, rx) = runner_with(config, noop(), &media);

    let report = run(&runner, "short-count");

    assert_eq!(report.frames_processed, 12);
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(full_progress_count(&events), 1);
}

#[test]
fn throttle_limits_intermediate_progress() {
    let media = MemoryMedia::tiny(10);
    let config = PipelineConfig {
        progress_interval: Duration::from_secs(3600),
        ..PipelineConfig::default()
    };
    let (runner, rx) = runner_with(config, noop(), &media);

    let report = run(&runner, "throttled");

    let progress: Vec<f64> = rx
        .try_iter()
        .filter(|e| matches!(e, JobEvent::Progress { .. }))
        .filter_map(|e| e.progress())
        .collect();
    assert_eq!(progress.len(), 2);
    assert!((progress[0] - 10.0).abs() < 1e-9);
    assert_eq!(progress[1], 100.0);
    assert_eq!(report.progress_events, 2);
}

#[test]
fn unknown_total_skips_intermediate_progress() {
    let mut media = MemoryMedia::tiny(7);
    media.advertised = 0;
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "no-total");

    assert!(report.succeeded());
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].progress(), Some(100.0));
    assert!(matches!(events[1], JobEvent::Completed { .. }));
}

#[test]
fn detection_runs_on_stride_frames_and_others_pass_through() {
    let media = MemoryMedia::new(10);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backend: SharedBackend = Arc::new(Mutex::new(ScriptedDetector {
        calls: calls.clone(),
        fail_on: None,
    }));
    let (runner, _rx) = runner_with(PipelineConfig::default(), backend, &media);

    let report = run(&runner, "stride");

    assert_eq!(*calls.lock().unwrap(), vec![0, 3, 6, 9]);
    assert_eq!(report.frames_sampled, 4);
    assert_eq!(report.subjects_annotated, 4);
    assert_eq!(report.detector.detections_kept, 4);
    for index in 0..10u64 {
        let untouched = pattern(100, 100, index).digest();
        let written = media.recorder.digest_of(index);
        if index % 3 == 0 {
            assert_ne!(written, untouched, "frame {index} should carry an overlay");
        } else {
            assert_eq!(written, untouched, "frame {index} should be unmodified");
        }
    }
}

#[test]
fn custom_stride_changes_sampled_frames() {
    let media = MemoryMedia::tiny(10);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let backend: SharedBackend = Arc::new(Mutex::new(ScriptedDetector {
        calls: calls.clone(),
        fail_on: None,
    }));
    let config = PipelineConfig {
        sampling_stride: 4,
        ..PipelineConfig::default()
    };
    let (runner, _rx) = runner_with(config, backend, &media);

    run(&runner, "stride-4");

    assert_eq!(*calls.lock().unwrap(), vec![0, 4, 8]);
}

#[test]
fn noop_backend_output_matches_input() {
    let media = MemoryMedia::new(6);
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "degraded");

    assert!(report.succeeded());
    assert_eq!(report.subjects_annotated, 0);
    for index in 0..6u64 {
        assert_eq!(media.recorder.digest_of(index), pattern(100, 100, index).digest());
    }
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(full_progress_count(&events), 1);
    assert!(matches!(events.last(), Some(JobEvent::Completed { .. })));
}

#[test]
fn detector_failure_does_not_stop_the_job() {
    let media = MemoryMedia::new(9);
    let backend: SharedBackend = Arc::new(Mutex::new(ScriptedDetector {
        calls: Arc::default(),
        fail_on: Some(3),
    }));
    let (runner, rx) = runner_with(PipelineConfig::default(), backend, &media);

    let report = run(&runner, "flaky-detector");

    assert!(report.succeeded());
    assert_eq!(report.frames_processed, 9);
    assert_eq!(report.detector.frames_attempted, 3);
    assert_eq!(report.detector.frames_failed, 1);
    assert_eq!(media.recorder.digest_of(3), pattern(100, 100, 3).digest());
    assert_ne!(media.recorder.digest_of(6), pattern(100, 100, 6).digest());
    assert!(failures(&rx.try_iter().collect::<Vec<_>>()).is_empty());
}

#[test]
fn detector_panic_is_a_failed_frame_and_backend_survives() {
    let media = MemoryMedia::new(9);
    let backend: SharedBackend = Arc::new(Mutex::new(PanickingDetector { panic_on: 3 }));
    let (runner, rx) = runner_with(PipelineConfig::default(), backend.clone(), &media);

    let report = run(&runner, "panicky-detector");

    assert!(report.succeeded());
    assert_eq!(report.frames_processed, 9);
    assert_eq!(report.detector.frames_attempted, 3);
    assert_eq!(report.detector.frames_failed, 1);
    assert_eq!(report.subjects_annotated, 2);
    assert_eq!(media.recorder.digest_of(3), pattern(100, 100, 3).digest());
    assert!(!backend.is_poisoned());

    let second = run(&runner, "after-panic");
    assert!(second.succeeded());
    assert_eq!(second.detector.frames_failed, 1);
    assert_eq!(second.subjects_annotated, 2);

    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert!(failures(&events).is_empty());
    assert_eq!(full_progress_count(&events), 2);
}

#[test]
fn panic_on_job_thread_still_reports_failure() {
    let mut media = MemoryMedia::tiny(10);
    media.panic_write_at = Some(2);
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);
    let jobs = JobRunner::new(runner);

    let handle = jobs
        .start_job("in.mp4", "out.mp4", JobId::new("panics").unwrap())
        .unwrap();
    let report = handle.join().expect("panic is contained in the job thread");

    assert!(!report.succeeded());
    let message = report.error_message().unwrap();
    assert!(message.starts_with("job panicked"), "{message}");
    assert!(message.contains("encoder state corrupted"), "{message}");

    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(failures(&events), vec![message.to_string()]);
    assert!(events.iter().all(|e| e.job_id() == "panics"));
    assert!(!events.iter().any(|e| matches!(e, JobEvent::Completed { .. })));
}

#[test]
fn missing_input_fails_once_without_progress() {
    let notifier = Arc::new(Notifier::new());
    let (_id, rx) = notifier.subscribe();
    let runner = PipelineRunner::new(PipelineConfig::default(), noop(), notifier)
        .unwrap()
        .with_media(Arc::new(FileMedia));

    let report = runner.run(
        "/nonexistent/vidmark/input.mp4",
        "stub://out",
        &JobId::new("missing").unwrap(),
        &CancelToken::new(),
    );

    assert!(!report.succeeded());
    assert_eq!(report.frames_processed, 0);
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    let failed = failures(&events);
    assert_eq!(failed.len(), 1);
    assert!(failed[0].starts_with("cannot open input"), "{}", failed[0]);
}

#[test]
fn output_creation_failure_closes_source() {
    let mut media = MemoryMedia::tiny(5);
    media.fail_create = true;
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "no-output");

    assert_eq!(report.frames_processed, 0);
    assert_eq!(media.recorder.source_closes.load(Ordering::SeqCst), 1);
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 0);
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(failures(&events)[0].starts_with("cannot create output"));
}

#[test]
fn decode_error_mid_stream_fails_and_closes_both_ends() {
    let mut media = MemoryMedia::tiny(10);
    media.fail_read_at = Some(4);
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "bad-decode");

    assert_eq!(report.frames_processed, 4);
    assert_eq!(
        report.error_message(),
        Some("failed to decode frame 4: corrupt packet")
    );
    assert_eq!(media.recorder.source_closes.load(Ordering::SeqCst), 1);
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 1);
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(failures(&events).len(), 1);
    assert_eq!(full_progress_count(&events), 0);
    assert!(!events.iter().any(|e| matches!(e, JobEvent::Completed { .. })));
}

#[test]
fn write_error_fails_the_job() {
    let mut media = MemoryMedia::tiny(10);
    media.fail_write_at = Some(2);
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = run(&runner, "bad-write");

    assert_eq!(report.frames_processed, 2);
    assert_eq!(report.error_message(), Some("failed to write frame 2: disk full"));
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 1);
    assert_eq!(failures(&rx.try_iter().collect::<Vec<_>>()).len(), 1);
}

#[test]
fn cancellation_closes_sink_and_reports_one_failure() {
    let cancel = CancelToken::new();
    let mut media = MemoryMedia::tiny(20);
    media.cancel_after = Some((5, cancel.clone()));
    let (runner, rx) = runner_with(PipelineConfig::default(), noop(), &media);

    let report = runner.run("in.mp4", "out.mp4", &JobId::new("cancel").unwrap(), &cancel);

    assert_eq!(report.error_message(), Some("job cancelled"));
    assert_eq!(report.frames_processed, 6);
    assert_eq!(media.recorder.written_indices(), (0..6).collect::<Vec<u64>>());
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 1);
    let events: Vec<JobEvent> = rx.try_iter().collect();
    assert_eq!(failures(&events), vec!["job cancelled".to_string()]);
    assert_eq!(full_progress_count(&events), 0);
}

#[test]
fn job_handle_cancel_stops_background_job() {
    let mut media = MemoryMedia::tiny(100_000);
    media.read_delay = Some(Duration::from_millis(1));
    let notifier = Arc::new(Notifier::new());
    let runner = PipelineRunner::new(PipelineConfig::default(), noop(), notifier)
        .unwrap()
        .with_media(Arc::new(media.clone()));
    let jobs = JobRunner::new(runner);

    let handle = jobs
        .start_job("in.mp4", "out.mp4", JobId::new("bg-cancel").unwrap())
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    handle.cancel();
    let report = handle.join().unwrap();

    assert_eq!(report.error_message(), Some("job cancelled"));
    assert!(report.frames_processed < 100_000);
    assert_eq!(media.recorder.sink_closes.load(Ordering::SeqCst), 1);
}

#[test]
fn scheduler_is_hinted_every_yield_interval() {
    let media = MemoryMedia::tiny(65);
    let scheduler = Arc::new(CountingScheduler::default());
    let (runner, _rx) = runner_with(PipelineConfig::default(), noop(), &media);
    let runner = runner.with_scheduler(scheduler.clone());

    run(&runner, "yields");

    assert_eq!(scheduler.yields.load(Ordering::SeqCst), 2);
}

#[test]
fn concurrent_jobs_share_one_notifier() {
    let notifier = Arc::new(Notifier::new());
    let (_id, rx) = notifier.subscribe();
    let runner = PipelineRunner::new(PipelineConfig::default(), noop(), notifier).unwrap();
    let jobs = JobRunner::new(runner);

    let a = jobs
        .start_job("stub://a?frames=30&width=16&height=16", "stub://a-out", JobId::new("a").unwrap())
        .unwrap();
    let b = jobs
        .start_job("stub://b?frames=45&width=16&height=16", "stub://b-out", JobId::new("b").unwrap())
        .unwrap();
    assert!(a.join().unwrap().succeeded());
    assert!(b.join().unwrap().succeeded());

    let events: Vec<JobEvent> = rx.try_iter().collect();
    for job in ["a", "b"] {
        let mine: Vec<&JobEvent> = events.iter().filter(|e| e.job_id() == job).collect();
        let full = mine
            .iter()
            .filter(|e| matches!(e, JobEvent::Progress { progress, .. } if *progress == 100.0))
            .count();
        assert_eq!(full, 1, "job {job}");
        assert!(matches!(mine.last(), Some(JobEvent::Completed { .. })), "job {job}");
    }
}

#[test]
fn json_lines_observer_receives_wire_events() {
    let media = MemoryMedia::tiny(3);
    let notifier = Arc::new(Notifier::new());
    let observer = Arc::new(JsonLinesObserver::new(Vec::new()));
    let id = notifier.register(observer.clone());
    let runner = PipelineRunner::new(PipelineConfig::default(), noop(), notifier.clone())
        .unwrap()
        .with_media(Arc::new(media));

    run(&runner, "json");
    assert!(notifier.unregister(id));

    let buffer = Arc::try_unwrap(observer).ok().unwrap().into_inner();
    let lines: Vec<serde_json::Value> = String::from_utf8(buffer)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let last = lines.last().unwrap();
    assert_eq!(last["job_id"], "json");
    assert_eq!(last["status"], "completed");
    assert_eq!(last["progress"], 100.0);
    assert_eq!(last["output_location"], "out.mp4");
}
