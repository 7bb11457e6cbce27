//! End-to-end presenter scenarios against the virtual display and the
//! software-simulated camera. The persistence worker is deliberately not
//! started: records accumulate in the frame store where the assertions
//! can inspect identity, ordering and retry bookkeeping directly.

use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use core_camera::{CameraDriver, DriverConfig, SoftwareCamera, SoftwareFault};
use core_display::{VirtualDisplay, VirtualDisplayProbe};
use core_frame::{FrameRecord, FrameStore, MetadataQueue};
use core_image::FileList;
use core_pattern::{DecoderOptions, PatternDecoder, PatternQueue};
use core_present::{BatchOutcome, CameraBinding, Presenter, PresenterConfig, PresenterState};
use core_sync::{LatchKey, LatchName, SyncFabric};

const REFRESH_HZ: f64 = 250.0;

fn write_png(path: &Path, value: u8) {
    let file = std::fs::File::create(path).unwrap();
    let mut encoder = png::Encoder::new(BufWriter::new(file), 4, 4);
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    encoder
        .write_header()
        .unwrap()
        .write_image_data(&[value; 16])
        .unwrap();
}

fn pattern_dir(count: u8) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..count {
        write_png(&dir.path().join(format!("{i:03}.png")), i);
    }
    dir
}

fn wait_until(ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    false
}

struct Rig {
    fabric: Arc<SyncFabric>,
    presenter: Presenter,
    driver: Arc<CameraDriver>,
    store: Arc<FrameStore>,
    probe: VirtualDisplayProbe,
    _patterns: tempfile::TempDir,
}

impl Rig {
    fn drain_store(&self) -> Vec<FrameRecord> {
        let mut records = Vec::new();
        while let Some(record) = self.store.pop() {
            records.push(record);
        }
        records
    }

    /// Full coordinator handshake for one batch, returning its outcome.
    fn run_batch(&self) -> Option<BatchOutcome> {
        self.fabric
            .set(LatchKey::new(LatchName::MainPrepareDraw, 0))
            .unwrap();
        assert!(
            self.fabric
                .wait(
                    LatchKey::new(LatchName::MainReadyDraw, 0),
                    Some(Duration::from_secs(10)),
                )
                .is_signalled(),
            "presenter never became batch-ready"
        );
        self.fabric
            .reset(LatchKey::new(LatchName::MainReadyDraw, 0))
            .unwrap();

        self.presenter.configure_batch(true, false, false, 1);
        self.fabric
            .set(LatchKey::new(LatchName::MainBegin, 0))
            .unwrap();

        assert!(
            self.fabric
                .wait(
                    LatchKey::new(LatchName::MainEndDraw, 0),
                    Some(Duration::from_secs(30)),
                )
                .is_signalled(),
            "batch never finished"
        );
        self.fabric
            .reset(LatchKey::new(LatchName::MainEndDraw, 0))
            .unwrap();
        let outcome = self.presenter.last_batch_outcome();
        self.fabric
            .set(LatchKey::new(LatchName::MainResumeDraw, 0))
            .unwrap();
        outcome
    }
}

fn build_rig(patterns: u8, faults: &[(u64, SoftwareFault)]) -> Rig {
    let dir = pattern_dir(patterns);
    let fabric = Arc::new(SyncFabric::new());
    let coordinator_id = fabric.add_coordinator();
    let projector_id = fabric.add_projector();
    let decoder_id = fabric.add_decoder();
    let camera_id = fabric.add_camera();
    let encoder_id = fabric.add_encoder();

    let queue = Arc::new(PatternQueue::with_watermarks(
        Arc::clone(&fabric),
        decoder_id,
        4,
        8,
    ));
    let decoder = Arc::new(PatternDecoder::start(
        Arc::clone(&fabric),
        decoder_id,
        projector_id,
        FileList::scan(dir.path()).unwrap(),
        queue,
        DecoderOptions { cycle: true },
    ));

    let display = VirtualDisplay::new(REFRESH_HZ, 64, 64);
    let probe = display.probe();

    let presenter = Presenter::start(
        Arc::clone(&fabric),
        Box::new(display),
        decoder,
        PresenterConfig::new(projector_id, coordinator_id),
    );

    let camera = SoftwareCamera::new("sim0", 16, 16);
    let script = camera.fault_script();
    for (sequence, fault) in faults {
        script.inject(*sequence, *fault);
    }

    let metadata = Arc::new(MetadataQueue::new());
    let store = Arc::new(FrameStore::new(Arc::clone(&fabric), encoder_id));
    let mut config = DriverConfig::new(camera_id, projector_id);
    config.exposure_us = 300.0;
    config.timeout = Duration::from_millis(250);
    let driver = Arc::new(
        CameraDriver::start(
            Arc::clone(&fabric),
            Box::new(camera),
            Arc::clone(&metadata),
            Arc::clone(&store),
            config,
        )
        .unwrap(),
    );

    presenter.attach_camera(CameraBinding {
        camera_id,
        driver: Arc::clone(&driver),
        metadata,
        store: Arc::clone(&store),
    });

    Rig {
        fabric,
        presenter,
        driver,
        store,
        probe,
        _patterns: dir,
    }
}

#[test]
fn continuous_cycles_patterns_in_presentation_order() {
    let rig = build_rig(4, &[]);

    assert!(rig
        .fabric
        .wait(
            LatchKey::new(LatchName::PresentReady, 0),
            Some(Duration::from_secs(5)),
        )
        .is_signalled());
    rig.fabric.set(LatchKey::new(LatchName::Present, 0)).unwrap();

    assert!(
        wait_until(15_000, || rig.store.total_items_remaining() >= 12),
        "continuous acquisition did not produce frames"
    );
    rig.fabric.reset(LatchKey::new(LatchName::Present, 0)).unwrap();
    assert!(wait_until(5_000, || rig.presenter.state()
        == PresenterState::ContinuousReady));

    let records = rig.drain_store();
    assert!(records.len() >= 12);

    // Delivered order equals presentation order: indexes cycle 0,1,2,3.
    let mut last_key = -1i64;
    for (position, record) in records.iter().take(12).enumerate() {
        assert_eq!(record.metadata.pattern_index, (position % 4) as u32);
        assert!(record.metadata.key > last_key, "keys must be monotonic");
        last_key = record.metadata.key;
        assert!(!record.metadata.is_batch());
        assert!(record.metadata.acquired);
        // Live-view records never persist.
        assert!(!record.metadata.save_png);
    }

    // Present counter advanced at least once per delivered frame.
    assert!(rig.presenter.present_counter() >= 12);
    assert_eq!(rig.presenter.skipped_frames(), 0);
}

#[test]
fn batch_retries_failed_pattern_once() {
    // Trigger sequence 4 is the first attempt of pattern index 4.
    let rig = build_rig(8, &[(4, SoftwareFault::InvalidTrigger)]);

    let outcome = rig.run_batch();
    assert_eq!(outcome, Some(BatchOutcome::Completed));

    let records: Vec<FrameRecord> = rig
        .drain_store()
        .into_iter()
        .filter(|r| r.metadata.is_batch())
        .collect();
    assert_eq!(records.len(), 8);

    for (position, record) in records.iter().enumerate() {
        assert_eq!(record.metadata.pattern_index, position as u32);
        assert!(record.metadata.acquired);
        let expected_retry = if position == 4 { 1 } else { 0 };
        assert_eq!(
            record.metadata.retry, expected_retry,
            "pattern {position} retry count"
        );
    }
    assert!(records.last().unwrap().metadata.is_last());
    // 8 successes + 1 failed attempt.
    assert_eq!(rig.driver.triggers_dispatched(), 9);
}

#[test]
fn batch_survives_retry_exhaustion() {
    // Three consecutive drops exhaust pattern index 4 (attempt + 2 retries).
    let rig = build_rig(8, &[
        (4, SoftwareFault::FrameSkipped),
        (5, SoftwareFault::FrameSkipped),
        (6, SoftwareFault::FrameSkipped),
    ]);

    let outcome = rig.run_batch();
    assert_eq!(outcome, Some(BatchOutcome::Completed));

    let records: Vec<FrameRecord> = rig
        .drain_store()
        .into_iter()
        .filter(|r| r.metadata.is_batch())
        .collect();
    assert_eq!(records.len(), 8, "bookkeeping record must fill the gap");

    let mut unacquired = 0;
    for record in &records {
        if record.metadata.pattern_index == 4 {
            assert!(!record.metadata.acquired);
            assert_eq!(record.pixels.byte_len(), 0);
            unacquired += 1;
        } else {
            assert!(record.metadata.acquired);
        }
    }
    assert_eq!(unacquired, 1);

    // Each drop escalated the timeout and bumped the throttle counter.
    assert_eq!(rig.driver.throttle_count(), 3);
    assert!(rig.driver.timeout() >= Duration::from_millis(400));
}

#[test]
fn batch_aborts_when_patterns_cannot_be_decoded() {
    // Files exist (so the sequence has length) but none decode, which
    // starves the queue at the first batch step.
    let dir = tempfile::tempdir().unwrap();
    for i in 0..3 {
        std::fs::write(dir.path().join(format!("{i:03}.png")), b"not a png").unwrap();
    }

    let fabric = Arc::new(SyncFabric::new());
    let coordinator_id = fabric.add_coordinator();
    let projector_id = fabric.add_projector();
    let decoder_id = fabric.add_decoder();
    let queue = Arc::new(PatternQueue::new(Arc::clone(&fabric), decoder_id));
    let decoder = Arc::new(PatternDecoder::start(
        Arc::clone(&fabric),
        decoder_id,
        projector_id,
        FileList::scan(dir.path()).unwrap(),
        queue,
        DecoderOptions { cycle: false },
    ));
    let presenter = Presenter::start(
        Arc::clone(&fabric),
        Box::new(VirtualDisplay::new(REFRESH_HZ, 64, 64)),
        decoder,
        PresenterConfig::new(projector_id, coordinator_id),
    );

    fabric
        .set(LatchKey::new(LatchName::MainPrepareDraw, 0))
        .unwrap();
    assert!(fabric
        .wait(
            LatchKey::new(LatchName::MainReadyDraw, 0),
            Some(Duration::from_secs(10)),
        )
        .is_signalled());
    fabric.set(LatchKey::new(LatchName::MainBegin, 0)).unwrap();
    assert!(fabric
        .wait(
            LatchKey::new(LatchName::MainEndDraw, 0),
            Some(Duration::from_secs(10)),
        )
        .is_signalled());
    assert_eq!(
        presenter.last_batch_outcome(),
        Some(BatchOutcome::MissingPattern)
    );
    fabric
        .set(LatchKey::new(LatchName::MainResumeDraw, 0))
        .unwrap();
}

#[test]
fn device_removed_is_recovered_by_one_recreate() {
    let rig = build_rig(4, &[]);
    rig.probe.fail_next_presents(1);

    assert!(rig
        .fabric
        .wait(
            LatchKey::new(LatchName::PresentReady, 0),
            Some(Duration::from_secs(5)),
        )
        .is_signalled());
    rig.fabric.set(LatchKey::new(LatchName::Present, 0)).unwrap();

    assert!(wait_until(10_000, || rig.presenter.present_counter() >= 4));
    assert_eq!(rig.probe.recreate_count(), 1);
    assert!(!rig.presenter.has_failed());

    rig.fabric.reset(LatchKey::new(LatchName::Present, 0)).unwrap();
}

#[test]
fn refresh_query_failure_falls_back_to_sixty_hz() {
    let dir = pattern_dir(2);
    let fabric = Arc::new(SyncFabric::new());
    let coordinator_id = fabric.add_coordinator();
    let projector_id = fabric.add_projector();
    let decoder_id = fabric.add_decoder();
    let queue = Arc::new(PatternQueue::new(Arc::clone(&fabric), decoder_id));
    let decoder = Arc::new(PatternDecoder::start(
        Arc::clone(&fabric),
        decoder_id,
        projector_id,
        FileList::scan(dir.path()).unwrap(),
        queue,
        DecoderOptions::default(),
    ));

    let display = VirtualDisplay::new(500.0, 64, 64);
    display.probe().fail_refresh_query(true);

    let presenter = Presenter::start(
        Arc::clone(&fabric),
        Box::new(display),
        decoder,
        PresenterConfig::new(projector_id, coordinator_id),
    );

    assert!(wait_until(5_000, || presenter.state()
        == PresenterState::ContinuousReady));
    assert!((presenter.refresh_hz() - 60.0).abs() < 0.5);
}

#[test]
fn fixed_pattern_batch_repeats_first_pattern() {
    let rig = build_rig(4, &[]);

    rig.fabric
        .set(LatchKey::new(LatchName::MainPrepareDraw, 0))
        .unwrap();
    assert!(rig
        .fabric
        .wait(
            LatchKey::new(LatchName::MainReadyDraw, 0),
            Some(Duration::from_secs(10)),
        )
        .is_signalled());
    rig.fabric
        .reset(LatchKey::new(LatchName::MainReadyDraw, 0))
        .unwrap();

    // Fixed mode: repeat one pattern five times.
    rig.presenter.configure_batch(true, false, true, 5);
    rig.fabric.set(LatchKey::new(LatchName::MainBegin, 0)).unwrap();
    assert!(rig
        .fabric
        .wait(
            LatchKey::new(LatchName::MainEndDraw, 0),
            Some(Duration::from_secs(30)),
        )
        .is_signalled());
    assert_eq!(rig.presenter.last_batch_outcome(), Some(BatchOutcome::Completed));
    rig.fabric
        .set(LatchKey::new(LatchName::MainResumeDraw, 0))
        .unwrap();

    let records: Vec<FrameRecord> = rig
        .drain_store()
        .into_iter()
        .filter(|r| r.metadata.is_batch())
        .collect();
    assert_eq!(records.len(), 5);
    for record in &records {
        assert_eq!(record.metadata.pattern_index, 0);
        assert!(record
            .metadata
            .flags
            .contains(core_frame::FrameFlags::FIXED));
    }
}
