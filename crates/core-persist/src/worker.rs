//! Persistence worker thread.
//!
//! One per camera. Sleeps on `encoder.queue_process`, drains the frame
//! store and writes each record's PNG and/or raw file. The store itself
//! maintains the encoder latch levels (`queue_full` clears as the drain
//! crosses the low watermark), so the worker's job is purely I/O. On
//! termination the record being written is finished; anything still
//! queued is left for the owner to decide about.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use core_frame::{FrameRecord, FrameStore};
use core_sync::{LatchKey, LatchName, SyncFabric, WaitOutcome};

use crate::{write_png_file, write_raw_file, OutputLayout};

#[derive(Debug, Default)]
struct WorkerCounters {
    files_written: AtomicU64,
    records_processed: AtomicU64,
    write_errors: AtomicU64,
}

/// Handle to a running persistence worker.
pub struct PersistenceWorker {
    fabric: Arc<SyncFabric>,
    encoder_id: Arc<AtomicUsize>,
    counters: Arc<WorkerCounters>,
    handle: Option<JoinHandle<()>>,
}

impl PersistenceWorker {
    pub fn start(
        fabric: Arc<SyncFabric>,
        encoder_id: usize,
        camera_id: usize,
        store: Arc<FrameStore>,
        layout: Arc<Mutex<OutputLayout>>,
    ) -> Self {
        let counters = Arc::new(WorkerCounters::default());
        let encoder_id = Arc::new(AtomicUsize::new(encoder_id));
        let handle = {
            let fabric = Arc::clone(&fabric);
            let counters = Arc::clone(&counters);
            let encoder_id = Arc::clone(&encoder_id);
            std::thread::Builder::new()
                .name(format!("persist-worker-{}", encoder_id.load(Ordering::Acquire)))
                .spawn(move || {
                    worker_loop(fabric, encoder_id, camera_id, store, layout, counters)
                })
                .expect("spawn persistence worker thread")
        };
        Self {
            fabric,
            encoder_id,
            counters,
            handle: Some(handle),
        }
    }

    pub fn encoder_id(&self) -> usize {
        self.encoder_id.load(Ordering::Acquire)
    }

    /// Renumber this worker's encoder after a topology compaction.
    pub fn set_encoder_id(&self, encoder_id: usize) {
        self.encoder_id.store(encoder_id, Ordering::Release);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::EncoderChangeId, encoder_id));
    }

    pub fn files_written(&self) -> u64 {
        self.counters.files_written.load(Ordering::Relaxed)
    }

    pub fn records_processed(&self) -> u64 {
        self.counters.records_processed.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.counters.write_errors.load(Ordering::Relaxed)
    }

    pub fn stop(mut self) {
        self.stop_inner();
    }

    fn stop_inner(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::EncoderTerminate, self.encoder_id()));
            let _ = handle.join();
        }
    }
}

impl Drop for PersistenceWorker {
    fn drop(&mut self) {
        self.stop_inner();
    }
}

fn worker_loop(
    fabric: Arc<SyncFabric>,
    encoder_id: Arc<AtomicUsize>,
    camera_id: usize,
    store: Arc<FrameStore>,
    layout: Arc<Mutex<OutputLayout>>,
    counters: Arc<WorkerCounters>,
) {
    tracing::debug!(target: "persist.worker", "worker thread started");

    'outer: loop {
        // Keys rebuilt each pass: topology compaction renumbers encoders.
        let id = encoder_id.load(Ordering::Acquire);
        let process = LatchKey::new(LatchName::EncoderQueueProcess, id);
        let terminate = LatchKey::new(LatchName::EncoderTerminate, id);
        let change_id = LatchKey::new(LatchName::EncoderChangeId, id);

        match fabric.wait_any(&[terminate, change_id, process], None) {
            WaitOutcome::Signalled(key) if key == terminate => break,
            WaitOutcome::Signalled(key) if key == change_id => {
                let _ = fabric.reset(change_id);
                continue;
            }
            WaitOutcome::Abandoned(key) => {
                if encoder_id.load(Ordering::Acquire) == key.id {
                    break;
                }
                continue;
            }
            WaitOutcome::Signalled(_) => {}
            WaitOutcome::TimedOut | WaitOutcome::All => continue,
        }

        while let Some(record) = store.pop() {
            write_record(camera_id, &record, &layout, &counters);
            counters.records_processed.fetch_add(1, Ordering::Relaxed);

            // Finish the current file, then honor termination.
            if fabric
                .wait(terminate, Some(Duration::ZERO))
                .is_signalled()
            {
                break 'outer;
            }
        }
    }

    tracing::debug!(
        target: "persist.worker",
        files = counters.files_written.load(Ordering::Relaxed),
        "worker thread stopped"
    );
}

fn write_record(
    camera_id: usize,
    record: &FrameRecord,
    layout: &Mutex<OutputLayout>,
    counters: &WorkerCounters,
) {
    let md = &record.metadata;
    if !md.acquired || (!md.save_png && !md.save_raw) {
        return;
    }

    let dir = layout.lock().camera_dir(camera_id);
    if let Err(err) = std::fs::create_dir_all(&dir) {
        tracing::error!(
            target: "persist.worker",
            dir = %dir.display(),
            error = %err,
            "cannot create camera directory"
        );
        counters.write_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }

    if md.save_png {
        let path = dir.join(format!("{}.png", md.filename));
        match write_png_file(&path, record) {
            Ok(()) => {
                counters.files_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::error!(target: "persist.worker", path = %path.display(), error = %err, "png write failed");
                counters.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    if md.save_raw {
        let path = dir.join(format!("{}.raw", md.filename));
        match write_raw_file(&path, record) {
            Ok(()) => {
                counters.files_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::error!(target: "persist.worker", path = %path.display(), error = %err, "raw write failed");
                counters.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_frame::{FrameFlags, FrameMetadata};
    use core_image::{Bitmap, PixelFormat};
    use std::time::Instant;

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

    fn record(index: u32, png: bool, raw: bool) -> FrameRecord {
        let mut md = FrameMetadata::new(0, 0, index);
        md.flags |= FrameFlags::BATCH;
        md.filename = format!("{index:03}_fringe");
        md.save_png = png;
        md.save_raw = raw;
        let mut pixels = Bitmap::zeroed(4, 4, PixelFormat::Gray8);
        pixels.data.fill(index as u8);
        FrameRecord::new(md, pixels)
    }

    struct Rig {
        fabric: Arc<SyncFabric>,
        store: Arc<FrameStore>,
        worker: PersistenceWorker,
        layout: Arc<Mutex<OutputLayout>>,
        _dir: tempfile::TempDir,
    }

    fn rig() -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Arc::new(SyncFabric::new());
        let encoder_id = fabric.add_encoder();
        let store = Arc::new(FrameStore::new(Arc::clone(&fabric), encoder_id));
        let layout = Arc::new(Mutex::new(OutputLayout::new(dir.path(), "session")));
        let worker = PersistenceWorker::start(
            Arc::clone(&fabric),
            encoder_id,
            0,
            Arc::clone(&store),
            Arc::clone(&layout),
        );
        Rig {
            fabric,
            store,
            worker,
            layout,
            _dir: dir,
        }
    }

    #[test]
    fn drains_store_and_writes_files() {
        let rig = rig();
        rig.store.push(record(0, true, true));
        rig.store.push(record(1, true, false));

        assert!(wait_until(3_000, || rig.worker.records_processed() == 2));
        assert_eq!(rig.worker.files_written(), 3);
        assert_eq!(rig.store.total_items_remaining(), 0);
        assert_eq!(rig.store.batch_items_remaining(), 0);

        let camera_dir = rig.layout.lock().camera_dir(0);
        assert!(camera_dir.join("000_fringe.png").is_file());
        assert!(camera_dir.join("000_fringe.raw").is_file());
        assert!(camera_dir.join("001_fringe.png").is_file());
        assert!(!camera_dir.join("001_fringe.raw").exists());
        assert_eq!(rig.worker.write_errors(), 0);
    }

    #[test]
    fn unacquired_records_write_nothing() {
        let rig = rig();
        let rec = FrameRecord::unacquired(FrameMetadata::new(0, 0, 5));
        rig.store.push(rec);

        assert!(wait_until(3_000, || rig.worker.records_processed() == 1));
        assert_eq!(rig.worker.files_written(), 0);
        // Camera directory is created lazily, so nothing exists on disk.
        assert!(!rig.layout.lock().camera_dir(0).exists());
    }

    #[test]
    fn queue_full_clears_after_drain() {
        let rig = rig();
        let full = LatchKey::new(LatchName::EncoderQueueFull, rig.worker.encoder_id());
        for i in 0..20 {
            rig.store.push(record(i, false, false));
        }
        assert!(rig.fabric.is_signalled(full).unwrap());
        assert!(wait_until(3_000, || rig.store.total_items_remaining() == 0));
        assert!(!rig.fabric.is_signalled(full).unwrap());
    }
}
