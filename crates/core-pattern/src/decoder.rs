//! Pattern decoder thread.
//!
//! One per projector. The decoder owns the projector's input file list,
//! decodes pattern images and keeps the pattern queue topped up. It sleeps
//! on `decoder.queue_process` (held by the queue while the fill level is at
//! or below the low watermark) and wakes to refill up to the high
//! watermark. In continuous mode the cycle flag makes the sequence wrap;
//! batch preparation clears the flag so exactly one full sequence remains.
//!
//! Decoded bitmaps are cached per sequence index — cycling re-presents the
//! same images every few hundred milliseconds and re-decoding them each
//! lap would dominate the thread.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use core_image::{decode_png_file, Bitmap, FileList, ImageError};
use core_sync::{LatchKey, LatchName, SyncFabric, WaitOutcome};

use crate::{PatternDescriptor, PatternQueue};

/// Decoder thread tuning.
#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Cycle the sequence (continuous mode). Batches clear this.
    pub cycle: bool,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self { cycle: true }
    }
}

#[derive(Debug)]
struct DecoderShared {
    file_list: Mutex<FileList>,
    cache: Mutex<Vec<Option<Arc<Bitmap>>>>,
    cycle: AtomicBool,
    /// Next sequence index to enqueue.
    cursor: AtomicUsize,
    /// Monotonic image number across the decoder's lifetime.
    counter: AtomicU64,
    projector_id: AtomicUsize,
    /// Fabric member id; renumbered when topology compacts.
    decoder_id: AtomicUsize,
}

impl DecoderShared {
    fn sequence_len(&self) -> usize {
        self.file_list.lock().len()
    }
}

/// Handle to a running pattern decoder thread.
#[derive(Debug)]
pub struct PatternDecoder {
    shared: Arc<DecoderShared>,
    queue: Arc<PatternQueue>,
    fabric: Arc<SyncFabric>,
    handle: Option<JoinHandle<()>>,
}

impl PatternDecoder {
    /// Spawn the decoder thread for `projector_id`, refilling `queue` from
    /// `file_list`.
    pub fn start(
        fabric: Arc<SyncFabric>,
        decoder_id: usize,
        projector_id: usize,
        file_list: FileList,
        queue: Arc<PatternQueue>,
        options: DecoderOptions,
    ) -> Self {
        let shared = Arc::new(DecoderShared {
            file_list: Mutex::new(file_list),
            cache: Mutex::new(Vec::new()),
            cycle: AtomicBool::new(options.cycle),
            cursor: AtomicUsize::new(0),
            counter: AtomicU64::new(0),
            projector_id: AtomicUsize::new(projector_id),
            decoder_id: AtomicUsize::new(decoder_id),
        });

        let handle = {
            let shared = Arc::clone(&shared);
            let queue = Arc::clone(&queue);
            let fabric = Arc::clone(&fabric);
            std::thread::Builder::new()
                .name(format!("pattern-decoder-{decoder_id}"))
                .spawn(move || decoder_loop(fabric, shared, queue))
                .expect("spawn pattern decoder thread")
        };

        Self {
            shared,
            queue,
            fabric,
            handle: Some(handle),
        }
    }

    pub fn queue(&self) -> &Arc<PatternQueue> {
        &self.queue
    }

    pub fn decoder_id(&self) -> usize {
        self.shared.decoder_id.load(Ordering::Acquire)
    }

    /// Renumber this decoder after a topology compaction. The fabric
    /// member must already answer at the new id; the thread rebuilds its
    /// latch keys on the next pass.
    pub fn set_decoder_id(&self, decoder_id: usize) {
        self.shared.decoder_id.store(decoder_id, Ordering::Release);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DecoderChangeId, decoder_id));
    }

    /// Length of the structured-light sequence (file count).
    pub fn sequence_len(&self) -> usize {
        self.shared.sequence_len()
    }

    pub fn cycle(&self) -> bool {
        self.shared.cycle.load(Ordering::Acquire)
    }

    /// Enable or disable sequence cycling. Enabling pokes the refill latch
    /// so a drained decoder resumes immediately.
    pub fn set_cycle(&self, cycle: bool) {
        self.shared.cycle.store(cycle, Ordering::Release);
        if cycle {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::DecoderQueueProcess, self.decoder_id()));
        }
    }

    /// True once a non-cycling decoder has enqueued the entire sequence.
    pub fn all_queued(&self) -> bool {
        !self.cycle() && self.shared.cursor.load(Ordering::Acquire) >= self.shared.sequence_len()
    }

    /// Drop queued patterns and restart the sequence from index zero.
    /// Used when a batch begins so the acquisition covers the sequence
    /// deterministically from the start.
    pub fn restart_sequence(&self) {
        self.queue.clear();
        self.shared.cursor.store(0, Ordering::Release);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DecoderQueueProcess, self.decoder_id()));
    }

    /// Re-read the input directory; decoded-bitmap cache is discarded.
    pub fn rescan_input_directory(&self) -> Result<usize, ImageError> {
        let mut list = self.shared.file_list.lock();
        list.rescan()?;
        let len = list.len();
        drop(list);
        self.shared.cache.lock().clear();
        self.shared.cursor.store(0, Ordering::Release);
        Ok(len)
    }

    /// Point the decoder at a different input directory.
    pub fn set_input_directory(&self, directory: &Path) -> Result<usize, ImageError> {
        let mut list = self.shared.file_list.lock();
        list.set_directory(directory)?;
        let len = list.len();
        drop(list);
        self.shared.cache.lock().clear();
        self.shared.cursor.store(0, Ordering::Release);
        Ok(len)
    }

    pub fn input_directory(&self) -> std::path::PathBuf {
        self.shared.file_list.lock().directory().to_path_buf()
    }

    /// Update the projector id stamped into freshly minted descriptors
    /// (topology renumbering).
    pub fn set_projector_id(&self, projector_id: usize) {
        self.shared.projector_id.store(projector_id, Ordering::Release);
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DecoderChangeId, self.decoder_id()));
    }

    /// Signal termination and join the thread.
    pub fn stop(mut self) {
        let _ = self
            .fabric
            .set(LatchKey::new(LatchName::DecoderTerminate, self.decoder_id()));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PatternDecoder {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self
                .fabric
                .set(LatchKey::new(LatchName::DecoderTerminate, self.decoder_id()));
            let _ = handle.join();
        }
    }
}

fn decoder_loop(fabric: Arc<SyncFabric>, shared: Arc<DecoderShared>, queue: Arc<PatternQueue>) {
    tracing::debug!(target: "pattern.decoder", "decoder thread started");

    loop {
        // Latch keys are rebuilt each pass: topology compaction renumbers
        // this decoder through the shared id.
        let decoder_id = shared.decoder_id.load(Ordering::Acquire);
        let process = LatchKey::new(LatchName::DecoderQueueProcess, decoder_id);
        let terminate = LatchKey::new(LatchName::DecoderTerminate, decoder_id);
        let change_id = LatchKey::new(LatchName::DecoderChangeId, decoder_id);

        match fabric.wait_any(&[terminate, change_id, process], None) {
            WaitOutcome::Signalled(key) if key == terminate => break,
            WaitOutcome::Signalled(key) if key == change_id => {
                let _ = fabric.reset(change_id);
                continue;
            }
            WaitOutcome::Signalled(_) => {}
            WaitOutcome::Abandoned(key) => {
                // Renumbered mid-wait: the stale key is gone but we live on
                // under the new id. Only a true removal ends the thread.
                if shared.decoder_id.load(Ordering::Acquire) == key.id {
                    break;
                }
                continue;
            }
            WaitOutcome::TimedOut | WaitOutcome::All => continue,
        }

        let progressed = fill_queue(&shared, &queue);
        if !progressed {
            // Nothing to enqueue (empty directory or sequence complete in
            // one-shot mode) while the refill latch is level-held; back off
            // instead of spinning on it.
            if fabric
                .wait(terminate, Some(Duration::from_millis(10)))
                .is_signalled()
            {
                break;
            }
        }
    }

    tracing::debug!(target: "pattern.decoder", "decoder thread stopped");
}

/// Top the queue up to its high watermark. Returns whether any descriptor
/// was enqueued.
fn fill_queue(shared: &DecoderShared, queue: &PatternQueue) -> bool {
    let mut progressed = false;
    let mut decode_failures = 0usize;
    loop {
        if queue.len() >= queue.high_watermark() {
            break;
        }
        let len = shared.sequence_len();
        if len == 0 || decode_failures >= len {
            break;
        }
        let mut index = shared.cursor.load(Ordering::Acquire);
        if index >= len {
            if shared.cycle.load(Ordering::Acquire) {
                shared.cursor.store(0, Ordering::Release);
                index = 0;
            } else {
                break;
            }
        }

        let Some(descriptor) = mint_descriptor(shared, index) else {
            // Undecodable file: skip it rather than wedge the sequence.
            shared.cursor.store(index + 1, Ordering::Release);
            decode_failures += 1;
            continue;
        };

        match queue.try_enqueue(descriptor) {
            Ok(()) => {
                shared.cursor.store(index + 1, Ordering::Release);
                progressed = true;
            }
            Err(_) => break,
        }
    }
    progressed
}

fn mint_descriptor(shared: &DecoderShared, index: usize) -> Option<PatternDescriptor> {
    let (path, stem) = {
        let list = shared.file_list.lock();
        let path = list.file_at(index)?.to_path_buf();
        let stem = list.stem_at(index).unwrap_or("pattern").to_string();
        (path, stem)
    };

    let bitmap = {
        let mut cache = shared.cache.lock();
        if cache.len() <= index {
            cache.resize(index + 1, None);
        }
        match &cache[index] {
            Some(bitmap) => Arc::clone(bitmap),
            None => match decode_png_file(&path) {
                Ok(bitmap) => {
                    let bitmap = Arc::new(bitmap);
                    cache[index] = Some(Arc::clone(&bitmap));
                    bitmap
                }
                Err(err) => {
                    tracing::warn!(
                        target: "pattern.decoder",
                        path = %path.display(),
                        error = %err,
                        "failed to decode pattern image; skipping"
                    );
                    return None;
                }
            },
        }
    };

    let no = shared.counter.fetch_add(1, Ordering::Relaxed);
    let projector_id = shared.projector_id.load(Ordering::Acquire);
    Some(PatternDescriptor::from_file(
        no,
        index as u32,
        projector_id,
        path,
        bitmap,
        stem,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;
    use std::time::Instant;

    fn write_png(path: &Path, value: u8) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), 2, 2);
        encoder.set_color(png::ColorType::Grayscale);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[value; 4]).unwrap();
    }

    fn pattern_dir(count: u8) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            write_png(&dir.path().join(format!("{i:03}.png")), i);
        }
        dir
    }

    fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_millis(deadline_ms);
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    fn start_decoder(
        dir: &Path,
        cycle: bool,
        low: usize,
        high: usize,
    ) -> (Arc<SyncFabric>, PatternDecoder) {
        let fabric = Arc::new(SyncFabric::new());
        let decoder_id = fabric.add_decoder();
        let queue = Arc::new(PatternQueue::with_watermarks(
            Arc::clone(&fabric),
            decoder_id,
            low,
            high,
        ));
        let list = FileList::scan(dir).unwrap();
        let decoder = PatternDecoder::start(
            Arc::clone(&fabric),
            decoder_id,
            0,
            list,
            queue,
            DecoderOptions { cycle },
        );
        (fabric, decoder)
    }

    #[test]
    fn fills_to_high_watermark_and_cycles() {
        let dir = pattern_dir(3);
        let (_fabric, decoder) = start_decoder(dir.path(), true, 2, 6);

        assert!(wait_until(2_000, || decoder.queue().len() == 6));

        // Dequeue a full lap and a bit: indexes must wrap 0,1,2,0,1,...
        let mut seen = Vec::new();
        while seen.len() < 7 {
            if let Some(desc) = decoder.queue().try_dequeue() {
                seen.push(desc.index);
            } else {
                std::thread::sleep(Duration::from_millis(2));
            }
        }
        for (pos, index) in seen.iter().enumerate() {
            assert_eq!(*index, (pos % 3) as u32);
        }
        decoder.stop();
    }

    #[test]
    fn one_shot_sequence_stops_at_end() {
        let dir = pattern_dir(4);
        let (_fabric, decoder) = start_decoder(dir.path(), false, 1, 8);

        assert!(wait_until(2_000, || decoder.queue().len() == 4));
        assert!(decoder.all_queued());

        for expected in 0..4 {
            assert_eq!(decoder.queue().try_dequeue().unwrap().index, expected);
        }
        // Sequence complete: nothing more arrives.
        std::thread::sleep(Duration::from_millis(30));
        assert!(decoder.queue().try_dequeue().is_none());
        decoder.stop();
    }

    #[test]
    fn restart_sequence_rewinds_to_zero() {
        let dir = pattern_dir(3);
        let (_fabric, decoder) = start_decoder(dir.path(), false, 1, 4);
        assert!(wait_until(2_000, || decoder.queue().len() == 3));

        decoder.queue().try_dequeue().unwrap();
        decoder.restart_sequence();

        assert!(wait_until(2_000, || {
            decoder
                .queue()
                .try_dequeue()
                .map(|d| d.index == 0)
                .unwrap_or(false)
        }));
        decoder.stop();
    }

    #[test]
    fn rescan_picks_up_new_patterns() {
        let dir = pattern_dir(2);
        let (_fabric, decoder) = start_decoder(dir.path(), false, 1, 8);
        assert!(wait_until(2_000, || decoder.queue().len() == 2));

        write_png(&dir.path().join("002.png"), 9);
        decoder.queue().clear();
        assert_eq!(decoder.rescan_input_directory().unwrap(), 3);
        assert!(wait_until(2_000, || decoder.queue().len() == 3));
        decoder.stop();
    }
}
