//! The trace engine: page statistics and run-trace recording for one debug session.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracerec_arch::Arch;
use tracerec_journal::{DecodedInstruction, Debuggee, Decoder, Recorder, TraceObserver, decode_at};
use tracerec_page::{ByteClass, HexCodec, ModuleResolver, PageLayout, PageTable};
use tracing::debug;

use crate::error::Result;
use crate::metrics;

/// Conditions under which a trace-record stepping loop stops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStop {
    /// Stop on reaching code in an armed page that has never executed.
    BeyondTraceRecord,
    /// Stop on reaching code in an armed page that has executed before.
    IntoTraceRecord,
}

/// Execution tracing state of one debug session.
///
/// Owns the page table and the run-trace recorder. The host debugger calls
/// [`TraceEngine::on_instruction`] once per retired instruction. Page updates
/// never take the recorder lock, so retirements on different pages only
/// contend when recording is on.
pub struct TraceEngine<A: Arch> {
    pages: PageTable,
    recorder: Mutex<Recorder<A>>,
    /// Mirrors `recorder.is_armed()` so the hot path can skip the lock.
    recording: AtomicBool,
    instructions: AtomicU64,
}

impl<A: Arch> TraceEngine<A> {
    pub fn new(resolver: impl ModuleResolver + 'static) -> Self {
        Self {
            pages: PageTable::new(resolver),
            recorder: Mutex::new(Recorder::new()),
            recording: AtomicBool::new(false),
            instructions: AtomicU64::new(0),
        }
    }

    /// Send recording notifications to `observer`.
    #[must_use]
    pub fn with_observer(self, observer: impl TraceObserver + 'static) -> Self {
        let recorder = self.recorder.into_inner().with_observer(observer);
        Self {
            recorder: Mutex::new(recorder),
            ..self
        }
    }

    pub const fn pages(&self) -> &PageTable {
        &self.pages
    }

    /// Arm the page containing `addr` with `layout`, or disarm it with `None`.
    pub fn arm_page(&self, addr: u64, layout: Option<PageLayout>) -> Result<()> {
        self.pages.arm(addr, layout)?;
        metrics::set_pages_armed(self.pages.len());
        Ok(())
    }

    pub fn layout_of(&self, addr: u64) -> Option<PageLayout> {
        self.pages.layout_of(addr)
    }

    pub fn hit_count(&self, addr: u64) -> u32 {
        self.pages.hit_count(addr)
    }

    pub fn byte_type(&self, addr: u64) -> ByteClass {
        self.pages.byte_type(addr)
    }

    pub fn is_executed(&self, addr: u64) -> bool {
        self.pages.is_executed(addr)
    }

    /// Instructions reported since the engine was created.
    pub fn instruction_count(&self) -> u64 {
        self.instructions.load(Ordering::Relaxed)
    }

    /// Account for the instruction at `cip`, which is about to execute.
    ///
    /// Updates the page statistics if the page is armed and appends to the run
    /// trace if recording. A recording failure ends the recording session and
    /// is returned; page statistics are still updated.
    pub fn on_instruction<D, C>(&self, cip: u64, target: &D, decoder: &C) -> Result<()>
    where
        D: Debuggee<A> + ?Sized,
        C: Decoder + ?Sized,
    {
        self.instructions.fetch_add(1, Ordering::Relaxed);
        metrics::record_instruction();

        let key = self.pages.key_of(cip);
        let armed = self.pages.contains(key);
        let recording = self.recording.load(Ordering::Acquire);
        if !armed && !recording {
            return Ok(());
        }

        let decoded = decode_at::<A, _, _>(target, decoder, cip);
        if armed {
            match &decoded {
                Some(instr) => self.pages.record_execution_at(key, cip, instr.len),
                None => debug!(addr = format!("{:#x}", cip), "instruction unreadable"),
            }
        }

        if recording {
            let mut recorder = self.recorder.lock();
            if !recorder.is_armed() {
                return Ok(());
            }
            let decoded = decoded.unwrap_or_else(DecodedInstruction::invalid);
            let result = recorder.record_instruction(target, &decoded);
            self.recording.store(recorder.is_armed(), Ordering::Release);
            if let Some(stats) = result? {
                metrics::record_written(stats);
            }
        }
        Ok(())
    }

    /// Whether a trace-record stepping loop should stop at `cip`.
    pub fn should_stop(&self, cip: u64, condition: TraceStop) -> bool {
        if self.pages.layout_of(cip).is_none() {
            return false;
        }
        let executed = self.pages.is_executed(cip);
        match condition {
            TraceStop::BeyondTraceRecord => !executed,
            TraceStop::IntoTraceRecord => executed,
        }
    }

    /// Start recording a run trace into `path`.
    pub fn enable_recording<D, C>(&self, path: impl AsRef<Path>, target: &D, decoder: &C) -> Result<()>
    where
        D: Debuggee<A> + ?Sized,
        C: Decoder + ?Sized,
    {
        let mut recorder = self.recorder.lock();
        let result = recorder.enable(path, target, decoder);
        self.recording.store(recorder.is_armed(), Ordering::Release);
        result?;
        Ok(())
    }

    pub fn disable_recording(&self) {
        let mut recorder = self.recorder.lock();
        recorder.disable();
        self.recording.store(false, Ordering::Release);
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Trace file of the current or last recording session.
    pub fn recording_path(&self) -> Option<PathBuf> {
        self.recorder.lock().path().map(Path::to_path_buf)
    }

    /// Store the page table into the session database `root`.
    pub fn save(&self, root: &mut Map<String, Value>) -> Result<()> {
        self.pages.save(root, &HexCodec)?;
        Ok(())
    }

    /// Replace the page table with the one stored in `root`.
    pub fn load(&self, root: &Map<String, Value>) -> Result<usize> {
        let count = self.pages.load(root, &HexCodec)?;
        metrics::set_pages_armed(count);
        Ok(count)
    }

    /// Disarm every page.
    pub fn clear(&self) {
        self.pages.clear();
        metrics::set_pages_armed(0);
    }
}

impl<A: Arch> std::fmt::Debug for TraceEngine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceEngine")
            .field("arch", &A::NAME)
            .field("pages", &self.pages)
            .field("instructions", &self.instruction_count())
            .finish_non_exhaustive()
    }
}
