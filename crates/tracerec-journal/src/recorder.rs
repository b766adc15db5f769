//! File-backed recording session.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracerec_arch::Arch;
use tracing::{debug, error, info, warn};

use crate::encoder::JournalEncoder;
use crate::error::{JournalError, Result};
use crate::format::TraceHeader;
use crate::snapshot::InstructionSnapshot;
use crate::target::{DecodedInstruction, Debuggee, Decoder, NoopObserver, TraceObserver, decode_at};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecorderState {
    Disabled,
    /// File open, seeding the first instruction.
    Enabling,
    Armed,
}

/// Outcome of one `record_instruction` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecordStats {
    /// Bytes appended to the trace file.
    pub bytes: usize,
    pub full_dump: bool,
}

/// Records executed instructions into a trace file.
///
/// Only one thread may drive a recorder; callers serialize access.
pub struct Recorder<A: Arch> {
    state: RecorderState,
    file: Option<Box<dyn Write + Send>>,
    path: Option<PathBuf>,
    encoder: JournalEncoder<A>,
    observer: Box<dyn TraceObserver>,
}

impl<A: Arch> Recorder<A> {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Disabled,
            file: None,
            path: None,
            encoder: JournalEncoder::new(),
            observer: Box::new(NoopObserver),
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: impl TraceObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub const fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.state == RecorderState::Armed
    }

    /// Trace file of the current session.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Instructions recorded in the current session.
    pub const fn recorded(&self) -> u64 {
        self.encoder.recorded()
    }

    /// Start recording into `path`, appending if the file already has a trace.
    ///
    /// An armed session is closed first. The instruction at the current
    /// instruction pointer becomes the first pending record.
    pub fn enable<D, C>(&mut self, path: impl AsRef<Path>, target: &D, decoder: &C) -> Result<()>
    where
        D: Debuggee<A> + ?Sized,
        C: Decoder + ?Sized,
    {
        let path = path.as_ref();
        if self.state != RecorderState::Disabled {
            self.disable();
        }
        if !target.is_active() {
            return Err(JournalError::NotDebugging);
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        self.start(Box::new(file), fresh, path, target, decoder)
    }

    /// Begin a session writing to `out`. A `fresh` output gets the header first.
    fn start<D, C>(
        &mut self,
        mut out: Box<dyn Write + Send>,
        fresh: bool,
        path: &Path,
        target: &D,
        decoder: &C,
    ) -> Result<()>
    where
        D: Debuggee<A> + ?Sized,
        C: Decoder + ?Sized,
    {
        if fresh {
            let header = TraceHeader::new::<A>(&target.image_path(), target.image_hash()).encode()?;
            if let Err(err) = write_once(&mut out, &header) {
                error!(error = %err, path = %path.display(), "failed to write trace header");
                return Err(err);
            }
            debug!(path = %path.display(), bytes = header.len(), "wrote trace header");
        }

        self.file = Some(out);
        self.path = Some(path.to_path_buf());
        self.encoder.reset();
        self.state = RecorderState::Enabling;

        let ip = target.registers().map(|r| r.ip()).unwrap_or_default();
        let decoded = decode_at::<A, _, _>(target, decoder, ip).unwrap_or_else(DecodedInstruction::invalid);
        self.record_instruction(target, &decoded)?;

        self.state = RecorderState::Armed;
        info!(path = %path.display(), "run trace recording started");
        self.observer.trace_file_opened(path);
        Ok(())
    }

    /// Stop recording. The pending instruction is dropped unrecorded.
    pub fn disable(&mut self) {
        if self.state == RecorderState::Disabled {
            return;
        }
        self.file = None;
        self.encoder.discard_pending();
        self.state = RecorderState::Disabled;
        info!(
            path = ?self.path,
            instructions = self.encoder.recorded(),
            "run trace recording stopped"
        );
    }

    /// Record the instruction about to execute, described by `decoded`.
    ///
    /// Appends the previous instruction's record. Any failure closes the
    /// session before the error is returned.
    pub fn record_instruction<D>(&mut self, target: &D, decoded: &DecodedInstruction) -> Result<Option<RecordStats>>
    where
        D: Debuggee<A> + ?Sized,
    {
        if self.state == RecorderState::Disabled {
            return Ok(None);
        }
        match self.try_record(target, decoded) {
            Ok(stats) => {
                self.observer.trace_data_available();
                Ok(Some(stats))
            }
            Err(err) => {
                error!(error = %err, "run trace recording failed");
                self.disable();
                Err(err)
            }
        }
    }

    fn try_record<D>(&mut self, target: &D, decoded: &DecodedInstruction) -> Result<RecordStats>
    where
        D: Debuggee<A> + ?Sized,
    {
        let snapshot = InstructionSnapshot::capture(target, decoded).ok_or(JournalError::RegistersUnavailable)?;
        let Some(record) = self.encoder.advance(snapshot, target)? else {
            return Ok(RecordStats::default());
        };
        let Some(file) = self.file.as_mut() else {
            warn!("recorder has no open trace file");
            return Ok(RecordStats::default());
        };
        write_once(file, &record.bytes)?;
        Ok(RecordStats {
            bytes: record.bytes.len(),
            full_dump: record.full_dump,
        })
    }
}

impl<A: Arch> Default for Recorder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Arch> Drop for Recorder<A> {
    fn drop(&mut self) {
        self.disable();
    }
}

/// Write `buf` in a single call. A partial write is an error.
fn write_once<W: Write + ?Sized>(out: &mut W, buf: &[u8]) -> Result<()> {
    let written = out.write(buf)?;
    if written != buf.len() {
        return Err(JournalError::ShortWrite {
            written,
            expected: buf.len(),
        });
    }
    Ok(())
}
