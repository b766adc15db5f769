//! In-memory stand-ins for the host debugger.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tracerec::{
    Arch, DecodedInstruction, Debuggee, Decoder, InstructionClass, ModuleResolver, Operand, Register,
    RegisterSnapshot, TraceObserver,
};

/// Longest run `readable_len` reports.
const MAX_READABLE: u64 = 0x1000;

/// A single-threaded process with sparse memory.
pub struct FakeProcess<A: Arch> {
    pub memory: BTreeMap<u64, u8>,
    pub regs: RegisterSnapshot<A>,
    pub thread_id: u32,
    pub tls: Option<u64>,
    pub active: bool,
    pub registers_readable: bool,
}

impl<A: Arch> FakeProcess<A> {
    pub fn new() -> Self {
        Self {
            memory: BTreeMap::new(),
            regs: RegisterSnapshot::new(),
            thread_id: 0x1F4,
            tls: None,
            active: true,
            registers_readable: true,
        }
    }

    pub fn map(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.memory.insert(addr + i as u64, *b);
        }
    }

    pub fn write_word(&mut self, addr: u64, value: u64) {
        self.map(addr, &A::word_bytes(value));
    }

    pub fn set(&mut self, reg: Register, value: u64) {
        assert!(self.regs.set(reg, value), "register {reg:?} missing");
    }

    pub fn ip(&self) -> u64 {
        self.regs.ip()
    }
}

impl<A: Arch> Debuggee<A> for FakeProcess<A> {
    fn is_active(&self) -> bool {
        self.active
    }

    fn read_memory(&self, addr: u64, buf: &mut [u8]) -> bool {
        for (i, b) in buf.iter_mut().enumerate() {
            match self.memory.get(&(addr + i as u64)) {
                Some(v) => *b = *v,
                None => return false,
            }
        }
        true
    }

    fn registers(&self) -> Option<RegisterSnapshot<A>> {
        self.registers_readable.then(|| self.regs.clone())
    }

    fn current_thread_id(&self) -> u32 {
        self.thread_id
    }

    fn thread_local_base(&self) -> Option<u64> {
        self.tls
    }

    fn image_path(&self) -> String {
        "C:\\app\\app.exe".to_string()
    }

    fn image_hash(&self) -> u64 {
        0x5EED_F00D
    }

    fn readable_len(&self, addr: u64) -> Option<usize> {
        let len = (0..MAX_READABLE)
            .take_while(|i| self.memory.contains_key(&(addr + i)))
            .count();
        (len > 0).then_some(len)
    }
}

/// Decoder driven by a table; unknown addresses decode as one-byte nops.
#[derive(Default)]
pub struct FakeDecoder {
    table: HashMap<u64, DecodedInstruction>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, addr: u64, len: usize, class: InstructionClass, operands: Vec<Operand>) -> Self {
        self.table.insert(
            addr,
            DecodedInstruction {
                len,
                class,
                operands,
            },
        );
        self
    }
}

impl Decoder for FakeDecoder {
    fn decode(&self, addr: u64, bytes: &[u8]) -> Option<DecodedInstruction> {
        let instr = self.table.get(&addr).cloned().unwrap_or(DecodedInstruction {
            len: 1,
            class: InstructionClass::Nop,
            operands: Vec::new(),
        });
        (instr.len <= bytes.len()).then_some(instr)
    }
}

/// One module, `name`, loaded at `base` and spanning 1 MiB.
pub struct FakeModules {
    pub name: String,
    pub base: u64,
    /// Number of `module_name` queries answered.
    pub lookups: Arc<AtomicUsize>,
}

impl FakeModules {
    pub fn new(name: &str, base: u64) -> Self {
        Self {
            name: name.to_string(),
            base,
            lookups: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn contains(&self, addr: u64) -> bool {
        (self.base..self.base + 0x10_0000).contains(&addr)
    }
}

impl ModuleResolver for FakeModules {
    fn module_name(&self, addr: u64) -> Option<String> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        self.contains(addr).then(|| self.name.clone())
    }

    fn module_base(&self, addr: u64) -> Option<u64> {
        self.contains(addr).then_some(self.base)
    }
}

/// Decoder that blocks inside `decode` until released, then decodes a nop.
#[derive(Default)]
pub struct ParkingDecoder {
    pub parked: AtomicBool,
    pub release: AtomicBool,
}

impl Decoder for ParkingDecoder {
    fn decode(&self, _addr: u64, _bytes: &[u8]) -> Option<DecodedInstruction> {
        self.parked.store(true, Ordering::Release);
        while !self.release.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(1));
        }
        Some(DecodedInstruction {
            len: 1,
            class: InstructionClass::Nop,
            operands: Vec::new(),
        })
    }
}

/// Counts recorder notifications.
#[derive(Clone, Default)]
pub struct CountingObserver {
    pub opened: Arc<AtomicUsize>,
    pub data: Arc<AtomicUsize>,
}

impl CountingObserver {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn data(&self) -> usize {
        self.data.load(Ordering::Relaxed)
    }
}

impl TraceObserver for CountingObserver {
    fn trace_data_available(&self) {
        self.data.fetch_add(1, Ordering::Relaxed);
    }

    fn trace_file_opened(&self, _path: &Path) {
        self.opened.fetch_add(1, Ordering::Relaxed);
    }
}
