//! A set of DMA engines sharing one memory.
//!
//! Each hardware thread owns one engine. All of them reach memory through
//! clones of a single [`SharedMemory`] handle, so accesses from different
//! engines are serialized by its lock.

use std::sync::{Arc, Mutex, MutexGuard};

use super::dma::{
    Access, DescriptorState, DmaAdapter, DmaEngine, DmaError, EngineConfig, FaultReason, PmuCounter,
    Translation, TranslationFault, MAX_ENGINES,
};
use super::host_memory::HostMemory;

/// Cloneable handle to a [`HostMemory`] shared between engines.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory(Arc<Mutex<HostMemory>>);

impl SharedMemory {
    pub fn new(memory: HostMemory) -> Self {
        Self(Arc::new(Mutex::new(memory)))
    }

    /// Lock the memory. A panic while holding the lock leaves the data usable.
    pub fn lock(&self) -> MutexGuard<'_, HostMemory> {
        self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DmaAdapter for SharedMemory {
    fn translate(&mut self, va: u32, len: u32, access: Access) -> Result<Translation, TranslationFault> {
        self.lock().lookup(va, len, access)
    }

    fn read_bytes(&mut self, pa: u64, buf: &mut [u8]) {
        DmaAdapter::read_bytes(&mut *self.lock(), pa, buf);
    }

    fn write_bytes(&mut self, pa: u64, data: &[u8]) {
        DmaAdapter::write_bytes(&mut *self.lock(), pa, data);
    }

    fn increment_counter(&mut self, counter: PmuCounter, amount: u64) {
        self.lock().increment_counter(counter, amount);
    }

    fn current_pcycle(&self) -> u64 {
        self.lock().pcycle()
    }

    fn in_guest_mode(&self) -> bool {
        self.lock().in_guest_mode()
    }

    fn in_monitor_mode(&self) -> bool {
        self.lock().in_monitor_mode()
    }

    fn in_debug_mode(&self) -> bool {
        self.lock().in_debug_mode()
    }

    fn descriptor_started(&mut self, id: u64, va: u32) {
        self.lock().descriptor_started(id, va);
    }

    fn descriptor_finished(&mut self, id: u64, va: u32, state: DescriptorState) {
        self.lock().descriptor_finished(id, va, state);
    }

    fn raise_error_exception(&mut self, badva: u32, reason: FaultReason) {
        self.lock().raise_error_exception(badva, reason);
    }
}

/// One engine per hardware thread.
pub struct DmaComplex {
    engines: Vec<DmaEngine<SharedMemory>>,
    memory: SharedMemory,
}

impl DmaComplex {
    /// Create `num_engines` engines over `memory`.
    pub fn new(num_engines: usize, memory: HostMemory, config: &EngineConfig) -> Result<Self, DmaError> {
        if num_engines > MAX_ENGINES {
            return Err(DmaError::TooManyEngines { requested: num_engines, max: MAX_ENGINES });
        }
        let memory = SharedMemory::new(memory);
        let engines = (0..num_engines)
            .map(|num| DmaEngine::with_config(num, memory.clone(), config.clone()))
            .collect();
        log::info!("Created {} DMA engine(s)", num_engines);
        Ok(Self { engines, memory })
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engine owned by hardware thread `num`.
    pub fn engine(&self, num: usize) -> Result<&DmaEngine<SharedMemory>, DmaError> {
        let max = self.engines.len();
        self.engines.get(num).ok_or(DmaError::InvalidEngine { num, max })
    }

    pub fn engine_mut(&mut self, num: usize) -> Result<&mut DmaEngine<SharedMemory>, DmaError> {
        let max = self.engines.len();
        self.engines.get_mut(num).ok_or(DmaError::InvalidEngine { num, max })
    }

    pub fn engines(&self) -> impl Iterator<Item = &DmaEngine<SharedMemory>> {
        self.engines.iter()
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    /// Tick every engine once.
    pub fn tick_all(&mut self) {
        for engine in &mut self.engines {
            engine.tick(true);
        }
    }

    /// No engine is running.
    pub fn is_idle(&self) -> bool {
        self.engines
            .iter()
            .all(|e| e.external_status() != super::dma::DmaStatus::Run)
    }
}

impl std::fmt::Debug for DmaComplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmaComplex")
            .field("engines", &self.engines.len())
            .field("memory", &self.memory)
            .finish()
    }
}
