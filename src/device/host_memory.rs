//! Simulated memory behind the DMA engines.
//!
//! `HostMemory` stands in for everything on the far side of the engine's
//! adapter: physical storage, the MMU and the PMU. Storage is sparse, and
//! addresses only translate once a named region covers them.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                HostMemory                  │
//! │  regions (translation)     pages (data)    │
//! │  ┌──────────┬──────┐      ┌────┬────┬───┐  │
//! │  │ "ddr"    │ DDR  │      │4KB │4KB │...│  │
//! │  │ "vtcm"   │ VTCM │      └────┴────┴───┘  │
//! │  └──────────┴──────┘                       │
//! │  PMU counters, pcycle, CPU mode, events    │
//! └─────────────────────┬──────────────────────┘
//!                       │ DmaAdapter
//!              ┌────────┴────────┐
//!              │    DmaEngine    │
//!              └─────────────────┘
//! ```
//!
//! Translation is identity: a virtual address inside a region maps to the
//! same physical address. Unmapped addresses fail as a recoverable miss.
//!
//! # Usage
//!
//! ```
//! use udma_emu::device::HostMemory;
//!
//! let mut mem = HostMemory::new();
//! mem.map_ddr("input", 0x1000_0000, 4096).unwrap();
//! mem.map_ddr("output", 0x2000_0000, 4096).unwrap();
//!
//! mem.write_u32(0x1000_0000, 0xDEAD_BEEF);
//! assert_eq!(mem.read_u32(0x1000_0000), 0xDEAD_BEEF);
//! ```

use std::collections::BTreeMap;

use thiserror::Error;

use super::dma::{
    Access, DescriptorState, DmaAdapter, FaultReason, MemoryType, Permissions, PmuCounter, Translation,
    TranslationFault,
};

/// A named, translatable range of memory.
#[derive(Debug, Clone)]
pub struct MemoryRegion {
    /// Human-readable name (e.g. "ddr", "vtcm")
    pub name: String,
    /// Base address
    pub base: u32,
    /// Size in bytes
    pub size: u32,
    pub mem_type: MemoryType,
    pub perms: Permissions,
    /// Number of DMA reads from this region
    pub dma_reads: u64,
    /// Number of DMA writes to this region
    pub dma_writes: u64,
}

impl MemoryRegion {
    pub fn new(
        name: impl Into<String>,
        base: u32,
        size: u32,
        mem_type: MemoryType,
        perms: Permissions,
    ) -> Self {
        Self { name: name.into(), base, size, mem_type, perms, dma_reads: 0, dma_writes: 0 }
    }

    fn end(&self) -> u64 {
        u64::from(self.base) + u64::from(self.size)
    }

    /// Check if an address falls within this region.
    #[inline]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= u64::from(self.base) && addr < self.end()
    }

    /// Check if an address range overlaps this region.
    #[inline]
    pub fn overlaps(&self, addr: u64, len: u64) -> bool {
        let end = addr.saturating_add(len);
        addr < self.end() && end > u64::from(self.base)
    }
}

/// Error type for host memory operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostMemoryError {
    /// Address is not covered by any region
    #[error("address 0x{0:08x} not mapped")]
    AddressNotMapped(u64),
    /// Region overlap on mapping
    #[error("region at 0x{new_base:08x} overlaps with '{existing_name}'")]
    RegionOverlap { new_base: u32, existing_name: String },
    /// Region not found
    #[error("region '{0}' not found")]
    RegionNotFound(String),
}

/// Lifecycle notification received from an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorEvent {
    pub id: u64,
    pub va: u32,
    /// `None` when the descriptor started, its final state once it finished
    pub finished: Option<DescriptorState>,
}

/// Simulated memory, MMU and PMU.
///
/// Uses sparse storage (BTreeMap) so only touched 4KB pages are allocated.
pub struct HostMemory {
    /// Sparse storage: page_address -> page_data
    pages: BTreeMap<u64, Box<[u8; Self::PAGE_SIZE]>>,

    /// Translatable regions
    regions: Vec<MemoryRegion>,

    /// PMU counters reported by engines
    counters: BTreeMap<PmuCounter, u64>,

    /// Processor cycle
    pcycle: u64,

    guest_mode: bool,
    monitor_mode: bool,
    debug_mode: bool,

    /// (badva, reason) of each error exception raised
    error_exceptions: Vec<(u32, FaultReason)>,

    descriptor_events: Vec<DescriptorEvent>,

    /// Statistics
    total_bytes_written: u64,
    total_bytes_read: u64,
}

impl HostMemory {
    /// Page size for sparse storage
    pub const PAGE_SIZE: usize = 4096;

    /// Page address mask (lower 12 bits are offset)
    const PAGE_MASK: u64 = !(Self::PAGE_SIZE as u64 - 1);

    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            regions: Vec::new(),
            counters: BTreeMap::new(),
            pcycle: 0,
            guest_mode: false,
            monitor_mode: false,
            debug_mode: false,
            error_exceptions: Vec::new(),
            descriptor_events: Vec::new(),
            total_bytes_written: 0,
            total_bytes_read: 0,
        }
    }

    /// Make `[base, base + size)` translatable.
    ///
    /// No memory is allocated here; pages appear on first write.
    pub fn map_region(
        &mut self,
        name: impl Into<String>,
        base: u32,
        size: u32,
        mem_type: MemoryType,
        perms: Permissions,
    ) -> Result<(), HostMemoryError> {
        let name = name.into();

        if let Some(existing) = self.regions.iter().find(|r| r.overlaps(u64::from(base), u64::from(size))) {
            return Err(HostMemoryError::RegionOverlap { new_base: base, existing_name: existing.name.clone() });
        }

        log::debug!("Mapped '{}' 0x{:08x}+0x{:x} as {:?} {:?}", name, base, size, mem_type, perms);
        self.regions.push(MemoryRegion::new(name, base, size, mem_type, perms));
        Ok(())
    }

    /// Map read/write user DDR.
    pub fn map_ddr(&mut self, name: impl Into<String>, base: u32, size: u32) -> Result<(), HostMemoryError> {
        let perms = Permissions::USER | Permissions::READ | Permissions::WRITE;
        self.map_region(name, base, size, MemoryType::Ddr, perms)
    }

    /// Map read/write VTCM.
    pub fn map_vtcm(&mut self, name: impl Into<String>, base: u32, size: u32) -> Result<(), HostMemoryError> {
        let perms = Permissions::USER | Permissions::READ | Permissions::WRITE;
        self.map_region(name, base, size, MemoryType::Vtcm, perms)
    }

    /// Remove a region. Its contents stay in place but no longer translate.
    pub fn unmap(&mut self, name: &str) -> Result<MemoryRegion, HostMemoryError> {
        let index = self
            .regions
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| HostMemoryError::RegionNotFound(name.to_string()))?;
        Ok(self.regions.remove(index))
    }

    /// Get a region by name.
    pub fn region(&self, name: &str) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.name == name)
    }

    /// Find the region containing an address.
    pub fn region_at(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Identity translation with the region's attributes.
    pub fn lookup(&self, va: u32, len: u32, access: Access) -> Result<Translation, TranslationFault> {
        let addr = u64::from(va);
        let region = self.region_at(addr).ok_or(TranslationFault::Miss { va })?;

        let last = addr + u64::from(len.max(1)) - 1;
        if !region.contains(last) {
            // Runs off the end of the region
            let va = region.end() as u32;
            if self.region_at(region.end()).is_none() {
                return Err(TranslationFault::Miss { va });
            }
        }
        if !region.mem_type.is_dma_capable() {
            return Err(TranslationFault::Unsupported { va, mem_type: region.mem_type });
        }
        if !region.perms.contains(access.required()) {
            return Err(TranslationFault::AccessRights { va, needed: access.required() });
        }
        Ok(Translation { pa: addr, perms: region.perms, mem_type: region.mem_type })
    }

    /// Get or create a page for the given address.
    fn get_or_create_page(&mut self, addr: u64) -> &mut [u8; Self::PAGE_SIZE] {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages
            .entry(page_addr)
            .or_insert_with(|| Box::new([0u8; Self::PAGE_SIZE]))
    }

    /// Get a page for reading, if it exists.
    fn get_page(&self, addr: u64) -> Option<&[u8; Self::PAGE_SIZE]> {
        let page_addr = addr & Self::PAGE_MASK;
        self.pages.get(&page_addr).map(|b| b.as_ref())
    }

    #[inline]
    pub fn write_u8(&mut self, addr: u64, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    #[inline]
    pub fn read_u8(&self, addr: u64) -> u8 {
        let mut buf = [0u8; 1];
        self.read_bytes(addr, &mut buf);
        buf[0]
    }

    /// Write a 32-bit word (little-endian).
    #[inline]
    pub fn write_u32(&mut self, addr: u64, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    /// Read a 32-bit word (little-endian).
    #[inline]
    pub fn read_u32(&self, addr: u64) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    #[inline]
    pub fn write_u64(&mut self, addr: u64, value: u64) {
        self.write_bytes(addr, &value.to_le_bytes());
    }

    #[inline]
    pub fn read_u64(&self, addr: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(addr, &mut buf);
        u64::from_le_bytes(buf)
    }

    /// Write a byte slice to memory. Regions are not consulted.
    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) {
        let mut current_addr = addr;
        let mut remaining = data;

        while !remaining.is_empty() {
            let page = self.get_or_create_page(current_addr);
            let offset = (current_addr & !Self::PAGE_MASK) as usize;
            let to_write = remaining.len().min(Self::PAGE_SIZE - offset);

            page[offset..offset + to_write].copy_from_slice(&remaining[..to_write]);

            current_addr += to_write as u64;
            remaining = &remaining[to_write..];
        }

        self.total_bytes_written += data.len() as u64;
    }

    /// Read bytes from memory into a buffer. Untouched memory reads as zero.
    pub fn read_bytes(&self, addr: u64, buf: &mut [u8]) {
        let mut current_addr = addr;
        let mut offset_in_buf = 0;

        while offset_in_buf < buf.len() {
            let page_offset = (current_addr & !Self::PAGE_MASK) as usize;
            let to_read = (buf.len() - offset_in_buf).min(Self::PAGE_SIZE - page_offset);
            let out = &mut buf[offset_in_buf..offset_in_buf + to_read];

            match self.get_page(current_addr) {
                Some(page) => out.copy_from_slice(&page[page_offset..page_offset + to_read]),
                None => out.fill(0),
            }

            current_addr += to_read as u64;
            offset_in_buf += to_read;
        }
    }

    /// Fill `len` bytes at `addr` with `value`.
    pub fn fill(&mut self, addr: u64, len: usize, value: u8) {
        self.write_bytes(addr, &vec![value; len]);
    }

    fn record_dma(&mut self, addr: u64, len: usize, write: bool) {
        if let Some(region) = self.regions.iter_mut().find(|r| r.overlaps(addr, len as u64)) {
            if write {
                region.dma_writes += 1;
            } else {
                region.dma_reads += 1;
            }
        }
    }

    /// Value of a PMU counter.
    pub fn counter(&self, counter: PmuCounter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    /// Every counter that has moved, in a stable order.
    pub fn counters(&self) -> impl Iterator<Item = (PmuCounter, u64)> + '_ {
        self.counters.iter().map(|(&c, &v)| (c, v))
    }

    pub fn pcycle(&self) -> u64 {
        self.pcycle
    }

    pub fn set_pcycle(&mut self, pcycle: u64) {
        self.pcycle = pcycle;
    }

    pub fn advance_pcycle(&mut self, cycles: u64) {
        self.pcycle += cycles;
    }

    pub fn set_guest_mode(&mut self, on: bool) {
        self.guest_mode = on;
    }

    pub fn set_monitor_mode(&mut self, on: bool) {
        self.monitor_mode = on;
    }

    pub fn set_debug_mode(&mut self, on: bool) {
        self.debug_mode = on;
    }

    pub fn error_exceptions(&self) -> &[(u32, FaultReason)] {
        &self.error_exceptions
    }

    pub fn descriptor_events(&self) -> &[DescriptorEvent] {
        &self.descriptor_events
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.total_bytes_read
    }

    pub fn allocated_pages(&self) -> usize {
        self.pages.len()
    }

    pub fn allocated_bytes(&self) -> usize {
        self.pages.len() * Self::PAGE_SIZE
    }

    /// Hexdump a memory range for debugging.
    pub fn hexdump(&self, addr: u64, len: usize) -> String {
        let mut result = String::new();
        let mut buf = vec![0u8; len];
        self.read_bytes(addr, &mut buf);

        for (i, chunk) in buf.chunks(16).enumerate() {
            let line_addr = addr + (i * 16) as u64;
            result.push_str(&format!("{:08x}: ", line_addr));

            for (j, byte) in chunk.iter().enumerate() {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str(&format!("{:02x} ", byte));
            }

            // Padding for short lines
            for j in chunk.len()..16 {
                if j == 8 {
                    result.push(' ');
                }
                result.push_str("   ");
            }

            result.push_str(" |");
            for &byte in chunk {
                result.push(if (0x20..0x7f).contains(&byte) { byte as char } else { '.' });
            }
            result.push_str("|\n");
        }

        result
    }
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory")
            .field("allocated_pages", &self.pages.len())
            .field("regions", &self.regions.len())
            .field("pcycle", &self.pcycle)
            .field("total_bytes_written", &self.total_bytes_written)
            .field("total_bytes_read", &self.total_bytes_read)
            .finish()
    }
}

impl DmaAdapter for HostMemory {
    fn translate(&mut self, va: u32, len: u32, access: Access) -> Result<Translation, TranslationFault> {
        self.lookup(va, len, access)
    }

    fn read_bytes(&mut self, pa: u64, buf: &mut [u8]) {
        HostMemory::read_bytes(self, pa, buf);
        self.total_bytes_read += buf.len() as u64;
        self.record_dma(pa, buf.len(), false);
    }

    fn write_bytes(&mut self, pa: u64, data: &[u8]) {
        HostMemory::write_bytes(self, pa, data);
        self.record_dma(pa, data.len(), true);
    }

    fn increment_counter(&mut self, counter: PmuCounter, amount: u64) {
        *self.counters.entry(counter).or_insert(0) += amount;
    }

    fn current_pcycle(&self) -> u64 {
        self.pcycle
    }

    fn in_guest_mode(&self) -> bool {
        self.guest_mode
    }

    fn in_monitor_mode(&self) -> bool {
        self.monitor_mode
    }

    fn in_debug_mode(&self) -> bool {
        self.debug_mode
    }

    fn descriptor_started(&mut self, id: u64, va: u32) {
        self.descriptor_events.push(DescriptorEvent { id, va, finished: None });
    }

    fn descriptor_finished(&mut self, id: u64, va: u32, state: DescriptorState) {
        self.descriptor_events.push(DescriptorEvent { id, va, finished: Some(state) });
    }

    fn raise_error_exception(&mut self, badva: u32, reason: FaultReason) {
        self.error_exceptions.push((badva, reason));
    }
}
