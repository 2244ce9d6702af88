//! The host memory seam.
//!
//! The engine never touches raw pointers; everything goes through
//! [`HostMemory`], which reserves committed page runs and provides
//! physically addressed access to them. [`VecHostMemory`] is the in-process
//! backend used by tests and by embedders that model guest RAM as a flat
//! buffer.

use thiserror::Error;

use crate::{PageRun, PhysicalPageNumber, PAGE_SIZE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostMemoryError {
    #[error("out of host memory reserving {pages} pages")]
    OutOfMemory { pages: usize },

    #[error("host memory access out of range: paddr=0x{paddr:x} len={len}")]
    OutOfRange { paddr: u64, len: usize },

    #[error("release of pages that were never reserved: base ppn {base:#x}")]
    BadRelease { base: u64 },
}

pub type HostMemoryResult<T> = Result<T, HostMemoryError>;

pub trait HostMemory {
    /// Reserves and commits `pages` physically contiguous pages.
    fn reserve_contiguous(&mut self, pages: usize) -> HostMemoryResult<PageRun>;

    /// Returns a previously reserved run.
    fn release(&mut self, run: PageRun) -> HostMemoryResult<()>;

    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> HostMemoryResult<()>;

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> HostMemoryResult<()>;

    fn read_u32_le(&self, paddr: u64) -> HostMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_physical(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, paddr: u64) -> HostMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_physical(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> HostMemoryResult<()> {
        self.write_physical(paddr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> HostMemoryResult<()> {
        self.write_physical(paddr, &value.to_le_bytes())
    }

    /// Zero-fills a page run.
    fn zero_run(&mut self, run: PageRun) -> HostMemoryResult<()> {
        let zeros = [0u8; PAGE_SIZE];
        for i in 0..run.count {
            self.write_physical(run.page(i).paddr(), &zeros)?;
        }
        Ok(())
    }
}

/// Flat in-process host memory starting at physical page 1.
///
/// Page 0 is deliberately never handed out so that a zero page number can
/// keep its conventional "no page" meaning in device structures.
#[derive(Debug, Clone)]
pub struct VecHostMemory {
    data: Vec<u8>,
    next_free: u64,
    reserved: Vec<PageRun>,
}

impl VecHostMemory {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: vec![0u8; size_bytes],
            next_free: 1,
            reserved: Vec::new(),
        }
    }

    pub fn page_capacity(&self) -> usize {
        self.data.len() / PAGE_SIZE
    }

    fn check_range(&self, paddr: u64, len: usize) -> HostMemoryResult<(usize, usize)> {
        let start =
            usize::try_from(paddr).map_err(|_| HostMemoryError::OutOfRange { paddr, len })?;
        let end = start
            .checked_add(len)
            .ok_or(HostMemoryError::OutOfRange { paddr, len })?;
        if end > self.data.len() {
            return Err(HostMemoryError::OutOfRange { paddr, len });
        }
        Ok((start, end))
    }
}

impl HostMemory for VecHostMemory {
    fn reserve_contiguous(&mut self, pages: usize) -> HostMemoryResult<PageRun> {
        let base = self.next_free;
        let end = base
            .checked_add(pages as u64)
            .ok_or(HostMemoryError::OutOfMemory { pages })?;
        if end > self.page_capacity() as u64 {
            return Err(HostMemoryError::OutOfMemory { pages });
        }
        self.next_free = end;
        let run = PageRun::new(PhysicalPageNumber(base), pages);
        self.reserved.push(run);
        Ok(run)
    }

    fn release(&mut self, run: PageRun) -> HostMemoryResult<()> {
        match self.reserved.iter().position(|r| *r == run) {
            Some(i) => {
                self.reserved.swap_remove(i);
                Ok(())
            }
            None => Err(HostMemoryError::BadRelease { base: run.base.0 }),
        }
    }

    fn read_physical(&self, paddr: u64, buf: &mut [u8]) -> HostMemoryResult<()> {
        let (start, end) = self.check_range(paddr, buf.len())?;
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_physical(&mut self, paddr: u64, buf: &[u8]) -> HostMemoryResult<()> {
        let (start, end) = self.check_range(paddr, buf.len())?;
        self.data[start..end].copy_from_slice(buf);
        Ok(())
    }
}
