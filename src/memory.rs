// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Memory handed to the VPU.
//!
//! The VPU needs two kinds of memory: ordinary process memory for its working state, and
//! physically contiguous DMA memory for its working state and for the decoded frames. Every block
//! we obtain is recorded in a [`MemoryLedger`] so it can be released once the session is over,
//! whatever state the session ended in.

use thiserror::Error;

use crate::device::vpu::DmaMemory;
use crate::device::vpu::MemBlock;
use crate::device::vpu::MemKind;
use crate::device::vpu::MemRequest;
use crate::device::vpu::VpuDevice;
use crate::device::vpu::VpuError;
use crate::utils::align_up;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("cannot allocate {0} bytes of virtual memory")]
    Virtual(usize),
    #[error("cannot allocate {size} bytes of physical memory: {err}")]
    Physical { size: usize, err: VpuError },
    #[error("{0} physical memory block(s) could not be freed")]
    Free(usize),
}

/// Identifies the blocks allocated by one call to [`MemoryLedger::allocate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchId(u64);

enum Allocation {
    Virtual(Vec<u8>),
    Physical(DmaMemory),
}

struct Entry {
    batch: BatchId,
    allocation: Allocation,
}

/// Keeps track of every block of memory allocated for the VPU.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Vec<Entry>,
    next_batch: u64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Default::default()
    }

    /// Allocates one block per entry of `requests`.
    ///
    /// Either all blocks are allocated, or none is: if one allocation fails, the blocks already
    /// allocated for this batch are released before returning the error.
    pub fn allocate<D: VpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        requests: &[MemRequest],
    ) -> Result<(BatchId, Vec<MemBlock>), MemoryError> {
        let batch = BatchId(self.next_batch);
        self.next_batch += 1;

        let mut blocks = Vec::with_capacity(requests.len());
        for request in requests {
            match self.allocate_one(device, batch, request) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    log::error!("{}", e);
                    // Already failing, the release errors are logged by `release_batch`.
                    let _ = self.release_batch(device, batch);
                    return Err(e);
                }
            }
        }

        Ok((batch, blocks))
    }

    fn allocate_one<D: VpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        batch: BatchId,
        request: &MemRequest,
    ) -> Result<MemBlock, MemoryError> {
        // Over-allocate so the start of the block can be aligned.
        let size = request.size + request.alignment;

        let (allocation, block) = match request.kind {
            MemKind::Virtual => {
                let mut mem = Vec::new();
                mem.try_reserve_exact(size)
                    .map_err(|_| MemoryError::Virtual(size))?;
                mem.resize(size, 0u8);
                let virt_addr = align_up(mem.as_ptr() as usize, request.alignment);
                let block = MemBlock {
                    request: *request,
                    virt_addr,
                    phys_addr: 0,
                };
                (Allocation::Virtual(mem), block)
            }
            MemKind::Physical => {
                let mem = device
                    .get_mem(size)
                    .map_err(|err| MemoryError::Physical { size, err })?;
                let block = MemBlock {
                    request: *request,
                    virt_addr: align_up(mem.virt_addr, request.alignment),
                    phys_addr: align_up(mem.phys_addr, request.alignment),
                };
                (Allocation::Physical(mem), block)
            }
        };

        self.entries.push(Entry { batch, allocation });

        Ok(block)
    }

    /// Number of blocks currently recorded, of either kind.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of physical blocks currently recorded.
    pub fn num_physical(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e.allocation, Allocation::Physical(_)))
            .count()
    }

    /// Releases the blocks of `batch` only.
    pub fn release_batch<D: VpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        batch: BatchId,
    ) -> Result<(), MemoryError> {
        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.batch == batch);
        self.entries = kept;

        Self::free_entries(device, released)
    }

    /// Releases every recorded block and clears the ledger.
    ///
    /// All blocks are released even if freeing some of them fails; the number of failures is
    /// reported in the returned error. Calling this again on an empty ledger is a no-op.
    pub fn release_all<D: VpuDevice + ?Sized>(&mut self, device: &mut D) -> Result<(), MemoryError> {
        let entries = std::mem::take(&mut self.entries);

        Self::free_entries(device, entries)
    }

    fn free_entries<D: VpuDevice + ?Sized>(
        device: &mut D,
        entries: Vec<Entry>,
    ) -> Result<(), MemoryError> {
        let mut failures = 0;

        for entry in entries {
            match entry.allocation {
                Allocation::Virtual(mem) => drop(mem),
                Allocation::Physical(mem) => {
                    if let Err(e) = device.free_mem(&mem) {
                        log::error!(
                            "error while trying to free physical memory at 0x{:x}: {}",
                            mem.phys_addr,
                            e
                        );
                        failures += 1;
                    }
                }
            }
        }

        match failures {
            0 => Ok(()),
            n => Err(MemoryError::Free(n)),
        }
    }
}
