// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware deinterlacing of decoded frames through the IPU.
//!
//! The [`DeinterlacePool`] owns a small set of IPU buffers. Each call to
//! [`DeinterlacePool::process`] picks a free one, has the IPU write the deinterlaced version of a
//! decoded frame into it and returns a [`DeinterlacedFrame`] that keeps both the IPU buffer and
//! the source frame busy until it is dropped.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use crate::decoder::BufferLock;
use crate::device::ipu::DeinterlaceTask;
use crate::device::ipu::IpuDevice;
use crate::device::ipu::IpuError;
use crate::device::ipu::IpuResult;
use crate::device::ipu::Motion;
use crate::device::ipu::TaskPriority;
use crate::device::ipu::DEINTERLACE_FIELD_BOTTOM;
use crate::device::ipu::DEINTERLACE_FIELD_MASK;
use crate::device::ipu::DEINTERLACE_FIELD_TOP;
use crate::device::vpu::FieldType;
use crate::utils::align_up;
use crate::utils::align_up_u32;
use crate::video_frame::frame_pool::BufferHold;
use crate::video_frame::frame_pool::HoldKind;
use crate::video_frame::FRAME_ALIGN;
use crate::Fourcc;
use crate::Resolution;

#[derive(Error, Debug)]
pub enum DeinterlaceError {
    #[error("deinterlacing is disabled")]
    Disabled,
    #[error("no free deinterlace buffer")]
    NoFreeBuffer,
    #[error("source frame is not valid")]
    InvalidSource,
    #[error("IPU device error: {0}")]
    Device(IpuError),
    #[error("deinterlace task failed: {0}")]
    Task(IpuError),
}

/// Size in bytes of an NV12 frame of `resolution`.
fn nv12_size(resolution: Resolution) -> usize {
    resolution.get_area() * 12 / 8
}

/// Field format bits matching the field order reported by the VPU.
fn field_parity(field_type: FieldType) -> u8 {
    match field_type {
        FieldType::Top | FieldType::TopBottom => DEINTERLACE_FIELD_TOP,
        FieldType::Bottom | FieldType::BottomTop => DEINTERLACE_FIELD_BOTTOM,
        FieldType::None | FieldType::Unknown => 0,
    }
}

#[derive(Debug, Default)]
struct SlotState {
    in_use: bool,
    /// Incremented every time the slot is handed out or forcibly released, so stale frames do not
    /// release a later use of the slot.
    generation: u64,
    source: Option<BufferHold>,
}

#[derive(Debug)]
struct DeinterlaceSlot {
    index: usize,
    /// Addresses and size of the allocation, as returned by the device.
    phys_base: usize,
    virt_base: usize,
    alloc_size: usize,
    /// Aligned addresses the IPU writes to.
    phys_addr: usize,
    virt_addr: usize,
    valid: AtomicBool,
    state: Mutex<SlotState>,
}

impl DeinterlaceSlot {
    /// Releases the slot whatever its current user. Must be called with the buffer lock held.
    fn force_release(&self) -> Option<BufferHold> {
        let mut state = self.state.lock().unwrap();
        state.in_use = false;
        state.generation += 1;
        state.source.take()
    }
}

/// A deinterlaced frame living in one of the buffers of a [`DeinterlacePool`].
///
/// Dropping it makes the buffer available again and releases the decoded frame it was produced
/// from. It can be dropped while holding the buffer lock.
#[derive(Debug)]
pub struct DeinterlacedFrame {
    slot: Arc<DeinterlaceSlot>,
    generation: u64,
    resolution: Resolution,
}

impl DeinterlacedFrame {
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn phys_addr(&self) -> usize {
        self.slot.phys_addr
    }

    pub fn virt_addr(&self) -> usize {
        self.slot.virt_addr
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Physical address of the decoded frame this frame was produced from, if still held.
    pub fn source_phys_addr(&self) -> Option<usize> {
        let state = self.slot.state.lock().unwrap();
        if state.generation != self.generation {
            return None;
        }

        state.source.as_ref().map(|s| s.phys_addr())
    }

    /// Whether the buffer still holds this frame. Only meaningful while holding the buffer lock.
    pub fn is_valid(&self) -> bool {
        if !self.slot.valid.load(Ordering::Acquire) {
            return false;
        }

        let state = self.slot.state.lock().unwrap();
        state.generation == self.generation
            && state.source.as_ref().map_or(false, |s| s.is_valid())
    }
}

// Renderers drop frames while holding the buffer lock, so this must not take it. The generation
// check orders it against `force_release`.
impl Drop for DeinterlacedFrame {
    fn drop(&mut self) {
        let source = {
            let mut state = self.slot.state.lock().unwrap();
            if state.generation != self.generation {
                return;
            }

            log::trace!("-  {:02} (IPU)", self.slot.index);
            state.in_use = false;
            state.source.take()
        };
        drop(source);
    }
}

/// The set of IPU buffers used for deinterlacing.
pub struct DeinterlacePool<I: IpuDevice> {
    open_device: Box<dyn FnMut() -> IpuResult<I>>,
    device: Option<I>,
    slots: Vec<Arc<DeinterlaceSlot>>,
    lock: BufferLock,
    current_field_fmt: u8,
}

impl<I: IpuDevice> DeinterlacePool<I> {
    /// Creates a disabled pool. `open_device` is called by `init` to open the IPU.
    pub fn new<F>(lock: BufferLock, open_device: F) -> Self
    where
        F: FnMut() -> IpuResult<I> + 'static,
    {
        Self {
            open_device: Box::new(open_device),
            device: None,
            slots: Vec::new(),
            lock,
            current_field_fmt: 0,
        }
    }

    /// Opens the IPU and allocates `count` buffers able to hold a `width`x`height` NV12 frame,
    /// with addresses aligned to `alignment`.
    ///
    /// On failure, deinterlacing stays disabled and decoding can go on without it.
    pub fn init(
        &mut self,
        width: u32,
        height: u32,
        count: usize,
        alignment: usize,
    ) -> Result<(), DeinterlaceError> {
        if self.device.is_some() {
            // Best effort, errors are logged by `close`.
            let _ = self.close();
        }

        if count == 0 {
            log::error!("invalid number of deinterlace buffers: {}", count);
            return Err(DeinterlaceError::Disabled);
        }

        let device = (self.open_device)().map_err(|e| {
            log::warn!("failed to open IPU, deinterlacing disabled: {}", e);
            DeinterlaceError::Device(e)
        })?;
        self.device = Some(device);
        self.current_field_fmt = 0;

        let resolution = Resolution {
            width: align_up_u32(width, FRAME_ALIGN),
            height: align_up_u32(height, FRAME_ALIGN * 2),
        };
        let size = nv12_size(resolution);

        for index in 0..count {
            match self.allocate_slot(index, size, alignment) {
                Ok(slot) => {
                    log::debug!(
                        "IPU: allocated {} bytes for frame of {}x{} at 0x{:x}",
                        slot.alloc_size,
                        resolution.width,
                        resolution.height,
                        slot.phys_base
                    );
                    self.slots.push(Arc::new(slot));
                }
                Err(e) => {
                    log::error!("failed to allocate IPU buffer, deinterlacing disabled: {}", e);
                    let _ = self.close();
                    return Err(DeinterlaceError::Device(e));
                }
            }
        }

        Ok(())
    }

    fn allocate_slot(
        &mut self,
        index: usize,
        size: usize,
        alignment: usize,
    ) -> IpuResult<DeinterlaceSlot> {
        let device = self.device.as_mut().ok_or(IpuError::Closed)?;
        // Leave room to align the start of the buffer.
        let alloc_size = if alignment > 1 {
            size + alignment
        } else {
            size
        };

        let phys_base = device.alloc(alloc_size)?;
        let virt_base = match device.map(phys_base, alloc_size) {
            Ok(virt_base) => virt_base,
            Err(e) => {
                if let Err(e) = device.free(phys_base) {
                    log::error!("failed to free IPU buffer 0x{:x}: {}", phys_base, e);
                }
                return Err(e);
            }
        };

        Ok(DeinterlaceSlot {
            index,
            phys_base,
            virt_base,
            alloc_size,
            phys_addr: align_up(phys_base, alignment),
            virt_addr: align_up(virt_base, alignment),
            valid: AtomicBool::new(true),
            state: Default::default(),
        })
    }

    /// Whether `init` succeeded and `close` has not been called since.
    pub fn is_enabled(&self) -> bool {
        self.device.is_some() && !self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of buffers currently holding a frame.
    pub fn num_in_use(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state.lock().unwrap().in_use)
            .count()
    }

    /// Deinterlaces `source` into a free buffer.
    ///
    /// If `low_motion` is set and the predecessor of `source` is still valid, both frames are
    /// used for motion adaptive deinterlacing.
    ///
    /// Must not be called with the buffer lock held.
    pub fn process(
        &mut self,
        source: &BufferHold,
        field_type: FieldType,
        low_motion: bool,
    ) -> Result<DeinterlacedFrame, DeinterlaceError> {
        if !self.is_enabled() {
            return Err(DeinterlaceError::Disabled);
        }

        let frame = source
            .frame()
            .filter(|_| source.is_valid())
            .ok_or(DeinterlaceError::InvalidSource)?;

        let slot = {
            let _guard = self.lock.lock();
            self.slots
                .iter()
                .find(|s| !s.state.lock().unwrap().in_use)
                .cloned()
        };
        let Some(slot) = slot else {
            log::error!("deinterlacing: no free buffer, forwarding unprocessed frame");
            return Err(DeinterlaceError::NoFreeBuffer);
        };

        let resolution = Resolution {
            width: frame.ext.frame_width,
            height: frame.ext.frame_height,
        };
        let previous = if low_motion {
            source.predecessor_phys_addr()
        } else {
            None
        };

        let mut task = DeinterlaceTask {
            priority: TaskPriority::High,
            ..Default::default()
        };
        task.input.width = resolution.width;
        task.input.height = resolution.height;
        task.input.format = Fourcc::NV12;
        task.output.width = resolution.width;
        task.output.height = resolution.height;
        task.output.format = Fourcc::NV12;
        task.output.paddr = slot.phys_addr;

        match previous {
            Some(previous) => {
                task.input.paddr = previous;
                task.input.paddr_n = source.phys_addr();
                task.input.motion = Motion::Low;
            }
            None => {
                task.input.paddr = source.phys_addr();
                task.input.motion = Motion::High;
            }
        }
        task.input.deinterlace = true;
        task.input.field_fmt =
            (self.current_field_fmt & !DEINTERLACE_FIELD_MASK) | field_parity(field_type);

        // `is_enabled` checked the device is there.
        let device = self.device.as_mut().ok_or(DeinterlaceError::Disabled)?;
        device.queue_task(&task).map_err(|e| {
            log::error!("IPU task failed: {}", e);
            DeinterlaceError::Task(e)
        })?;

        let generation = {
            let _guard = self.lock.lock();
            let mut state = slot.state.lock().unwrap();
            state.in_use = true;
            state.generation += 1;
            state.source = Some(source.clone_as(HoldKind::Display));
            state.generation
        };
        log::trace!("+  {:02} (IPU)", slot.index);

        Ok(DeinterlacedFrame {
            slot,
            generation,
            resolution,
        })
    }

    /// Releases every buffer in use, whoever holds it.
    ///
    /// Must not be called with the buffer lock held.
    pub fn reset(&mut self) {
        let sources: Vec<_> = {
            let _guard = self.lock.lock();
            self.slots.iter().filter_map(|s| s.force_release()).collect()
        };
        drop(sources);

        self.current_field_fmt = 0;
    }

    /// Releases every buffer, frees them and closes the device.
    ///
    /// All steps are attempted even if some fail; the last error is returned. Calling this on a
    /// pool that is not initialized, or only partially, is fine.
    ///
    /// Must not be called with the buffer lock held.
    pub fn close(&mut self) -> Result<(), DeinterlaceError> {
        let lock = self.lock.clone();
        let _guard = lock.lock();
        let mut result = Ok(());

        let slots = std::mem::take(&mut self.slots);
        if let Some(mut device) = self.device.take() {
            for slot in &slots {
                slot.valid.store(false, Ordering::Release);
                drop(slot.force_release());

                if let Err(e) = device.unmap(slot.virt_base, slot.alloc_size) {
                    log::error!("IPU unmap of buffer {} failed: {}", slot.index, e);
                    result = Err(e);
                }
                if let Err(e) = device.free(slot.phys_base) {
                    log::error!("IPU free of buffer 0x{:x} failed: {}", slot.phys_base, e);
                    result = Err(e);
                }
            }

            if let Err(e) = device.close() {
                log::error!("failed to close IPU: {}", e);
                result = Err(e);
            }
        }

        self.current_field_fmt = 0;

        result.map_err(DeinterlaceError::Device)
    }
}

impl<I: IpuDevice> Drop for DeinterlacePool<I> {
    fn drop(&mut self) {
        // Errors are logged by `close`.
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::device::dummy::DummyIpu;
    use crate::device::dummy::DummyVpu;
    use crate::device::vpu::FrameExtInfo;
    use crate::device::vpu::InitialInfo;
    use crate::device::vpu::OutputFrame;
    use crate::memory::MemoryLedger;
    use crate::video_frame::frame_pool::DecodedBuffer;
    use crate::video_frame::frame_pool::FramePool;

    fn frame_pool() -> FramePool {
        let mut vpu = DummyVpu::default();
        let mut ledger = MemoryLedger::new();
        let info = InitialInfo {
            pic_width: 720,
            pic_height: 576,
            interlaced: true,
            min_frame_buffer_count: 2,
            address_alignment: 1,
            ..Default::default()
        };

        FramePool::allocate(&mut ledger, &mut vpu, &info).unwrap()
    }

    fn decoded(buffer: &Arc<DecodedBuffer>, predecessor: Option<&BufferHold>) -> BufferHold {
        let frame = OutputFrame {
            display_luma_addr: buffer.phys_addr(),
            field_type: FieldType::TopBottom,
            ext: FrameExtInfo {
                frame_width: 720,
                frame_height: 576,
                ..Default::default()
            },
        };
        buffer.bind(frame, predecessor.map(|p| p.clone_as(HoldKind::Reference)));
        buffer.hold(HoldKind::Display)
    }

    fn pool(ipu: &DummyIpu, count: usize, alignment: usize) -> DeinterlacePool<DummyIpu> {
        let device = ipu.clone();
        let mut pool = DeinterlacePool::new(BufferLock::new(), move || device.open());
        pool.init(720, 576, count, alignment).unwrap();
        pool
    }

    #[test]
    fn init_allocates_buffers() {
        let ipu = DummyIpu::default();
        let pool = pool(&ipu, 4, 64);

        assert!(pool.is_enabled());
        assert_eq!(pool.len(), 4);
        let state = ipu.state();
        assert_eq!(state.allocated.len(), 4);
        assert_eq!(state.mapped.len(), 4);
        for (_, size) in &state.allocated {
            assert_eq!(*size, 720 * 576 * 12 / 8 + 64);
        }
        for slot in &pool.slots {
            assert_eq!(slot.phys_addr % 64, 0);
            assert_eq!(slot.virt_addr % 64, 0);
        }
    }

    #[test]
    fn init_rounds_height_for_fields() {
        let ipu = DummyIpu::default();
        let device = ipu.clone();
        let mut pool = DeinterlacePool::new(BufferLock::new(), move || device.open());
        pool.init(1920, 1080, 1, 1).unwrap();

        assert_eq!(ipu.state().allocated[0].1, 1920 * 1088 * 12 / 8);
    }

    #[test]
    fn open_failure_disables_deinterlacing() {
        let ipu = DummyIpu::default();
        ipu.state().fail_open = true;
        let device = ipu.clone();
        let mut pool = DeinterlacePool::new(BufferLock::new(), move || device.open());

        assert!(matches!(
            pool.init(720, 576, 4, 1),
            Err(DeinterlaceError::Device(IpuError::Open(_)))
        ));
        assert!(!pool.is_enabled());

        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);
        assert!(matches!(
            pool.process(&source, FieldType::Top, true),
            Err(DeinterlaceError::Disabled)
        ));
        assert!(pool.close().is_ok());
    }

    #[test]
    fn partial_init_is_cleaned_up() {
        let ipu = DummyIpu::default();
        ipu.state().fail_alloc_after = Some(2);
        let device = ipu.clone();
        let mut pool = DeinterlacePool::new(BufferLock::new(), move || device.open());

        assert!(pool.init(720, 576, 4, 1).is_err());
        assert!(!pool.is_enabled());
        {
            let state = ipu.state();
            assert!(state.allocated.is_empty());
            assert!(state.mapped.is_empty());
            assert_eq!(state.freed.len(), 2);
            assert!(state.closed);
        }

        // Closing again does not touch the device.
        assert!(pool.close().is_ok());
        assert_eq!(ipu.state().close_calls, 1);
    }

    #[test]
    fn map_failure_frees_allocation() {
        let ipu = DummyIpu::default();
        ipu.state().fail_map = true;
        let device = ipu.clone();
        let mut pool = DeinterlacePool::new(BufferLock::new(), move || device.open());

        assert!(pool.init(720, 576, 2, 1).is_err());
        assert!(ipu.state().allocated.is_empty());
        assert!(ipu.state().closed);
    }

    #[test]
    fn close_is_idempotent() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 3, 16);

        pool.close().unwrap();
        assert!(!pool.is_enabled());
        {
            let state = ipu.state();
            assert!(state.allocated.is_empty());
            assert!(state.mapped.is_empty());
            assert_eq!(state.freed.len(), 3);
            assert_eq!(state.unmapped.len(), 3);
        }

        pool.close().unwrap();
        drop(pool);
        let state = ipu.state();
        assert_eq!(state.freed.len(), 3);
        assert_eq!(state.close_calls, 1);
    }

    #[test]
    fn high_motion_task() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 2, 1);
        let frames = frame_pool();
        let first = decoded(frames.buffer(0).unwrap(), None);
        let second = decoded(frames.buffer(1).unwrap(), Some(&first));

        let frame = pool.process(&second, FieldType::Bottom, false).unwrap();

        let task = ipu.state().tasks[0];
        assert_eq!(task.priority, TaskPriority::High);
        assert!(task.input.deinterlace);
        assert_eq!(task.input.motion, Motion::High);
        assert_eq!(task.input.paddr, second.phys_addr());
        assert_eq!(task.input.paddr_n, 0);
        assert_eq!(task.input.field_fmt, DEINTERLACE_FIELD_BOTTOM);
        assert_eq!(task.input.format, Fourcc::NV12);
        assert_eq!((task.input.width, task.input.height), (720, 576));
        assert_eq!(task.output.paddr, frame.phys_addr());
        assert_eq!(frame.resolution(), Resolution::from((720, 576)));
        assert_eq!(frame.source_phys_addr(), Some(second.phys_addr()));
    }

    #[test]
    fn motion_adaptive_task() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 2, 1);
        let frames = frame_pool();
        let first = decoded(frames.buffer(0).unwrap(), None);
        let second = decoded(frames.buffer(1).unwrap(), Some(&first));

        let _frame = pool.process(&second, FieldType::TopBottom, true).unwrap();

        let task = ipu.state().tasks[0];
        assert_eq!(task.input.motion, Motion::Low);
        assert_eq!(task.input.paddr, first.phys_addr());
        assert_eq!(task.input.paddr_n, second.phys_addr());
        assert_eq!(task.input.field_fmt, DEINTERLACE_FIELD_TOP);

        // Without a predecessor the task falls back to high motion.
        let _frame = pool.process(&first, FieldType::Top, true).unwrap();
        let task = ipu.state().tasks[1];
        assert_eq!(task.input.motion, Motion::High);
        assert_eq!(task.input.paddr, first.phys_addr());
    }

    #[test]
    fn field_order_follows_frame() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 2, 1);
        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);
        pool.current_field_fmt = DEINTERLACE_FIELD_BOTTOM;

        let _frame = pool.process(&source, FieldType::TopBottom, false).unwrap();
        assert_eq!(ipu.state().tasks[0].input.field_fmt, DEINTERLACE_FIELD_TOP);

        let _frame = pool.process(&source, FieldType::BottomTop, false).unwrap();
        assert_eq!(ipu.state().tasks[1].input.field_fmt, DEINTERLACE_FIELD_BOTTOM);
    }

    #[test]
    fn no_free_buffer() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 2, 1);
        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);

        let first = pool.process(&source, FieldType::Top, true).unwrap();
        let second = pool.process(&source, FieldType::Top, true).unwrap();
        assert_ne!(first.index(), second.index());
        assert_eq!(pool.num_in_use(), 2);

        assert!(matches!(
            pool.process(&source, FieldType::Top, true),
            Err(DeinterlaceError::NoFreeBuffer)
        ));
        // No task was queued for the failed attempt.
        assert_eq!(ipu.state().tasks.len(), 2);

        drop(first);
        let third = pool.process(&source, FieldType::Top, true).unwrap();
        assert_eq!(pool.num_in_use(), 2);
        drop(third);
        drop(second);
        assert_eq!(pool.num_in_use(), 0);
    }

    #[test]
    fn frame_keeps_source_busy() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 2, 1);
        let frames = frame_pool();
        let buffer = frames.buffer(0).unwrap();
        let source = decoded(buffer, None);

        let frame = pool.process(&source, FieldType::Top, false).unwrap();
        assert_eq!(buffer.display_hold_count(), 2);
        assert!(frame.is_valid());

        drop(source);
        assert!(buffer.is_valid());
        assert_eq!(buffer.hold_count(), 1);

        drop(frame);
        assert_eq!(buffer.hold_count(), 0);
    }

    #[test]
    fn task_failure_keeps_buffer_free() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 1, 1);
        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);

        ipu.state().fail_task = true;
        assert!(matches!(
            pool.process(&source, FieldType::Top, false),
            Err(DeinterlaceError::Task(_))
        ));
        assert_eq!(pool.num_in_use(), 0);
        assert_eq!(source.hold_count(), 1);

        ipu.state().fail_task = false;
        assert!(pool.process(&source, FieldType::Top, false).is_ok());
    }

    #[test]
    fn reset_releases_frames_in_use() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 1, 1);
        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);

        let stale = pool.process(&source, FieldType::Top, false).unwrap();
        pool.reset();
        assert_eq!(pool.num_in_use(), 0);
        assert!(!stale.is_valid());
        assert_eq!(source.hold_count(), 1);

        let current = pool.process(&source, FieldType::Top, false).unwrap();
        // Dropping the stale frame does not release the new use of the buffer.
        drop(stale);
        assert_eq!(pool.num_in_use(), 1);
        assert!(current.is_valid());
        assert_eq!(source.hold_count(), 2);
    }

    #[test]
    fn frame_dropped_under_buffer_lock() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 1, 1);
        let frames = frame_pool();
        let source = decoded(frames.buffer(0).unwrap(), None);
        let frame = pool.process(&source, FieldType::Top, false).unwrap();

        {
            let _guard = pool.lock.lock();
            assert!(frame.is_valid());
            drop(frame);
        }

        assert_eq!(pool.num_in_use(), 0);
        assert_eq!(source.hold_count(), 1);
        pool.reset();
        assert!(pool.close().is_ok());
    }

    #[test]
    fn invalid_source_is_rejected() {
        let ipu = DummyIpu::default();
        let mut pool = pool(&ipu, 1, 1);
        let frames = frame_pool();
        let buffer = frames.buffer(0).unwrap();

        let hold = buffer.hold(HoldKind::Display);
        assert!(matches!(
            pool.process(&hold, FieldType::Top, false),
            Err(DeinterlaceError::InvalidSource)
        ));
    }
}
