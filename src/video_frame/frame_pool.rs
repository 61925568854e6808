// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Pool of the frame buffers registered with the VPU.
//!
//! Each slot of the pool is wrapped into a [`DecodedBuffer`] that lives as long as the pool. Users
//! of a decoded frame keep it alive through [`BufferHold`]s. Once the last hold on a buffer is
//! dropped, the buffer becomes pending reclaim and is given back to the VPU the next time
//! [`FramePool::reclaim`] runs.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use crate::device::vpu::InitialInfo;
use crate::device::vpu::OutputFrame;
use crate::device::vpu::VpuDevice;
use crate::device::vpu::VpuHandle;
use crate::memory::BatchId;
use crate::memory::MemoryError;
use crate::memory::MemoryLedger;
use crate::video_frame::FrameBuffer;
use crate::video_frame::FrameLayout;

/// Number of frame buffers allocated on top of the minimum requested by the VPU. The VPU may keep
/// more buffers than its stated minimum in flight and stalls without these.
pub const EXTRA_FRAME_BUFFERS: usize = 6;

/// Kind of hold kept on a [`DecodedBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldKind {
    /// The frame is going to be, or is being, displayed or read by the hardware.
    Display,
    /// The frame is only kept as the temporal predecessor of another frame.
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Owned by the VPU, no frame bound.
    Reclaimed,
    /// A decoded frame is bound and handed out.
    Bound,
    /// All holds have been dropped, the buffer can be given back to the VPU.
    PendingReclaim,
}

struct SlotData {
    state: BufferState,
    frame: Option<OutputFrame>,
    pts: Option<u64>,
    predecessor: Option<BufferHold>,
}

/// One slot of the frame pool.
pub struct DecodedBuffer {
    index: usize,
    frame_buffer: FrameBuffer,
    holds: AtomicUsize,
    display_holds: AtomicUsize,
    slot: Mutex<SlotData>,
}

impl DecodedBuffer {
    fn new(index: usize, frame_buffer: FrameBuffer) -> Self {
        Self {
            index,
            frame_buffer,
            holds: AtomicUsize::new(0),
            display_holds: AtomicUsize::new(0),
            slot: Mutex::new(SlotData {
                state: BufferState::Reclaimed,
                frame: None,
                pts: None,
                predecessor: None,
            }),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame_buffer
    }

    /// Physical address of the luma plane, which identifies the buffer to the VPU.
    pub fn phys_addr(&self) -> usize {
        self.frame_buffer.phys_y
    }

    pub fn virt_addr(&self) -> usize {
        self.frame_buffer.virt_y
    }

    pub fn state(&self) -> BufferState {
        self.slot.lock().unwrap().state
    }

    /// Whether a decoded frame is bound to this buffer.
    ///
    /// Renderers must check this while holding the decoder's buffer lock before reading from the
    /// buffer, since the memory may be given back to the VPU by a reset or freed by the closing of
    /// the decoder.
    pub fn is_valid(&self) -> bool {
        self.state() != BufferState::Reclaimed
    }

    /// Information about the frame bound to this buffer.
    pub fn frame(&self) -> Option<OutputFrame> {
        self.slot.lock().unwrap().frame
    }

    pub fn pts(&self) -> Option<u64> {
        self.slot.lock().unwrap().pts
    }

    pub(crate) fn set_pts(&self, pts: Option<u64>) {
        self.slot.lock().unwrap().pts = pts;
    }

    pub fn has_predecessor(&self) -> bool {
        self.slot.lock().unwrap().predecessor.is_some()
    }

    /// Physical address of the temporal predecessor of the bound frame, if it is still valid.
    pub fn predecessor_phys_addr(&self) -> Option<usize> {
        let slot = self.slot.lock().unwrap();
        slot.predecessor
            .as_ref()
            .filter(|p| p.is_valid())
            .map(|p| p.phys_addr())
    }

    /// Number of holds of any kind currently kept on the buffer.
    pub fn hold_count(&self) -> usize {
        self.holds.load(Ordering::Acquire)
    }

    pub fn display_hold_count(&self) -> usize {
        self.display_holds.load(Ordering::Acquire)
    }

    /// Creates a new hold of `kind` on this buffer.
    pub fn hold(self: &Arc<Self>, kind: HoldKind) -> BufferHold {
        let count = self.holds.fetch_add(1, Ordering::AcqRel) + 1;
        if kind == HoldKind::Display {
            self.display_holds.fetch_add(1, Ordering::AcqRel);
        }
        log::trace!("R+ {:02} ref: {} ({:?})", self.index, count, kind);

        BufferHold {
            buffer: Arc::clone(self),
            kind,
        }
    }

    fn release(&self, kind: HoldKind) {
        let mut released = Vec::with_capacity(2);

        // The predecessor is only needed while the frame can still be deinterlaced.
        if kind == HoldKind::Display && self.display_holds.fetch_sub(1, Ordering::AcqRel) == 1 {
            released.extend(self.slot.lock().unwrap().predecessor.take());
        }

        let count = self.holds.fetch_sub(1, Ordering::AcqRel) - 1;
        log::trace!("R- {:02} ref: {} ({:?})", self.index, count, kind);

        if count == 0 {
            let mut slot = self.slot.lock().unwrap();
            if self.holds.load(Ordering::Acquire) == 0 {
                released.extend(slot.predecessor.take());
                if slot.state == BufferState::Bound {
                    slot.state = BufferState::PendingReclaim;
                    log::trace!("R  {:02}", self.index);
                }
            }
        }

        // Dropping a predecessor may release its own slot, so our slot must not be locked here.
        drop(released);
    }

    /// Binds a newly output frame to this buffer.
    pub(crate) fn bind(&self, frame: OutputFrame, predecessor: Option<BufferHold>) {
        // A buffer output twice in a row is not its own predecessor.
        let (predecessor, itself) = match predecessor {
            Some(p) if std::ptr::eq(p.buffer().as_ref(), self) => (None, Some(p)),
            p => (p, None),
        };

        let previous = {
            let mut slot = self.slot.lock().unwrap();
            if slot.state != BufferState::Reclaimed {
                log::warn!(
                    "frame buffer {} bound again while in state {:?}",
                    self.index,
                    slot.state
                );
            }
            slot.state = BufferState::Bound;
            slot.frame = Some(frame);
            std::mem::replace(&mut slot.predecessor, predecessor)
        };

        drop(previous);
        drop(itself);
    }

    /// Moves the buffer from `PendingReclaim` to `Reclaimed`. Returns whether the buffer was
    /// pending reclaim.
    fn take_pending(&self) -> bool {
        let predecessor = {
            let mut slot = self.slot.lock().unwrap();
            if slot.state != BufferState::PendingReclaim {
                return false;
            }

            Self::unbind(&mut slot)
        };
        drop(predecessor);

        true
    }

    /// Unbinds the buffer whatever its state. Returns whether a frame was bound.
    fn invalidate(&self) -> bool {
        let predecessor;
        let was_valid;
        {
            let mut slot = self.slot.lock().unwrap();
            was_valid = slot.state != BufferState::Reclaimed;
            predecessor = Self::unbind(&mut slot);
        }
        drop(predecessor);

        was_valid
    }

    fn unbind(slot: &mut SlotData) -> Option<BufferHold> {
        slot.state = BufferState::Reclaimed;
        slot.frame = None;
        slot.pts = None;
        slot.predecessor.take()
    }
}

impl std::fmt::Debug for DecodedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedBuffer")
            .field("index", &self.index)
            .field("phys_addr", &format_args!("0x{:x}", self.phys_addr()))
            .field("holds", &self.hold_count())
            .field("display_holds", &self.display_hold_count())
            .finish()
    }
}

/// Keeps a [`DecodedBuffer`] from being given back to the VPU. Dropping the hold releases it.
#[derive(Debug)]
pub struct BufferHold {
    buffer: Arc<DecodedBuffer>,
    kind: HoldKind,
}

impl BufferHold {
    pub fn kind(&self) -> HoldKind {
        self.kind
    }

    pub fn buffer(&self) -> &Arc<DecodedBuffer> {
        &self.buffer
    }

    /// Creates another hold of `kind` on the same buffer.
    pub fn clone_as(&self, kind: HoldKind) -> BufferHold {
        self.buffer.hold(kind)
    }
}

impl Clone for BufferHold {
    fn clone(&self) -> Self {
        self.clone_as(self.kind)
    }
}

impl std::ops::Deref for BufferHold {
    type Target = DecodedBuffer;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl Drop for BufferHold {
    fn drop(&mut self) {
        self.buffer.release(self.kind);
    }
}

/// The set of frame buffers registered with a VPU session.
pub struct FramePool {
    layout: FrameLayout,
    batch: BatchId,
    buffers: Vec<Arc<DecodedBuffer>>,
}

impl FramePool {
    /// Allocates `info.min_frame_buffer_count + EXTRA_FRAME_BUFFERS` frame buffers matching the
    /// geometry of `info`.
    pub fn allocate<D: VpuDevice + ?Sized>(
        ledger: &mut MemoryLedger,
        device: &mut D,
        info: &InitialInfo,
    ) -> Result<Self, MemoryError> {
        let layout = FrameLayout::new(
            info.pic_width,
            info.pic_height,
            info.interlaced,
            info.address_alignment,
        );
        let count = info.min_frame_buffer_count + EXTRA_FRAME_BUFFERS;
        let [luma, chroma, mv] = layout.plane_sizes();

        log::debug!(
            "allocating {} frame buffers of {}x{} (luma {} chroma {} mv {} align {})",
            count,
            layout.coded_resolution.width,
            layout.coded_resolution.height,
            luma,
            chroma,
            mv,
            layout.alignment
        );

        let requests = vec![layout.mem_request(); count];
        let (batch, blocks) = ledger.allocate(device, &requests)?;

        let buffers = blocks
            .iter()
            .enumerate()
            .map(|(index, block)| Arc::new(DecodedBuffer::new(index, layout.frame_buffer(block))))
            .collect();

        Ok(Self {
            layout,
            batch,
            buffers,
        })
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Descriptors of all the frame buffers, in slot order, for registration with the VPU.
    pub fn frame_buffers(&self) -> Vec<FrameBuffer> {
        self.buffers.iter().map(|b| b.frame_buffer).collect()
    }

    pub fn buffer(&self, index: usize) -> Option<&Arc<DecodedBuffer>> {
        self.buffers.get(index)
    }

    pub fn buffers(&self) -> &[Arc<DecodedBuffer>] {
        &self.buffers
    }

    /// Returns the slot of the buffer whose luma plane is at `luma_addr`.
    pub fn find(&self, luma_addr: usize) -> Option<usize> {
        self.buffers.iter().position(|b| b.phys_addr() == luma_addr)
    }

    /// Gives every buffer pending reclaim back to the VPU. Returns the number of reclaimed
    /// buffers.
    pub fn reclaim<D: VpuDevice + ?Sized>(&self, device: &mut D, handle: VpuHandle) -> usize {
        let mut reclaimed = 0;

        for buffer in &self.buffers {
            if !buffer.take_pending() {
                continue;
            }

            if let Err(e) = device.frame_displayed(handle, &buffer.frame_buffer) {
                log::error!(
                    "failed to give frame buffer {} back to the VPU: {}",
                    buffer.index,
                    e
                );
            }
            log::trace!("-  {:02}", buffer.index);
            reclaimed += 1;
        }

        reclaimed
    }

    /// Unbinds every buffer, giving back to the VPU those that still had a frame bound if
    /// `handle` is set. Holds kept on the buffers stay alive but the buffers become invalid.
    ///
    /// Must be called with the buffer lock held.
    pub fn invalidate_all<D: VpuDevice + ?Sized>(
        &self,
        device: &mut D,
        handle: Option<VpuHandle>,
    ) {
        for buffer in &self.buffers {
            if !buffer.invalidate() {
                continue;
            }

            if let Some(handle) = handle {
                if let Err(e) = device.frame_displayed(handle, &buffer.frame_buffer) {
                    log::error!(
                        "failed to give frame buffer {} back to the VPU: {}",
                        buffer.index,
                        e
                    );
                }
            }
        }
    }

    /// Frees the memory of the pool. The buffers must have been invalidated.
    pub fn release<D: VpuDevice + ?Sized>(
        self,
        ledger: &mut MemoryLedger,
        device: &mut D,
    ) -> Result<(), MemoryError> {
        ledger.release_batch(device, self.batch)
    }
}
