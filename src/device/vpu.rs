// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability interface of the VPU decoder driver.
//!
//! This mirrors the call surface of the vendor decoding library: firmware load/unload, memory
//! query/allocation, session open/close/flush, frame buffer registration, bitstream submission
//! and the various status queries that follow a submission. Every call either succeeds with its
//! payload or fails with a [`VpuError`].

use bitflags::bitflags;
use thiserror::Error;

use crate::video_frame::FrameBuffer;
use crate::Rect;

/// Error codes returned by the VPU library.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VpuError {
    #[error("generic failure")]
    Failure,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("invalid handle")]
    InvalidHandle,
    #[error("invalid frame buffer")]
    InvalidFrameBuffer,
    #[error("insufficient frame buffers")]
    InsufficientFrameBuffers,
    #[error("invalid stride")]
    InvalidStride,
    #[error("wrong call sequence")]
    WrongCallSequence,
    #[error("operation timed out")]
    Timeout,
}

pub type VpuResult<T> = Result<T, VpuError>;

/// Handle to an open decoding session. Only valid until the session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpuHandle(pub u32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VpuVersion {
    pub lib_major: u32,
    pub lib_minor: u32,
    pub lib_release: u32,
}

/// Kind of memory the VPU asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemKind {
    /// Ordinary process memory.
    Virtual,
    /// Physically contiguous memory usable for DMA.
    Physical,
}

/// One memory block the VPU requires before a session can be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemRequest {
    pub kind: MemKind,
    pub size: usize,
    pub alignment: usize,
}

/// A block of physically contiguous memory handed out by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMemory {
    pub phys_addr: usize,
    pub virt_addr: usize,
    pub cpu_addr: usize,
    pub size: usize,
}

/// A block satisfying a [`MemRequest`], with addresses already aligned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlock {
    pub request: MemRequest,
    pub virt_addr: usize,
    /// Zero for `MemKind::Virtual` blocks.
    pub phys_addr: usize,
}

/// Codec formats understood by the VPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFormat {
    Mpeg4,
    Divx3,
    Divx4,
    Divx56,
    Xvid,
    H263,
    Avc,
    AvcMvc,
    Vc1,
    Vc1Ap,
    Mpeg2,
    Rv,
    Avs,
    Vp8,
    Mjpg,
}

/// Parameters of a decoding session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenParams {
    pub codec: CodecFormat,
    pub reorder_enable: bool,
    pub chroma_interleave: bool,
    pub map_type: u32,
    pub tiled_to_linear: bool,
    pub file_mode: bool,
}

impl OpenParams {
    pub fn new(codec: CodecFormat) -> Self {
        Self {
            codec,
            reorder_enable: true,
            chroma_interleave: true,
            map_type: 0,
            tiled_to_linear: false,
            file_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipMode {
    None,
    SkipB,
    SkipPB,
    SkipAll,
}

/// One unit of input submitted to the decoder. An empty `data` only pushes previously
/// submitted input further.
#[derive(Debug, Clone, Copy)]
pub struct InputUnit<'a> {
    pub data: &'a [u8],
    /// Out-of-band configuration required by some codecs.
    pub codec_data: &'a [u8],
}

bitflags! {
    /// Events reported by a call to [`VpuDevice::decode`]. Several may be set at once.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    #[repr(transparent)]
    pub struct DecodeEvents: u32 {
        const INPUT_USED = 0x1;
        const INPUT_NOT_USED = 0x2;
        const OUTPUT_EOS = 0x4;
        /// A frame is ready for display.
        const OUTPUT_DIS = 0x8;
        const OUTPUT_NODIS = 0x10;
        const OUTPUT_REPEAT = 0x20;
        const OUTPUT_DROPPED = 0x40;
        /// A frame was output for bookkeeping only and must not be displayed.
        const OUTPUT_MOSAIC_DIS = 0x80;
        const NO_ENOUGH_BUF = 0x100;
        const NO_ENOUGH_INBUF = 0x200;
        /// Stream headers have been parsed; initial info can be queried.
        const INIT_OK = 0x400;
        const RESOLUTION_CHANGED = 0x800;
        const SKIP = 0x1000;
        const ONE_FRM_CONSUMED = 0x2000;
        const FLUSH = 0x4000;
    }
}

/// Stream information available once `DecodeEvents::INIT_OK` has been reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialInfo {
    pub pic_width: u32,
    pub pic_height: u32,
    pub interlaced: bool,
    pub min_frame_buffer_count: usize,
    pub address_alignment: usize,
    pub crop: Rect,
    /// Width/height ratio in 16.16 fixed point.
    pub q16_ratio: u32,
}

/// Field structure of a decoded frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FieldType {
    #[default]
    None,
    Top,
    Bottom,
    TopBottom,
    BottomTop,
    Unknown,
}

/// Extended information about an output frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameExtInfo {
    pub frame_width: u32,
    pub frame_height: u32,
    pub crop: Rect,
    /// Width/height ratio in 16.16 fixed point.
    pub q16_ratio: u32,
}

/// A frame returned by [`VpuDevice::output_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFrame {
    /// Physical address of the luma plane of the frame buffer holding the frame.
    pub display_luma_addr: usize,
    pub field_type: FieldType,
    pub ext: FrameExtInfo,
}

/// Report of how much input the last consumed frame used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumedFrameInfo {
    /// Physical luma address of the frame buffer the consumed data was decoded into, if any.
    pub frame_luma_addr: Option<usize>,
    pub frame_length: usize,
    pub stuff_length: usize,
}

/// The decoder driver.
pub trait VpuDevice {
    /// Loads the firmware.
    fn load(&mut self) -> VpuResult<()>;
    /// Unloads the firmware. Only valid once every session is closed.
    fn unload(&mut self) -> VpuResult<()>;
    fn version(&mut self) -> VpuResult<VpuVersion>;

    /// Returns the memory blocks the library needs to open a session.
    fn query_mem(&mut self) -> VpuResult<Vec<MemRequest>>;
    fn get_mem(&mut self, size: usize) -> VpuResult<DmaMemory>;
    fn free_mem(&mut self, mem: &DmaMemory) -> VpuResult<()>;

    fn open(&mut self, params: &OpenParams, mem: &[MemBlock]) -> VpuResult<VpuHandle>;
    fn close(&mut self, handle: VpuHandle) -> VpuResult<()>;
    fn flush_all(&mut self, handle: VpuHandle) -> VpuResult<()>;
    fn set_skip_mode(&mut self, handle: VpuHandle, mode: SkipMode) -> VpuResult<()>;
    /// Whether the session reports `DecodeEvents::ONE_FRM_CONSUMED` with consumed lengths.
    fn frame_size_reported(&mut self, handle: VpuHandle) -> VpuResult<bool>;

    fn register_frame_buffers(
        &mut self,
        handle: VpuHandle,
        buffers: &[FrameBuffer],
    ) -> VpuResult<()>;
    fn decode(&mut self, handle: VpuHandle, input: &InputUnit) -> VpuResult<DecodeEvents>;
    fn initial_info(&mut self, handle: VpuHandle) -> VpuResult<InitialInfo>;
    fn output_frame(&mut self, handle: VpuHandle) -> VpuResult<OutputFrame>;
    fn consumed_frame_info(&mut self, handle: VpuHandle) -> VpuResult<ConsumedFrameInfo>;
    /// Gives the frame buffer back to the decoder.
    fn frame_displayed(&mut self, handle: VpuHandle, buffer: &FrameBuffer) -> VpuResult<()>;
}
