// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Types shared by the decoder and its users.

pub mod stateful;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use bitflags::bitflags;
use thiserror::Error;

use crate::device::vpu::FieldType;
use crate::device::vpu::VpuError;
use crate::image_processing::DeinterlacedFrame;
use crate::memory::MemoryError;
use crate::video_frame::frame_pool::BufferHold;
use crate::EncodedFormat;
use crate::Fourcc;

/// Number of pictures the decoder may keep referenced. Upstream reorder buffers should not be
/// deeper than this.
pub const ALLOWED_REFERENCES: usize = 3;

/// Environment variable disabling the use of presentation timestamps.
pub const NO_PTS_ENV: &str = "IMX_NOPTS";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("failed to open decoding session: {0:#}")]
    SessionOpen(anyhow::Error),
    #[error("accelerator error: {0}")]
    Accelerator(#[from] VpuError),
    #[error("unsupported stream: {0}")]
    UnsupportedCodec(String),
    #[error("failed to allocate frame buffers: {0}")]
    FramePool(#[from] MemoryError),
    #[error("no picture is ready")]
    NoPicture,
    #[error("frame buffer at 0x{0:x} is not part of the pool")]
    UnknownFrameBuffer(usize),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Exclusive access to the registration state of the frame buffers.
///
/// The decoder takes it whenever it gives buffers back to the VPU outside of the regular reclaim
/// path or frees them. Renderers take it while they read from a buffer, after checking that the
/// buffer is still valid. Pictures may be dropped while it is held.
#[derive(Clone, Default, Debug)]
pub struct BufferLock(Arc<Mutex<()>>);

impl BufferLock {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.0.lock().unwrap()
    }
}

/// How interlaced streams are deinterlaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeinterlaceMode {
    /// Frames are handed out as decoded.
    Disabled,
    /// Each frame is deinterlaced on its own.
    HighMotion,
    /// Each frame is deinterlaced using its predecessor for motion detection.
    #[default]
    MotionAdaptive,
}

#[derive(Debug, Clone)]
pub struct DecoderOptions {
    /// Whether pictures carry the timestamps of their input. Some streams have broken timestamps
    /// that are better ignored.
    pub use_pts: bool,
    pub deinterlace: DeinterlaceMode,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            use_pts: true,
            deinterlace: Default::default(),
        }
    }
}

impl DecoderOptions {
    /// Default options, with timestamps disabled if `IMX_NOPTS` is set.
    pub fn from_env() -> Self {
        Self {
            use_pts: std::env::var_os(NO_PTS_ENV).is_none(),
            ..Default::default()
        }
    }
}

/// Description of the stream to decode, as provided by the demuxer.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub codec: EncodedFormat,
    /// Codec profile, as signaled by the container.
    pub profile: Option<u32>,
    /// FourCC of the stream, only meaningful for MPEG-4 part 2.
    pub codec_tag: Fourcc,
    /// Out-of-band codec configuration.
    pub extradata: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Software decoding has been requested for this stream.
    pub software: bool,
}

impl StreamInfo {
    pub fn new(codec: EncodedFormat) -> Self {
        Self {
            codec,
            profile: None,
            codec_tag: Default::default(),
            extradata: Default::default(),
            width: 0,
            height: 0,
            software: false,
        }
    }
}

bitflags! {
    /// Result of a call to [`stateful::StatefulDecoder::decode`].
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    pub struct DecodeStatus: u32 {
        /// A picture can be retrieved with `get_picture`.
        const PICTURE = 0x1;
        /// The input has been accepted, more is needed to produce a picture.
        const BUFFER = 0x2;
        /// The decoder has been flushed and all previous pictures discarded.
        const FLUSHED = 0x4;
    }
}

/// Memory a picture lives in.
#[derive(Debug)]
pub enum PictureBuffer {
    /// A VPU frame buffer.
    Decoded(BufferHold),
    /// An IPU buffer holding the deinterlaced version of a VPU frame.
    Deinterlaced(DeinterlacedFrame),
}

/// A decoded picture, handed to the renderer.
///
/// The picture keeps its memory alive until it is dropped or passed to
/// [`stateful::StatefulDecoder::clear_picture`].
#[derive(Debug)]
pub struct Picture {
    pub width: u32,
    pub height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// The picture has been decoded but should not be displayed.
    pub dropped: bool,
    pub field_type: FieldType,
    pub buffer: PictureBuffer,
}

impl Picture {
    /// Physical address of the luma plane of the picture.
    pub fn phys_addr(&self) -> usize {
        match &self.buffer {
            PictureBuffer::Decoded(hold) => hold.phys_addr(),
            PictureBuffer::Deinterlaced(frame) => frame.phys_addr(),
        }
    }

    /// Address of the luma plane of the picture in the process.
    pub fn virt_addr(&self) -> usize {
        match &self.buffer {
            PictureBuffer::Decoded(hold) => hold.virt_addr(),
            PictureBuffer::Deinterlaced(frame) => frame.virt_addr(),
        }
    }

    /// Whether the memory of the picture can still be read. Only meaningful while holding the
    /// decoder's [`BufferLock`].
    pub fn is_valid(&self) -> bool {
        match &self.buffer {
            PictureBuffer::Decoded(hold) => hold.is_valid(),
            PictureBuffer::Deinterlaced(frame) => frame.is_valid(),
        }
    }

    pub fn is_deinterlaced(&self) -> bool {
        matches!(self.buffer, PictureBuffer::Deinterlaced(_))
    }
}
