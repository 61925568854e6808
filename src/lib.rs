// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Buffer management for the i.MX6 VPU video decoder.
//!
//! The VPU decodes into a fixed set of frame buffers that are registered with it once the stream
//! geometry is known. Decoded frames are handed to a renderer running on another thread, which
//! may keep them for a while, and interlaced frames may go through the IPU for deinterlacing
//! first. This crate keeps track of who holds which buffer and returns them to the hardware once
//! nobody needs them anymore.
//!
//! The entry point is [`decoder::stateful::StatefulDecoder`]. The hardware is reached through
//! the [`device::vpu::VpuDevice`] and [`device::ipu::IpuDevice`] traits.

pub mod bitstream_utils;
pub mod codec;
pub mod decoder;
pub mod device;
pub mod image_processing;
pub mod memory;
pub mod utils;
pub mod video_frame;

use std::fmt;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn get_area(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from(value: (u32, u32)) -> Self {
        Self {
            width: value.0,
            height: value.1,
        }
    }
}

/// A rectangle within a frame, as reported by the VPU for cropping.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// A FourCC code, as used for MPEG-4 codec tags and pixel formats.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Fourcc(pub u32);

impl Fourcc {
    pub const NV12: Fourcc = Fourcc::from_bytes(b"NV12");

    pub const fn from_bytes(code: &[u8; 4]) -> Self {
        Fourcc(
            code[0] as u32
                | (code[1] as u32) << 8
                | (code[2] as u32) << 16
                | (code[3] as u32) << 24,
        )
    }

    /// Whether all four characters are printable ASCII alphanumerics.
    pub fn is_alphanumeric(&self) -> bool {
        self.0.to_le_bytes().iter().all(|c| c.is_ascii_alphanumeric())
    }
}

impl From<u32> for Fourcc {
    fn from(fourcc: u32) -> Self {
        Self(fourcc)
    }
}

impl From<&[u8; 4]> for Fourcc {
    fn from(n: &[u8; 4]) -> Self {
        Self::from_bytes(n)
    }
}

impl fmt::Display for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0.to_le_bytes();
        f.write_fmt(format_args!(
            "{}{}{}{}",
            c[0] as char, c[1] as char, c[2] as char, c[3] as char
        ))
    }
}

impl fmt::Debug for Fourcc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("0x{:08x} ({})", self.0, self))
    }
}

/// Compressed formats a stream can be described with by the demuxer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EncodedFormat {
    Mpeg1,
    Mpeg2,
    Mpeg2Xvmc,
    H263,
    H264,
    Vc1,
    Cavs,
    Avs,
    Rv10,
    Rv20,
    Rv30,
    Rv40,
    Kmvc,
    Vp8,
    Mpeg4,
    Mjpeg,
    Hevc,
    Vp9,
}
