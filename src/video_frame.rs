// Copyright 2025 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Frame buffers the VPU decodes into.

use crate::device::vpu::MemBlock;
use crate::device::vpu::MemKind;
use crate::device::vpu::MemRequest;
use crate::utils::align_up;
use crate::utils::align_up_u32;
use crate::Resolution;

pub mod frame_pool;

pub const Y_PLANE: usize = 0;
pub const UV_PLANE: usize = 1;
pub const MV_PLANE: usize = 2;

/// Alignment of the frame dimensions required by the VPU.
pub const FRAME_ALIGN: u32 = 16;

/// Hardware descriptor of one frame buffer, as registered with the VPU.
///
/// Chroma is interleaved (NV12), so the Cr plane addresses are always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameBuffer {
    pub stride_y: u32,
    pub stride_c: u32,

    pub phys_y: usize,
    pub phys_cb: usize,
    pub phys_cr: usize,
    pub phys_mv_col: usize,

    pub virt_y: usize,
    pub virt_cb: usize,
    pub virt_cr: usize,
    pub virt_mv_col: usize,
}

/// Sizes and offsets of the planes of a frame buffer for a given stream geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    /// Coded resolution, i.e. the picture size rounded up to the VPU requirements.
    pub coded_resolution: Resolution,
    /// Base address alignment mandated by the VPU.
    pub alignment: usize,
    plane_sizes: [usize; 3],
}

impl FrameLayout {
    /// Computes the layout of an NV12 frame of `width`x`height` with a co-located motion vector
    /// plane. Interlaced streams need their height aligned to a pair of macroblocks.
    pub fn new(width: u32, height: u32, interlaced: bool, alignment: usize) -> Self {
        let height_align = if interlaced {
            FRAME_ALIGN * 2
        } else {
            FRAME_ALIGN
        };
        let coded_resolution = Resolution {
            width: align_up_u32(width, FRAME_ALIGN),
            height: align_up_u32(height, height_align),
        };

        let luma_size = coded_resolution.get_area();
        let chroma_size = luma_size / 2;
        let mv_size = chroma_size / 2;

        Self {
            coded_resolution,
            alignment,
            plane_sizes: [luma_size, chroma_size, mv_size],
        }
    }

    pub fn plane_sizes(&self) -> [usize; 3] {
        self.plane_sizes
    }

    pub fn luma_size(&self) -> usize {
        self.plane_sizes[Y_PLANE]
    }

    pub fn chroma_size(&self) -> usize {
        self.plane_sizes[UV_PLANE]
    }

    pub fn mv_size(&self) -> usize {
        self.plane_sizes[MV_PLANE]
    }

    /// Offsets of each plane from the aligned base address.
    pub fn plane_offsets(&self) -> [usize; 3] {
        let chroma_offset = align_up(self.luma_size(), self.alignment);
        let mv_offset = chroma_offset + align_up(self.chroma_size(), self.alignment);

        [0, chroma_offset, mv_offset]
    }

    /// Number of bytes needed for one frame buffer starting at an aligned address, including the
    /// padding between planes.
    pub fn frame_size(&self) -> usize {
        let [_, _, mv_offset] = self.plane_offsets();

        mv_offset + self.mv_size()
    }

    /// Memory request for one frame buffer.
    pub fn mem_request(&self) -> MemRequest {
        MemRequest {
            kind: MemKind::Physical,
            size: self.frame_size(),
            alignment: self.alignment,
        }
    }

    /// Slices the aligned block `mem` into the planes of a frame buffer.
    pub fn frame_buffer(&self, mem: &MemBlock) -> FrameBuffer {
        let phys_base = mem.phys_addr;
        let virt_base = mem.virt_addr;
        let [_, chroma_offset, mv_offset] = self.plane_offsets();

        FrameBuffer {
            stride_y: self.coded_resolution.width,
            // Interleaved chroma has the same stride as luma.
            stride_c: self.coded_resolution.width,
            phys_y: phys_base,
            phys_cb: phys_base + chroma_offset,
            phys_cr: 0,
            phys_mv_col: phys_base + mv_offset,
            virt_y: virt_base,
            virt_cb: virt_base + chroma_offset,
            virt_cr: 0,
            virt_mv_col: virt_base + mv_offset,
        }
    }
}
