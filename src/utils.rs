// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility functions used by several parts of this crate.
//!
//! This module is for anything that doesn't fit into the other top-level modules. Try not to add
//! new code here unless it really doesn't belong anywhere else.

/// Rounds `value` up to the next multiple of `alignment`.
///
/// An `alignment` of 0 or 1 leaves `value` untouched, which matches how the VPU reports "no
/// particular alignment requirement".
pub fn align_up(value: usize, alignment: usize) -> usize {
    if alignment <= 1 {
        return value;
    }

    value.div_ceil(alignment) * alignment
}

/// Same as `align_up`, for the `u32` dimensions reported by the hardware.
pub fn align_up_u32(value: u32, alignment: u32) -> u32 {
    align_up(value as usize, alignment as usize) as u32
}
