// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Hardware boundary.
//!
//! The VPU and the IPU are only reached through the capability traits defined in the submodules,
//! so the buffer bookkeeping above them can run against the simulated devices of the `dummy`
//! module in tests.

#[cfg(test)]
pub(crate) mod dummy;
pub mod ipu;
pub mod vpu;
