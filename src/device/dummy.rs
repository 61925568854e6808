// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! This file contains dummy devices whose only purpose is to let the decoder
//! run so we can test it in isolation.
//!
//! Both devices share their state with the test through an `Arc<Mutex<_>>`, so the test can script
//! the next answers of the device and inspect the calls it received after having handed the device
//! over to the decoder.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::device::ipu::DeinterlaceTask;
use crate::device::ipu::IpuDevice;
use crate::device::ipu::IpuError;
use crate::device::ipu::IpuResult;
use crate::device::vpu::ConsumedFrameInfo;
use crate::device::vpu::DecodeEvents;
use crate::device::vpu::DmaMemory;
use crate::device::vpu::InitialInfo;
use crate::device::vpu::InputUnit;
use crate::device::vpu::MemBlock;
use crate::device::vpu::MemKind;
use crate::device::vpu::MemRequest;
use crate::device::vpu::OpenParams;
use crate::device::vpu::OutputFrame;
use crate::device::vpu::SkipMode;
use crate::device::vpu::VpuDevice;
use crate::device::vpu::VpuError;
use crate::device::vpu::VpuHandle;
use crate::device::vpu::VpuResult;
use crate::device::vpu::VpuVersion;
use crate::utils::align_up;
use crate::video_frame::FrameBuffer;

const PHYS_BASE: usize = 0x1000_0000;
const VIRT_OFFSET: usize = 0x6000_0000;
// Blocks handed out are deliberately misaligned so alignment handling gets exercised.
const MISALIGNMENT: usize = 0x10;

pub(crate) struct VpuState {
    /// Answers to the next calls to `decode`. Once empty, `decode` reports that it needs more
    /// input.
    pub events: VecDeque<VpuResult<DecodeEvents>>,
    pub initial_info: InitialInfo,
    pub output_frames: VecDeque<OutputFrame>,
    pub consumed: VecDeque<ConsumedFrameInfo>,
    pub frame_size_reported: bool,
    pub mem_requests: Vec<MemRequest>,

    pub fail_load: bool,
    pub fail_open: bool,
    pub fail_register: bool,
    pub fail_initial_info: bool,
    /// Number of calls to `get_mem` that succeed before the next ones fail.
    pub fail_get_mem_after: Option<usize>,
    /// Number of upcoming calls to `free_mem` that fail.
    pub fail_free_mem: usize,

    /// Names of the calls received, in order.
    pub calls: Vec<&'static str>,
    pub loaded: bool,
    pub handle: Option<VpuHandle>,
    pub open_params: Option<OpenParams>,
    pub skip_mode: Option<SkipMode>,
    /// Sizes passed to `get_mem`.
    pub allocated_sizes: Vec<usize>,
    /// Blocks handed out and not freed yet.
    pub live: Vec<DmaMemory>,
    /// Physical addresses of the freed blocks.
    pub freed: Vec<usize>,
    pub registered: Vec<FrameBuffer>,
    /// Data and codec data of every decode call.
    pub decoded: Vec<(Vec<u8>, Vec<u8>)>,
    /// Luma addresses of the buffers given back through `frame_displayed`.
    pub displayed: Vec<usize>,

    next_phys: usize,
    next_handle: u32,
}

impl Default for VpuState {
    fn default() -> Self {
        Self {
            events: Default::default(),
            initial_info: Default::default(),
            output_frames: Default::default(),
            consumed: Default::default(),
            frame_size_reported: true,
            mem_requests: vec![
                MemRequest {
                    kind: MemKind::Virtual,
                    size: 0x1000,
                    alignment: 8,
                },
                MemRequest {
                    kind: MemKind::Physical,
                    size: 0x10000,
                    alignment: 4096,
                },
            ],
            fail_load: false,
            fail_open: false,
            fail_register: false,
            fail_initial_info: false,
            fail_get_mem_after: None,
            fail_free_mem: 0,
            calls: Default::default(),
            loaded: false,
            handle: None,
            open_params: None,
            skip_mode: None,
            allocated_sizes: Default::default(),
            live: Default::default(),
            freed: Default::default(),
            registered: Default::default(),
            decoded: Default::default(),
            displayed: Default::default(),
            next_phys: PHYS_BASE,
            next_handle: 1,
        }
    }
}

impl VpuState {
    pub fn live_dma_blocks(&self) -> usize {
        self.live.len()
    }

    /// Number of times `name` has been called.
    pub fn count(&self, name: &str) -> usize {
        self.calls.iter().filter(|c| **c == name).count()
    }

    fn check_handle(&self, handle: VpuHandle) -> VpuResult<()> {
        match self.handle {
            Some(h) if h == handle => Ok(()),
            _ => Err(VpuError::InvalidHandle),
        }
    }
}

/// Simulated VPU.
#[derive(Clone, Default)]
pub(crate) struct DummyVpu(Arc<Mutex<VpuState>>);

impl DummyVpu {
    pub fn state(&self) -> MutexGuard<'_, VpuState> {
        self.0.lock().unwrap()
    }
}

impl VpuDevice for DummyVpu {
    fn load(&mut self) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("load");
        if state.fail_load {
            return Err(VpuError::Failure);
        }
        state.loaded = true;

        Ok(())
    }

    fn unload(&mut self) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("unload");
        if !state.loaded || state.handle.is_some() {
            return Err(VpuError::WrongCallSequence);
        }
        state.loaded = false;

        Ok(())
    }

    fn version(&mut self) -> VpuResult<VpuVersion> {
        self.state().calls.push("version");

        Ok(VpuVersion {
            lib_major: 5,
            lib_minor: 4,
            lib_release: 16,
        })
    }

    fn query_mem(&mut self) -> VpuResult<Vec<MemRequest>> {
        let mut state = self.state();
        state.calls.push("query_mem");

        Ok(state.mem_requests.clone())
    }

    fn get_mem(&mut self, size: usize) -> VpuResult<DmaMemory> {
        let mut state = self.state();
        state.calls.push("get_mem");

        if let Some(remaining) = state.fail_get_mem_after {
            if remaining == 0 {
                return Err(VpuError::Failure);
            }
            state.fail_get_mem_after = Some(remaining - 1);
        }

        let phys_addr = state.next_phys + MISALIGNMENT;
        state.next_phys = align_up(phys_addr + size, 4096);
        let mem = DmaMemory {
            phys_addr,
            virt_addr: phys_addr + VIRT_OFFSET,
            cpu_addr: phys_addr,
            size,
        };
        state.allocated_sizes.push(size);
        state.live.push(mem);

        Ok(mem)
    }

    fn free_mem(&mut self, mem: &DmaMemory) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("free_mem");

        if state.fail_free_mem > 0 {
            state.fail_free_mem -= 1;
            return Err(VpuError::Failure);
        }

        let pos = state
            .live
            .iter()
            .position(|m| m == mem)
            .ok_or(VpuError::InvalidParam)?;
        state.live.remove(pos);
        state.freed.push(mem.phys_addr);

        Ok(())
    }

    fn open(&mut self, params: &OpenParams, _mem: &[MemBlock]) -> VpuResult<VpuHandle> {
        let mut state = self.state();
        state.calls.push("open");
        if state.fail_open {
            return Err(VpuError::Failure);
        }
        if state.handle.is_some() {
            return Err(VpuError::WrongCallSequence);
        }

        let handle = VpuHandle(state.next_handle);
        state.next_handle += 1;
        state.handle = Some(handle);
        state.open_params = Some(*params);

        Ok(handle)
    }

    fn close(&mut self, handle: VpuHandle) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("close");
        state.check_handle(handle)?;
        state.handle = None;

        Ok(())
    }

    fn flush_all(&mut self, handle: VpuHandle) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("flush_all");

        state.check_handle(handle)
    }

    fn set_skip_mode(&mut self, handle: VpuHandle, mode: SkipMode) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("set_skip_mode");
        state.check_handle(handle)?;
        state.skip_mode = Some(mode);

        Ok(())
    }

    fn frame_size_reported(&mut self, handle: VpuHandle) -> VpuResult<bool> {
        let mut state = self.state();
        state.calls.push("frame_size_reported");
        state.check_handle(handle)?;

        Ok(state.frame_size_reported)
    }

    fn register_frame_buffers(
        &mut self,
        handle: VpuHandle,
        buffers: &[FrameBuffer],
    ) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("register_frame_buffers");
        state.check_handle(handle)?;
        if state.fail_register {
            return Err(VpuError::InvalidFrameBuffer);
        }
        state.registered = buffers.to_vec();

        Ok(())
    }

    fn decode(&mut self, handle: VpuHandle, input: &InputUnit) -> VpuResult<DecodeEvents> {
        let mut state = self.state();
        state.calls.push("decode");
        state.check_handle(handle)?;
        state
            .decoded
            .push((input.data.to_vec(), input.codec_data.to_vec()));

        state
            .events
            .pop_front()
            .unwrap_or(Ok(DecodeEvents::INPUT_USED | DecodeEvents::NO_ENOUGH_INBUF))
    }

    fn initial_info(&mut self, handle: VpuHandle) -> VpuResult<InitialInfo> {
        let mut state = self.state();
        state.calls.push("initial_info");
        state.check_handle(handle)?;
        if state.fail_initial_info {
            return Err(VpuError::Failure);
        }

        Ok(state.initial_info)
    }

    fn output_frame(&mut self, handle: VpuHandle) -> VpuResult<OutputFrame> {
        let mut state = self.state();
        state.calls.push("output_frame");
        state.check_handle(handle)?;

        state.output_frames.pop_front().ok_or(VpuError::Failure)
    }

    fn consumed_frame_info(&mut self, handle: VpuHandle) -> VpuResult<ConsumedFrameInfo> {
        let mut state = self.state();
        state.calls.push("consumed_frame_info");
        state.check_handle(handle)?;

        state.consumed.pop_front().ok_or(VpuError::Failure)
    }

    fn frame_displayed(&mut self, handle: VpuHandle, buffer: &FrameBuffer) -> VpuResult<()> {
        let mut state = self.state();
        state.calls.push("frame_displayed");
        state.check_handle(handle)?;
        state.displayed.push(buffer.phys_y);

        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct IpuState {
    /// Live allocations, as (physical address, size).
    pub allocated: Vec<(usize, usize)>,
    /// Live mappings, as (virtual address, size).
    pub mapped: Vec<(usize, usize)>,
    pub freed: Vec<usize>,
    pub unmapped: Vec<usize>,
    pub tasks: Vec<DeinterlaceTask>,

    /// Number of calls to `alloc` that succeed before the next ones fail.
    pub fail_alloc_after: Option<usize>,
    pub fail_open: bool,
    pub fail_map: bool,
    pub fail_task: bool,

    pub closed: bool,
    pub close_calls: usize,
    next_phys: usize,
}

impl IpuState {
    fn check_open(&self) -> IpuResult<()> {
        if self.closed {
            Err(IpuError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Simulated IPU.
#[derive(Clone, Default)]
pub(crate) struct DummyIpu(Arc<Mutex<IpuState>>);

impl DummyIpu {
    pub fn state(&self) -> MutexGuard<'_, IpuState> {
        self.0.lock().unwrap()
    }

    /// Opens the device again, sharing the state with `self`.
    pub fn open(&self) -> IpuResult<Self> {
        let mut state = self.state();
        if state.fail_open {
            return Err(IpuError::Open(std::io::Error::from(
                std::io::ErrorKind::NotFound,
            )));
        }
        state.closed = false;

        Ok(self.clone())
    }
}

impl IpuDevice for DummyIpu {
    fn alloc(&mut self, size: usize) -> IpuResult<usize> {
        let mut state = self.state();
        state.check_open()?;
        if size == 0 {
            return Err(IpuError::EmptyBuffer);
        }
        if let Some(remaining) = state.fail_alloc_after {
            if remaining == 0 {
                return Err(IpuError::Ioctl(nix::errno::Errno::ENOMEM));
            }
            state.fail_alloc_after = Some(remaining - 1);
        }

        let phys_addr = PHYS_BASE + 0x800_0000 + state.next_phys + MISALIGNMENT;
        state.next_phys = align_up(state.next_phys + MISALIGNMENT + size, 4096);
        state.allocated.push((phys_addr, size));

        Ok(phys_addr)
    }

    fn free(&mut self, phys_addr: usize) -> IpuResult<()> {
        let mut state = self.state();
        state.check_open()?;
        let pos = state
            .allocated
            .iter()
            .position(|(addr, _)| *addr == phys_addr)
            .ok_or(IpuError::Ioctl(nix::errno::Errno::EINVAL))?;
        state.allocated.remove(pos);
        state.freed.push(phys_addr);

        Ok(())
    }

    fn map(&mut self, phys_addr: usize, size: usize) -> IpuResult<usize> {
        let mut state = self.state();
        state.check_open()?;
        if state.fail_map {
            return Err(IpuError::Ioctl(nix::errno::Errno::ENOMEM));
        }

        let virt_addr = phys_addr + VIRT_OFFSET;
        state.mapped.push((virt_addr, size));

        Ok(virt_addr)
    }

    fn unmap(&mut self, virt_addr: usize, size: usize) -> IpuResult<()> {
        let mut state = self.state();
        let pos = state
            .mapped
            .iter()
            .position(|m| *m == (virt_addr, size))
            .ok_or(IpuError::Ioctl(nix::errno::Errno::EINVAL))?;
        state.mapped.remove(pos);
        state.unmapped.push(virt_addr);

        Ok(())
    }

    fn queue_task(&mut self, task: &DeinterlaceTask) -> IpuResult<()> {
        let mut state = self.state();
        state.check_open()?;
        if state.fail_task {
            return Err(IpuError::Task(String::from("simulated task failure")));
        }
        state.tasks.push(*task);

        Ok(())
    }

    fn close(&mut self) -> IpuResult<()> {
        let mut state = self.state();
        state.close_calls += 1;
        state.check_open()?;
        state.closed = true;

        Ok(())
    }
}
