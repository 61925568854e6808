// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Capability interface of the IPU image accelerator, and its `/dev/mxc_ipu` implementation.
//!
//! We only use the IPU for deinterlacing: it gets standalone DMA buffers allocated and mapped
//! through the device, and "tasks" that read one or two decoded NV12 frames and write a
//! deinterlaced NV12 frame.

use thiserror::Error;

use crate::Fourcc;

#[derive(Error, Debug)]
pub enum IpuError {
    #[error("failed to open IPU device: {0}")]
    Open(#[source] std::io::Error),
    #[error("IPU device is closed")]
    Closed,
    #[error("cannot allocate or map an empty buffer")]
    EmptyBuffer,
    #[error("IPU ioctl failed: {0}")]
    Ioctl(#[from] nix::errno::Errno),
    #[error("IPU task rejected: {0}")]
    Task(String),
}

pub type IpuResult<T> = Result<T, IpuError>;

/// Field format bit selecting the top field first.
pub const DEINTERLACE_FIELD_TOP: u8 = 0;
/// Field format bit selecting the bottom field first.
pub const DEINTERLACE_FIELD_BOTTOM: u8 = 1;
/// Field format bits holding the field order.
pub const DEINTERLACE_FIELD_MASK: u8 = 1;

/// Motion hint of a deinterlace task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Motion {
    #[default]
    Medium = 0,
    /// Motion adaptive: both the previous and current frame are read.
    Low = 1,
    /// Only the current frame is read.
    High = 2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskPriority {
    #[default]
    Normal = 0,
    High = 1,
}

/// Input side of a deinterlace task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskInput {
    pub width: u32,
    pub height: u32,
    pub format: Fourcc,
    /// Physical address of the frame to deinterlace, or of the previous frame in
    /// motion-adaptive mode.
    pub paddr: usize,
    /// Physical address of the current frame in motion-adaptive mode, zero otherwise.
    pub paddr_n: usize,
    pub deinterlace: bool,
    pub motion: Motion,
    pub field_fmt: u8,
}

/// Output side of a deinterlace task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutput {
    pub width: u32,
    pub height: u32,
    pub format: Fourcc,
    pub paddr: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeinterlaceTask {
    pub input: TaskInput,
    pub output: TaskOutput,
    pub priority: TaskPriority,
}

/// The image accelerator.
pub trait IpuDevice {
    /// Allocates `size` bytes of DMA memory and returns its physical address.
    fn alloc(&mut self, size: usize) -> IpuResult<usize>;
    fn free(&mut self, phys_addr: usize) -> IpuResult<()>;
    /// Maps `size` bytes at `phys_addr` into the process and returns the virtual address.
    fn map(&mut self, phys_addr: usize, size: usize) -> IpuResult<usize>;
    fn unmap(&mut self, virt_addr: usize, size: usize) -> IpuResult<()>;
    /// Queues `task` and waits for its completion.
    fn queue_task(&mut self, task: &DeinterlaceTask) -> IpuResult<()>;
    /// Closes the device. Further calls fail with `IpuError::Closed`.
    fn close(&mut self) -> IpuResult<()>;
}

#[cfg(feature = "ipu")]
pub use mxc::MxcIpu;

#[cfg(feature = "ipu")]
mod mxc {
    use std::fs::File;
    use std::fs::OpenOptions;
    use std::num::NonZeroUsize;
    use std::os::fd::AsRawFd;
    use std::os::fd::IntoRawFd;
    use std::path::Path;
    use std::ptr::NonNull;

    use nix::ioctl_readwrite;
    use nix::ioctl_write_ptr;
    use nix::libc;
    use nix::sys::mman::mmap;
    use nix::sys::mman::munmap;
    use nix::sys::mman::MapFlags;
    use nix::sys::mman::ProtFlags;

    use super::DeinterlaceTask;
    use super::IpuDevice;
    use super::IpuError;
    use super::IpuResult;

    // UNSAFE: the structures below are passed to the kernel as is and must match
    // include/uapi/linux/ipu.h of the vendor kernel. `dma_addr_t` is 32 bits wide on i.MX6.
    type DmaAddr = u32;

    #[repr(C)]
    #[derive(Default)]
    struct IpuPos {
        x: u32,
        y: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuCrop {
        pos: IpuPos,
        w: u32,
        h: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuDeinterlace {
        enable: u8,
        motion: u8,
        field_fmt: u8,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuInput {
        width: u32,
        height: u32,
        format: u32,
        crop: IpuCrop,
        paddr: DmaAddr,
        deinterlace: IpuDeinterlace,
        paddr_n: DmaAddr,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuAlpha {
        mode: u8,
        gvalue: u8,
        loc_alp_paddr: DmaAddr,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuColorkey {
        enable: libc::c_int,
        value: u32,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuOverlay {
        width: u32,
        height: u32,
        format: u32,
        crop: IpuCrop,
        alpha: IpuAlpha,
        colorkey: IpuColorkey,
        paddr: DmaAddr,
    }

    #[repr(C)]
    #[derive(Default)]
    struct IpuOutput {
        width: u32,
        height: u32,
        format: u32,
        rotate: u8,
        crop: IpuCrop,
        paddr: DmaAddr,
    }

    #[repr(C)]
    #[derive(Default)]
    pub(super) struct IpuTask {
        input: IpuInput,
        output: IpuOutput,
        overlay_en: u8,
        overlay: IpuOverlay,
        priority: u8,
        task_id: u8,
        timeout: u32,
    }

    impl From<&DeinterlaceTask> for IpuTask {
        fn from(task: &DeinterlaceTask) -> Self {
            let mut ipu_task = IpuTask {
                priority: task.priority as u8,
                ..Default::default()
            };

            ipu_task.input.width = task.input.width;
            ipu_task.input.height = task.input.height;
            ipu_task.input.format = task.input.format.0;
            ipu_task.input.paddr = task.input.paddr as DmaAddr;
            ipu_task.input.paddr_n = task.input.paddr_n as DmaAddr;
            ipu_task.input.deinterlace.enable = task.input.deinterlace as u8;
            ipu_task.input.deinterlace.motion = task.input.motion as u8;
            ipu_task.input.deinterlace.field_fmt = task.input.field_fmt;

            ipu_task.output.width = task.output.width;
            ipu_task.output.height = task.output.height;
            ipu_task.output.format = task.output.format.0;
            ipu_task.output.paddr = task.output.paddr as DmaAddr;

            ipu_task
        }
    }

    const IPU_IOC_MAGIC: u8 = b'I';
    ioctl_readwrite!(ipu_alloc, IPU_IOC_MAGIC, 0x24, libc::c_int);
    ioctl_write_ptr!(ipu_free, IPU_IOC_MAGIC, 0x25, libc::c_int);
    ioctl_write_ptr!(ipu_queue_task, IPU_IOC_MAGIC, 0x28, IpuTask);

    /// The IPU as exposed by the vendor kernel.
    pub struct MxcIpu {
        file: Option<File>,
    }

    impl MxcIpu {
        pub const DEFAULT_PATH: &'static str = "/dev/mxc_ipu";

        pub fn open<P: AsRef<Path>>(path: P) -> IpuResult<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(path)
                .map_err(IpuError::Open)?;

            Ok(Self { file: Some(file) })
        }

        fn file(&self) -> IpuResult<&File> {
            self.file.as_ref().ok_or(IpuError::Closed)
        }
    }

    impl IpuDevice for MxcIpu {
        fn alloc(&mut self, size: usize) -> IpuResult<usize> {
            let fd = self.file()?.as_raw_fd();
            let mut addr = libc::c_int::try_from(size).map_err(|_| IpuError::EmptyBuffer)?;
            // SAFETY: `addr` is a valid c_int the driver reads the size from and writes the
            // physical address of the new buffer into.
            unsafe { ipu_alloc(fd, &mut addr) }?;

            Ok(addr as u32 as usize)
        }

        fn free(&mut self, phys_addr: usize) -> IpuResult<()> {
            let fd = self.file()?.as_raw_fd();
            let addr = phys_addr as u32 as libc::c_int;
            // SAFETY: the driver only reads the physical address from `addr`.
            unsafe { ipu_free(fd, &addr) }?;

            Ok(())
        }

        fn map(&mut self, phys_addr: usize, size: usize) -> IpuResult<usize> {
            let file = self.file()?;
            let length = NonZeroUsize::new(size).ok_or(IpuError::EmptyBuffer)?;
            // SAFETY: we map a buffer allocated through this device; the mapping is only
            // released by `unmap` with the same length.
            let addr = unsafe {
                mmap(
                    None,
                    length,
                    ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                    MapFlags::MAP_SHARED,
                    file,
                    phys_addr as libc::off_t,
                )
            }?;

            Ok(addr.as_ptr() as usize)
        }

        fn unmap(&mut self, virt_addr: usize, size: usize) -> IpuResult<()> {
            let addr = NonNull::new(virt_addr as *mut libc::c_void).ok_or(IpuError::EmptyBuffer)?;
            // SAFETY: `virt_addr` and `size` come from a previous call to `map`.
            unsafe { munmap(addr, size) }?;

            Ok(())
        }

        fn queue_task(&mut self, task: &DeinterlaceTask) -> IpuResult<()> {
            let fd = self.file()?.as_raw_fd();
            let ipu_task = IpuTask::from(task);
            // SAFETY: `ipu_task` matches the kernel layout and outlives the call, which blocks
            // until the task has completed.
            unsafe { ipu_queue_task(fd, &ipu_task) }?;

            Ok(())
        }

        fn close(&mut self) -> IpuResult<()> {
            let file = self.file.take().ok_or(IpuError::Closed)?;
            nix::unistd::close(file.into_raw_fd())?;

            Ok(())
        }
    }
}
