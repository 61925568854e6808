// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The VPU decoder.
//!
//! The VPU is a stateful decoder: it is fed compressed data and reports through a set of event
//! flags what happened as a result, e.g. that the stream geometry is known, that a frame has been
//! decoded or that one is ready to be displayed. [`StatefulDecoder::decode`] drives the VPU until
//! it either needs more input or has a picture ready, which can then be retrieved with
//! [`StatefulDecoder::get_picture`].

use std::sync::Arc;

use anyhow::Context;

use crate::codec::needs_codec_data;
use crate::codec::select_codec;
use crate::codec::CodecConfig;
use crate::decoder::BufferLock;
use crate::decoder::DecodeError;
use crate::decoder::DecodeStatus;
use crate::decoder::DecoderOptions;
use crate::decoder::DeinterlaceMode;
use crate::decoder::Picture;
use crate::decoder::PictureBuffer;
use crate::decoder::Result;
use crate::decoder::StreamInfo;
use crate::decoder::ALLOWED_REFERENCES;
use crate::device::ipu::IpuDevice;
use crate::device::ipu::IpuResult;
use crate::device::vpu::DecodeEvents;
use crate::device::vpu::FieldType;
use crate::device::vpu::InitialInfo;
use crate::device::vpu::InputUnit;
use crate::device::vpu::OpenParams;
use crate::device::vpu::OutputFrame;
use crate::device::vpu::SkipMode;
use crate::device::vpu::VpuDevice;
use crate::device::vpu::VpuHandle;
use crate::image_processing::DeinterlacePool;
use crate::image_processing::DeinterlacedFrame;
use crate::memory::MemoryLedger;
use crate::utils::align_up_u32;
use crate::video_frame::frame_pool::BufferHold;
use crate::video_frame::frame_pool::DecodedBuffer;
use crate::video_frame::frame_pool::FramePool;
use crate::video_frame::frame_pool::HoldKind;
use crate::video_frame::FRAME_ALIGN;

/// Maximum number of calls to the VPU within one call to `decode`.
pub const MAX_DECODE_LOOPS: usize = 5;

/// Outstanding byte counts below this are considered fully consumed. The VPU does not always
/// report the exact amount of data it consumed.
pub const CONSUMED_BYTES_EPSILON: i64 = 50;

/// A decoder driving the VPU, with optional deinterlacing of its output through the IPU.
pub struct StatefulDecoder<D: VpuDevice, I: IpuDevice> {
    device: D,
    ledger: MemoryLedger,
    /// Whether the firmware is loaded.
    loaded: bool,
    handle: Option<VpuHandle>,
    codec: CodecConfig,
    /// Data attached to every input unit, empty for codecs that do not need it.
    codec_data: Arc<[u8]>,
    options: DecoderOptions,
    lock: BufferLock,
    initial_info: Option<InitialInfo>,
    pool: Option<FramePool>,
    deinterlacer: DeinterlacePool<I>,

    /// Whether the VPU reports the size of the frames it consumes.
    frame_size_reported: bool,
    /// Bytes submitted to the VPU and not reported as consumed yet.
    bytes_to_consume: i64,
    /// Timestamp of input that was not consumed by the call it was submitted with.
    previous_pts: Option<u64>,
    dts: Option<u64>,
    /// Frame ready for display, to be returned by `get_picture`.
    current_frame: Option<OutputFrame>,
    /// Buffer of the last picture returned, used as predecessor of the next one.
    last_buffer: Option<BufferHold>,
    drop_state: bool,
    frame_counter: u64,
}

impl<D: VpuDevice, I: IpuDevice> StatefulDecoder<D, I> {
    /// Creates a decoder for `stream`.
    ///
    /// The VPU session itself is only opened by the first call to `decode`. `open_ipu` is called
    /// whenever the stream turns out to be interlaced and needs a deinterlacer.
    pub fn new<F>(
        device: D,
        open_ipu: F,
        stream: &StreamInfo,
        options: DecoderOptions,
    ) -> Result<Self>
    where
        F: FnMut() -> IpuResult<I> + 'static,
    {
        log::debug!(
            "stream: {:?} {}x{} profile {:?}",
            stream.codec,
            stream.width,
            stream.height,
            stream.profile
        );
        if stream.codec_tag.is_alphanumeric() {
            log::debug!("stream: tag {}", stream.codec_tag);
        }
        if !stream.extradata.is_empty() {
            let hex: String = stream
                .extradata
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect();
            log::debug!("stream: extradata {} {}", stream.extradata.len(), hex);
        }

        let codec = select_codec(stream)?;
        let codec_data: Arc<[u8]> = if needs_codec_data(codec.format) {
            Arc::from(stream.extradata.as_slice())
        } else {
            Arc::from(Vec::new())
        };

        let lock = BufferLock::new();
        let deinterlacer = DeinterlacePool::new(lock.clone(), open_ipu);

        Ok(Self {
            device,
            ledger: MemoryLedger::new(),
            loaded: false,
            handle: None,
            codec,
            codec_data,
            options,
            lock,
            initial_info: None,
            pool: None,
            deinterlacer,
            frame_size_reported: false,
            bytes_to_consume: 0,
            previous_pts: None,
            dts: None,
            current_frame: None,
            last_buffer: None,
            drop_state: false,
            frame_counter: 0,
        })
    }

    /// Name of the decoder, e.g. "iMX-h264".
    pub fn format_name(&self) -> &'static str {
        self.codec.name
    }

    /// Number of pictures the decoder may keep referenced.
    pub fn allowed_references(&self) -> usize {
        ALLOWED_REFERENCES
    }

    /// The lock renderers must hold while reading from a picture.
    pub fn buffer_lock(&self) -> BufferLock {
        self.lock.clone()
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Stream information reported by the VPU, once known.
    pub fn initial_info(&self) -> Option<&InitialInfo> {
        self.initial_info.as_ref()
    }

    /// Number of pictures returned since the last reset.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    /// Whether pictures returned from now on should be marked as dropped. Frames are still
    /// decoded.
    pub fn set_drop_state(&mut self, drop: bool) {
        if self.drop_state != drop {
            log::trace!("drop state: {}", drop);
            self.drop_state = drop;
        }
    }

    fn open_session(&mut self) -> Result<VpuHandle> {
        match self.try_open_session() {
            Ok(handle) => Ok(handle),
            Err(e) => {
                log::error!("failed to open VPU session: {:#}", e);
                self.close();
                Err(DecodeError::SessionOpen(e))
            }
        }
    }

    fn try_open_session(&mut self) -> anyhow::Result<VpuHandle> {
        self.device.load().context("failed to load VPU firmware")?;
        self.loaded = true;

        let version = self.device.version().context("failed to get VPU version")?;
        log::debug!(
            "VPU library version {}.{}.{}",
            version.lib_major,
            version.lib_minor,
            version.lib_release
        );

        let requests = self
            .device
            .query_mem()
            .context("failed to query VPU memory requirements")?;
        let (_, blocks) = self
            .ledger
            .allocate(&mut self.device, &requests)
            .context("failed to allocate VPU working memory")?;

        let handle = self
            .device
            .open(&OpenParams::new(self.codec.format), &blocks)
            .context("failed to open VPU")?;
        self.handle = Some(handle);

        self.device
            .set_skip_mode(handle, SkipMode::None)
            .context("failed to set VPU skip mode")?;

        self.frame_size_reported = match self.device.frame_size_reported(handle) {
            Ok(reported) => reported,
            Err(e) => {
                log::error!("failed to get VPU frame size capability: {}", e);
                false
            }
        };

        Ok(handle)
    }

    /// Submits `data` to the VPU and processes the events it reports.
    ///
    /// An empty `data` pushes previously submitted input further through the decoder. If
    /// `PICTURE` is set in the returned status, the picture can be retrieved with `get_picture`.
    pub fn decode(
        &mut self,
        data: &[u8],
        dts: Option<u64>,
        pts: Option<u64>,
    ) -> Result<DecodeStatus> {
        let handle = match self.handle {
            Some(handle) => handle,
            None => self.open_session()?,
        };

        if let Some(pool) = &self.pool {
            pool.reclaim(&mut self.device, handle);
        }

        let mut status = DecodeStatus::empty();

        if !data.is_empty() || self.bytes_to_consume > 0 {
            let converted: Vec<u8>;
            let mut input_data = data;
            if let Some(converter) = self.codec.converter.as_mut().filter(|_| !data.is_empty()) {
                match converter.convert(data) {
                    Ok(buf) => {
                        converted = buf;
                        input_data = &converted;
                    }
                    Err(e) => log::error!("bitstream conversion failed: {}", e),
                }
            }

            let codec_data = Arc::clone(&self.codec_data);
            let mut input = InputUnit {
                data: input_data,
                codec_data: &codec_data,
            };
            let mut loops = 0;

            loop {
                if self.frame_size_reported {
                    self.bytes_to_consume += input.data.len() as i64;
                }

                let events = self.device.decode(handle, &input).map_err(|e| {
                    log::error!("VPU decode failed: {}", e);
                    DecodeError::Accelerator(e)
                })?;
                log::trace!("VPU events: {:?}", events);

                if events.contains(DecodeEvents::INIT_OK) {
                    self.configure(handle)?;
                }

                if events.contains(DecodeEvents::ONE_FRM_CONSUMED) {
                    self.frame_consumed(handle, pts);
                }

                if events.contains(DecodeEvents::OUTPUT_DIS) {
                    if status.contains(DecodeStatus::PICTURE) {
                        log::error!("second picture in the same decode call");
                    }

                    let mut frame = self.device.output_frame(handle).map_err(|e| {
                        log::error!("cannot get VPU output frame: {}", e);
                        DecodeError::Accelerator(e)
                    })?;
                    // Some codecs under-report their frame size.
                    frame.ext.frame_width = align_up_u32(frame.ext.frame_width, FRAME_ALIGN);
                    frame.ext.frame_height = align_up_u32(frame.ext.frame_height, FRAME_ALIGN);
                    self.current_frame = Some(frame);

                    status |= DecodeStatus::PICTURE;
                }

                if events.contains(DecodeEvents::OUTPUT_MOSAIC_DIS) {
                    let frame = self.device.output_frame(handle).map_err(|e| {
                        log::error!("cannot get VPU output frame: {}", e);
                        DecodeError::Accelerator(e)
                    })?;
                    self.return_frame(handle, &frame)?;
                }

                if events.contains(DecodeEvents::OUTPUT_REPEAT) {
                    log::debug!("frame repeat");
                }
                if events.contains(DecodeEvents::OUTPUT_DROPPED) {
                    log::debug!("frame dropped");
                }
                if events.contains(DecodeEvents::NO_ENOUGH_BUF) {
                    log::error!("no frame buffer available");
                }
                if events.contains(DecodeEvents::SKIP) {
                    log::debug!("frame skipped");
                }
                if events.contains(DecodeEvents::FLUSH) {
                    log::info!("VPU requires a flush");
                    self.reset();
                    status = DecodeStatus::FLUSHED;
                }
                if events.contains(DecodeEvents::OUTPUT_EOS) {
                    log::info!("end of stream");
                }

                if events.intersects(DecodeEvents::NO_ENOUGH_INBUF | DecodeEvents::OUTPUT_DIS) {
                    break;
                }

                loops += 1;
                if loops >= MAX_DECODE_LOOPS {
                    log::error!("leaving VPU decoding loop after {} iterations", loops);
                    break;
                }

                if !events.contains(DecodeEvents::INPUT_USED) {
                    log::error!("input not used: {} bytes", input.data.len());
                }

                // No picture yet and the VPU does not ask for more data: push it further.
                input.data = &[];
            }
        }

        if status.is_empty() {
            status = DecodeStatus::BUFFER;
        }

        // The submitted data has not been consumed yet, its timestamp belongs to the frame the
        // VPU will report next.
        if self.bytes_to_consume > 0 {
            self.previous_pts = pts;
        }
        self.dts = dts;

        Ok(status)
    }

    /// Allocates and registers the frame buffers once the stream geometry is known.
    fn configure(&mut self, handle: VpuHandle) -> Result<()> {
        let info = self.device.initial_info(handle).map_err(|e| {
            log::error!("VPU get initial info failed: {}", e);
            DecodeError::Accelerator(e)
        })?;
        log::debug!(
            "VPU stream info: {}x{} (interlaced: {}, min frame buffers: {}) align {} crop {:?} ratio 0x{:x}",
            info.pic_width,
            info.pic_height,
            info.interlaced,
            info.min_frame_buffer_count,
            info.address_alignment,
            info.crop,
            info.q16_ratio
        );

        if let Some(pool) = self.pool.take() {
            {
                let _guard = self.lock.lock();
                self.last_buffer = None;
                pool.invalidate_all(&mut self.device, Some(handle));
            }
            self.current_frame = None;
            if let Err(e) = pool.release(&mut self.ledger, &mut self.device) {
                log::error!("failed to release previous frame buffers: {}", e);
            }
        }

        let pool = FramePool::allocate(&mut self.ledger, &mut self.device, &info)?;
        let pool = self.pool.insert(pool);
        self.initial_info = Some(info);

        self.device
            .register_frame_buffers(handle, &pool.frame_buffers())
            .map_err(|e| {
                log::error!("VPU error while registering frame buffers: {}", e);
                DecodeError::Accelerator(e)
            })?;

        if info.interlaced && self.options.deinterlace != DeinterlaceMode::Disabled {
            log::info!("enabling hardware deinterlacing");
            if let Err(e) = self.deinterlacer.init(
                info.pic_width,
                info.pic_height,
                ALLOWED_REFERENCES + 1,
                info.address_alignment,
            ) {
                log::warn!("failed to initialize IPU buffers, deinterlacing disabled: {}", e);
            }
        }

        Ok(())
    }

    fn find_buffer(&self, luma_addr: usize) -> Option<&Arc<DecodedBuffer>> {
        let pool = self.pool.as_ref()?;
        pool.find(luma_addr).and_then(|index| pool.buffer(index))
    }

    /// Updates the byte accounting and stamps the frame the VPU just decoded.
    fn frame_consumed(&mut self, handle: VpuHandle, pts: Option<u64>) {
        let consumed = match self.device.consumed_frame_info(handle) {
            Ok(consumed) => consumed,
            Err(e) => {
                log::error!("VPU error retrieving consumed frame info: {}", e);
                return;
            }
        };

        self.bytes_to_consume -= (consumed.frame_length + consumed.stuff_length) as i64;
        if self.bytes_to_consume < CONSUMED_BYTES_EPSILON {
            self.bytes_to_consume = 0;
        }

        let Some(luma_addr) = consumed.frame_luma_addr else {
            return;
        };
        let pts = self.previous_pts.or(pts);
        match self.find_buffer(luma_addr) {
            Some(buffer) => buffer.set_pts(pts),
            None => {
                log::error!("could not find frame buffer 0x{:x}", luma_addr);
                return;
            }
        }
        self.previous_pts = None;
    }

    /// Gives a frame that must not be displayed straight back to the VPU.
    fn return_frame(&mut self, handle: VpuHandle, frame: &OutputFrame) -> Result<()> {
        let frame_buffer = match self.find_buffer(frame.display_luma_addr) {
            Some(buffer) => *buffer.frame_buffer(),
            None => {
                log::error!(
                    "could not find frame buffer 0x{:x}",
                    frame.display_luma_addr
                );
                return Ok(());
            }
        };

        self.device
            .frame_displayed(handle, &frame_buffer)
            .map_err(|e| {
                log::error!("VPU clear frame display failure: {}", e);
                DecodeError::Accelerator(e)
            })
    }

    /// Returns the picture made ready by the last call to `decode`.
    ///
    /// The picture keeps its buffer away from the VPU until it is dropped. Interlaced pictures are
    /// deinterlaced if possible, and returned as decoded otherwise.
    pub fn get_picture(&mut self) -> Result<Picture> {
        self.frame_counter += 1;

        let frame = self.current_frame.take().ok_or(DecodeError::NoPicture)?;
        let buffer = match self.find_buffer(frame.display_luma_addr) {
            Some(buffer) => Arc::clone(buffer),
            None => {
                log::error!(
                    "could not find frame buffer 0x{:x}",
                    frame.display_luma_addr
                );
                return Err(DecodeError::UnknownFrameBuffer(frame.display_luma_addr));
            }
        };

        let width = frame.ext.crop.width();
        let height = frame.ext.crop.height();
        let display_width = match frame.ext.q16_ratio {
            0 => width,
            ratio => ((u64::from(width) * u64::from(ratio) + 32767) >> 16) as u32,
        };

        let (pts, dts) = if self.options.use_pts {
            (buffer.pts(), self.dts)
        } else {
            (None, None)
        };

        buffer.bind(
            frame,
            self.last_buffer
                .as_ref()
                .map(|last| last.clone_as(HoldKind::Reference)),
        );
        let hold = buffer.hold(HoldKind::Display);
        log::trace!(
            "+  {:02} dts {:?} pts {:?} (VPU)",
            buffer.index(),
            dts,
            pts
        );

        self.last_buffer = Some(buffer.hold(HoldKind::Reference));

        let picture_buffer = match self.deinterlace(&hold, frame.field_type) {
            Some(deinterlaced) => PictureBuffer::Deinterlaced(deinterlaced),
            None => PictureBuffer::Decoded(hold),
        };

        Ok(Picture {
            width,
            height,
            display_width,
            display_height: height,
            pts,
            dts,
            dropped: self.drop_state,
            field_type: frame.field_type,
            buffer: picture_buffer,
        })
    }

    fn deinterlace(
        &mut self,
        source: &BufferHold,
        field_type: FieldType,
    ) -> Option<DeinterlacedFrame> {
        let low_motion = match self.options.deinterlace {
            DeinterlaceMode::Disabled => return None,
            DeinterlaceMode::HighMotion => false,
            DeinterlaceMode::MotionAdaptive => true,
        };
        if !self.deinterlacer.is_enabled() {
            return None;
        }

        match self.deinterlacer.process(source, field_type, low_motion) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::debug!(
                    "forwarding frame {} without deinterlacing: {}",
                    source.index(),
                    e
                );
                None
            }
        }
    }

    /// Releases `picture`, which makes its buffer available to the VPU again once no one else
    /// uses it.
    pub fn clear_picture(&mut self, picture: Picture) {
        drop(picture);
    }

    /// Discards all frames being decoded or waiting for display.
    ///
    /// Pictures still held by the renderer become invalid. Must not be called with the buffer
    /// lock held.
    pub fn reset(&mut self) {
        log::debug!("resetting decoder");

        {
            let _guard = self.lock.lock();
            self.last_buffer = None;
            if let Some(pool) = &self.pool {
                pool.invalidate_all(&mut self.device, self.handle);
            }
        }
        self.current_frame = None;

        self.frame_counter = 0;
        self.deinterlacer.reset();
        self.bytes_to_consume = 0;
        self.previous_pts = None;

        if let Some(handle) = self.handle {
            if let Err(e) = self.device.flush_all(handle) {
                log::error!("VPU flush failed: {}", e);
            }
        }
    }

    /// Closes the VPU session and frees all the memory of the decoder.
    ///
    /// Every step is attempted even if some fail. A later call to `decode` opens a new session.
    /// Must not be called with the buffer lock held.
    pub fn close(&mut self) {
        {
            let _guard = self.lock.lock();
            self.last_buffer = None;
            if let Some(pool) = self.pool.take() {
                pool.invalidate_all(&mut self.device, self.handle);
            }
        }
        self.current_frame = None;
        self.initial_info = None;

        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.device.flush_all(handle) {
                log::error!("VPU flush failed: {}", e);
            }
            if let Err(e) = self.device.close(handle) {
                log::error!("VPU close failed: {}", e);
            }
        }

        self.frame_counter = 0;
        // Errors are logged by the deinterlacer.
        let _ = self.deinterlacer.close();

        if let Err(e) = self.ledger.release_all(&mut self.device) {
            log::error!("failed to release VPU memory: {}", e);
        }

        if self.loaded {
            if let Err(e) = self.device.unload() {
                log::error!("VPU unload failed: {}", e);
            }
            self.loaded = false;
        }

        self.bytes_to_consume = 0;
        self.previous_pts = None;
    }
}

#[cfg(feature = "ipu")]
impl<D: VpuDevice> StatefulDecoder<D, crate::device::ipu::MxcIpu> {
    /// Creates a decoder deinterlacing through `/dev/mxc_ipu`.
    pub fn with_mxc_ipu(device: D, stream: &StreamInfo, options: DecoderOptions) -> Result<Self> {
        use crate::device::ipu::MxcIpu;

        Self::new(
            device,
            || MxcIpu::open(MxcIpu::DEFAULT_PATH),
            stream,
            options,
        )
    }
}

impl<D: VpuDevice, I: IpuDevice> Drop for StatefulDecoder<D, I> {
    fn drop(&mut self) {
        self.close();
    }
}
