// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Selection of the VPU codec matching the stream to decode.

use crate::bitstream_utils::AvccConverter;
use crate::bitstream_utils::BitstreamConverter;
use crate::decoder::DecodeError;
use crate::decoder::StreamInfo;
use crate::device::vpu::CodecFormat;
use crate::EncodedFormat;
use crate::Fourcc;

/// H.264 High 10 profile, which the VPU cannot decode.
const H264_PROFILE_HIGH_10: u32 = 110;

/// How a stream is fed to the VPU.
pub struct CodecConfig {
    pub format: CodecFormat,
    /// Name of the decoder reported to users.
    pub name: &'static str,
    /// Reformats the input before submission, if needed.
    pub converter: Option<Box<dyn BitstreamConverter>>,
}

impl std::fmt::Debug for CodecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecConfig")
            .field("format", &self.format)
            .field("name", &self.name)
            .field("converter", &self.converter.is_some())
            .finish()
    }
}

impl CodecConfig {
    fn new(format: CodecFormat, name: &'static str) -> Self {
        Self {
            format,
            name,
            converter: None,
        }
    }
}

/// Whether the extradata of the stream must be attached to every input unit for `format`.
pub fn needs_codec_data(format: CodecFormat) -> bool {
    matches!(
        format,
        CodecFormat::Mpeg2 | CodecFormat::Vc1Ap | CodecFormat::Xvid
    )
}

fn mpeg4_config(tag: Fourcc) -> Option<CodecConfig> {
    let name = match &tag.0.to_le_bytes() {
        b"DIVX" => "iMX-divx4",
        b"DX50" | b"DIV5" => "iMX-divx5",
        b"XVID" | b"MP4V" | b"PMP4" | b"FMP4" => "iMX-xvid",
        _ => return None,
    };

    Some(CodecConfig::new(CodecFormat::Xvid, name))
}

/// Returns how to decode `stream`, or `UnsupportedCodec` if the VPU cannot decode it.
pub fn select_codec(stream: &StreamInfo) -> Result<CodecConfig, DecodeError> {
    if stream.software {
        return Err(DecodeError::UnsupportedCodec(String::from(
            "software decoding requested",
        )));
    }

    let config = match stream.codec {
        EncodedFormat::Mpeg1 => CodecConfig::new(CodecFormat::Mpeg2, "iMX-mpeg1"),
        EncodedFormat::Mpeg2 | EncodedFormat::Mpeg2Xvmc => {
            CodecConfig::new(CodecFormat::Mpeg2, "iMX-mpeg2")
        }
        EncodedFormat::H263 => CodecConfig::new(CodecFormat::H263, "iMX-h263"),
        EncodedFormat::H264 => {
            if stream.profile == Some(H264_PROFILE_HIGH_10) {
                return Err(DecodeError::UnsupportedCodec(String::from(
                    "H.264 High 10 profile",
                )));
            }

            let mut config = CodecConfig::new(CodecFormat::Avc, "iMX-h264");
            if stream.extradata.first() == Some(&1) {
                log::debug!("H.264 stream in avcC format, converting to Annex B");
                match AvccConverter::new(&stream.extradata) {
                    Ok(converter) => config.converter = Some(Box::new(converter)),
                    Err(e) => log::error!("cannot convert H.264 stream, submitting as is: {}", e),
                }
            }
            config
        }
        EncodedFormat::Vc1 => CodecConfig::new(CodecFormat::Vc1Ap, "iMX-vc1"),
        EncodedFormat::Cavs | EncodedFormat::Avs => CodecConfig::new(CodecFormat::Avs, "iMX-AVS"),
        EncodedFormat::Rv10 | EncodedFormat::Rv20 | EncodedFormat::Rv30 | EncodedFormat::Rv40 => {
            CodecConfig::new(CodecFormat::Rv, "iMX-RV")
        }
        EncodedFormat::Kmvc => CodecConfig::new(CodecFormat::AvcMvc, "iMX-MVC"),
        EncodedFormat::Vp8 => CodecConfig::new(CodecFormat::Vp8, "iMX-vp8"),
        EncodedFormat::Mpeg4 => mpeg4_config(stream.codec_tag).ok_or_else(|| {
            DecodeError::UnsupportedCodec(format!(
                "MPEG-4 stream with tag {}",
                stream.codec_tag
            ))
        })?,
        EncodedFormat::Mjpeg | EncodedFormat::Hevc | EncodedFormat::Vp9 => {
            return Err(DecodeError::UnsupportedCodec(format!("{:?}", stream.codec)));
        }
    };

    log::debug!("using {} ({:?})", config.name, config.format);

    Ok(config)
}
