// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reformatting of compressed input before it is submitted to the VPU.
//!
//! The VPU only understands H.264 in Annex B format, i.e. NAL units separated by start codes,
//! while containers such as MP4 or Matroska store them prefixed by their length and keep the
//! parameter sets out of band in an `avcC` record.

use std::io::Cursor;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use bytes::Buf;
use thiserror::Error;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

const NALU_TYPE_MASK: u8 = 0x1f;
const NALU_TYPE_IDR: u8 = 5;
const NALU_TYPE_SPS: u8 = 7;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConvertError {
    #[error("invalid avcC record: {0}")]
    InvalidConfig(&'static str),
    #[error("NAL unit of {len} bytes overruns the packet ({remaining} bytes left)")]
    Truncated { len: usize, remaining: usize },
}

/// Rewrites compressed packets into the format expected by the VPU.
pub trait BitstreamConverter {
    fn convert(&mut self, data: &[u8]) -> Result<Vec<u8>, ConvertError>;
}

/// Converts length-prefixed H.264 packets into Annex B, inserting the parameter sets of the
/// `avcC` record in front of IDR pictures that do not carry their own.
#[derive(Debug, Clone)]
pub struct AvccConverter {
    nal_length_size: usize,
    /// SPS and PPS units of the `avcC` record, each preceded by a start code.
    parameter_sets: Vec<u8>,
}

impl AvccConverter {
    /// Parses the `avcC` record found in the extradata of the stream.
    pub fn new(extradata: &[u8]) -> Result<Self, ConvertError> {
        let mut cursor = Cursor::new(extradata);

        if cursor.remaining() < 6 {
            return Err(ConvertError::InvalidConfig("record too short"));
        }
        if cursor.get_u8() != 1 {
            return Err(ConvertError::InvalidConfig("unsupported version"));
        }
        // Profile, profile compatibility and level.
        cursor.advance(3);
        let nal_length_size = usize::from(cursor.get_u8() & 0x3) + 1;

        let mut parameter_sets = Vec::new();
        let num_sps = cursor.get_u8() & 0x1f;
        Self::read_parameter_sets(&mut cursor, num_sps, &mut parameter_sets)?;

        if !cursor.has_remaining() {
            return Err(ConvertError::InvalidConfig("missing PPS count"));
        }
        let num_pps = cursor.get_u8();
        Self::read_parameter_sets(&mut cursor, num_pps, &mut parameter_sets)?;

        log::debug!(
            "avcC: NAL length size {}, {} SPS, {} PPS",
            nal_length_size,
            num_sps,
            num_pps
        );

        Ok(Self {
            nal_length_size,
            parameter_sets,
        })
    }

    fn read_parameter_sets(
        cursor: &mut Cursor<&[u8]>,
        count: u8,
        out: &mut Vec<u8>,
    ) -> Result<(), ConvertError> {
        for _ in 0..count {
            if cursor.remaining() < 2 {
                return Err(ConvertError::InvalidConfig("truncated parameter set length"));
            }
            let len = usize::from(cursor.get_u16());
            if cursor.remaining() < len {
                return Err(ConvertError::InvalidConfig("truncated parameter set"));
            }

            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(&cursor.chunk()[..len]);
            cursor.advance(len);
        }

        Ok(())
    }

    /// Number of bytes of the length prefix of each NAL unit.
    pub fn nal_length_size(&self) -> usize {
        self.nal_length_size
    }

    /// Parameter sets of the record, in Annex B format.
    pub fn parameter_sets(&self) -> &[u8] {
        &self.parameter_sets
    }
}

impl BitstreamConverter for AvccConverter {
    fn convert(&mut self, data: &[u8]) -> Result<Vec<u8>, ConvertError> {
        let mut out = Vec::with_capacity(data.len() + self.parameter_sets.len() + START_CODE.len());
        let mut has_sps = false;
        let mut pos = 0;

        while pos < data.len() {
            let remaining = data.len() - pos;
            if remaining < self.nal_length_size {
                return Err(ConvertError::Truncated {
                    len: self.nal_length_size,
                    remaining,
                });
            }

            let len = BigEndian::read_uint(&data[pos..], self.nal_length_size) as usize;
            pos += self.nal_length_size;
            let remaining = data.len() - pos;
            if len > remaining {
                return Err(ConvertError::Truncated { len, remaining });
            }

            let nalu = &data[pos..pos + len];
            pos += len;

            let Some(header) = nalu.first() else {
                continue;
            };
            match header & NALU_TYPE_MASK {
                NALU_TYPE_SPS => has_sps = true,
                NALU_TYPE_IDR if !has_sps => {
                    out.extend_from_slice(&self.parameter_sets);
                    // Once per packet.
                    has_sps = true;
                }
                _ => (),
            }

            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nalu);
        }

        Ok(out)
    }
}
