//
//! Copyright 2020 Alibaba Group Holding Limited.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.

//! Framing of logical records into physical buffers and back.
//!
//! A transfer is one header followed by `num_tuples` length-prefixed records:
//!
//! ```text
//! | source u32 | target u32 | edge u16 | flags u16 | num_tuples u32 | len u32 | bytes | len u32 | bytes | ...
//! ```
//!
//! The byte stream of a transfer is cut into buffers of the channel's buffer size
//! without regard to record boundaries; [`InMessage`] puts the records back together.

use std::fmt::{Display, Formatter};

use bitflags::bitflags;

use crate::{EdgeId, TaskId};

mod in_message;
mod out_message;

pub use in_message::InMessage;
pub use out_message::OutMessage;

bitflags! {
    pub struct MessageFlags: u16 {
        /// The last data transfer of a source for a target;
        const LAST = 0b0000_0001;
        /// Sentinel transfer carrying no data;
        const END = 0b0000_0010;
        /// The source has no more data for the target after this transfer;
        const SYNC_MESSAGE = 0b0000_0100;
        /// The source finished without any data left for the target;
        const SYNC_EMPTY = 0b0000_1000;
        /// The transfer carries a barrier payload instead of records;
        const BARRIER = 0b0001_0000;
        /// Last transfer of a source with records;
        const FINAL = Self::LAST.bits | Self::SYNC_MESSAGE.bits;
        /// Last transfer of a source without records;
        const FINAL_EMPTY = Self::END.bits | Self::SYNC_EMPTY.bits;
    }
}

pub const HEADER_SIZE: usize = 16;
/// Size of the length prefix before every record;
pub const LENGTH_PREFIX: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageHeader {
    pub source: TaskId,
    pub target: TaskId,
    pub edge: EdgeId,
    pub flags: MessageFlags,
    pub num_tuples: u32,
}

impl MessageHeader {
    pub fn new(source: TaskId, target: TaskId, edge: EdgeId, flags: MessageFlags, num_tuples: u32) -> Self {
        MessageHeader { source, target, edge, flags, num_tuples }
    }

    pub fn write_to(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.source.to_be_bytes());
        bytes.extend_from_slice(&self.target.to_be_bytes());
        bytes.extend_from_slice(&self.edge.to_be_bytes());
        bytes.extend_from_slice(&self.flags.bits().to_be_bytes());
        bytes.extend_from_slice(&self.num_tuples.to_be_bytes());
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes; `None` if there are not
    /// enough bytes or unknown flag bits are set;
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let u32_at = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let u16_at = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
        let flags = MessageFlags::from_bits(u16_at(10))?;
        Some(MessageHeader {
            source: u32_at(0),
            target: u32_at(4),
            edge: u16_at(8),
            flags,
            num_tuples: u32_at(12),
        })
    }

    #[inline]
    pub fn is_barrier(&self) -> bool {
        self.flags.contains(MessageFlags::BARRIER)
    }
}

impl Display for MessageHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} -> {} @ edge {}, {:?}, tuples={}]",
            self.source, self.target, self.edge, self.flags, self.num_tuples
        )
    }
}

/// Records carried by one transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload<T> {
    Single(T),
    Aggregated(Vec<T>),
}

impl<T> Payload<T> {
    pub fn len(&self) -> usize {
        match self {
            Payload::Single(_) => 1,
            Payload::Aggregated(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(self) -> Vec<T> {
        match self {
            Payload::Single(item) => vec![item],
            Payload::Aggregated(v) => v,
        }
    }
}

impl<T> From<Vec<T>> for Payload<T> {
    fn from(mut records: Vec<T>) -> Self {
        if records.len() == 1 {
            if let Some(item) = records.pop() {
                return Payload::Single(item);
            }
        }
        Payload::Aggregated(records)
    }
}

impl<T> IntoIterator for Payload<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.into_vec().into_iter()
    }
}

/// A reassembled transfer as seen by final receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming<T> {
    /// No data, only the flags of the transfer matter;
    Empty,
    Data(Payload<T>),
    Barrier(Vec<u8>),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_layout() {
        let header = MessageHeader::new(1, 2, 3, MessageFlags::LAST | MessageFlags::SYNC_MESSAGE, 7);
        let mut bytes = vec![];
        header.write_to(&mut bytes);
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[8..10], &[0, 3]);
        assert_eq!(&bytes[10..12], &[0, 5]);
        assert_eq!(MessageHeader::parse(&bytes), Some(header));
        assert_eq!(MessageHeader::parse(&bytes[..15]), None);
    }

    #[test]
    fn unknown_flags_are_rejected() {
        let mut bytes = vec![];
        MessageHeader::new(1, 2, 3, MessageFlags::empty(), 0).write_to(&mut bytes);
        bytes[10] = 0x80;
        assert_eq!(MessageHeader::parse(&bytes), None);
    }

    #[test]
    fn payload_shapes() {
        assert_eq!(Payload::from(vec![1]), Payload::Single(1));
        assert_eq!(Payload::from(vec![1, 2]), Payload::Aggregated(vec![1, 2]));
        assert_eq!(Payload::Single(5).into_vec(), vec![5]);
        assert_eq!(Payload::Aggregated(vec![1, 2, 3]).len(), 3);
    }
}
