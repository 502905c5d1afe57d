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

use std::collections::VecDeque;

use super::{MessageHeader, HEADER_SIZE, LENGTH_PREFIX};
use crate::channel::DataBuffer;
use crate::errors::{IOErrorKind, IOResult};
use crate::{EdgeId, TaskId};

/// Reassembly state of one transfer from `source` to `target`.
///
/// Buffers may be cut anywhere, inside a record or inside a length prefix; the
/// bytes of an unfinished prefix are kept until the next buffer completes it.
/// All buffers are held until every declared record was delimited, then handed
/// back together by [`into_parts`](InMessage::into_parts).
pub struct InMessage {
    edge: EdgeId,
    source: TaskId,
    target: TaskId,
    max_object_size: usize,
    header: Option<MessageHeader>,
    buffers: Vec<DataBuffer>,
    records: VecDeque<Vec<u8>>,
    /// Declared length of the record being read, `None` while its prefix is incomplete;
    current_len: Option<usize>,
    prefix: [u8; LENGTH_PREFIX],
    prefix_read: usize,
    current: Vec<u8>,
    seen: u32,
    complete: bool,
}

impl InMessage {
    pub fn new(edge: EdgeId, source: TaskId, target: TaskId, max_object_size: usize) -> Self {
        InMessage {
            edge,
            source,
            target,
            max_object_size,
            header: None,
            buffers: vec![],
            records: VecDeque::new(),
            current_len: None,
            prefix: [0; LENGTH_PREFIX],
            prefix_read: 0,
            current: vec![],
            seen: 0,
            complete: false,
        }
    }

    /// Add the next buffer of the transfer, returns `true` once every record declared
    /// by the header has been delimited.
    ///
    /// Any error is fatal for this transfer; the buffer is kept so that
    /// [`take_buffers`](InMessage::take_buffers) can still release it.
    pub fn add_buffer(&mut self, buffer: DataBuffer) -> IOResult<bool> {
        let result = self.consume(buffer.as_slice());
        self.buffers.push(buffer);
        result
    }

    fn consume(&mut self, data: &[u8]) -> IOResult<bool> {
        if self.complete {
            throw_io_error!(IOErrorKind::protocol(self.source, self.target, "buffer after a complete transfer"));
        }
        let mut pos = 0;
        if self.header.is_none() {
            let header = match MessageHeader::parse(data) {
                Some(header) => header,
                None => throw_io_error!(IOErrorKind::protocol(
                    self.source,
                    self.target,
                    format!("malformed header in a buffer of {} bytes", data.len())
                )),
            };
            if header.source != self.source || header.target != self.target || header.edge != self.edge {
                throw_io_error!(IOErrorKind::protocol(
                    self.source,
                    self.target,
                    format!("header {} doesn't match the endpoint", header)
                ));
            }
            trace!("start transfer {};", header);
            self.header = Some(header);
            pos = HEADER_SIZE;
        }
        let declared = self.header.map(|h| h.num_tuples).unwrap_or(0);

        loop {
            if self.seen == declared {
                self.complete = true;
                if pos < data.len() {
                    throw_io_error!(IOErrorKind::protocol(
                        self.source,
                        self.target,
                        format!("{} bytes after the declared {} records", data.len() - pos, declared)
                    ));
                }
                break;
            }
            if pos == data.len() {
                break;
            }
            match self.current_len {
                None => {
                    let take = std::cmp::min(LENGTH_PREFIX - self.prefix_read, data.len() - pos);
                    self.prefix[self.prefix_read..self.prefix_read + take].copy_from_slice(&data[pos..pos + take]);
                    self.prefix_read += take;
                    pos += take;
                    if self.prefix_read == LENGTH_PREFIX {
                        self.prefix_read = 0;
                        let len = u32::from_be_bytes(self.prefix) as usize;
                        if len > self.max_object_size {
                            throw_io_error!(IOErrorKind::protocol(
                                self.source,
                                self.target,
                                format!("record length {} exceeds limit {}", len, self.max_object_size)
                            ));
                        }
                        self.current = Vec::with_capacity(len);
                        self.current_len = Some(len);
                        self.finish_record_if_read(len);
                    }
                }
                Some(len) => {
                    let take = std::cmp::min(len - self.current.len(), data.len() - pos);
                    self.current.extend_from_slice(&data[pos..pos + take]);
                    pos += take;
                    self.finish_record_if_read(len);
                }
            }
        }
        Ok(self.complete)
    }

    #[inline]
    fn finish_record_if_read(&mut self, len: usize) {
        if self.current.len() == len {
            self.records.push_back(std::mem::take(&mut self.current));
            self.current_len = None;
            self.seen += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn header(&self) -> Option<&MessageHeader> {
        self.header.as_ref()
    }

    /// Records delimited so far;
    pub fn seen_objects(&self) -> u32 {
        self.seen
    }

    /// Bytes already read of the record in progress;
    pub fn bytes_read_for_current(&self) -> usize {
        match self.current_len {
            Some(_) => self.current.len(),
            None => self.prefix_read,
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffers.len()
    }

    /// Remove the buffers held so far, used to release them after a failure;
    pub fn take_buffers(&mut self) -> Vec<DataBuffer> {
        std::mem::take(&mut self.buffers)
    }

    /// Split a complete transfer into its header, its records and the buffers to release;
    pub fn into_parts(self) -> Option<(MessageHeader, Vec<Vec<u8>>, Vec<DataBuffer>)> {
        if !self.complete {
            return None;
        }
        let header = self.header?;
        Some((header, self.records.into(), self.buffers))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::{MessageFlags, OutMessage};

    fn frame(records: &[Vec<u8>]) -> Vec<u8> {
        let mut out = OutMessage::new(1, 2, 0, MessageFlags::empty());
        for r in records {
            out.push_bytes(r, 1 << 20).unwrap();
        }
        out.into_bytes()
    }

    fn reassemble(bytes: &[u8], cuts: &[usize]) -> IOResult<(bool, Vec<Vec<u8>>)> {
        let mut msg = InMessage::new(0, 1, 2, 1 << 20);
        let mut last = 0;
        let mut complete = false;
        for &cut in cuts.iter().chain(std::iter::once(&bytes.len())) {
            complete = msg.add_buffer(DataBuffer::from_bytes(bytes[last..cut].to_vec()))?;
            last = cut;
        }
        let records = if complete { msg.into_parts().unwrap().1 } else { vec![] };
        Ok((complete, records))
    }

    fn sample() -> Vec<Vec<u8>> {
        vec![vec![7; 10], vec![], vec![1, 2, 3], vec![9; 33]]
    }

    #[test]
    fn whole_transfer_in_one_buffer() {
        let bytes = frame(&sample());
        let (complete, records) = reassemble(&bytes, &[]).unwrap();
        assert!(complete);
        assert_eq!(records, sample());
    }

    #[test]
    fn every_cut_position() {
        let bytes = frame(&sample());
        for cut in HEADER_SIZE..bytes.len() {
            let (complete, records) = reassemble(&bytes, &[cut]).unwrap();
            assert!(complete, "cut at {}", cut);
            assert_eq!(records, sample(), "cut at {}", cut);
        }
    }

    #[test]
    fn remaining_bytes_around_a_length_prefix() {
        // the first record starts right after the header, cut the first buffer so
        // that 0, 1, 3, 4 and 5 bytes of the second record's prefix region remain;
        let records = vec![vec![5; 8], vec![6; 8]];
        let bytes = frame(&records);
        let second_prefix = HEADER_SIZE + LENGTH_PREFIX + 8;
        for remaining in [0usize, 1, 3, 4, 5] {
            let cut = second_prefix + remaining;
            let mut msg = InMessage::new(0, 1, 2, 1 << 20);
            assert!(!msg.add_buffer(DataBuffer::from_bytes(bytes[..cut].to_vec())).unwrap());
            assert_eq!(msg.seen_objects(), 1);
            // a complete prefix starts the record body;
            let expect_read = if remaining < LENGTH_PREFIX { remaining } else { remaining - LENGTH_PREFIX };
            assert_eq!(msg.bytes_read_for_current(), expect_read, "remaining {}", remaining);
            assert!(msg.add_buffer(DataBuffer::from_bytes(bytes[cut..].to_vec())).unwrap());
            assert_eq!(msg.into_parts().unwrap().1, records);
        }
    }

    #[test]
    fn prefix_split_three_and_one() {
        let records = vec![vec![42; 12]];
        let bytes = frame(&records);
        let cut = HEADER_SIZE + 3;
        let (complete, split) = reassemble(&bytes, &[cut]).unwrap();
        assert!(complete);
        let (_, whole) = reassemble(&bytes, &[]).unwrap();
        assert_eq!(split, whole);
    }

    #[test]
    fn one_byte_buffers() {
        let bytes = frame(&sample());
        let cuts = (HEADER_SIZE..bytes.len()).collect::<Vec<_>>();
        let (complete, records) = reassemble(&bytes, &cuts).unwrap();
        assert!(complete);
        assert_eq!(records, sample());
    }

    #[test]
    fn empty_transfer() {
        let bytes = frame(&[]);
        let (complete, records) = reassemble(&bytes, &[]).unwrap();
        assert!(complete);
        assert!(records.is_empty());
    }

    #[test]
    fn short_header_is_fatal() {
        let mut msg = InMessage::new(0, 1, 2, 1 << 20);
        let err = msg.add_buffer(DataBuffer::from_bytes(vec![0; HEADER_SIZE - 1])).unwrap_err();
        assert!(err.is_protocol());
        assert_eq!(msg.take_buffers().len(), 1);
    }

    #[test]
    fn bytes_after_declared_records_are_fatal() {
        let mut bytes = frame(&[vec![1, 2]]);
        bytes.push(0);
        assert!(reassemble(&bytes, &[]).unwrap_err().is_protocol());
    }

    #[test]
    fn oversized_length_is_fatal() {
        let bytes = frame(&[vec![0; 64]]);
        let mut msg = InMessage::new(0, 1, 2, 63);
        assert!(msg.add_buffer(DataBuffer::from_bytes(bytes)).unwrap_err().is_protocol());
    }

    #[test]
    fn mismatched_endpoint_is_fatal() {
        let bytes = frame(&[vec![1]]);
        let mut msg = InMessage::new(0, 3, 2, 1 << 20);
        assert!(msg.add_buffer(DataBuffer::from_bytes(bytes)).unwrap_err().is_protocol());
    }
}
