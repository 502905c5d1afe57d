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

use flowcomm_common::packer::Packer;

use super::{MessageFlags, MessageHeader, HEADER_SIZE, LENGTH_PREFIX};
use crate::channel::DataBuffer;
use crate::errors::{IOErrorKind, IOResult};
use crate::{EdgeId, TaskId};

/// One outgoing transfer being framed; the tuple count of the header is the number
/// of records pushed.
pub struct OutMessage {
    header: MessageHeader,
    body: Vec<u8>,
}

impl OutMessage {
    pub fn new(source: TaskId, target: TaskId, edge: EdgeId, flags: MessageFlags) -> Self {
        OutMessage { header: MessageHeader::new(source, target, edge, flags, 0), body: vec![] }
    }

    pub fn push<T: Packer>(&mut self, record: &T, max_object_size: usize) -> IOResult<()> {
        let start = self.body.len();
        self.body.extend_from_slice(&[0; LENGTH_PREFIX]);
        record.pack_into(&mut self.body);
        let len = self.body.len() - start - LENGTH_PREFIX;
        if len > max_object_size {
            self.body.truncate(start);
            throw_io_error!(IOErrorKind::protocol(
                self.header.source,
                self.header.target,
                format!("record of {} bytes exceeds limit {}", len, max_object_size)
            ));
        }
        self.body[start..start + LENGTH_PREFIX].copy_from_slice(&(len as u32).to_be_bytes());
        self.header.num_tuples += 1;
        Ok(())
    }

    pub fn push_bytes(&mut self, bytes: &[u8], max_object_size: usize) -> IOResult<()> {
        if bytes.len() > max_object_size {
            throw_io_error!(IOErrorKind::protocol(
                self.header.source,
                self.header.target,
                format!("record of {} bytes exceeds limit {}", bytes.len(), max_object_size)
            ));
        }
        self.body.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.body.extend_from_slice(bytes);
        self.header.num_tuples += 1;
        Ok(())
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Total framed size;
    pub fn len(&self) -> usize {
        HEADER_SIZE + self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.header.num_tuples == 0
    }

    /// Number of buffers of `buffer_size` bytes the transfer occupies;
    pub fn num_buffers(&self, buffer_size: usize) -> usize {
        (self.len() + buffer_size - 1) / buffer_size
    }

    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len());
        self.header.write_to(&mut bytes);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Fill `buffers` in order with the framed bytes; there must be exactly
    /// [`num_buffers`](OutMessage::num_buffers) of them;
    pub fn split_into(self, mut buffers: Vec<DataBuffer>) -> Vec<DataBuffer> {
        let bytes = self.into_bytes();
        let mut written = 0;
        for buf in buffers.iter_mut() {
            written += buf.write(&bytes[written..]);
        }
        assert_eq!(written, bytes.len(), "not enough buffers to frame a transfer;");
        buffers
    }
}
