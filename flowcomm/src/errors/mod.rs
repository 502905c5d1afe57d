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

use flowcomm_common::channel::RecvError;
use thiserror::Error;

use crate::{EdgeId, TaskId};

/// Build an [`IOError`] of the given kind and return it from the current function,
/// recording where it happened;
#[macro_export]
macro_rules! throw_io_error {
    ($kind: expr) => {{
        let mut err = $crate::errors::IOError::new($kind);
        err.set_origin(concat!(file!(), ':', line!()).to_owned());
        return Err(err);
    }};
}

mod io_error;
pub use io_error::IOError;
pub use io_error::IOErrorKind;

pub type IOResult<D> = Result<D, IOError>;

#[derive(Error, Debug)]
pub enum PushError {
    #[error("can't push to a closed channel;")]
    AlreadyClosed,
    #[error("push to a disconnected endpoint (edge {edge}, target {target});")]
    Disconnected { edge: EdgeId, target: TaskId },
    #[error("push would block;")]
    WouldBlock,
}

impl PushError {
    pub fn is_would_block(&self) -> bool {
        matches!(self, PushError::WouldBlock)
    }
}

#[derive(Error, Debug)]
pub enum PullError {
    #[error("get eof of channel;")]
    Eof,
    #[error("unexpected eof of channel;")]
    UnexpectedEof,
    #[error("pull from an unregistered endpoint (edge {edge}, target {target});")]
    Unregistered { edge: EdgeId, target: TaskId },
}

impl PullError {
    pub fn is_eof(&self) -> bool {
        matches!(self, PullError::Eof)
    }
}

impl From<RecvError> for PullError {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Eof => PullError::Eof,
            RecvError::UnexpectedEof => PullError::UnexpectedEof,
        }
    }
}

/// Errors detected while an operation is built; they indicate a malformed task graph
/// or configuration and are never retried.
#[derive(Error, Debug)]
pub enum BuildOpError {
    #[error("invalid configuration: {0};")]
    InvalidConfig(String),
    #[error("invalid logical plan: {0};")]
    InvalidPlan(String),
    #[error("unsupported operation: {0};")]
    Unsupported(String),
    #[error("fail to read configuration, caused by {source};")]
    ReadConfig {
        #[from]
        source: std::io::Error,
    },
    #[error("parse configuration failure: {source};")]
    ParseConfig {
        #[from]
        source: toml::de::Error,
    },
}

impl BuildOpError {
    pub(crate) fn invalid_plan<T, S: Into<String>>(msg: S) -> Result<T, Self> {
        Err(BuildOpError::InvalidPlan(msg.into()))
    }

    pub(crate) fn invalid_config<T, S: Into<String>>(msg: S) -> Result<T, Self> {
        Err(BuildOpError::InvalidConfig(msg.into()))
    }
}
