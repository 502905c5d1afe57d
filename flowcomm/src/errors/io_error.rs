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

use std::error::Error;
use std::fmt::Display;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::{PullError, PushError};
use crate::TaskId;

#[derive(Error, Debug)]
pub enum IOErrorKind {
    /// Malformed framing of one transfer from `src` to `dst`;
    #[error("protocol violation from task {src} to task {dst}: {reason}")]
    Protocol { src: TaskId, dst: TaskId, reason: String },
    #[error("spill file {path:?} failure: {source}")]
    Spill {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("decode record failure: {0}")]
    Decode(#[source] io::Error),
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    #[error("push errors {source};")]
    Push {
        #[from]
        source: PushError,
    },
    #[error("pull errors {source};")]
    Pull {
        #[from]
        source: PullError,
    },
    #[error("io errors {source};")]
    SystemIO {
        #[from]
        source: io::Error,
    },
}

impl IOErrorKind {
    pub fn protocol<S: Into<String>>(src: TaskId, dst: TaskId, reason: S) -> Self {
        IOErrorKind::Protocol { src, dst, reason: reason.into() }
    }

    pub fn spill<P: Into<PathBuf>>(path: P, source: io::Error) -> Self {
        IOErrorKind::Spill { path: path.into(), source }
    }
}

#[derive(Debug)]
pub struct IOError {
    kind: IOErrorKind,
    origin: Option<String>,
}

impl IOError {
    pub fn new<K: Into<IOErrorKind>>(kind: K) -> Self {
        IOError { kind: kind.into(), origin: None }
    }

    pub fn set_origin(&mut self, origin: String) {
        self.origin = Some(origin);
    }

    pub fn kind(&self) -> &IOErrorKind {
        &self.kind
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self.kind, IOErrorKind::Protocol { .. })
    }

    pub fn is_spill(&self) -> bool {
        matches!(self.kind, IOErrorKind::Spill { .. })
    }
}

impl From<IOErrorKind> for IOError {
    fn from(e: IOErrorKind) -> Self {
        IOError::new(e)
    }
}

impl From<io::Error> for IOError {
    fn from(e: io::Error) -> Self {
        IOError::new(IOErrorKind::SystemIO { source: e })
    }
}

impl From<PushError> for IOError {
    fn from(e: PushError) -> Self {
        IOError::new(IOErrorKind::Push { source: e })
    }
}

impl From<PullError> for IOError {
    fn from(e: PullError) -> Self {
        IOError::new(IOErrorKind::Pull { source: e })
    }
}

impl Display for IOError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "IOError({})", self.kind)?;
        if let Some(ref origin) = self.origin {
            write!(f, ", occurred at: {}", origin)?;
        }
        write!(f, " ;")
    }
}

impl Error for IOError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.kind)
    }
}
