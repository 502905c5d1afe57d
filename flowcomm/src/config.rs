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

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::BuildOpError;

#[macro_export]
macro_rules! configure_with_default {
    ($ty:ty, $name:expr, $value: expr) => {{
        std::env::var($name)
            .map(|s| s.parse::<$ty>().unwrap_or($value))
            .unwrap_or($value)
    }};
}

lazy_static! {
    /// capacity of every per-(target, source) pending queue;
    pub static ref SEND_PENDING_MAX: usize = configure_with_default!(usize, "FLOWCOMM_SEND_PENDING_MAX", 128);
    pub static ref SHUFFLE_MAX_BYTES_IN_MEMORY: usize =
        configure_with_default!(usize, "FLOWCOMM_SHUFFLE_MAX_BYTES_IN_MEMORY", 64 << 20);
    pub static ref SHUFFLE_MAX_RECORDS_IN_MEMORY: usize =
        configure_with_default!(usize, "FLOWCOMM_SHUFFLE_MAX_RECORDS_IN_MEMORY", 65536);
    pub static ref BUFFER_SIZE: usize = configure_with_default!(usize, "FLOWCOMM_BUFFER_SIZE", 8192);
    pub static ref BUFFER_POOL_SIZE: usize = configure_with_default!(usize, "FLOWCOMM_BUFFER_POOL_SIZE", 512);
    pub static ref PARTIAL_BATCH_SIZE: usize = configure_with_default!(usize, "FLOWCOMM_PARTIAL_BATCH_SIZE", 64);
    pub static ref PARTIAL_KEY_LIMIT: usize = configure_with_default!(usize, "FLOWCOMM_PARTIAL_KEY_LIMIT", 1024);
    pub static ref MAX_OBJECT_SIZE: usize = configure_with_default!(usize, "FLOWCOMM_MAX_OBJECT_SIZE", 64 << 20);
    pub static ref USE_DISK: bool = configure_with_default!(bool, "FLOWCOMM_USE_DISK", true);
}

/// Smallest physical buffer able to carry a header and a few length prefixes;
pub const MIN_BUFFER_SIZE: usize = 32;

/// Configuration as written in a toml file, every key is optional;
#[derive(Debug, Default, Deserialize)]
pub struct Configuration {
    pub send_pending_max: Option<usize>,
    pub shuffle_max_bytes_in_memory: Option<usize>,
    pub shuffle_max_records_in_memory: Option<usize>,
    pub shuffle_dirs: Option<Vec<PathBuf>>,
    pub streaming: Option<bool>,
    pub use_disk: Option<bool>,
    pub buffer_size: Option<usize>,
    pub buffer_pool_size: Option<usize>,
    pub partial_batch_size: Option<usize>,
    pub partial_key_limit: Option<usize>,
    pub max_object_size: Option<usize>,
}

impl Configuration {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

pub fn read_from<P: AsRef<Path>>(path: P) -> Result<Configuration, BuildOpError> {
    let config_str = std::fs::read_to_string(path)?;
    Ok(Configuration::parse(&config_str)?)
}

/// An immutable configuration snapshot.
///
/// Operations copy the snapshot they are built with; derived settings are produced
/// with the `with_*` methods, which return a new value and never touch the original.
#[derive(Debug, Clone, PartialEq)]
pub struct CommConfig {
    send_pending_max: usize,
    shuffle_max_bytes_in_memory: usize,
    shuffle_max_records_in_memory: usize,
    shuffle_dirs: Vec<PathBuf>,
    streaming: bool,
    use_disk: bool,
    buffer_size: usize,
    buffer_pool_size: usize,
    partial_batch_size: usize,
    partial_key_limit: usize,
    max_object_size: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        CommConfig {
            send_pending_max: *SEND_PENDING_MAX,
            shuffle_max_bytes_in_memory: *SHUFFLE_MAX_BYTES_IN_MEMORY,
            shuffle_max_records_in_memory: *SHUFFLE_MAX_RECORDS_IN_MEMORY,
            shuffle_dirs: vec![std::env::temp_dir().join("flowcomm")],
            streaming: false,
            use_disk: *USE_DISK,
            buffer_size: *BUFFER_SIZE,
            buffer_pool_size: *BUFFER_POOL_SIZE,
            partial_batch_size: *PARTIAL_BATCH_SIZE,
            partial_key_limit: *PARTIAL_KEY_LIMIT,
            max_object_size: *MAX_OBJECT_SIZE,
        }
    }
}

impl From<Configuration> for CommConfig {
    fn from(raw: Configuration) -> Self {
        let default = CommConfig::default();
        CommConfig {
            send_pending_max: raw.send_pending_max.unwrap_or(default.send_pending_max),
            shuffle_max_bytes_in_memory: raw
                .shuffle_max_bytes_in_memory
                .unwrap_or(default.shuffle_max_bytes_in_memory),
            shuffle_max_records_in_memory: raw
                .shuffle_max_records_in_memory
                .unwrap_or(default.shuffle_max_records_in_memory),
            shuffle_dirs: raw.shuffle_dirs.unwrap_or(default.shuffle_dirs),
            streaming: raw.streaming.unwrap_or(default.streaming),
            use_disk: raw.use_disk.unwrap_or(default.use_disk),
            buffer_size: raw.buffer_size.unwrap_or(default.buffer_size),
            buffer_pool_size: raw.buffer_pool_size.unwrap_or(default.buffer_pool_size),
            partial_batch_size: raw.partial_batch_size.unwrap_or(default.partial_batch_size),
            partial_key_limit: raw.partial_key_limit.unwrap_or(default.partial_key_limit),
            max_object_size: raw.max_object_size.unwrap_or(default.max_object_size),
        }
    }
}

impl CommConfig {
    pub fn validate(&self) -> Result<(), BuildOpError> {
        if self.send_pending_max == 0 {
            return BuildOpError::invalid_config("send_pending_max must be positive");
        }
        if self.buffer_size < MIN_BUFFER_SIZE {
            return BuildOpError::invalid_config(format!(
                "buffer_size {} is smaller than {}",
                self.buffer_size, MIN_BUFFER_SIZE
            ));
        }
        if self.buffer_pool_size == 0 {
            return BuildOpError::invalid_config("buffer_pool_size must be positive");
        }
        if self.partial_batch_size == 0 || self.partial_key_limit == 0 {
            return BuildOpError::invalid_config("partial flush limits must be positive");
        }
        if self.shuffle_max_records_in_memory == 0 || self.shuffle_max_bytes_in_memory == 0 {
            return BuildOpError::invalid_config("shuffle memory bounds must be positive");
        }
        if self.max_object_size == 0 || self.max_object_size > u32::MAX as usize {
            return BuildOpError::invalid_config(format!("max_object_size {} out of range", self.max_object_size));
        }
        if self.use_disk && self.shuffle_dirs.is_empty() {
            return BuildOpError::invalid_config("no shuffle directory configured");
        }
        Ok(())
    }

    pub fn send_pending_max(&self) -> usize {
        self.send_pending_max
    }

    pub fn shuffle_max_bytes_in_memory(&self) -> usize {
        self.shuffle_max_bytes_in_memory
    }

    pub fn shuffle_max_records_in_memory(&self) -> usize {
        self.shuffle_max_records_in_memory
    }

    pub fn shuffle_dirs(&self) -> &[PathBuf] {
        &self.shuffle_dirs
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn use_disk(&self) -> bool {
        self.use_disk
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn buffer_pool_size(&self) -> usize {
        self.buffer_pool_size
    }

    pub fn partial_batch_size(&self) -> usize {
        self.partial_batch_size
    }

    pub fn partial_key_limit(&self) -> usize {
        self.partial_key_limit
    }

    pub fn max_object_size(&self) -> usize {
        self.max_object_size
    }

    pub fn with_send_pending_max(&self, capacity: usize) -> Self {
        CommConfig { send_pending_max: capacity, ..self.clone() }
    }

    pub fn with_shuffle_max_bytes_in_memory(&self, bytes: usize) -> Self {
        CommConfig { shuffle_max_bytes_in_memory: bytes, ..self.clone() }
    }

    pub fn with_shuffle_max_records_in_memory(&self, records: usize) -> Self {
        CommConfig { shuffle_max_records_in_memory: records, ..self.clone() }
    }

    pub fn with_shuffle_dirs<P: Into<PathBuf>, I: IntoIterator<Item = P>>(&self, dirs: I) -> Self {
        let shuffle_dirs = dirs.into_iter().map(|p| p.into()).collect();
        CommConfig { shuffle_dirs, ..self.clone() }
    }

    pub fn with_streaming(&self, streaming: bool) -> Self {
        CommConfig { streaming, ..self.clone() }
    }

    pub fn with_use_disk(&self, use_disk: bool) -> Self {
        CommConfig { use_disk, ..self.clone() }
    }

    pub fn with_buffer_size(&self, buffer_size: usize) -> Self {
        CommConfig { buffer_size, ..self.clone() }
    }

    pub fn with_buffer_pool_size(&self, buffer_pool_size: usize) -> Self {
        CommConfig { buffer_pool_size, ..self.clone() }
    }

    pub fn with_partial_batch_size(&self, partial_batch_size: usize) -> Self {
        CommConfig { partial_batch_size, ..self.clone() }
    }

    pub fn with_partial_key_limit(&self, partial_key_limit: usize) -> Self {
        CommConfig { partial_key_limit, ..self.clone() }
    }

    pub fn with_max_object_size(&self, max_object_size: usize) -> Self {
        CommConfig { max_object_size, ..self.clone() }
    }
}
