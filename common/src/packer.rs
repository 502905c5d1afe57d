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

//! The typed packer registry.
//!
//! Every record type that travels through a collective operation declares its
//! semantic [`DataType`] and knows how to pack itself into a byte sequence and
//! back. The registry is the set of [`Packer`] implementations; lookups are
//! resolved at compile time instead of through a runtime table.

use std::fmt::{Display, Formatter};
use std::io;

use crate::codec::{Codec, Decode, Encode};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Empty,
    Byte,
    Boolean,
    Short,
    Integer,
    Long,
    Float,
    Double,
    String,
    ByteArray,
    IntegerArray,
    LongArray,
    DoubleArray,
    Tuple(Box<DataType>, Box<DataType>),
    Object,
}

impl DataType {
    pub fn tuple(key: DataType, value: DataType) -> Self {
        DataType::Tuple(Box::new(key), Box::new(value))
    }

    /// Size in bytes of one packed value, if the type has a fixed width;
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Empty => Some(0),
            DataType::Byte | DataType::Boolean => Some(1),
            DataType::Short => Some(2),
            DataType::Integer | DataType::Float => Some(4),
            DataType::Long | DataType::Double => Some(8),
            DataType::Tuple(k, v) => match (k.fixed_size(), v.fixed_size()) {
                (Some(a), Some(b)) => Some(a + b),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn is_keyed(&self) -> bool {
        matches!(self, DataType::Tuple(_, _))
    }

    pub fn key_type(&self) -> Option<&DataType> {
        match self {
            DataType::Tuple(k, _) => Some(k),
            _ => None,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Tuple(k, v) => write!(f, "TUPLE({}, {})", k, v),
            other => write!(f, "{}", format!("{:?}", other).to_uppercase()),
        }
    }
}

pub trait Packer: Codec {
    fn data_type() -> DataType {
        DataType::Object
    }

    fn pack_to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.pack_into(&mut bytes);
        bytes
    }

    fn pack_into(&self, bytes: &mut Vec<u8>) {
        // writing into a vector never fails;
        let _ = self.write_to(bytes);
    }

    /// Unpack a value which must occupy the whole byte slice;
    fn unpack_from_bytes(bytes: &[u8]) -> io::Result<Self> {
        let mut reader = bytes;
        let value = Self::read_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} trailing bytes after unpacking {}", reader.len(), Self::data_type()),
            ));
        }
        Ok(value)
    }
}

macro_rules! register_packer {
    ($ty: ty, $dt: expr) => {
        impl Packer for $ty {
            #[inline]
            fn data_type() -> DataType {
                $dt
            }
        }
    };
}

register_packer!((), DataType::Empty);
register_packer!(u8, DataType::Byte);
register_packer!(bool, DataType::Boolean);
register_packer!(i16, DataType::Short);
register_packer!(u16, DataType::Short);
register_packer!(i32, DataType::Integer);
register_packer!(u32, DataType::Integer);
register_packer!(i64, DataType::Long);
register_packer!(u64, DataType::Long);
register_packer!(f32, DataType::Float);
register_packer!(f64, DataType::Double);
register_packer!(String, DataType::String);

impl<T: Packer> Packer for Vec<T> {
    fn data_type() -> DataType {
        match T::data_type() {
            DataType::Byte => DataType::ByteArray,
            DataType::Integer => DataType::IntegerArray,
            DataType::Long => DataType::LongArray,
            DataType::Double => DataType::DoubleArray,
            _ => DataType::Object,
        }
    }
}

impl<T: Packer> Packer for Option<T> {}

impl<K: Packer, V: Packer> Packer for (K, V) {
    fn data_type() -> DataType {
        DataType::tuple(K::data_type(), V::data_type())
    }
}

impl<A: Packer, B: Packer, C: Packer> Packer for (A, B, C) {}

/// Pack any value through its registered packer;
pub fn pack_to_bytes<T: Packer>(value: &T) -> Vec<u8> {
    value.pack_to_bytes()
}

pub fn unpack_from_bytes<T: Packer>(bytes: &[u8]) -> io::Result<T> {
    T::unpack_from_bytes(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registered_types() {
        assert_eq!(i32::data_type(), DataType::Integer);
        assert_eq!(Vec::<i32>::data_type(), DataType::IntegerArray);
        assert_eq!(Vec::<u8>::data_type(), DataType::ByteArray);
        assert_eq!(Vec::<String>::data_type(), DataType::Object);
        assert_eq!(<(i32, String)>::data_type(), DataType::tuple(DataType::Integer, DataType::String));
        assert_eq!(<(i32, i64)>::data_type().fixed_size(), Some(12));
        assert_eq!(<(i32, String)>::data_type().fixed_size(), None);
        assert_eq!(<(i32, String)>::data_type().to_string(), "TUPLE(INTEGER, STRING)");
    }

    #[test]
    fn pack_and_unpack() {
        let bytes = pack_to_bytes(&(7i32, "seven".to_owned()));
        assert_eq!(bytes.len(), 4 + 4 + 5);
        let (k, v): (i32, String) = unpack_from_bytes(&bytes).unwrap();
        assert_eq!(k, 7);
        assert_eq!(v, "seven");
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = pack_to_bytes(&42i32);
        bytes.push(0);
        let err = unpack_from_bytes::<i32>(&bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
