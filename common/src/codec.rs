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

//! Big-endian binary codec used for every record that crosses a channel or is
//! written into a spill file.

use std::io::{self, Read, Write};

pub trait WriteExt: Write {
    fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.write_all(&[v])
    }

    fn write_u16(&mut self, v: u16) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_u64(&mut self, v: u64) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_i16(&mut self, v: i16) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_i32(&mut self, v: i32) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_i64(&mut self, v: i64) -> io::Result<()> {
        self.write_all(&v.to_be_bytes())
    }

    fn write_f32(&mut self, v: f32) -> io::Result<()> {
        self.write_all(&v.to_bits().to_be_bytes())
    }

    fn write_f64(&mut self, v: f64) -> io::Result<()> {
        self.write_all(&v.to_bits().to_be_bytes())
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

pub trait ReadExt: Read {
    fn read_u8(&mut self) -> io::Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_u16(&mut self) -> io::Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_be_bytes(b))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_i16(&mut self) -> io::Result<i16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(i16::from_be_bytes(b))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_be_bytes(b))
    }

    fn read_i64(&mut self) -> io::Result<i64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(i64::from_be_bytes(b))
    }

    fn read_f32(&mut self) -> io::Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    fn read_f64(&mut self) -> io::Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }
}

impl<R: Read + ?Sized> ReadExt for R {}

pub trait Encode {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()>;
}

pub trait Decode: Sized {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self>;
}

pub trait Codec: Encode + Decode {}

impl<T: Encode + Decode> Codec for T {}

macro_rules! impl_primitive_codec {
    ($ty: ty, $write: ident, $read: ident) => {
        impl Encode for $ty {
            #[inline]
            fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
                writer.$write(*self)
            }
        }

        impl Decode for $ty {
            #[inline]
            fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
                reader.$read()
            }
        }
    };
}

impl_primitive_codec!(u8, write_u8, read_u8);
impl_primitive_codec!(u16, write_u16, read_u16);
impl_primitive_codec!(u32, write_u32, read_u32);
impl_primitive_codec!(u64, write_u64, read_u64);
impl_primitive_codec!(i16, write_i16, read_i16);
impl_primitive_codec!(i32, write_i32, read_i32);
impl_primitive_codec!(i64, write_i64, read_i64);
impl_primitive_codec!(f32, write_f32, read_f32);
impl_primitive_codec!(f64, write_f64, read_f64);

impl Encode for bool {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(*self as u8)
    }
}

impl Decode for bool {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "invalid bool")),
        }
    }
}

impl Encode for () {
    fn write_to<W: WriteExt>(&self, _writer: &mut W) -> io::Result<()> {
        Ok(())
    }
}

impl Decode for () {
    fn read_from<R: ReadExt>(_reader: &mut R) -> io::Result<Self> {
        Ok(())
    }
}

impl Encode for String {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        let bytes = self.as_bytes();
        writer.write_u32(bytes.len() as u32)?;
        writer.write_all(bytes)
    }
}

impl Decode for String {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        let len = reader.read_u32()? as usize;
        // the length is untrusted, only what is actually there gets allocated;
        let mut bytes = Vec::with_capacity(std::cmp::min(len, 4096));
        reader.by_ref().take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("string of {} bytes declared, {} available", len, bytes.len()),
            ));
        }
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u32(self.len() as u32)?;
        for item in self.iter() {
            item.write_to(writer)?;
        }
        Ok(())
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        let len = reader.read_u32()? as usize;
        // the length is untrusted, don't pre-allocate more than a page of items;
        let mut vec = Vec::with_capacity(std::cmp::min(len, 4096));
        for _ in 0..len {
            vec.push(T::read_from(reader)?);
        }
        Ok(vec)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Some(v) => {
                writer.write_u8(1)?;
                v.write_to(writer)
            }
            None => writer.write_u8(0),
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::read_from(reader)?)),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "invalid option tag")),
        }
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.write_to(writer)?;
        self.1.write_to(writer)
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        let a = A::read_from(reader)?;
        let b = B::read_from(reader)?;
        Ok((a, b))
    }
}

impl<A: Encode, B: Encode, C: Encode> Encode for (A, B, C) {
    fn write_to<W: WriteExt>(&self, writer: &mut W) -> io::Result<()> {
        self.0.write_to(writer)?;
        self.1.write_to(writer)?;
        self.2.write_to(writer)
    }
}

impl<A: Decode, B: Decode, C: Decode> Decode for (A, B, C) {
    fn read_from<R: ReadExt>(reader: &mut R) -> io::Result<Self> {
        let a = A::read_from(reader)?;
        let b = B::read_from(reader)?;
        let c = C::read_from(reader)?;
        Ok((a, b, c))
    }
}
