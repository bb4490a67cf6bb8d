//! Named tensor list and its binary encoding.
//!
//! File format (`*.tst`), all integers and floats little-endian:
//!
//! ```text
//! header:  ASCII "tensors" NUL-padded to 10 bytes
//! count:   u32
//! per item:
//!   name_size:  u64
//!   name_bytes: name_size bytes
//!   width:      u32
//!   height:     u32
//!   depth:      u32
//!   data:       width*height*depth f32 values
//! ```

use super::Tensor;
use crate::errors::{NnError, NnResult};
use crate::types::Shape;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use std::path::Path;

pub const TST_HEADER: &[u8; 10] = b"tensors\0\0\0";

/// Ordered sequence of (name, tensor) pairs. Names are not required to be
/// unique; `get` returns the first match.
#[derive(Debug, Default)]
pub struct TensorList {
    items: Vec<(String, Tensor)>,
}

impl TensorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.items.push((name.into(), tensor));
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.items
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tensor)> {
        self.items.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn to_bytes(&self) -> NnResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(TST_HEADER);
        buf.write_u32::<LittleEndian>(self.items.len() as u32)?;

        for (name, tensor) in &self.items {
            buf.write_u64::<LittleEndian>(name.len() as u64)?;
            buf.extend_from_slice(name.as_bytes());

            let shape = tensor.shape();
            buf.write_u32::<LittleEndian>(shape.width)?;
            buf.write_u32::<LittleEndian>(shape.height)?;
            buf.write_u32::<LittleEndian>(shape.depth)?;
            for &v in tensor.data() {
                buf.write_f32::<LittleEndian>(v)?;
            }
        }

        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> NnResult<Self> {
        if bytes.len() < TST_HEADER.len() || &bytes[..TST_HEADER.len()] != TST_HEADER {
            return Err(NnError::Parse("tensor header not found".into()));
        }

        let mut cur = Cursor::new(&bytes[TST_HEADER.len()..]);
        let truncated = |_| NnError::Parse("truncated tensor stream".into());

        let count = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut out = TensorList::new();

        for _ in 0..count {
            let name_size = cur.read_u64::<LittleEndian>().map_err(truncated)? as usize;
            let remaining = bytes.len() - TST_HEADER.len() - cur.position() as usize;
            if name_size > remaining {
                return Err(NnError::Parse("truncated tensor stream".into()));
            }

            let mut name_bytes = vec![0u8; name_size];
            cur.read_exact(&mut name_bytes).map_err(truncated)?;
            let name = String::from_utf8(name_bytes)
                .map_err(|_| NnError::Parse("tensor name is not valid utf-8".into()))?;

            let width = cur.read_u32::<LittleEndian>().map_err(truncated)?;
            let height = cur.read_u32::<LittleEndian>().map_err(truncated)?;
            let depth = cur.read_u32::<LittleEndian>().map_err(truncated)?;

            let shape = Shape::new(width, height, depth);
            let size_bytes = shape.size() * std::mem::size_of::<f32>();
            let remaining = bytes.len() - TST_HEADER.len() - cur.position() as usize;
            if size_bytes > remaining {
                return Err(NnError::Parse("truncated tensor stream".into()));
            }

            let mut tensor = Tensor::new(shape)?;
            cur.read_f32_into::<LittleEndian>(tensor.data_mut())
                .map_err(truncated)?;

            out.push(name, tensor);
        }

        Ok(out)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> NnResult<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> NnResult<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }
}
