//! Recursive dataset marshaller (component C7, spec §4.7, §3 "Dataset
//! descriptor").
//!
//! Datasets are interpreted dynamically against a [`DatasetDescriptor`]
//! rather than derived from a native Rust struct layout — the closest fit
//! for a format whose nesting is only known at runtime through a
//! [`DatasetRegistry`] lookup (Design Notes item 3: "re-express the
//! marshaller as a cursor + schema-walking algorithm").
//!
//! On the wire, fields are packed back-to-back with no alignment padding
//! (spec §4.7: "on the wire, no padding exists"); the native-buffer padding
//! the original spec describes for pointer-cast consumers does not apply
//! here since values live in a [`DatasetValue`] tree, not a raw buffer
//! (DESIGN.md OQ-1 covers the related 4-vs-8-byte alignment question, which
//! is moot for the same reason).

use crate::error::{WireError, WireResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Design bound on nested dataset recursion (spec §4.7 "Decoding ...
/// additionally validates: ... nested depth bounded (design bound: 16)").
pub const MAX_NESTING_DEPTH: usize = 16;

pub type DatasetId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Bool8,
    Char8,
    Utf16,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Real32,
    Real64,
    TimeDate32,
    TimeDate48,
    TimeDate64,
    Nested(DatasetId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub element_type: ElementType,
    /// `0` = variable length (preceded by a `uint16` run-length element),
    /// `1` = scalar, `>1` = fixed-length array.
    pub count: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub dataset_id: DatasetId,
    pub elements: Vec<ElementDescriptor>,
}

/// Read-only after `Session::open` (spec §6 "Dataset registry interface").
pub trait DatasetRegistry {
    fn lookup(&self, dataset_id: DatasetId) -> Option<&DatasetDescriptor>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatasetValue {
    Bool(bool),
    Char8(u8),
    Utf16(u16),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Real32(f32),
    Real64(f64),
    TimeDate32(u32),
    TimeDate48 { seconds: u32, ticks: u16 },
    TimeDate64 { seconds: u32, microseconds: u32 },
    /// One instance of a nested dataset, in descriptor declaration order.
    Nested(Vec<DatasetValue>),
    /// A fixed (`count > 1`) or variable (`count == 0`) length array.
    Array(Vec<DatasetValue>),
}

/// Encodes `values` (one entry per element of `descriptor`, in order) into
/// the wire representation. `values.len()` must equal `descriptor.elements.len()`.
pub fn marshal(
    registry: &dyn DatasetRegistry,
    descriptor: &DatasetDescriptor,
    values: &[DatasetValue],
) -> WireResult<Vec<u8>> {
    let mut out = Vec::new();
    encode_elements(registry, &descriptor.elements, values, &mut out, 0)?;
    Ok(out)
}

/// Decodes a byte slice against `descriptor`, producing one [`DatasetValue`]
/// per element in declaration order. `declared_len` is the header's
/// `datasetLength` field; decoding only ever looks at `bytes[..declared_len]`
/// and fails with `LengthMismatch` if `bytes` is shorter than that (spec
/// §4.7: "declared size matches datasetLength from the header").
pub fn unmarshal(
    registry: &dyn DatasetRegistry,
    descriptor: &DatasetDescriptor,
    bytes: &[u8],
    declared_len: usize,
) -> WireResult<Vec<DatasetValue>> {
    if bytes.len() < declared_len {
        return Err(WireError::LengthMismatch);
    }
    let mut cursor = Cursor::new(&bytes[..declared_len]);
    let values = decode_elements(registry, &descriptor.elements, &mut cursor, 0)?;
    Ok(values)
}

fn encode_elements(
    registry: &dyn DatasetRegistry,
    elements: &[ElementDescriptor],
    values: &[DatasetValue],
    out: &mut Vec<u8>,
    depth: usize,
) -> WireResult<()> {
    if depth > MAX_NESTING_DEPTH {
        return Err(WireError::DepthExceeded);
    }
    if elements.len() != values.len() {
        return Err(WireError::LengthMismatch);
    }

    let mut last_u16: Option<u16> = None;

    for (element, value) in elements.iter().zip(values) {
        match element.count {
            1 => encode_scalar(registry, element.element_type, value, out, depth)?,
            0 => {
                let items = match value {
                    DatasetValue::Array(items) => items,
                    _ => return Err(WireError::LengthMismatch),
                };
                let declared = last_u16.ok_or(WireError::LengthMismatch)?;
                if items.len() != declared as usize {
                    return Err(WireError::LengthMismatch);
                }
                for item in items {
                    encode_scalar(registry, element.element_type, item, out, depth)?;
                }
            }
            n => {
                let items = match value {
                    DatasetValue::Array(items) => items,
                    _ => return Err(WireError::LengthMismatch),
                };
                if items.len() != n as usize {
                    return Err(WireError::LengthMismatch);
                }
                for item in items {
                    encode_scalar(registry, element.element_type, item, out, depth)?;
                }
            }
        }

        last_u16 = match (element.count, value) {
            (1, DatasetValue::UInt16(n)) => Some(*n),
            _ => None,
        };
    }

    Ok(())
}

fn decode_elements(
    registry: &dyn DatasetRegistry,
    elements: &[ElementDescriptor],
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
) -> WireResult<Vec<DatasetValue>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(WireError::DepthExceeded);
    }

    let mut values = Vec::with_capacity(elements.len());
    let mut last_u16: Option<u16> = None;

    for element in elements {
        let value = match element.count {
            1 => decode_scalar(registry, element.element_type, cursor, depth)?,
            0 => {
                let n = last_u16.ok_or(WireError::LengthMismatch)?;
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(decode_scalar(registry, element.element_type, cursor, depth)?);
                }
                DatasetValue::Array(items)
            }
            n => {
                let mut items = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    items.push(decode_scalar(registry, element.element_type, cursor, depth)?);
                }
                DatasetValue::Array(items)
            }
        };

        last_u16 = match (element.count, &value) {
            (1, DatasetValue::UInt16(n)) => Some(*n),
            _ => None,
        };

        values.push(value);
    }

    Ok(values)
}

fn encode_scalar(
    registry: &dyn DatasetRegistry,
    element_type: ElementType,
    value: &DatasetValue,
    out: &mut Vec<u8>,
    depth: usize,
) -> WireResult<()> {
    use DatasetValue as V;
    use ElementType as T;

    match (element_type, value) {
        (T::Bool8, V::Bool(b)) => out.write_u8(if *b { 1 } else { 0 })?,
        (T::Char8, V::Char8(c)) => out.write_u8(*c)?,
        (T::Utf16, V::Utf16(c)) => out.write_u16::<BigEndian>(*c)?,
        (T::Int8, V::Int8(n)) => out.write_i8(*n)?,
        (T::Int16, V::Int16(n)) => out.write_i16::<BigEndian>(*n)?,
        (T::Int32, V::Int32(n)) => out.write_i32::<BigEndian>(*n)?,
        (T::Int64, V::Int64(n)) => out.write_i64::<BigEndian>(*n)?,
        (T::UInt8, V::UInt8(n)) => out.write_u8(*n)?,
        (T::UInt16, V::UInt16(n)) => out.write_u16::<BigEndian>(*n)?,
        (T::UInt32, V::UInt32(n)) => out.write_u32::<BigEndian>(*n)?,
        (T::UInt64, V::UInt64(n)) => out.write_u64::<BigEndian>(*n)?,
        (T::Real32, V::Real32(f)) => out.write_f32::<BigEndian>(*f)?,
        (T::Real64, V::Real64(f)) => out.write_f64::<BigEndian>(*f)?,
        (T::TimeDate32, V::TimeDate32(s)) => out.write_u32::<BigEndian>(*s)?,
        (T::TimeDate48, V::TimeDate48 { seconds, ticks }) => {
            out.write_u32::<BigEndian>(*seconds)?;
            out.write_u16::<BigEndian>(*ticks)?;
        }
        (T::TimeDate64, V::TimeDate64 { seconds, microseconds }) => {
            out.write_u32::<BigEndian>(*seconds)?;
            out.write_u32::<BigEndian>(*microseconds)?;
        }
        (T::Nested(id), V::Nested(inner)) => {
            let nested = registry.lookup(id).ok_or(WireError::UnknownDataset(id))?;
            encode_elements(registry, &nested.elements, inner, out, depth + 1)?;
        }
        _ => return Err(WireError::LengthMismatch),
    }

    Ok(())
}

fn decode_scalar(
    registry: &dyn DatasetRegistry,
    element_type: ElementType,
    cursor: &mut Cursor<&[u8]>,
    depth: usize,
) -> WireResult<DatasetValue> {
    use ElementType as T;

    Ok(match element_type {
        T::Bool8 => DatasetValue::Bool(cursor.read_u8()? != 0),
        T::Char8 => DatasetValue::Char8(cursor.read_u8()?),
        T::Utf16 => DatasetValue::Utf16(cursor.read_u16::<BigEndian>()?),
        T::Int8 => DatasetValue::Int8(cursor.read_i8()?),
        T::Int16 => DatasetValue::Int16(cursor.read_i16::<BigEndian>()?),
        T::Int32 => DatasetValue::Int32(cursor.read_i32::<BigEndian>()?),
        T::Int64 => DatasetValue::Int64(cursor.read_i64::<BigEndian>()?),
        T::UInt8 => DatasetValue::UInt8(cursor.read_u8()?),
        T::UInt16 => DatasetValue::UInt16(cursor.read_u16::<BigEndian>()?),
        T::UInt32 => DatasetValue::UInt32(cursor.read_u32::<BigEndian>()?),
        T::UInt64 => DatasetValue::UInt64(cursor.read_u64::<BigEndian>()?),
        T::Real32 => DatasetValue::Real32(cursor.read_f32::<BigEndian>()?),
        T::Real64 => DatasetValue::Real64(cursor.read_f64::<BigEndian>()?),
        T::TimeDate32 => DatasetValue::TimeDate32(cursor.read_u32::<BigEndian>()?),
        T::TimeDate48 => DatasetValue::TimeDate48 {
            seconds: cursor.read_u32::<BigEndian>()?,
            ticks: cursor.read_u16::<BigEndian>()?,
        },
        T::TimeDate64 => DatasetValue::TimeDate64 {
            seconds: cursor.read_u32::<BigEndian>()?,
            microseconds: cursor.read_u32::<BigEndian>()?,
        },
        T::Nested(id) => {
            let nested = registry.lookup(id).ok_or(WireError::UnknownDataset(id))?;
            let inner = decode_elements(registry, &nested.elements, cursor, depth + 1)?;
            DatasetValue::Nested(inner)
        }
    })
}

/// Computed size in bytes that `marshal` would produce for `values`, without
/// actually encoding them — used by publishers to pre-validate against the
/// traffic store slot size and the PD MTU bound (B2).
pub fn encoded_size(
    registry: &dyn DatasetRegistry,
    descriptor: &DatasetDescriptor,
    values: &[DatasetValue],
) -> WireResult<usize> {
    Ok(marshal(registry, descriptor, values)?.len())
}

/// Implemented by types whose layout matches a [`DatasetDescriptor`] one
/// field at a time — the counterpart to the dynamic descriptor-driven path
/// above for callers who'd rather work with a native struct. `trdp-proc`'s
/// `#[derive(Dataset)]` generates this impl from field types and attributes.
pub trait Dataset: Sized {
    fn descriptor() -> DatasetDescriptor;
    fn to_values(&self) -> Vec<DatasetValue>;
    fn from_values(values: &[DatasetValue]) -> WireResult<Self>;
}

pub fn marshal_dataset<T: Dataset>(registry: &dyn DatasetRegistry, value: &T) -> WireResult<Vec<u8>> {
    marshal(registry, &T::descriptor(), &value.to_values())
}

pub fn unmarshal_dataset<T: Dataset>(registry: &dyn DatasetRegistry, bytes: &[u8]) -> WireResult<T> {
    T::from_values(&unmarshal(registry, &T::descriptor(), bytes, bytes.len())?)
}

pub struct EmptyRegistry;

impl DatasetRegistry for EmptyRegistry {
    fn lookup(&self, _dataset_id: DatasetId) -> Option<&DatasetDescriptor> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> impl DatasetRegistry {
        EmptyRegistry
    }

    #[test]
    fn scalar_uint8_round_trips() {
        let descriptor = DatasetDescriptor {
            dataset_id: 1,
            elements: vec![ElementDescriptor {
                element_type: ElementType::UInt8,
                count: 1,
            }],
        };
        let values = vec![DatasetValue::UInt8(0x42)];
        let bytes = marshal(&reg(), &descriptor, &values).unwrap();
        assert_eq!(bytes, vec![0x42]);
        assert_eq!(unmarshal(&reg(), &descriptor, &bytes, bytes.len()).unwrap(), values);
    }

    /// Scenario S5: `{ uint16 n; int32[0]; }` with n=3 and three int32 values.
    #[test]
    fn variable_length_mixed_dataset_matches_s5() {
        let descriptor = DatasetDescriptor {
            dataset_id: 2,
            elements: vec![
                ElementDescriptor {
                    element_type: ElementType::UInt16,
                    count: 1,
                },
                ElementDescriptor {
                    element_type: ElementType::Int32,
                    count: 0,
                },
            ],
        };
        let values = vec![
            DatasetValue::UInt16(3),
            DatasetValue::Array(vec![
                DatasetValue::Int32(0x0102_0304),
                DatasetValue::Int32(0x0506_0708),
                DatasetValue::Int32(0x090A_0B0C),
            ]),
        ];
        let bytes = marshal(&reg(), &descriptor, &values).unwrap();
        assert_eq!(
            bytes,
            vec![
                0x00, 0x03, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C
            ]
        );
        assert_eq!(unmarshal(&reg(), &descriptor, &bytes, bytes.len()).unwrap(), values);
    }

    /// Boundary B4: a variable array declared with length 0 serializes as
    /// just the uint16 `0`, with no element bytes.
    #[test]
    fn empty_variable_array_is_just_the_length_prefix() {
        let descriptor = DatasetDescriptor {
            dataset_id: 3,
            elements: vec![
                ElementDescriptor {
                    element_type: ElementType::UInt16,
                    count: 1,
                },
                ElementDescriptor {
                    element_type: ElementType::Int32,
                    count: 0,
                },
            ],
        };
        let values = vec![DatasetValue::UInt16(0), DatasetValue::Array(vec![])];
        let bytes = marshal(&reg(), &descriptor, &values).unwrap();
        assert_eq!(bytes, vec![0x00, 0x00]);
    }

    struct OneDataset(DatasetDescriptor);

    impl DatasetRegistry for OneDataset {
        fn lookup(&self, dataset_id: DatasetId) -> Option<&DatasetDescriptor> {
            if dataset_id == self.0.dataset_id {
                Some(&self.0)
            } else {
                None
            }
        }
    }

    #[test]
    fn nested_dataset_round_trips() {
        let inner = DatasetDescriptor {
            dataset_id: 10,
            elements: vec![ElementDescriptor {
                element_type: ElementType::UInt32,
                count: 1,
            }],
        };
        let outer = DatasetDescriptor {
            dataset_id: 11,
            elements: vec![
                ElementDescriptor {
                    element_type: ElementType::Bool8,
                    count: 1,
                },
                ElementDescriptor {
                    element_type: ElementType::Nested(10),
                    count: 1,
                },
            ],
        };

        struct TwoDatasets(DatasetDescriptor, DatasetDescriptor);
        impl DatasetRegistry for TwoDatasets {
            fn lookup(&self, id: DatasetId) -> Option<&DatasetDescriptor> {
                if id == self.0.dataset_id {
                    Some(&self.0)
                } else if id == self.1.dataset_id {
                    Some(&self.1)
                } else {
                    None
                }
            }
        }
        let registry = TwoDatasets(inner, outer.clone());

        let values = vec![
            DatasetValue::Bool(true),
            DatasetValue::Nested(vec![DatasetValue::UInt32(7)]),
        ];
        let bytes = marshal(&registry, &outer, &values).unwrap();
        assert_eq!(unmarshal(&registry, &outer, &bytes, bytes.len()).unwrap(), values);
    }

    #[test]
    fn unknown_nested_dataset_is_rejected() {
        let outer = DatasetDescriptor {
            dataset_id: 20,
            elements: vec![ElementDescriptor {
                element_type: ElementType::Nested(999),
                count: 1,
            }],
        };
        let values = vec![DatasetValue::Nested(vec![])];
        let registry = OneDataset(DatasetDescriptor {
            dataset_id: 1,
            elements: vec![],
        });
        assert_eq!(
            marshal(&registry, &outer, &values),
            Err(WireError::UnknownDataset(999))
        );
    }
}
