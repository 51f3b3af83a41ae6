//! Generic encode path: declared-type driven dispatch over dynamic values.
//!
//! Compiled programs reuse the same primitive routines, so specialization
//! can never diverge from the bytes this module writes.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use objwire_bytes::{varint, OutputBuffer, Tag};

use crate::config::CodecConfig;
use crate::context::{PathSeg, Probe, SerialContext};
use crate::descriptor::{kind_name, DeclaredType, ObjectShape, PrimitiveType, TypeShape};
use crate::error::{CodecError, Result};
use crate::program::{FieldProgram, ProgramCache};
use crate::registry::RegistrySnapshot;
use crate::value::{EnumValue, ObjectValue, Value};

pub(crate) struct Encoder<'a> {
    buf: OutputBuffer,
    pub(crate) ctx: SerialContext,
    registry: &'a RegistrySnapshot,
    programs: &'a ProgramCache,
    /// True while the current value sits inside a map key. A back reference
    /// to a still-open composite is refused there, matching what the decoder
    /// accepts: a key participates in content comparison and must not be
    /// observable half-built.
    in_map_key: bool,
}

impl<'a> Encoder<'a> {
    pub fn new(
        registry: &'a RegistrySnapshot,
        programs: &'a ProgramCache,
        config: CodecConfig,
    ) -> Self {
        Self {
            buf: OutputBuffer::with_chunk_size(config.chunk_size),
            ctx: SerialContext::new(config.max_depth),
            registry,
            programs,
            in_map_key: false,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.into_bytes()
    }

    /// Encode one value under a declared type. The entry point for the whole
    /// call and for every nested field, element, key, and value.
    pub fn encode_value(&mut self, value: &Value, declared: &DeclaredType) -> Result<()> {
        if value.is_null() {
            self.buf.put_u8(Tag::Null as u8);
            return Ok(());
        }
        match declared {
            DeclaredType::Dynamic => self.encode_dynamic(value),
            DeclaredType::Primitive(p) => self.encode_prim(value, *p),
            DeclaredType::List(elem) => match value {
                Value::List(items) => self.encode_sequence(value, Tag::List, items, elem),
                other => Err(self.mismatch(format!(
                    "{} value under declared list",
                    kind_name(other)
                ))),
            },
            DeclaredType::Array(elem) => match value {
                Value::Array(items) => self.encode_sequence(value, Tag::Array, items, elem),
                other => Err(self.mismatch(format!(
                    "{} value under declared array",
                    kind_name(other)
                ))),
            },
            DeclaredType::Map(key, val) => match value {
                Value::Map(pairs) => self.encode_map(value, pairs, key, val),
                other => Err(self.mismatch(format!(
                    "{} value under declared map",
                    kind_name(other)
                ))),
            },
            DeclaredType::Registered(id) => match value {
                Value::Object(cell) => self.encode_object(value, cell, Some(*id)),
                Value::Enum(ev) => self.encode_enum(*ev, Some(*id)),
                other => Err(self.mismatch(format!(
                    "{} value under declared registered type {id}",
                    kind_name(other)
                ))),
            },
        }
    }

    /// Encode a value with no declared-type context: the natural wire kind.
    fn encode_dynamic(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Null => {
                self.buf.put_u8(Tag::Null as u8);
                Ok(())
            }
            Value::Bool(_) => self.encode_prim(value, PrimitiveType::Bool),
            Value::Byte(_) => self.encode_prim(value, PrimitiveType::Byte),
            Value::Short(_) => self.encode_prim(value, PrimitiveType::Short),
            Value::Int(_) => self.encode_prim(value, PrimitiveType::Int),
            Value::Long(_) => self.encode_prim(value, PrimitiveType::Long),
            Value::Float(_) => self.encode_prim(value, PrimitiveType::Float),
            Value::Double(_) => self.encode_prim(value, PrimitiveType::Double),
            Value::Str(_) => self.encode_prim(value, PrimitiveType::String),
            Value::List(items) => {
                self.encode_sequence(value, Tag::List, items, &DeclaredType::Dynamic)
            }
            Value::Array(items) => {
                self.encode_sequence(value, Tag::Array, items, &DeclaredType::Dynamic)
            }
            Value::Map(pairs) => {
                self.encode_map(value, pairs, &DeclaredType::Dynamic, &DeclaredType::Dynamic)
            }
            Value::Object(cell) => self.encode_object(value, cell, None),
            Value::Enum(ev) => self.encode_enum(*ev, None),
        }
    }

    /// Write a value coerced to one primitive wire kind.
    ///
    /// This is the routine compiled programs bind per field: the declared
    /// kind is fixed, only the value varies.
    pub(crate) fn encode_prim(&mut self, value: &Value, kind: PrimitiveType) -> Result<()> {
        if value.is_null() {
            self.buf.put_u8(Tag::Null as u8);
            return Ok(());
        }
        match kind {
            PrimitiveType::Bool => match value {
                Value::Bool(true) => {
                    self.buf.put_u8(Tag::True as u8);
                    Ok(())
                }
                Value::Bool(false) => {
                    self.buf.put_u8(Tag::False as u8);
                    Ok(())
                }
                other => Err(self.prim_mismatch(other, kind)),
            },
            PrimitiveType::Byte
            | PrimitiveType::Short
            | PrimitiveType::Int
            | PrimitiveType::Long => {
                let wide = match integer_value(value) {
                    Some(wide) => wide,
                    None => return Err(self.prim_mismatch(value, kind)),
                };
                self.put_integer(wide, kind)
            }
            PrimitiveType::Float => {
                let narrow = match value {
                    Value::Float(v) => *v,
                    Value::Double(v) => {
                        if (f64::from(*v as f32)).to_bits() != v.to_bits() {
                            return Err(self.range(format!("double {v} does not fit float")));
                        }
                        *v as f32
                    }
                    other => return Err(self.prim_mismatch(other, kind)),
                };
                self.buf.put_u8(Tag::Float as u8);
                self.buf.put_slice(&narrow.to_bits().to_le_bytes());
                Ok(())
            }
            PrimitiveType::Double => {
                let wide = match value {
                    Value::Double(v) => *v,
                    Value::Float(v) => f64::from(*v),
                    other => return Err(self.prim_mismatch(other, kind)),
                };
                self.buf.put_u8(Tag::Double as u8);
                self.buf.put_slice(&wide.to_bits().to_le_bytes());
                Ok(())
            }
            PrimitiveType::String => match value {
                Value::Str(s) => {
                    self.put_string(s);
                    Ok(())
                }
                other => Err(self.prim_mismatch(other, kind)),
            },
        }
    }

    fn put_integer(&mut self, value: i64, kind: PrimitiveType) -> Result<()> {
        match kind {
            PrimitiveType::Byte => {
                let narrow = i8::try_from(value)
                    .map_err(|_| self.range(format!("integer {value} does not fit byte")))?;
                self.buf.put_u8(Tag::Byte as u8);
                self.buf.put_u8(narrow as u8);
            }
            PrimitiveType::Short => {
                let narrow = i16::try_from(value)
                    .map_err(|_| self.range(format!("integer {value} does not fit short")))?;
                self.buf.put_u8(Tag::Short as u8);
                varint::put_ivarint(&mut self.buf, i64::from(narrow));
            }
            PrimitiveType::Int => {
                let narrow = i32::try_from(value)
                    .map_err(|_| self.range(format!("integer {value} does not fit int")))?;
                if narrow >= 0 {
                    self.buf.put_u8(Tag::IntPos as u8);
                    varint::put_uvarint(&mut self.buf, narrow as u64);
                } else {
                    self.buf.put_u8(Tag::IntNeg as u8);
                    varint::put_uvarint(&mut self.buf, u64::from(narrow.unsigned_abs()));
                }
            }
            PrimitiveType::Long => {
                if value >= 0 {
                    self.buf.put_u8(Tag::LongPos as u8);
                    varint::put_uvarint(&mut self.buf, value as u64);
                } else {
                    self.buf.put_u8(Tag::LongNeg as u8);
                    varint::put_uvarint(&mut self.buf, value.unsigned_abs());
                }
            }
            _ => unreachable!("put_integer is only called with integer kinds"),
        }
        Ok(())
    }

    fn put_string(&mut self, s: &Rc<str>) {
        match self.ctx.intern(s) {
            Probe::New(_) => {
                self.buf.put_u8(Tag::String as u8);
                varint::put_uvarint(&mut self.buf, s.len() as u64);
                self.buf.put_slice(s.as_bytes());
            }
            Probe::Seen(id) => {
                self.buf.put_u8(Tag::StringRef as u8);
                varint::put_uvarint(&mut self.buf, id);
            }
        }
    }

    fn encode_sequence(
        &mut self,
        whole: &Value,
        tag: Tag,
        items: &Rc<RefCell<Vec<Value>>>,
        elem: &DeclaredType,
    ) -> Result<()> {
        let identity = whole.identity().expect("sequence values have identity");
        let id = match self.ctx.track(identity) {
            Probe::Seen(id) => return self.put_ref(id),
            Probe::New(id) => id,
        };
        self.ctx.enter()?;
        self.buf.put_u8(tag as u8);
        varint::put_uvarint(&mut self.buf, elem.wire_code());
        let snapshot = items.borrow();
        varint::put_uvarint(&mut self.buf, snapshot.len() as u64);
        for (i, item) in snapshot.iter().enumerate() {
            self.ctx.push(PathSeg::Index(i));
            self.encode_value(item, elem)?;
            self.ctx.pop();
        }
        drop(snapshot);
        self.ctx.leave();
        self.ctx.seal(id);
        Ok(())
    }

    fn encode_map(
        &mut self,
        whole: &Value,
        pairs: &Rc<RefCell<Vec<(Value, Value)>>>,
        key: &DeclaredType,
        val: &DeclaredType,
    ) -> Result<()> {
        let identity = whole.identity().expect("map values have identity");
        let id = match self.ctx.track(identity) {
            Probe::Seen(id) => return self.put_ref(id),
            Probe::New(id) => id,
        };
        self.ctx.enter()?;
        self.buf.put_u8(Tag::Map as u8);
        varint::put_uvarint(&mut self.buf, key.wire_code());
        varint::put_uvarint(&mut self.buf, val.wire_code());
        let snapshot = pairs.borrow();
        varint::put_uvarint(&mut self.buf, snapshot.len() as u64);
        for (i, (k, v)) in snapshot.iter().enumerate() {
            self.ctx.push(PathSeg::Key(i));
            let saved = self.in_map_key;
            self.in_map_key = true;
            self.encode_value(k, key)?;
            self.in_map_key = saved;
            self.ctx.pop();
            self.ctx.push(PathSeg::MapValue(i));
            self.encode_value(v, val)?;
            self.ctx.pop();
        }
        drop(snapshot);
        self.ctx.leave();
        self.ctx.seal(id);
        Ok(())
    }

    fn encode_object(
        &mut self,
        whole: &Value,
        cell: &Rc<RefCell<ObjectValue>>,
        declared: Option<u32>,
    ) -> Result<()> {
        let type_id = cell.borrow().type_id;
        self.check_declared_object(type_id, declared)?;

        let descriptor = self.registry.by_id(type_id)?.clone();
        let shape = match &descriptor.shape {
            TypeShape::Object(shape) => shape,
            _ => {
                return Err(self.mismatch(format!(
                    "instance claims non-object type {}",
                    descriptor.name
                )))
            }
        };

        let id = match self.object_prelude(whole, type_id, shape.fields.len())? {
            Some(id) => id,
            None => return Ok(()),
        };
        match self.programs.lookup(type_id) {
            Some(program) => program.run_encode(self, whole)?,
            None => self.encode_fields(whole, shape)?,
        }
        self.ctx.leave();
        self.ctx.seal(id);
        Ok(())
    }

    /// Generic field loop: descriptor order, accessor reads, per-field
    /// declared types.
    fn encode_fields(&mut self, whole: &Value, shape: &ObjectShape) -> Result<()> {
        for field in &shape.fields {
            self.ctx.push(PathSeg::Field(field.name.clone()));
            let value = match field.accessor.read(whole) {
                Ok(value) => value,
                Err(message) => {
                    return Err(CodecError::AccessorFailure {
                        site: self.ctx.site(),
                        message,
                    })
                }
            };
            self.encode_value(&value, &field.declared)?;
            self.ctx.pop();
        }
        Ok(())
    }

    /// Identity probe plus object framing. Returns `None` when a back
    /// reference was written and the payload must be skipped; otherwise the
    /// caller owns the matching `ctx.leave()` and `ctx.seal(id)`.
    pub(crate) fn object_prelude(
        &mut self,
        whole: &Value,
        type_id: u32,
        field_count: usize,
    ) -> Result<Option<u64>> {
        let identity = whole.identity().expect("object values have identity");
        let id = match self.ctx.track(identity) {
            Probe::Seen(id) => {
                self.put_ref(id)?;
                return Ok(None);
            }
            Probe::New(id) => id,
        };
        self.ctx.enter()?;
        self.buf.put_u8(Tag::Object as u8);
        varint::put_uvarint(&mut self.buf, u64::from(type_id));
        varint::put_uvarint(&mut self.buf, field_count as u64);
        Ok(Some(id))
    }

    /// Run a compiled program for an instance whose concrete type is already
    /// known to match the program's type.
    pub(crate) fn encode_object_with_program(
        &mut self,
        whole: &Value,
        program: &FieldProgram,
    ) -> Result<()> {
        let id = match self.object_prelude(whole, program.type_id(), program.field_count())? {
            Some(id) => id,
            None => return Ok(()),
        };
        program.run_encode(self, whole)?;
        self.ctx.leave();
        self.ctx.seal(id);
        Ok(())
    }

    pub(crate) fn encode_enum(&mut self, ev: EnumValue, declared: Option<u32>) -> Result<()> {
        let descriptor = self.registry.by_id(ev.type_id)?.clone();
        let variants = match &descriptor.shape {
            TypeShape::Enum(shape) => shape.variants.len(),
            _ => {
                return Err(self.mismatch(format!(
                    "instance claims non-enum type {}",
                    descriptor.name
                )))
            }
        };
        if u64::from(ev.ordinal) >= variants as u64 {
            return Err(self.mismatch(format!(
                "ordinal {} out of range for enum {} ({} variants)",
                ev.ordinal, descriptor.name, variants
            )));
        }
        if let Some(declared) = declared {
            if declared != ev.type_id {
                let target = self.registry.by_id(declared)?;
                if !matches!(target.shape, TypeShape::PolymorphicRoot) {
                    return Err(self.mismatch(format!(
                        "enum {} under declared type {}",
                        descriptor.name, target.name
                    )));
                }
            }
        }
        self.buf.put_u8(Tag::Enum as u8);
        varint::put_uvarint(&mut self.buf, u64::from(ev.type_id));
        varint::put_uvarint(&mut self.buf, u64::from(ev.ordinal));
        Ok(())
    }

    fn check_declared_object(&self, type_id: u32, declared: Option<u32>) -> Result<()> {
        let declared = match declared {
            None => return Ok(()),
            Some(declared) if declared == type_id => return Ok(()),
            Some(declared) => declared,
        };
        let target = self.registry.by_id(declared)?;
        let compatible = match &target.shape {
            TypeShape::PolymorphicRoot => true,
            TypeShape::Object(shape) => {
                shape.polymorphic || self.registry.is_subtype(type_id, declared)
            }
            TypeShape::Enum(_) => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(self.mismatch(format!(
                "concrete type {type_id} is not assignable to declared type {}",
                target.name
            )))
        }
    }

    fn put_ref(&mut self, id: u64) -> Result<()> {
        if self.in_map_key && self.ctx.is_open(id) {
            return Err(CodecError::UnsupportedCycle {
                id,
                site: self.ctx.site(),
            });
        }
        self.buf.put_u8(Tag::Ref as u8);
        varint::put_uvarint(&mut self.buf, id);
        Ok(())
    }

    fn mismatch(&self, detail: String) -> CodecError {
        CodecError::TypeMismatch {
            site: self.ctx.site(),
            detail,
        }
    }

    fn prim_mismatch(&self, value: &Value, kind: PrimitiveType) -> CodecError {
        self.mismatch(format!("{} value under declared {kind}", kind_name(value)))
    }

    fn range(&self, detail: String) -> CodecError {
        CodecError::RangeError {
            site: self.ctx.site(),
            detail,
        }
    }
}

fn integer_value(value: &Value) -> Option<i64> {
    match value {
        Value::Byte(v) => Some(i64::from(*v)),
        Value::Short(v) => Some(i64::from(*v)),
        Value::Int(v) => Some(i64::from(*v)),
        Value::Long(v) => Some(*v),
        _ => None,
    }
}
