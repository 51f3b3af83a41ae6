//! Generic decode path: tag-driven dispatch, declared-type coercion, and
//! placeholder-based reconstruction of shared references and cycles.

use std::rc::Rc;

use objwire_bytes::{varint, InputCursor, Tag};

use crate::config::CodecConfig;
use crate::context::DeserialContext;
use crate::descriptor::{DeclaredType, PrimitiveType, TypeShape};
use crate::error::{CodecError, ErrorSite, Result};
use crate::program::ProgramCache;
use crate::registry::RegistrySnapshot;
use crate::value::{EnumValue, Value};

pub(crate) struct Decoder<'a> {
    cur: InputCursor<'a>,
    pub(crate) ctx: DeserialContext,
    registry: &'a RegistrySnapshot,
    programs: &'a ProgramCache,
    /// True while the current value sits inside a map key. A back reference
    /// to a still-open composite is rejected there: a key participates in
    /// content comparison and must not be observable half-built.
    in_map_key: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(
        input: &'a [u8],
        registry: &'a RegistrySnapshot,
        programs: &'a ProgramCache,
        config: CodecConfig,
    ) -> Self {
        Self {
            cur: InputCursor::new(input),
            ctx: DeserialContext::new(config.max_depth),
            registry,
            programs,
            in_map_key: false,
        }
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.cur.position()
    }

    /// Decode one value under a declared type. The entry point for the
    /// whole call and for every nested field, element, key, and value.
    pub fn decode_value(&mut self, declared: &DeclaredType) -> Result<Value> {
        let offset = self.cur.position();
        let byte = self.cur.read_u8()?;
        let tag = Tag::from_byte(byte).ok_or_else(|| CodecError::TypeMismatch {
            site: ErrorSite::Offset(offset),
            detail: format!("invalid tag byte 0x{byte:02X}"),
        })?;

        match tag {
            Tag::Null => Ok(Value::Null),
            Tag::True => self.finish_bool(true, declared, offset),
            Tag::False => self.finish_bool(false, declared, offset),
            Tag::Byte => {
                let raw = self.cur.read_u8()? as i8;
                self.finish_integer(i64::from(raw), PrimitiveType::Byte, declared, offset)
            }
            Tag::Short => {
                let wide = varint::read_ivarint(&mut self.cur)?;
                if i16::try_from(wide).is_err() {
                    return Err(self.range(offset, format!("short payload {wide} out of range")));
                }
                self.finish_integer(wide, PrimitiveType::Short, declared, offset)
            }
            Tag::IntPos => {
                let magnitude = varint::read_uvarint(&mut self.cur)?;
                if magnitude > i32::MAX as u64 {
                    return Err(
                        self.range(offset, format!("int payload {magnitude} out of range"))
                    );
                }
                self.finish_integer(magnitude as i64, PrimitiveType::Int, declared, offset)
            }
            Tag::IntNeg => {
                let magnitude = varint::read_uvarint(&mut self.cur)?;
                if magnitude > i32::MIN.unsigned_abs() as u64 {
                    return Err(
                        self.range(offset, format!("int payload -{magnitude} out of range"))
                    );
                }
                self.finish_integer(-(magnitude as i64), PrimitiveType::Int, declared, offset)
            }
            Tag::LongPos => {
                let magnitude = varint::read_uvarint(&mut self.cur)?;
                if magnitude > i64::MAX as u64 {
                    return Err(
                        self.range(offset, format!("long payload {magnitude} out of range"))
                    );
                }
                self.finish_integer(magnitude as i64, PrimitiveType::Long, declared, offset)
            }
            Tag::LongNeg => {
                let magnitude = varint::read_uvarint(&mut self.cur)?;
                if magnitude > i64::MIN.unsigned_abs() {
                    return Err(
                        self.range(offset, format!("long payload -{magnitude} out of range"))
                    );
                }
                let value = if magnitude == i64::MIN.unsigned_abs() {
                    i64::MIN
                } else {
                    -(magnitude as i64)
                };
                self.finish_integer(value, PrimitiveType::Long, declared, offset)
            }
            Tag::Float => {
                let bits = self.cur.read_slice(4)?;
                let value = f32::from_le_bytes(bits.try_into().expect("read_slice returned 4"));
                self.finish_float(value, declared, offset)
            }
            Tag::Double => {
                let bits = self.cur.read_slice(8)?;
                let value = f64::from_le_bytes(bits.try_into().expect("read_slice returned 8"));
                self.finish_double(value, declared, offset)
            }
            Tag::String => {
                let len = varint::read_uvarint(&mut self.cur)?;
                let len = usize::try_from(len).unwrap_or(usize::MAX);
                let raw = self.cur.read_slice(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| CodecError::TypeMismatch {
                    site: ErrorSite::Offset(offset),
                    detail: "string payload is not valid UTF-8".to_string(),
                })?;
                let interned: Rc<str> = Rc::from(text);
                self.ctx.intern_string(Rc::clone(&interned));
                self.finish_string(interned, declared, offset)
            }
            Tag::StringRef => {
                let id = varint::read_uvarint(&mut self.cur)?;
                let interned = self.ctx.resolve_string(id, offset)?;
                self.finish_string(interned, declared, offset)
            }
            Tag::Array => self.decode_sequence(Tag::Array, declared, offset),
            Tag::List => self.decode_sequence(Tag::List, declared, offset),
            Tag::Map => self.decode_map(declared, offset),
            Tag::Object => self.decode_object(declared, offset),
            Tag::Enum => self.decode_enum(declared, offset),
            Tag::Ref => {
                let id = varint::read_uvarint(&mut self.cur)?;
                if self.in_map_key && self.ctx.is_open(id) {
                    return Err(CodecError::UnsupportedCycle {
                        id,
                        site: ErrorSite::Offset(offset),
                    });
                }
                if matches!(declared, DeclaredType::Primitive(_)) {
                    return Err(self.mismatch(
                        offset,
                        "reference to a composite under a primitive declared type".to_string(),
                    ));
                }
                self.ctx.resolve_ref(id, offset)
            }
        }
    }

    fn finish_bool(&self, value: bool, declared: &DeclaredType, offset: usize) -> Result<Value> {
        match declared {
            DeclaredType::Dynamic | DeclaredType::Primitive(PrimitiveType::Bool) => {
                Ok(Value::Bool(value))
            }
            _ => Err(self.mismatch(offset, "bool payload under non-bool declared type".into())),
        }
    }

    /// Coerce a wire integer into the declared integer kind.
    fn finish_integer(
        &self,
        value: i64,
        natural: PrimitiveType,
        declared: &DeclaredType,
        offset: usize,
    ) -> Result<Value> {
        let target = match declared {
            DeclaredType::Dynamic => natural,
            DeclaredType::Primitive(
                p @ (PrimitiveType::Byte
                | PrimitiveType::Short
                | PrimitiveType::Int
                | PrimitiveType::Long),
            ) => *p,
            _ => {
                return Err(self.mismatch(
                    offset,
                    format!("{natural} payload under incompatible declared type"),
                ))
            }
        };
        match target {
            PrimitiveType::Byte => i8::try_from(value)
                .map(Value::Byte)
                .map_err(|_| self.range(offset, format!("integer {value} does not fit byte"))),
            PrimitiveType::Short => i16::try_from(value)
                .map(Value::Short)
                .map_err(|_| self.range(offset, format!("integer {value} does not fit short"))),
            PrimitiveType::Int => i32::try_from(value)
                .map(Value::Int)
                .map_err(|_| self.range(offset, format!("integer {value} does not fit int"))),
            PrimitiveType::Long => Ok(Value::Long(value)),
            _ => unreachable!("integer targets only"),
        }
    }

    fn finish_float(&self, value: f32, declared: &DeclaredType, offset: usize) -> Result<Value> {
        match declared {
            DeclaredType::Dynamic | DeclaredType::Primitive(PrimitiveType::Float) => {
                Ok(Value::Float(value))
            }
            DeclaredType::Primitive(PrimitiveType::Double) => Ok(Value::Double(f64::from(value))),
            _ => Err(self.mismatch(offset, "float payload under non-float declared type".into())),
        }
    }

    fn finish_double(&self, value: f64, declared: &DeclaredType, offset: usize) -> Result<Value> {
        match declared {
            DeclaredType::Dynamic | DeclaredType::Primitive(PrimitiveType::Double) => {
                Ok(Value::Double(value))
            }
            DeclaredType::Primitive(PrimitiveType::Float) => {
                let narrow = value as f32;
                if f64::from(narrow).to_bits() != value.to_bits() {
                    return Err(self.range(offset, format!("double {value} does not fit float")));
                }
                Ok(Value::Float(narrow))
            }
            _ => Err(self.mismatch(offset, "double payload under non-double declared type".into())),
        }
    }

    fn finish_string(
        &self,
        value: Rc<str>,
        declared: &DeclaredType,
        offset: usize,
    ) -> Result<Value> {
        match declared {
            DeclaredType::Dynamic | DeclaredType::Primitive(PrimitiveType::String) => {
                Ok(Value::Str(value))
            }
            _ => Err(self.mismatch(
                offset,
                "string payload under non-string declared type".into(),
            )),
        }
    }

    fn decode_sequence(
        &mut self,
        tag: Tag,
        declared: &DeclaredType,
        offset: usize,
    ) -> Result<Value> {
        let code = varint::read_uvarint(&mut self.cur)?;
        let wire_elem = DeclaredType::from_wire_code(code, offset)?;
        let declared_elem = match (tag, declared) {
            (_, DeclaredType::Dynamic) => wire_elem,
            (Tag::List, DeclaredType::List(elem)) | (Tag::Array, DeclaredType::Array(elem)) => {
                self.check_element(elem, &wire_elem, offset)?;
                if **elem == DeclaredType::Dynamic {
                    wire_elem
                } else {
                    (**elem).clone()
                }
            }
            _ => {
                return Err(self.mismatch(
                    offset,
                    format!("{tag:?} payload under incompatible declared type"),
                ))
            }
        };

        let len = varint::read_uvarint(&mut self.cur)?;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let cell = Rc::new(std::cell::RefCell::new(Vec::with_capacity(
            len.min(self.cur.remaining()),
        )));
        let handle = match tag {
            Tag::List => Value::List(Rc::clone(&cell)),
            _ => Value::Array(Rc::clone(&cell)),
        };
        let id = self.ctx.open_ref(handle.clone());
        self.ctx.enter(offset)?;
        for _ in 0..len {
            let item = self.decode_value(&declared_elem)?;
            cell.borrow_mut().push(item);
        }
        self.ctx.leave();
        self.ctx.seal_ref(id);
        Ok(handle)
    }

    fn decode_map(&mut self, declared: &DeclaredType, offset: usize) -> Result<Value> {
        let key_code = varint::read_uvarint(&mut self.cur)?;
        let val_code = varint::read_uvarint(&mut self.cur)?;
        let wire_key = DeclaredType::from_wire_code(key_code, offset)?;
        let wire_val = DeclaredType::from_wire_code(val_code, offset)?;
        let (declared_key, declared_val) = match declared {
            DeclaredType::Dynamic => (wire_key, wire_val),
            DeclaredType::Map(key, val) => {
                self.check_element(key, &wire_key, offset)?;
                self.check_element(val, &wire_val, offset)?;
                let key = if **key == DeclaredType::Dynamic {
                    wire_key
                } else {
                    (**key).clone()
                };
                let val = if **val == DeclaredType::Dynamic {
                    wire_val
                } else {
                    (**val).clone()
                };
                (key, val)
            }
            _ => {
                return Err(
                    self.mismatch(offset, "map payload under incompatible declared type".into())
                )
            }
        };

        let len = varint::read_uvarint(&mut self.cur)?;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        let cell = Rc::new(std::cell::RefCell::new(Vec::with_capacity(
            len.min(self.cur.remaining()),
        )));
        let handle = Value::Map(Rc::clone(&cell));
        let id = self.ctx.open_ref(handle.clone());
        self.ctx.enter(offset)?;
        for _ in 0..len {
            let saved = self.in_map_key;
            self.in_map_key = true;
            let key = self.decode_value(&declared_key)?;
            self.in_map_key = saved;
            let value = self.decode_value(&declared_val)?;
            cell.borrow_mut().push((key, value));
        }
        self.ctx.leave();
        self.ctx.seal_ref(id);
        Ok(handle)
    }

    fn decode_object(&mut self, declared: &DeclaredType, offset: usize) -> Result<Value> {
        let raw_id = varint::read_uvarint(&mut self.cur)?;
        let type_id = u32::try_from(raw_id).map_err(|_| {
            self.mismatch(offset, format!("object type id {raw_id} out of range"))
        })?;
        let descriptor = self.registry.by_id(type_id)?.clone();
        let shape = match &descriptor.shape {
            TypeShape::Object(shape) => shape,
            _ => {
                return Err(self.mismatch(
                    offset,
                    format!("object payload names non-object type {}", descriptor.name),
                ))
            }
        };
        self.check_declared_object(type_id, declared, offset)?;

        let count = varint::read_uvarint(&mut self.cur)?;
        if count != shape.fields.len() as u64 {
            return Err(self.mismatch(
                offset,
                format!(
                    "object {} carries {count} fields, descriptor has {}",
                    descriptor.name,
                    shape.fields.len()
                ),
            ));
        }

        let handle = Value::object(type_id, vec![Value::Null; shape.fields.len()]);
        let id = self.ctx.open_ref(handle.clone());
        self.ctx.enter(offset)?;
        match self.programs.lookup(type_id) {
            Some(program) => program.run_decode(self, &handle)?,
            None => {
                for field in &shape.fields {
                    let value = self.decode_value(&field.declared)?;
                    let at = self.cur.position();
                    field.accessor.write(&handle, value).map_err(|message| {
                        CodecError::AccessorFailure {
                            site: ErrorSite::Offset(at),
                            message: format!("{}: {message}", field.name),
                        }
                    })?;
                }
            }
        }
        self.ctx.leave();
        self.ctx.seal_ref(id);
        Ok(handle)
    }

    fn decode_enum(&mut self, declared: &DeclaredType, offset: usize) -> Result<Value> {
        let raw_id = varint::read_uvarint(&mut self.cur)?;
        let type_id = u32::try_from(raw_id)
            .map_err(|_| self.mismatch(offset, format!("enum type id {raw_id} out of range")))?;
        let descriptor = self.registry.by_id(type_id)?.clone();
        let variants = match &descriptor.shape {
            TypeShape::Enum(shape) => shape.variants.len(),
            _ => {
                return Err(self.mismatch(
                    offset,
                    format!("enum payload names non-enum type {}", descriptor.name),
                ))
            }
        };
        let ordinal = varint::read_uvarint(&mut self.cur)?;
        if ordinal >= variants as u64 {
            return Err(self.mismatch(
                offset,
                format!(
                    "ordinal {ordinal} out of range for enum {} ({variants} variants)",
                    descriptor.name
                ),
            ));
        }

        match declared {
            DeclaredType::Dynamic => {}
            DeclaredType::Registered(did) if *did == type_id => {}
            DeclaredType::Registered(did) => {
                let target = self.registry.by_id(*did)?;
                if !matches!(target.shape, TypeShape::PolymorphicRoot) {
                    return Err(self.mismatch(
                        offset,
                        format!("enum {} under declared type {}", descriptor.name, target.name),
                    ));
                }
            }
            _ => {
                return Err(self.mismatch(
                    offset,
                    "enum payload under incompatible declared type".into(),
                ))
            }
        }

        Ok(Value::Enum(EnumValue {
            type_id,
            ordinal: ordinal as u32,
        }))
    }

    /// Non-polymorphic declared object types require the wire id to equal
    /// the declared id or extend it; polymorphic roots and polymorphic
    /// descriptors accept any registered object id.
    fn check_declared_object(
        &self,
        type_id: u32,
        declared: &DeclaredType,
        offset: usize,
    ) -> Result<()> {
        let did = match declared {
            DeclaredType::Dynamic => return Ok(()),
            DeclaredType::Registered(did) if *did == type_id => return Ok(()),
            DeclaredType::Registered(did) => *did,
            _ => {
                return Err(self.mismatch(
                    offset,
                    "object payload under incompatible declared type".into(),
                ))
            }
        };
        let target = self.registry.by_id(did)?;
        let compatible = match &target.shape {
            TypeShape::PolymorphicRoot => true,
            TypeShape::Object(shape) => {
                shape.polymorphic || self.registry.is_subtype(type_id, did)
            }
            TypeShape::Enum(_) => false,
        };
        if compatible {
            Ok(())
        } else {
            Err(self.mismatch(
                offset,
                format!("wire type {type_id} is not assignable to declared type {}", target.name),
            ))
        }
    }

    /// Container element validation: the wire-carried code must name the
    /// declared element type or a registered subtype of it; 0 on either
    /// side means dynamic and always passes.
    fn check_element(
        &self,
        declared: &DeclaredType,
        wire: &DeclaredType,
        offset: usize,
    ) -> Result<()> {
        match (declared, wire) {
            (DeclaredType::Dynamic, _) | (_, DeclaredType::Dynamic) => Ok(()),
            (d, w) if d == w => Ok(()),
            (DeclaredType::Registered(d), DeclaredType::Registered(w))
                if self.registry.is_subtype(*w, *d) =>
            {
                Ok(())
            }
            (d, w) => Err(self.mismatch(
                offset,
                format!("wire element type {w:?} incompatible with declared {d:?}"),
            )),
        }
    }

    fn mismatch(&self, offset: usize, detail: String) -> CodecError {
        CodecError::TypeMismatch {
            site: ErrorSite::Offset(offset),
            detail,
        }
    }

    fn range(&self, offset: usize, detail: String) -> CodecError {
        CodecError::RangeError {
            site: ErrorSite::Offset(offset),
            detail,
        }
    }
}
