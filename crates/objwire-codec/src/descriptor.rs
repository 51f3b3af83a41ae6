use std::fmt;
use std::sync::Arc;

use crate::error::{CodecError, ErrorSite, Result};
use crate::value::Value;

/// Lowest stable id available to applications. Smaller values are reserved
/// for the wire type codes of primitives.
pub const FIRST_USER_TYPE_ID: u32 = 16;

/// The eight primitive kinds the wire distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    String,
}

impl PrimitiveType {
    /// Wire type code carried by container payloads.
    pub fn wire_code(self) -> u64 {
        match self {
            PrimitiveType::Bool => 1,
            PrimitiveType::Byte => 2,
            PrimitiveType::Short => 3,
            PrimitiveType::Int => 4,
            PrimitiveType::Long => 5,
            PrimitiveType::Float => 6,
            PrimitiveType::Double => 7,
            PrimitiveType::String => 8,
        }
    }

    fn from_wire_code(code: u64) -> Option<PrimitiveType> {
        Some(match code {
            1 => PrimitiveType::Bool,
            2 => PrimitiveType::Byte,
            3 => PrimitiveType::Short,
            4 => PrimitiveType::Int,
            5 => PrimitiveType::Long,
            6 => PrimitiveType::Float,
            7 => PrimitiveType::Double,
            8 => PrimitiveType::String,
            _ => return None,
        })
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrimitiveType::Bool => "bool",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::String => "string",
        };
        f.write_str(name)
    }
}

/// The type a caller or field position declares for a wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// Accept any wire value.
    Dynamic,
    Primitive(PrimitiveType),
    List(Box<DeclaredType>),
    Array(Box<DeclaredType>),
    Map(Box<DeclaredType>, Box<DeclaredType>),
    /// A registered object, enum, or polymorphic root by stable id.
    Registered(u32),
}

impl DeclaredType {
    /// Wire type code carried by container payloads; 0 means dynamic per
    /// element. Nested containers carry 0 because their elements are fully
    /// self-describing anyway.
    pub fn wire_code(&self) -> u64 {
        match self {
            DeclaredType::Dynamic
            | DeclaredType::List(_)
            | DeclaredType::Array(_)
            | DeclaredType::Map(..) => 0,
            DeclaredType::Primitive(p) => p.wire_code(),
            DeclaredType::Registered(id) => u64::from(*id),
        }
    }

    /// Inverse of [`DeclaredType::wire_code`], for reader-side checks.
    pub fn from_wire_code(code: u64, offset: usize) -> Result<DeclaredType> {
        if code == 0 {
            return Ok(DeclaredType::Dynamic);
        }
        if let Some(prim) = PrimitiveType::from_wire_code(code) {
            return Ok(DeclaredType::Primitive(prim));
        }
        if code < u64::from(FIRST_USER_TYPE_ID) || code > u64::from(u32::MAX) {
            return Err(CodecError::TypeMismatch {
                site: ErrorSite::Offset(offset),
                detail: format!("invalid wire type code {code}"),
            });
        }
        Ok(DeclaredType::Registered(code as u32))
    }
}

type ReadFn = dyn Fn(&Value) -> std::result::Result<Value, String> + Send + Sync;
type WriteFn = dyn Fn(&Value, Value) -> std::result::Result<(), String> + Send + Sync;

/// Read/write capability pair over one field of an owning instance.
///
/// The codec treats accessors opaquely; failures surface as
/// [`CodecError::AccessorFailure`] with the field site attached by the
/// caller.
#[derive(Clone)]
pub struct FieldAccessor {
    read: Arc<ReadFn>,
    write: Arc<WriteFn>,
}

impl FieldAccessor {
    /// Build an accessor from arbitrary closures.
    pub fn new<R, W>(read: R, write: W) -> Self
    where
        R: Fn(&Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
        W: Fn(&Value, Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        Self {
            read: Arc::new(read),
            write: Arc::new(write),
        }
    }

    /// Accessor over field slot `index` of the built-in object
    /// representation.
    pub fn slot(index: usize) -> Self {
        Self::new(
            move |owner| match owner {
                Value::Object(cell) => cell
                    .borrow()
                    .fields
                    .get(index)
                    .cloned()
                    .ok_or_else(|| format!("object has no field slot {index}")),
                other => Err(format!("expected object, found {}", kind_name(other))),
            },
            move |owner, value| match owner {
                Value::Object(cell) => {
                    let mut object = cell.borrow_mut();
                    match object.fields.get_mut(index) {
                        Some(slot) => {
                            *slot = value;
                            Ok(())
                        }
                        None => Err(format!("object has no field slot {index}")),
                    }
                }
                other => Err(format!("expected object, found {}", kind_name(other))),
            },
        )
    }

    /// Read the field from its owner.
    pub fn read(&self, owner: &Value) -> std::result::Result<Value, String> {
        (self.read)(owner)
    }

    /// Write the field on its owner.
    pub fn write(&self, owner: &Value, value: Value) -> std::result::Result<(), String> {
        (self.write)(owner, value)
    }
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldAccessor")
    }
}

/// One field of a registered object type. Field order is registration order
/// and is part of the wire contract.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub name: Arc<str>,
    pub declared: DeclaredType,
    pub accessor: FieldAccessor,
}

impl FieldDescriptor {
    /// A field with an explicit accessor.
    pub fn new(name: &str, declared: DeclaredType, accessor: FieldAccessor) -> Self {
        Self {
            name: Arc::from(name),
            declared,
            accessor,
        }
    }

    /// A field stored in slot `index` of the built-in object representation.
    pub fn slot(name: &str, declared: DeclaredType, index: usize) -> Self {
        Self::new(name, declared, FieldAccessor::slot(index))
    }
}

/// Immutable metadata for a registered type.
#[derive(Debug)]
pub struct TypeDescriptor {
    pub stable_id: u32,
    pub name: Arc<str>,
    pub shape: TypeShape,
}

/// What a registered type looks like on the wire.
#[derive(Debug)]
pub enum TypeShape {
    Object(ObjectShape),
    Enum(EnumShape),
    /// Declared-only abstract root; the wire id alone selects the concrete
    /// descriptor on decode.
    PolymorphicRoot,
}

#[derive(Debug)]
pub struct ObjectShape {
    pub fields: Vec<FieldDescriptor>,
    /// Stable id of the supertype, when this type participates in a
    /// hierarchy.
    pub extends: Option<u32>,
    /// When true, decode selects the descriptor from the wire id alone even
    /// under this declared type.
    pub polymorphic: bool,
}

#[derive(Debug)]
pub struct EnumShape {
    pub variants: Vec<Arc<str>>,
}

impl TypeDescriptor {
    /// An object type with the given fields, in wire order.
    pub fn object(stable_id: u32, name: &str, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            stable_id,
            name: Arc::from(name),
            shape: TypeShape::Object(ObjectShape {
                fields,
                extends: None,
                polymorphic: false,
            }),
        }
    }

    /// An enum type with the given variants, in ordinal order.
    pub fn enumeration(stable_id: u32, name: &str, variants: &[&str]) -> Self {
        Self {
            stable_id,
            name: Arc::from(name),
            shape: TypeShape::Enum(EnumShape {
                variants: variants.iter().map(|v| Arc::from(*v)).collect(),
            }),
        }
    }

    /// An abstract polymorphic root, usable only as a declared type.
    pub fn polymorphic_root(stable_id: u32, name: &str) -> Self {
        Self {
            stable_id,
            name: Arc::from(name),
            shape: TypeShape::PolymorphicRoot,
        }
    }

    /// Mark an object type as extending another registered object type.
    pub fn extending(mut self, parent: u32) -> Self {
        if let TypeShape::Object(shape) = &mut self.shape {
            shape.extends = Some(parent);
        }
        self
    }

    /// Mark an object type as a polymorphic dispatch point.
    pub fn polymorphic(mut self) -> Self {
        if let TypeShape::Object(shape) = &mut self.shape {
            shape.polymorphic = true;
        }
        self
    }

    /// The object shape, or an error naming the type.
    pub fn as_object(&self) -> Result<&ObjectShape> {
        match &self.shape {
            TypeShape::Object(shape) => Ok(shape),
            _ => Err(CodecError::TypeMismatch {
                site: ErrorSite::Path(String::new()),
                detail: format!("type {} is not an object type", self.name),
            }),
        }
    }
}

/// Short kind label used in diagnostics.
pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Byte(_) => "byte",
        Value::Short(_) => "short",
        Value::Int(_) => "int",
        Value::Long(_) => "long",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::Str(_) => "string",
        Value::List(_) => "list",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Object(_) => "object",
        Value::Enum(_) => "enum",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_roundtrip() {
        let types = [
            DeclaredType::Primitive(PrimitiveType::Bool),
            DeclaredType::Primitive(PrimitiveType::Long),
            DeclaredType::Primitive(PrimitiveType::String),
            DeclaredType::Registered(16),
            DeclaredType::Registered(4096),
        ];
        for declared in types {
            let code = declared.wire_code();
            assert_eq!(DeclaredType::from_wire_code(code, 0).unwrap(), declared);
        }
        assert_eq!(
            DeclaredType::from_wire_code(0, 0).unwrap(),
            DeclaredType::Dynamic
        );
    }

    #[test]
    fn containers_carry_dynamic_code() {
        let nested = DeclaredType::List(Box::new(DeclaredType::Primitive(PrimitiveType::Int)));
        assert_eq!(nested.wire_code(), 0);
        assert_eq!(
            DeclaredType::Map(
                Box::new(DeclaredType::Primitive(PrimitiveType::String)),
                Box::new(DeclaredType::Dynamic),
            )
            .wire_code(),
            0
        );
    }

    #[test]
    fn reserved_codes_are_rejected() {
        for code in [9u64, 15, u64::from(u32::MAX) + 1] {
            assert!(matches!(
                DeclaredType::from_wire_code(code, 3),
                Err(CodecError::TypeMismatch { .. })
            ));
        }
    }

    #[test]
    fn slot_accessor_reads_and_writes() {
        let obj = Value::object(16, vec![Value::Null, Value::Int(5)]);
        let accessor = FieldAccessor::slot(1);

        assert!(accessor.read(&obj).unwrap().deep_eq(&Value::Int(5)));
        accessor.write(&obj, Value::Int(9)).unwrap();
        assert!(accessor.read(&obj).unwrap().deep_eq(&Value::Int(9)));

        assert!(FieldAccessor::slot(7).read(&obj).is_err());
        assert!(accessor.read(&Value::Null).is_err());
    }

    #[test]
    fn builder_markers_apply_to_objects_only() {
        let desc = TypeDescriptor::object(16, "Node", vec![]).extending(17).polymorphic();
        match &desc.shape {
            TypeShape::Object(shape) => {
                assert_eq!(shape.extends, Some(17));
                assert!(shape.polymorphic);
            }
            _ => panic!("expected object shape"),
        }

        let root = TypeDescriptor::polymorphic_root(20, "Any").extending(17);
        assert!(matches!(root.shape, TypeShape::PolymorphicRoot));
    }
}
