//! Compiled per-type codecs.
//!
//! `precompile` flattens a registered object type's descriptor into a
//! straight-line program: one op per field, with the accessor and the
//! routine selected at build time instead of per call. Programs write
//! through the same primitive routines as the generic dispatcher, so their
//! output is byte-for-byte identical and their decoders accept exactly the
//! same inputs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use tracing::debug;

use crate::context::PathSeg;
use crate::decode::Decoder;
use crate::descriptor::{DeclaredType, FieldAccessor, PrimitiveType, TypeShape};
use crate::encode::Encoder;
use crate::error::{CodecError, ErrorSite, Result};
use crate::registry::RegistrySnapshot;
use crate::value::Value;

type ProgramCell = Arc<OnceLock<Arc<FieldProgram>>>;

/// A compiled codec for one object type.
pub(crate) struct FieldProgram {
    type_id: u32,
    ops: Vec<FieldOp>,
}

struct FieldOp {
    name: Arc<str>,
    accessor: FieldAccessor,
    kind: OpKind,
}

enum OpKind {
    /// Direct call to one primitive routine.
    Primitive(PrimitiveType),
    /// Direct enum write against a fixed target type.
    Enum { target: u32 },
    /// Nested object type with its own program. The cell is reserved on
    /// first encounter and filled when that type's generation completes,
    /// which is what lets recursive types compile; no program runs before
    /// the top-level `precompile` call returns.
    Object { target: u32, cell: ProgramCell },
    /// Everything else runs through the generic dispatcher, so compiled and
    /// generic codecs compose.
    Generic { declared: DeclaredType },
}

impl OpKind {
    fn declared(&self) -> DeclaredType {
        match self {
            OpKind::Primitive(p) => DeclaredType::Primitive(*p),
            OpKind::Enum { target } | OpKind::Object { target, .. } => {
                DeclaredType::Registered(*target)
            }
            OpKind::Generic { declared } => declared.clone(),
        }
    }
}

impl FieldProgram {
    pub fn type_id(&self) -> u32 {
        self.type_id
    }

    pub fn field_count(&self) -> usize {
        self.ops.len()
    }

    /// Straight-line encode: the caller has already written the object
    /// framing via the shared prelude.
    pub fn run_encode(&self, enc: &mut Encoder<'_>, owner: &Value) -> Result<()> {
        for op in &self.ops {
            enc.ctx.push(PathSeg::Field(op.name.clone()));
            let value = match op.accessor.read(owner) {
                Ok(value) => value,
                Err(message) => {
                    return Err(CodecError::AccessorFailure {
                        site: enc.ctx.site(),
                        message,
                    })
                }
            };
            match &op.kind {
                OpKind::Primitive(p) => enc.encode_prim(&value, *p)?,
                OpKind::Enum { target } => match &value {
                    Value::Enum(ev) => enc.encode_enum(*ev, Some(*target))?,
                    other => enc.encode_value(other, &DeclaredType::Registered(*target))?,
                },
                OpKind::Object { target, cell } => match &value {
                    Value::Object(obj) if obj.borrow().type_id == *target => match cell.get() {
                        Some(program) => enc.encode_object_with_program(&value, program)?,
                        None => enc.encode_value(&value, &DeclaredType::Registered(*target))?,
                    },
                    other => enc.encode_value(other, &DeclaredType::Registered(*target))?,
                },
                OpKind::Generic { declared } => enc.encode_value(&value, declared)?,
            }
            enc.ctx.pop();
        }
        Ok(())
    }

    /// Straight-line decode into an already-registered placeholder: the
    /// caller has consumed the object framing and validated the field count.
    pub fn run_decode(&self, dec: &mut Decoder<'_>, owner: &Value) -> Result<()> {
        for op in &self.ops {
            let value = dec.decode_value(&op.kind.declared())?;
            let at = dec.position();
            op.accessor.write(owner, value).map_err(|message| {
                CodecError::AccessorFailure {
                    site: ErrorSite::Offset(at),
                    message: format!("{}: {message}", op.name),
                }
            })?;
        }
        Ok(())
    }
}

/// Compiled-program cache shared by all calls on one codec.
///
/// At most one generation runs per descriptor: generation serializes on a
/// mutex while lookups stay on the read path.
pub(crate) struct ProgramCache {
    cells: RwLock<HashMap<u32, ProgramCell>>,
    generate: Mutex<()>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            generate: Mutex::new(()),
        }
    }

    /// The compiled program for a type, when one exists.
    pub fn lookup(&self, type_id: u32) -> Option<Arc<FieldProgram>> {
        self.cells
            .read()
            .expect("program cache poisoned")
            .get(&type_id)
            .and_then(|cell| cell.get().cloned())
    }

    /// Build the program for a registered object type, plus every object
    /// type reachable from its fields. Reuses existing programs.
    pub fn ensure(
        &self,
        type_id: u32,
        registry: &RegistrySnapshot,
    ) -> Result<Arc<FieldProgram>> {
        let _guard = self.generate.lock().expect("program cache poisoned");
        if let Some(program) = self.lookup(type_id) {
            return Ok(program);
        }
        let mut building = HashSet::new();
        self.build(type_id, registry, &mut building)
    }

    fn build(
        &self,
        type_id: u32,
        registry: &RegistrySnapshot,
        building: &mut HashSet<u32>,
    ) -> Result<Arc<FieldProgram>> {
        let cell = self.cell(type_id);
        if let Some(program) = cell.get() {
            return Ok(program.clone());
        }
        building.insert(type_id);

        let descriptor = registry.by_id(type_id)?.clone();
        let shape = match &descriptor.shape {
            TypeShape::Object(shape) => shape,
            _ => {
                return Err(CodecError::TypeMismatch {
                    site: ErrorSite::Path(String::new()),
                    detail: format!("type {} cannot be precompiled", descriptor.name),
                })
            }
        };

        debug!(
            id = type_id,
            name = %descriptor.name,
            fields = shape.fields.len(),
            "compiling field program"
        );

        let mut ops = Vec::with_capacity(shape.fields.len());
        for field in &shape.fields {
            let kind = self.op_for(&field.declared, registry, building)?;
            ops.push(FieldOp {
                name: field.name.clone(),
                accessor: field.accessor.clone(),
                kind,
            });
        }
        let program = Arc::new(FieldProgram { type_id, ops });
        let _ = cell.set(Arc::clone(&program));
        building.remove(&type_id);
        Ok(program)
    }

    fn op_for(
        &self,
        declared: &DeclaredType,
        registry: &RegistrySnapshot,
        building: &mut HashSet<u32>,
    ) -> Result<OpKind> {
        Ok(match declared {
            DeclaredType::Primitive(p) => OpKind::Primitive(*p),
            DeclaredType::Registered(target) => match registry.by_id(*target).map(|d| &d.shape) {
                Ok(TypeShape::Enum(_)) => OpKind::Enum { target: *target },
                Ok(TypeShape::Object(shape)) if !shape.polymorphic => {
                    let cell = self.cell(*target);
                    if cell.get().is_none() && !building.contains(target) {
                        self.build(*target, registry, building)?;
                    }
                    OpKind::Object {
                        target: *target,
                        cell,
                    }
                }
                // Polymorphic targets dispatch on the concrete type at run
                // time; unregistered ids may still be registered later.
                _ => OpKind::Generic {
                    declared: declared.clone(),
                },
            },
            _ => OpKind::Generic {
                declared: declared.clone(),
            },
        })
    }

    fn cell(&self, type_id: u32) -> ProgramCell {
        let mut cells = self.cells.write().expect("program cache poisoned");
        cells.entry(type_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{FieldDescriptor, TypeDescriptor};
    use crate::registry::TypeRegistry;

    fn registry_with_node() -> TypeRegistry {
        let registry = TypeRegistry::new();
        registry
            .register(TypeDescriptor::object(
                16,
                "Node",
                vec![
                    FieldDescriptor::slot(
                        "value",
                        DeclaredType::Primitive(PrimitiveType::Long),
                        0,
                    ),
                    FieldDescriptor::slot("next", DeclaredType::Registered(16), 1),
                ],
            ))
            .unwrap();
        registry
    }

    #[test]
    fn recursive_type_compiles_once() {
        let registry = registry_with_node();
        let snapshot = registry.snapshot();
        let cache = ProgramCache::new();

        let program = cache.ensure(16, &snapshot).unwrap();
        assert_eq!(program.type_id(), 16);
        assert_eq!(program.field_count(), 2);

        // The self-referential field binds the same program through its cell.
        match &program.ops[1].kind {
            OpKind::Object { target, cell } => {
                assert_eq!(*target, 16);
                assert!(Arc::ptr_eq(cell.get().unwrap(), &program));
            }
            _ => panic!("expected object op for self-reference"),
        }

        let again = cache.ensure(16, &snapshot).unwrap();
        assert!(Arc::ptr_eq(&again, &program));
    }

    #[test]
    fn nested_types_compile_transitively() {
        let registry = registry_with_node();
        registry
            .register(TypeDescriptor::object(
                17,
                "Holder",
                vec![FieldDescriptor::slot("node", DeclaredType::Registered(16), 0)],
            ))
            .unwrap();
        let snapshot = registry.snapshot();
        let cache = ProgramCache::new();

        cache.ensure(17, &snapshot).unwrap();
        assert!(cache.lookup(16).is_some());
    }

    #[test]
    fn enum_and_dynamic_fields_do_not_force_programs() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeDescriptor::enumeration(20, "Color", &["red", "green"]))
            .unwrap();
        registry
            .register(TypeDescriptor::object(
                21,
                "Styled",
                vec![
                    FieldDescriptor::slot("color", DeclaredType::Registered(20), 0),
                    FieldDescriptor::slot("extra", DeclaredType::Dynamic, 1),
                ],
            ))
            .unwrap();
        let snapshot = registry.snapshot();
        let cache = ProgramCache::new();

        let program = cache.ensure(21, &snapshot).unwrap();
        assert!(matches!(program.ops[0].kind, OpKind::Enum { target: 20 }));
        assert!(matches!(program.ops[1].kind, OpKind::Generic { .. }));
        assert!(cache.lookup(20).is_none());
    }

    #[test]
    fn non_object_types_cannot_be_precompiled() {
        let registry = TypeRegistry::new();
        registry
            .register(TypeDescriptor::enumeration(20, "Color", &["red"]))
            .unwrap();
        let cache = ProgramCache::new();

        assert!(matches!(
            cache.ensure(20, &registry.snapshot()),
            Err(CodecError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_type_is_reported() {
        let cache = ProgramCache::new();
        let registry = TypeRegistry::new();
        assert!(matches!(
            cache.ensure(16, &registry.snapshot()),
            Err(CodecError::UnknownType(_))
        ));
    }
}
