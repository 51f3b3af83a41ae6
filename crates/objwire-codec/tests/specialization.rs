//! Compiled programs must be observationally indistinguishable from the
//! generic dispatcher: identical bytes out, identical accept/reject in.

use std::sync::Arc;

use objwire_codec::{
    Codec, CodecError, DeclaredType, EnumValue, FieldDescriptor, PrimitiveType, TypeDescriptor,
    Value,
};

const ENTITY_ID: u32 = 16;
const NODE_ID: u32 = 17;
const COLOR_ID: u32 = 20;

fn long_t() -> DeclaredType {
    DeclaredType::Primitive(PrimitiveType::Long)
}

fn register_all(codec: &Codec) {
    codec
        .register(TypeDescriptor::enumeration(
            COLOR_ID,
            "Color",
            &["red", "green", "blue"],
        ))
        .unwrap();
    codec
        .register(TypeDescriptor::object(
            NODE_ID,
            "Node",
            vec![
                FieldDescriptor::slot("value", long_t(), 0),
                FieldDescriptor::slot("next", DeclaredType::Registered(NODE_ID), 1),
            ],
        ))
        .unwrap();
    codec
        .register(TypeDescriptor::object(
            ENTITY_ID,
            "Entity",
            vec![
                FieldDescriptor::slot("id", long_t(), 0),
                FieldDescriptor::slot(
                    "name",
                    DeclaredType::Primitive(PrimitiveType::String),
                    1,
                ),
                FieldDescriptor::slot("color", DeclaredType::Registered(COLOR_ID), 2),
                FieldDescriptor::slot(
                    "friends",
                    DeclaredType::List(Box::new(long_t())),
                    3,
                ),
                FieldDescriptor::slot("head", DeclaredType::Registered(NODE_ID), 4),
                FieldDescriptor::slot("extra", DeclaredType::Dynamic, 5),
            ],
        ))
        .unwrap();
}

fn sample_entity() -> Value {
    let n1 = Value::object(NODE_ID, vec![Value::Long(1), Value::Null]);
    let n2 = Value::object(NODE_ID, vec![Value::Long(2), Value::Null]);
    if let (Value::Object(a), Value::Object(b)) = (&n1, &n2) {
        a.borrow_mut().fields[1] = n2.clone();
        b.borrow_mut().fields[1] = n1.clone();
    }
    Value::object(
        ENTITY_ID,
        vec![
            Value::Long(42),
            Value::from("Jake"),
            Value::Enum(EnumValue {
                type_id: COLOR_ID,
                ordinal: 1,
            }),
            Value::list(vec![Value::Long(1), Value::Long(2), Value::Long(3)]),
            n1,
            Value::map(vec![(Value::from("Jake"), Value::Double(0.5))]),
        ],
    )
}

#[test]
fn compiled_output_is_byte_identical_to_generic() {
    let generic = Codec::new();
    register_all(&generic);
    let compiled = Codec::new();
    register_all(&compiled);
    compiled.precompile(ENTITY_ID).unwrap();

    let declared = DeclaredType::Registered(ENTITY_ID);
    let generic_wire = generic.encode(&sample_entity(), &declared).unwrap();
    let compiled_wire = compiled.encode(&sample_entity(), &declared).unwrap();

    assert_eq!(generic_wire, compiled_wire);
}

#[test]
fn compiled_decoder_accepts_what_generic_accepts() {
    let generic = Codec::new();
    register_all(&generic);
    let compiled = Codec::new();
    register_all(&compiled);
    compiled.precompile(ENTITY_ID).unwrap();

    let declared = DeclaredType::Registered(ENTITY_ID);
    let wire = generic.encode(&sample_entity(), &declared).unwrap();

    let from_generic = generic.decode(&wire, &declared).unwrap();
    let from_compiled = compiled.decode(&wire, &declared).unwrap();
    assert!(from_generic.deep_eq(&from_compiled));
    assert!(from_compiled.deep_eq(&sample_entity()));
}

#[test]
fn compiled_decoder_rejects_what_generic_rejects() {
    let generic = Codec::new();
    register_all(&generic);
    let compiled = Codec::new();
    register_all(&compiled);
    compiled.precompile(ENTITY_ID).unwrap();

    let declared = DeclaredType::Registered(ENTITY_ID);
    let mut wire = generic
        .encode(&sample_entity(), &declared)
        .unwrap()
        .to_vec();
    // Corrupt the first field's tag into an invalid byte.
    wire[3] = 0xFF;

    let generic_err = generic.decode(&wire, &declared).unwrap_err();
    let compiled_err = compiled.decode(&wire, &declared).unwrap_err();
    assert!(matches!(generic_err, CodecError::TypeMismatch { .. }));
    assert!(matches!(compiled_err, CodecError::TypeMismatch { .. }));
}

#[test]
fn recursive_precompile_roundtrips_cycles() {
    let codec = Codec::new();
    register_all(&codec);
    codec.precompile(NODE_ID).unwrap();

    let n1 = Value::object(NODE_ID, vec![Value::Long(1), Value::Null]);
    let n2 = Value::object(NODE_ID, vec![Value::Long(2), Value::Null]);
    if let (Value::Object(a), Value::Object(b)) = (&n1, &n2) {
        a.borrow_mut().fields[1] = n2.clone();
        b.borrow_mut().fields[1] = n1.clone();
    }

    let declared = DeclaredType::Registered(NODE_ID);
    let decoded = codec
        .decode(&codec.encode(&n1, &declared).unwrap(), &declared)
        .unwrap();

    let next_next = match &decoded {
        Value::Object(cell) => match &cell.borrow().fields[1] {
            Value::Object(next) => next.borrow().fields[1].clone(),
            other => panic!("expected node, got {other:?}"),
        },
        other => panic!("expected node, got {other:?}"),
    };
    match (&decoded, &next_next) {
        (Value::Object(a), Value::Object(b)) => assert!(std::rc::Rc::ptr_eq(a, b)),
        _ => panic!("cycle not restored"),
    }
}

#[test]
fn precompile_before_and_after_first_use_agree() {
    let codec = Codec::new();
    register_all(&codec);

    let declared = DeclaredType::Registered(ENTITY_ID);
    let before = codec.encode(&sample_entity(), &declared).unwrap();
    codec.precompile(ENTITY_ID).unwrap();
    let after = codec.encode(&sample_entity(), &declared).unwrap();

    assert_eq!(before, after);
}

#[test]
fn concurrent_precompile_and_encode() {
    let codec = Arc::new(Codec::new());
    register_all(&codec);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let codec = Arc::clone(&codec);
            std::thread::spawn(move || {
                codec.precompile(ENTITY_ID).unwrap();
                let declared = DeclaredType::Registered(ENTITY_ID);
                let wire = codec.encode(&sample_entity(), &declared).unwrap();
                codec.decode(&wire, &declared).unwrap();
                wire
            })
        })
        .collect();

    let wires: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for wire in &wires[1..] {
        assert_eq!(wire, &wires[0]);
    }
}

#[test]
fn compiled_range_errors_match_generic() {
    let generic = Codec::new();
    let compiled = Codec::new();
    for codec in [&generic, &compiled] {
        codec
            .register(TypeDescriptor::object(
                16,
                "Tiny",
                vec![FieldDescriptor::slot(
                    "b",
                    DeclaredType::Primitive(PrimitiveType::Byte),
                    0,
                )],
            ))
            .unwrap();
    }
    compiled.precompile(16).unwrap();

    let value = Value::object(16, vec![Value::Long(300)]);
    let declared = DeclaredType::Registered(16);

    let generic_err = generic.encode(&value, &declared).unwrap_err();
    let compiled_err = compiled.encode(&value, &declared).unwrap_err();
    assert!(matches!(generic_err, CodecError::RangeError { .. }));
    assert!(matches!(compiled_err, CodecError::RangeError { .. }));
}
