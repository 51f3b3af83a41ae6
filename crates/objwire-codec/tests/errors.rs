//! Typed failure behavior: every rejection carries its variant and site.

use objwire_codec::{
    Codec, CodecConfig, CodecError, DeclaredType, ErrorSite, FieldAccessor, FieldDescriptor,
    PrimitiveType, TypeDescriptor, Value,
};

fn byte_t() -> DeclaredType {
    DeclaredType::Primitive(PrimitiveType::Byte)
}

fn int_t() -> DeclaredType {
    DeclaredType::Primitive(PrimitiveType::Int)
}

fn long_t() -> DeclaredType {
    DeclaredType::Primitive(PrimitiveType::Long)
}

#[test]
fn long_into_byte_field_is_a_range_error() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(
            16,
            "Tiny",
            vec![FieldDescriptor::slot("b", byte_t(), 0)],
        ))
        .unwrap();

    let value = Value::object(16, vec![Value::Long(300)]);
    let err = codec
        .encode(&value, &DeclaredType::Registered(16))
        .unwrap_err();

    match err {
        CodecError::RangeError { site, .. } => {
            assert_eq!(site.to_string(), "root.b");
        }
        other => panic!("expected range error, got {other}"),
    }
}

#[test]
fn long_into_int_field_is_accepted() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(
            16,
            "Narrow",
            vec![FieldDescriptor::slot("n", int_t(), 0)],
        ))
        .unwrap();

    let value = Value::object(16, vec![Value::Long(300)]);
    assert!(codec.encode(&value, &DeclaredType::Registered(16)).is_ok());
}

#[test]
fn invalid_top_tag_fails_at_offset_zero() {
    let codec = Codec::new();
    let err = codec.decode(&[0xFF], &DeclaredType::Dynamic).unwrap_err();
    match err {
        CodecError::TypeMismatch { site, .. } => assert_eq!(site, ErrorSite::Offset(0)),
        other => panic!("expected type mismatch, got {other}"),
    }
}

#[test]
fn eleven_byte_varint_overflows() {
    let mut wire = vec![0x14]; // LONG_POS
    wire.extend_from_slice(&[0x80; 11]);

    let codec = Codec::new();
    let err = codec.decode(&wire, &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(err, CodecError::VarintOverflow { offset: 1 }));
}

#[test]
fn truncated_input_is_unexpected_end() {
    let codec = Codec::new();
    let wire = codec
        .encode(&Value::from("hello"), &DeclaredType::Dynamic)
        .unwrap();

    let err = codec
        .decode(&wire[..wire.len() - 2], &DeclaredType::Dynamic)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnexpectedEnd { .. }));

    let err = codec.decode(&[], &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(err, CodecError::UnexpectedEnd { offset: 0 }));
}

#[test]
fn depth_limit_applies_to_encode() {
    let codec = Codec::with_config(CodecConfig {
        max_depth: 3,
        ..CodecConfig::default()
    });

    let mut value = Value::list(vec![Value::Int(1)]);
    for _ in 0..4 {
        value = Value::list(vec![value]);
    }
    let err = codec.encode(&value, &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(
        err,
        CodecError::DepthLimitExceeded { limit: 3, .. }
    ));
}

#[test]
fn depth_limit_applies_to_decode() {
    let codec = Codec::with_config(CodecConfig {
        max_depth: 3,
        ..CodecConfig::default()
    });

    // Five nested single-element lists, then an int.
    let mut wire = Vec::new();
    for _ in 0..5 {
        wire.extend_from_slice(&[0x31, 0x00, 0x01]);
    }
    wire.extend_from_slice(&[0x12, 0x07]);

    let err = codec.decode(&wire, &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(
        err,
        CodecError::DepthLimitExceeded { limit: 3, .. }
    ));
}

#[test]
fn unknown_wire_type_id_is_rejected() {
    let codec = Codec::new();
    // OBJECT with unregistered id 99.
    let err = codec
        .decode(&[0x40, 0x63, 0x00], &DeclaredType::Dynamic)
        .unwrap_err();
    assert!(matches!(err, CodecError::UnknownType(_)));
}

#[test]
fn unregistered_instance_fails_encode() {
    let codec = Codec::new();
    let value = Value::object(99, vec![]);
    let err = codec.encode(&value, &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(err, CodecError::UnknownType(_)));
}

#[test]
fn field_count_mismatch_is_a_framing_error() {
    let writer = Codec::new();
    writer
        .register(TypeDescriptor::object(
            16,
            "V1",
            vec![FieldDescriptor::slot("a", long_t(), 0)],
        ))
        .unwrap();
    let wire = writer
        .encode(
            &Value::object(16, vec![Value::Long(1)]),
            &DeclaredType::Registered(16),
        )
        .unwrap();

    // A reader whose descriptor grew a second field rejects the frame.
    let reader = Codec::new();
    reader
        .register(TypeDescriptor::object(
            16,
            "V2",
            vec![
                FieldDescriptor::slot("a", long_t(), 0),
                FieldDescriptor::slot("b", long_t(), 1),
            ],
        ))
        .unwrap();

    let err = reader
        .decode(&wire, &DeclaredType::Registered(16))
        .unwrap_err();
    match err {
        CodecError::TypeMismatch { detail, .. } => {
            assert!(detail.contains("fields"), "unexpected detail: {detail}")
        }
        other => panic!("expected type mismatch, got {other}"),
    }
}

#[test]
fn unknown_reference_id_is_rejected() {
    let codec = Codec::new();
    let err = codec
        .decode(&[0x50, 0x05], &DeclaredType::Dynamic)
        .unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));
}

#[test]
fn unknown_string_id_is_rejected() {
    let codec = Codec::new();
    let err = codec
        .decode(&[0x21, 0x01], &DeclaredType::Dynamic)
        .unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));
}

#[test]
fn reference_in_map_key_to_open_composite_is_unsupported() {
    let codec = Codec::new();
    // A map whose first key is a back reference to the map itself.
    let wire = [0x32, 0x00, 0x00, 0x01, 0x50, 0x01];
    let err = codec.decode(&wire, &DeclaredType::Dynamic).unwrap_err();
    match err {
        CodecError::UnsupportedCycle { id: 1, site } => {
            assert_eq!(site, ErrorSite::Offset(4));
        }
        other => panic!("expected unsupported cycle, got {other}"),
    }
}

#[test]
fn map_keyed_by_enclosing_composite_fails_encode() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(
            16,
            "Holder",
            vec![FieldDescriptor::slot(
                "lookup",
                DeclaredType::Map(
                    Box::new(DeclaredType::Registered(16)),
                    Box::new(DeclaredType::Primitive(PrimitiveType::String)),
                ),
                0,
            )],
        ))
        .unwrap();

    // The holder's map uses the holder itself as a key.
    let holder = Value::object(16, vec![Value::Null]);
    let map = Value::map(vec![(holder.clone(), Value::from("me"))]);
    match &holder {
        Value::Object(cell) => cell.borrow_mut().fields[0] = map,
        other => panic!("expected object, got {other:?}"),
    }

    let err = codec
        .encode(&holder, &DeclaredType::Registered(16))
        .unwrap_err();
    match err {
        CodecError::UnsupportedCycle { id: 1, site } => {
            assert_eq!(site.to_string(), "root.lookup.keys[0]");
        }
        other => panic!("expected unsupported cycle, got {other}"),
    }
}

#[test]
fn reference_in_map_value_to_open_composite_is_fine() {
    let codec = Codec::new();
    // {"self": <the map>} — legal, the cycle closes through a value.
    let wire = [
        0x32, 0x00, 0x00, 0x01, // map, dynamic/dynamic, one pair
        0x20, 0x04, b's', b'e', b'l', b'f', // key "self"
        0x50, 0x01, // value: back reference to the map
    ];
    let decoded = codec.decode(&wire, &DeclaredType::Dynamic).unwrap();
    match &decoded {
        Value::Map(pairs) => {
            let pairs = pairs.borrow();
            assert_eq!(pairs.len(), 1);
            assert!(matches!(&pairs[0].1, Value::Map(inner) if std::rc::Rc::ptr_eq(
                inner,
                match &decoded {
                    Value::Map(outer) => outer,
                    _ => unreachable!(),
                }
            )));
        }
        other => panic!("expected map, got {other:?}"),
    }
}

#[test]
fn wire_kind_must_match_declared_kind() {
    let codec = Codec::new();

    // A string payload under a declared long.
    let wire = codec
        .encode(&Value::from("nope"), &DeclaredType::Dynamic)
        .unwrap();
    let err = codec.decode(&wire, &long_t()).unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));

    // A bool value under a declared string on encode.
    let err = codec
        .encode(
            &Value::Bool(true),
            &DeclaredType::Primitive(PrimitiveType::String),
        )
        .unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));
}

#[test]
fn mismatched_declared_object_type_is_rejected() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(
            16,
            "A",
            vec![FieldDescriptor::slot("x", long_t(), 0)],
        ))
        .unwrap();
    codec
        .register(TypeDescriptor::object(
            17,
            "B",
            vec![FieldDescriptor::slot("x", long_t(), 0)],
        ))
        .unwrap();

    let a = Value::object(16, vec![Value::Long(1)]);
    let err = codec.encode(&a, &DeclaredType::Registered(17)).unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));

    let wire = codec.encode(&a, &DeclaredType::Registered(16)).unwrap();
    let err = codec.decode(&wire, &DeclaredType::Registered(17)).unwrap_err();
    assert!(matches!(err, CodecError::TypeMismatch { .. }));
}

#[test]
fn duplicate_registrations_are_rejected() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(16, "A", vec![]))
        .unwrap();

    assert!(matches!(
        codec.register(TypeDescriptor::object(16, "B", vec![])),
        Err(CodecError::DuplicateRegistration(_))
    ));
    assert!(matches!(
        codec.register(TypeDescriptor::object(17, "A", vec![])),
        Err(CodecError::DuplicateRegistration(_))
    ));
    assert!(matches!(
        codec.register(TypeDescriptor::object(3, "Low", vec![])),
        Err(CodecError::DuplicateRegistration(_))
    ));
}

#[test]
fn accessor_failures_surface_with_field_path() {
    let codec = Codec::new();
    codec
        .register(TypeDescriptor::object(
            16,
            "Broken",
            vec![FieldDescriptor::new(
                "cursed",
                long_t(),
                FieldAccessor::new(
                    |_| Err("backing store gone".to_string()),
                    |_, _| Err("backing store gone".to_string()),
                ),
            )],
        ))
        .unwrap();

    let value = Value::object(16, vec![Value::Long(1)]);
    let err = codec
        .encode(&value, &DeclaredType::Registered(16))
        .unwrap_err();
    match err {
        CodecError::AccessorFailure { site, message } => {
            assert_eq!(site.to_string(), "root.cursed");
            assert_eq!(message, "backing store gone");
        }
        other => panic!("expected accessor failure, got {other}"),
    }
}

#[test]
fn negative_int_wire_payload_out_of_range_is_rejected() {
    let codec = Codec::new();
    // INT_NEG with magnitude i32::MAX + 2.
    let mut wire = vec![0x13];
    let mut magnitude: u64 = i32::MAX as u64 + 2;
    while magnitude >= 0x80 {
        wire.push((magnitude as u8) | 0x80);
        magnitude >>= 7;
    }
    wire.push(magnitude as u8);

    let err = codec.decode(&wire, &DeclaredType::Dynamic).unwrap_err();
    assert!(matches!(err, CodecError::RangeError { .. }));
}
