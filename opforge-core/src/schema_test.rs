use super::*;
use crate::attribute::attrs;
use rand::seq::SliceRandom;
use rand::Rng;

fn loss_schema() -> Schema {
    Schema::builder("toy_loss")
        .input("X", "prediction")
        .input("Target", "label")
        .no_grad()
        .output("Loss", "loss value")
        .attr("reduction", AttrType::Str, "reduction mode")
        .one_of(["none", "batchmean", "mean", "sum"])
        .default(AttrValue::from("mean"))
        .attr("axis", AttrType::Int, "required axis")
        .attr("scale", AttrType::Float, "optional scale")
        .default(AttrValue::Float(1.0))
        .attr("flags", AttrType::Bools, "list attribute")
        .default(AttrValue::Bools(vec![]))
        .build()
        .expect("toy schema must build")
}

// A slot may appear several times to bind several variables.
fn bindings(pairs: &[(&str, &str)]) -> SlotMap {
    let mut map = SlotMap::new();
    for (slot, var) in pairs {
        map.entry(slot.to_string()).or_default().push(var.to_string());
    }
    map
}

#[test]
fn test_validate_fills_defaults() -> Result<(), OpError> {
    let schema = loss_schema();
    let completed = schema.validate(&attrs([("axis", AttrValue::Int(1))]))?;
    assert_eq!(completed["reduction"], AttrValue::from("mean"));
    assert_eq!(completed["scale"], AttrValue::Float(1.0));
    assert_eq!(completed["axis"], AttrValue::Int(1));
    assert_eq!(completed.len(), 4);
    Ok(())
}

#[test]
fn test_validate_missing_required_attribute() {
    let schema = loss_schema();
    let err = schema.validate(&AttributeMap::new()).unwrap_err();
    assert_eq!(
        err,
        OpError::SchemaViolation {
            op_type: "toy_loss".to_string(),
            violation: SchemaViolationKind::MissingAttribute {
                name: "axis".to_string()
            },
        }
    );
}

#[test]
fn test_validate_unknown_attribute() {
    let schema = loss_schema();
    let err = schema
        .validate(&attrs([
            ("axis", AttrValue::Int(0)),
            ("bogus", AttrValue::Bool(true)),
        ]))
        .unwrap_err();
    assert!(matches!(
        err,
        OpError::SchemaViolation {
            violation: SchemaViolationKind::UnknownAttribute { ref name },
            ..
        } if name == "bogus"
    ));
}

#[test]
fn test_validate_type_mismatch_no_int_to_float_coercion() {
    let schema = loss_schema();
    let err = schema
        .validate(&attrs([
            ("axis", AttrValue::Int(0)),
            ("scale", AttrValue::Int(2)),
        ]))
        .unwrap_err();
    assert!(matches!(
        err,
        OpError::SchemaViolation {
            violation: SchemaViolationKind::AttributeTypeMismatch {
                expected: AttrType::Float,
                actual: AttrType::Int,
                ..
            },
            ..
        }
    ));
}

#[test]
fn test_validate_enumerated_value() {
    let schema = loss_schema();
    let err = schema
        .validate(&attrs([
            ("axis", AttrValue::Int(0)),
            ("reduction", AttrValue::from("invalid_value")),
        ]))
        .unwrap_err();
    match err {
        OpError::SchemaViolation {
            violation: SchemaViolationKind::InvalidAttributeValue { name, value, allowed },
            ..
        } => {
            assert_eq!(name, "reduction");
            assert_eq!(value, "invalid_value");
            assert_eq!(allowed.len(), 4);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_random_valid_maps_always_validate() {
    let schema = loss_schema();
    let mut rng = rand::thread_rng();
    let modes = ["none", "batchmean", "mean", "sum"];
    for _ in 0..200 {
        let mut map = attrs([("axis", AttrValue::Int(rng.gen_range(-4..4)))]);
        if rng.gen_bool(0.5) {
            let mode = modes.choose(&mut rng).copied().unwrap_or("mean");
            map.insert("reduction".into(), AttrValue::from(mode));
        }
        if rng.gen_bool(0.5) {
            map.insert("scale".into(), AttrValue::Float(rng.gen_range(0.0..10.0)));
        }
        if rng.gen_bool(0.5) {
            let flags: Vec<bool> = (0..rng.gen_range(0..4)).map(|_| rng.gen_bool(0.5)).collect();
            map.insert("flags".into(), AttrValue::Bools(flags));
        }
        let completed = schema.validate(&map).expect("valid map rejected");
        assert_eq!(completed.len(), schema.attrs().len());

        // Dropping the required attribute always fails.
        map.remove("axis");
        assert!(matches!(
            schema.validate(&map),
            Err(OpError::SchemaViolation {
                violation: SchemaViolationKind::MissingAttribute { .. },
                ..
            })
        ));
    }
}

#[test]
fn test_builder_rejects_duplicate_declaration() {
    let result = Schema::builder("dup")
        .input("X", "a")
        .output("X", "b")
        .build();
    assert!(matches!(
        result,
        Err(OpError::SchemaViolation {
            violation: SchemaViolationKind::DuplicateDeclaration { .. },
            ..
        })
    ));
}

#[test]
fn test_builder_rejects_bad_default() {
    let wrong_type = Schema::builder("bad")
        .attr("k", AttrType::Int, "int attr")
        .default(AttrValue::from("three"))
        .build();
    assert!(wrong_type.is_err());

    let outside_set = Schema::builder("bad")
        .attr("mode", AttrType::Str, "mode")
        .one_of(["a", "b"])
        .default(AttrValue::from("c"))
        .build();
    assert!(outside_set.is_err());
}

#[test]
fn test_builder_rejects_misplaced_modifier() {
    let result = Schema::builder("bad")
        .attr("k", AttrType::Int, "int attr")
        .no_grad()
        .build();
    assert!(matches!(result, Err(OpError::InternalError(_))));

    let result = Schema::builder("bad").input("X", "x").default(AttrValue::Int(1)).build();
    assert!(matches!(result, Err(OpError::InternalError(_))));
}

#[test]
fn test_differentiable_slots() {
    let schema = loss_schema();
    let inputs: Vec<&str> = schema.differentiable_inputs().map(|s| s.name.as_str()).collect();
    let outputs: Vec<&str> = schema.differentiable_outputs().map(|s| s.name.as_str()).collect();
    assert_eq!(inputs, vec!["X"]);
    assert_eq!(outputs, vec!["Loss"]);
}

#[test]
fn test_validate_bindings() {
    let schema = loss_schema();
    let outputs = bindings(&[("Loss", "loss")]);

    assert!(schema
        .validate_bindings(&bindings(&[("X", "x"), ("Target", "t")]), &outputs)
        .is_ok());

    let missing = schema.validate_bindings(&bindings(&[("X", "x")]), &outputs);
    assert!(matches!(
        missing,
        Err(OpError::SchemaViolation {
            violation: SchemaViolationKind::MissingSlot { ref slot },
            ..
        }) if slot == "Target"
    ));

    let unknown = schema.validate_bindings(
        &bindings(&[("X", "x"), ("Target", "t"), ("Weight", "w")]),
        &outputs,
    );
    assert!(matches!(
        unknown,
        Err(OpError::SchemaViolation {
            violation: SchemaViolationKind::UnknownSlot { .. },
            ..
        })
    ));

    let arity = schema.validate_bindings(&bindings(&[("X", "a"), ("X", "b"), ("Target", "t")]), &outputs);
    assert!(matches!(
        arity,
        Err(OpError::SchemaViolation {
            violation: SchemaViolationKind::SlotArity { actual: 2, .. },
            ..
        })
    ));

    let empty = schema.validate_bindings(&bindings(&[("X", ""), ("Target", "t")]), &outputs);
    assert!(matches!(
        empty,
        Err(OpError::SchemaViolation {
            violation: SchemaViolationKind::EmptyVariableName { .. },
            ..
        })
    ));
}
