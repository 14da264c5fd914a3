//! Typed marshalling through a strict transport double

mod common;

use common::mock_helpers::MockTransport;
use mockall::predicate::eq;
use mockall::Sequence;
use proptest::prelude::*;
use x2cscope::link::LinkHandle;
use x2cscope::{Representation, Value, Variable, VariableInfo, X2cError};

fn bind(transport: MockTransport, info: VariableInfo) -> Variable {
    Variable::new(info, LinkHandle::new(transport), 2).unwrap()
}

#[test]
fn test_read_decodes_little_endian() {
    let mut transport = MockTransport::new();
    transport
        .expect_get_ram()
        .with(eq(0x0800u64), eq(2usize))
        .times(1)
        .returning(|_, _| Ok(vec![0x18, 0xFC]));

    let speed = bind(transport, VariableInfo::new("motor.speed", "int", 2, 0x800));
    assert_eq!(speed.get_value().unwrap(), Value::Signed(-1000));
}

#[test]
fn test_short_response_is_size_mismatch() {
    let mut transport = MockTransport::new();
    transport
        .expect_get_ram()
        .times(1)
        .returning(|_, _| Ok(vec![0x01]));

    let counter = bind(transport, VariableInfo::new("counter", "unsigned int", 2, 0x80c));
    match counter.get_value() {
        Err(X2cError::SizeMismatch {
            address,
            expected,
            actual,
        }) => {
            assert_eq!(address, 0x80c);
            assert_eq!(expected, 2);
            assert_eq!(actual, 1);
        }
        other => panic!("expected size mismatch, got {:?}", other),
    }
}

#[test]
fn test_write_sends_encoded_bytes() {
    let mut transport = MockTransport::new();
    transport
        .expect_put_ram()
        .withf(|address, data| *address == 0x800 && data == [0x34, 0x12])
        .times(1)
        .returning(|_, _| Ok(()));

    let speed = bind(transport, VariableInfo::new("motor.speed", "int", 2, 0x800));
    speed.set_value(0x1234i16).unwrap();
}

#[test]
fn test_out_of_range_write_never_reaches_the_link() {
    // No expectations: any round trip would panic
    let mode = bind(MockTransport::new(), VariableInfo::new("motor.mode", "unsigned char", 1, 0x802));

    assert!(matches!(mode.set_value(256u16), Err(X2cError::Range { .. })));
    assert!(matches!(mode.set_value(-1i8), Err(X2cError::Range { .. })));
    assert!(matches!(mode.set_value(f64::NAN), Err(X2cError::Range { .. })));
}

#[test]
fn test_array_read_is_chunked() {
    let mut transport = MockTransport::new();
    let mut seq = Sequence::new();
    transport
        .expect_get_ram_array()
        .with(eq(0x804u64), eq(4usize), eq(1u8))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(vec![1, 0, 2, 0]));
    transport
        .expect_get_ram_array()
        .with(eq(0x808u64), eq(2usize), eq(1u8))
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Ok(vec![0xFF, 0xFF]));

    let gains = bind(
        transport,
        VariableInfo::new("motor.gains", "int", 2, 0x804).with_array_size(3),
    )
    .with_max_chunk(4);
    assert_eq!(
        gains.get_array().unwrap(),
        vec![Value::Signed(1), Value::Signed(2), Value::Signed(-1)]
    );
}

#[test]
fn test_element_index_is_bounds_checked() {
    let gains = bind(
        MockTransport::new(),
        VariableInfo::new("motor.gains", "int", 2, 0x804).with_array_size(3),
    );
    assert!(matches!(
        gains.get_element(3),
        Err(X2cError::IndexOutOfBounds { index: 3, len: 3 })
    ));
}

#[test]
fn test_link_errors_pass_through() {
    let mut transport = MockTransport::new();
    transport
        .expect_get_ram()
        .times(1)
        .returning(|_, _| Err(x2cscope::LinkError::msg("timeout")));

    let speed = bind(transport, VariableInfo::new("motor.speed", "int", 2, 0x800));
    let err = speed.get_value().unwrap_err();
    assert!(err.is_link());
}

fn roundtrip(rep: Representation, value: Value) -> Value {
    let bytes = rep.encode(value).unwrap();
    assert_eq!(bytes.len(), rep.width());
    rep.decode(&bytes).unwrap()
}

const INTEGER_REPS: [Representation; 9] = [
    Representation::Int8,
    Representation::Int16,
    Representation::Int32,
    Representation::Int64,
    Representation::UInt8,
    Representation::UInt16,
    Representation::UInt32,
    Representation::UInt64,
    Representation::Bool,
];

/// The exact integer as a host value, if one of the integer variants holds it
fn wide_value(v: i128) -> Option<Value> {
    i64::try_from(v)
        .map(Value::Signed)
        .or_else(|_| u64::try_from(v).map(Value::Unsigned))
        .ok()
}

fn decoded_as(rep: Representation, v: i128) -> Value {
    if rep.is_signed() {
        Value::Signed(v as i64)
    } else {
        Value::Unsigned(v as u64)
    }
}

fn is_range_error(rep: Representation, value: Value) -> bool {
    matches!(rep.encode(value), Err(X2cError::Range { .. }))
}

#[test]
fn test_exact_bounds_per_width() {
    for rep in INTEGER_REPS {
        let (min, max) = rep.bounds().unwrap();
        for edge in [min, max] {
            let value = wide_value(edge).unwrap();
            assert_eq!(roundtrip(rep, value), decoded_as(rep, edge), "{} at {}", rep, edge);
        }
        // One step past either bound; below i64::MIN and above u64::MAX
        // have no host value to pass
        for outside in [min - 1, max + 1] {
            if let Some(value) = wide_value(outside) {
                assert!(is_range_error(rep, value), "{} accepted {}", rep, outside);
            }
        }
    }
    assert!(Representation::Float32.bounds().is_none());
    assert!(Representation::Float64.bounds().is_none());
}

#[test]
fn test_bool_accepts_whole_byte() {
    assert_eq!(roundtrip(Representation::Bool, true.into()), Value::Unsigned(1));
    assert_eq!(roundtrip(Representation::Bool, false.into()), Value::Unsigned(0));
    assert_eq!(roundtrip(Representation::Bool, Value::Unsigned(255)), Value::Unsigned(255));
    assert!(is_range_error(Representation::Bool, Value::Signed(-1)));
    assert!(is_range_error(Representation::Bool, Value::Unsigned(256)));
}

#[test]
fn test_nan_is_rejected_by_integers() {
    for rep in INTEGER_REPS {
        assert!(is_range_error(rep, Value::Float(f64::NAN)), "{}", rep);
    }
}

proptest! {
    #[test]
    fn prop_signed_values_survive(a in any::<i8>(), b in any::<i16>(), c in any::<i32>(), d in any::<i64>()) {
        prop_assert_eq!(roundtrip(Representation::Int8, a.into()), Value::Signed(a as i64));
        prop_assert_eq!(roundtrip(Representation::Int16, b.into()), Value::Signed(b as i64));
        prop_assert_eq!(roundtrip(Representation::Int32, c.into()), Value::Signed(c as i64));
        prop_assert_eq!(roundtrip(Representation::Int64, d.into()), Value::Signed(d));
    }

    #[test]
    fn prop_unsigned_values_survive(a in any::<u8>(), b in any::<u16>(), c in any::<u32>(), d in any::<u64>()) {
        prop_assert_eq!(roundtrip(Representation::UInt8, a.into()), Value::Unsigned(a as u64));
        prop_assert_eq!(roundtrip(Representation::UInt16, b.into()), Value::Unsigned(b as u64));
        prop_assert_eq!(roundtrip(Representation::UInt32, c.into()), Value::Unsigned(c as u64));
        prop_assert_eq!(roundtrip(Representation::UInt64, d.into()), Value::Unsigned(d));
    }

    #[test]
    fn prop_bool_values_survive(b in any::<bool>(), raw in any::<u8>()) {
        prop_assert_eq!(roundtrip(Representation::Bool, b.into()), Value::Unsigned(b as u64));
        prop_assert_eq!(roundtrip(Representation::Bool, raw.into()), Value::Unsigned(raw as u64));
    }

    #[test]
    fn prop_floats_survive(v in proptest::num::f32::NORMAL, w in proptest::num::f64::NORMAL) {
        prop_assert_eq!(roundtrip(Representation::Float32, v.into()), Value::Float(v as f64));
        prop_assert_eq!(roundtrip(Representation::Float64, w.into()), Value::Float(w));
    }

    #[test]
    fn prop_in_range_integers_survive(seed in any::<u64>()) {
        for rep in INTEGER_REPS {
            let (min, max) = rep.bounds().unwrap();
            let v = min + (seed as i128).rem_euclid(max - min + 1);
            let value = wide_value(v).unwrap();
            prop_assert_eq!(roundtrip(rep, value), decoded_as(rep, v), "{} at {}", rep, v);
        }
    }

    #[test]
    fn prop_values_above_max_are_rejected(excess in 1i128..=1_000_000) {
        for rep in INTEGER_REPS {
            let (_, max) = rep.bounds().unwrap();
            if let Some(value) = wide_value(max + excess) {
                prop_assert!(is_range_error(rep, value), "{} accepted {}", rep, max + excess);
            }
        }
    }

    #[test]
    fn prop_values_below_min_are_rejected(excess in 1i128..=1_000_000) {
        for rep in INTEGER_REPS {
            let (min, _) = rep.bounds().unwrap();
            if let Some(value) = wide_value(min - excess) {
                prop_assert!(is_range_error(rep, value), "{} accepted {}", rep, min - excess);
            }
        }
    }

    #[test]
    fn prop_negative_values_are_rejected_by_unsigned(v in i64::MIN..0) {
        for rep in [Representation::UInt8, Representation::UInt16, Representation::UInt32, Representation::UInt64, Representation::Bool] {
            prop_assert!(is_range_error(rep, Value::Signed(v)), "{} accepted {}", rep, v);
        }
    }

    #[test]
    fn prop_in_range_floats_truncate_into_integers(v in -32768.0f64..32768.0) {
        let decoded = roundtrip(Representation::Int16, Value::Float(v));
        prop_assert_eq!(decoded, Value::Signed(v.trunc() as i64));
    }
}
