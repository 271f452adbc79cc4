//! Property-based checks for the universal laws in spec §8: round-trip
//! identity, idempotent repeat, and bounds safety against arbitrary bytes.

use proptest::prelude::*;

use quickle_codec::registry::EmptyRegistry;
use quickle_codec::value::Value;
use quickle_codec::{dumps, loads};

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::None),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::int),
        any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::Float),
        ".*".prop_map(Value::str),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::bytes),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::list),
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::tuple),
            proptest::collection::vec(inner, 0..8).prop_map(|items| {
                Value::Dict(std::rc::Rc::new(std::cell::RefCell::new(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::int(i as i64), v))
                        .collect(),
                )))
            }),
        ]
    })
}

proptest! {
    #[test]
    fn round_trips_structurally(value in arb_value()) {
        let registry = EmptyRegistry;
        let bytes = dumps(&value, &registry).expect("encode");
        let back = loads(&bytes, &registry).expect("decode");
        prop_assert_eq!(value, back);
    }

    #[test]
    fn encoding_twice_is_byte_identical(value in arb_value()) {
        let registry = EmptyRegistry;
        let first = dumps(&value, &registry).expect("encode");
        let second = dumps(&value, &registry).expect("encode");
        prop_assert_eq!(first, second);
    }

    /// Spec §8 property 6: arbitrary bytes never crash the decoder, only
    /// return an error (or, occasionally, a valid value if they happen to
    /// form one).
    #[test]
    fn arbitrary_bytes_never_panic_the_decoder(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        let registry = EmptyRegistry;
        let _ = loads(&bytes, &registry);
    }
}
