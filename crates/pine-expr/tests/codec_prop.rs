use proptest::prelude::*;

use pine_expr::Expression;
use pine_value::Value;

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![proptest::collection::vec(any::<u8>(), 0..8).prop_map(Value::Blob),];
    leaf.prop_recursive(4, 32, 4, |inner| {
        proptest::collection::vec(inner, 0..4).prop_map(Value::List)
    })
}

fn arb_expression() -> impl Strategy<Value = Expression> {
    let leaf = prop_oneof![
        arb_value().prop_map(Expression::Literal),
        Just(Expression::Environment),
    ];
    leaf.prop_recursive(4, 64, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Expression::List),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, f)| Expression::conditional(c, t, f)),
            ("[a-z_]{1,12}", inner.clone()).prop_map(|(f, a)| Expression::kernel_application(f, a)),
            (inner.clone(), inner.clone())
                .prop_map(|(e, env)| Expression::decode_and_evaluate(e, env)),
            ("[a-z_]{0,12}", inner)
                .prop_map(|(tag, tagged)| Expression::StringTag { tag, tagged: Box::new(tagged) }),
        ]
    })
}

proptest! {
    #[test]
    fn prop_codec_is_bijective(e in arb_expression()) {
        let encoded = e.encode();
        prop_assert_eq!(Expression::decode(&encoded).unwrap(), e);
    }
}
