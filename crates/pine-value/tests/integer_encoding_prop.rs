use proptest::prelude::*;

use pine_value::integer::{decode, encode};

proptest! {
    #[test]
    fn prop_round_trip(n in any::<i128>()) {
        let v = encode(n);
        prop_assert_eq!(decode(&v).unwrap(), n);
    }
}
