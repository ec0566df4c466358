use openremap::mapping::{MergeAxis, MergeOperation, MergeRole};
use proptest::prelude::*;

fn operation() -> impl Strategy<Value = MergeOperation> {
    prop_oneof![
        Just(MergeOperation::Average),
        Just(MergeOperation::Minimum),
        Just(MergeOperation::Maximum),
        Just(MergeOperation::Sum),
    ]
}

fn role() -> impl Strategy<Value = MergeRole> {
    prop_oneof![Just(MergeRole::Lower), Just(MergeRole::Upper)]
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn returns_exactly_to_neutral(
        op in operation(),
        lower_init in -1.0f64..=1.0,
        upper_init in -1.0f64..=1.0,
        moves in proptest::collection::vec((role(), -1.0f64..=1.0), 0..32),
    ) {
        let mut axis = MergeAxis::new("p", op, lower_init, upper_init, None).unwrap();
        for (role, value) in moves {
            let out = axis.update(role, value);
            prop_assert!((-1.0..=1.0).contains(&out));
        }
        axis.update(MergeRole::Lower, lower_init);
        let out = axis.update(MergeRole::Upper, upper_init);
        prop_assert_eq!(out, axis.neutral());
    }

    #[test]
    fn output_is_monotonic_in_each_input(
        op in operation(),
        lower_init in -1.0f64..=1.0,
        upper_init in -1.0f64..=1.0,
        role in role(),
        other in -1.0f64..=1.0,
        a in -1.0f64..=1.0,
        b in -1.0f64..=1.0,
    ) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let other_role = match role {
            MergeRole::Lower => MergeRole::Upper,
            MergeRole::Upper => MergeRole::Lower,
        };
        let mut axis = MergeAxis::new("p", op, lower_init, upper_init, None).unwrap();
        axis.update(other_role, other);

        let at_low = axis.update(role, low);
        let at_high = axis.update(role, high);
        prop_assert!(at_high >= at_low - 1e-12, "{} < {}", at_high, at_low);
    }

    #[test]
    fn neutral_override_is_kept(
        op in operation(),
        lower_init in -1.0f64..=1.0,
        upper_init in -1.0f64..=1.0,
        neutral in -1.0f64..=1.0,
    ) {
        let axis = MergeAxis::new("p", op, lower_init, upper_init, Some(neutral)).unwrap();
        prop_assert_eq!(axis.output(), neutral);
    }
}

#[test]
fn offset_rest_positions_average_to_their_midpoint() {
    let mut axis = MergeAxis::new("brakes", MergeOperation::Average, 0.3, -0.2, None).unwrap();
    assert!((axis.neutral() - 0.05).abs() < 1e-12);

    // Either pedal alone reaches the matching end of travel
    assert!((axis.update(MergeRole::Lower, 1.0) - 1.0).abs() < 1e-12);
    axis.update(MergeRole::Lower, 0.3);
    assert!((axis.update(MergeRole::Upper, -1.0) + 1.0).abs() < 1e-12);
    assert_eq!(axis.update(MergeRole::Upper, -0.2), axis.neutral());
}

#[test]
fn pedals_resting_at_minus_one_stay_idle() {
    let mut axis = MergeAxis::new("brakes", MergeOperation::Maximum, -1.0, -1.0, None).unwrap();
    assert_eq!(axis.output(), -1.0);
    assert_eq!(axis.update(MergeRole::Upper, 1.0), 1.0);
    assert_eq!(axis.update(MergeRole::Upper, -1.0), -1.0);
}

#[test]
fn out_of_range_initial_values_are_rejected() {
    assert!(MergeAxis::new("bad", MergeOperation::Average, 1.5, 0.0, None).is_err());
    assert!(MergeAxis::new("bad", MergeOperation::Average, 0.0, f64::NAN, None).is_err());
    assert!(MergeAxis::new("bad", MergeOperation::Average, 0.0, 0.0, Some(-2.0)).is_err());
}
