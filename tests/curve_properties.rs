use openremap::mapping::{DeadZone, Interpolation, Operator, Pipeline, ResponseCurve};
use proptest::prelude::*;

/// Strictly increasing x, non-decreasing y, both inside [-1, 1]
fn monotone_points() -> impl Strategy<Value = Vec<(f64, f64)>> {
    (
        proptest::collection::vec(-1.0f64..=1.0, 2..8),
        proptest::collection::vec(-1.0f64..=1.0, 8),
    )
        .prop_filter_map("needs two distinct x", |(mut xs, mut ys)| {
            xs.sort_by(f64::total_cmp);
            xs.dedup_by(|a, b| (*a - *b).abs() < 1e-3);
            if xs.len() < 2 {
                return None;
            }
            ys.truncate(xs.len());
            ys.sort_by(f64::total_cmp);
            Some(xs.into_iter().zip(ys).collect())
        })
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(256))]

    #[test]
    fn cubic_curve_preserves_monotonicity(points in monotone_points()) {
        let curve = ResponseCurve::cubic(&points).unwrap();
        let mut previous = curve.evaluate(-1.0);
        for step in 1..=200 {
            let x = -1.0 + step as f64 / 100.0;
            let y = curve.evaluate(x);
            prop_assert!(y >= previous - 1e-9, "f({}) = {} < {}", x, y, previous);
            prop_assert!((-1.0..=1.0).contains(&y));
            previous = y;
        }
    }

    #[test]
    fn curves_pass_through_control_points(points in monotone_points(), cubic in any::<bool>()) {
        let interpolation = if cubic {
            Interpolation::CubicSpline
        } else {
            Interpolation::PiecewiseLinear
        };
        let curve = ResponseCurve::new(interpolation, &points).unwrap();
        for (x, y) in &points {
            prop_assert!((curve.evaluate(*x) - y).abs() < 1e-9);
        }
    }

    #[test]
    fn pipeline_output_stays_in_range(
        points in monotone_points(),
        value in proptest::num::f64::ANY,
        width in 0.0f64..0.5,
    ) {
        let pipeline = Pipeline::new(
            "p",
            vec![
                Operator::DeadZone(DeadZone::centered(width).unwrap()),
                Operator::Curve(ResponseCurve::cubic(&points).unwrap()),
                Operator::Invert,
            ],
        );
        let out = pipeline.apply(value);
        prop_assert!((-1.0..=1.0).contains(&out), "{} -> {}", value, out);
    }
}

#[test]
fn unordered_control_points_are_rejected() {
    assert!(ResponseCurve::linear(&[(0.0, 0.0), (-0.5, 0.1)]).is_err());
    assert!(ResponseCurve::linear(&[(0.0, 0.0)]).is_err());
    assert!(ResponseCurve::cubic(&[(-1.0, -1.0), (2.0, 1.0)]).is_err());
}
