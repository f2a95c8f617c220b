const MAX_DENOMINATOR: u64 = 10_000;

/// Renders a dilution as `1/N` when it is an exact reciprocal, otherwise as the closest
/// fraction with a denominator of at most 10 000. Non-positive values render as `N/A`.
pub fn fraction_text(value: f64) -> String {
    if !(value > 0.0) || !value.is_finite() {
        return "N/A".to_string();
    }

    let reciprocal = 1.0 / value;
    let rounded = reciprocal.round();
    if rounded > 0.0 && (reciprocal - rounded).abs() < 1e-6 {
        return format!("1/{}", rounded as u64);
    }

    let (numerator, denominator) = closest_fraction(value, MAX_DENOMINATOR);
    format!("{numerator}/{denominator}")
}

/// Parses `"1/500"` or a plain decimal. Empty text, junk and zero denominators yield `None`.
pub fn parse_fraction(text: &str) -> Option<f64> {
    let token = text.trim();
    if token.is_empty() {
        return None;
    }
    match token.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => token.parse().ok(),
    }
}

// Closest fraction by exhaustive search; ties keep the smaller denominator.
fn closest_fraction(value: f64, max_denominator: u64) -> (u64, u64) {
    let mut best = (value.round() as u64, 1);
    let mut best_error = (value - best.0 as f64).abs();
    for denominator in 2..=max_denominator {
        let numerator = (value * denominator as f64).round();
        let error = (value - numerator / denominator as f64).abs();
        if error < best_error {
            best = (numerator as u64, denominator);
            best_error = error;
        }
    }
    best
}
