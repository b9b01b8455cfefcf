// Route validation module
// Checks the structural invariants of a route before it is ranked or turned
// into a bundle
//
// Numan Thabit 2025 Nov

use crate::errors::AggrError;
use crate::router::routes::Route;
use tracing::warn;

/// Route validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    pub fn into_result(self) -> Result<(), AggrError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(AggrError::InvalidRoute(self.errors.join("; ")))
        }
    }
}

/// Validate a route against the requested endpoints and hop bound.
/// `expected` is `(token_in, token_out)`; closed routes pass the same token twice.
pub fn validate_route(route: &Route, expected: Option<(&str, &str)>, max_hops: usize) -> ValidationResult {
    let mut result = ValidationResult::new();

    if route.hops.is_empty() {
        result.add_error("route has no hops".into());
        return result;
    }

    if route.hops.len() > max_hops + 1 {
        result.add_error(format!(
            "route has {} hops, limit is {}",
            route.hops.len(),
            max_hops + 1
        ));
    }

    for (i, pair) in route.hops.windows(2).enumerate() {
        if pair[0].token_out != pair[1].token_in {
            result.add_error(format!(
                "hop {} outputs {} but hop {} consumes {}",
                i,
                pair[0].token_out,
                i + 1,
                pair[1].token_in
            ));
        }
    }

    if let Some((token_in, token_out)) = expected {
        if route.token_in() != Some(token_in) {
            result.add_error(format!("route starts at {:?}, expected {}", route.token_in(), token_in));
        }
        if route.token_out() != Some(token_out) {
            result.add_error(format!("route ends at {:?}, expected {}", route.token_out(), token_out));
        }
    }

    if !(route.amount_in.is_finite() && route.amount_in > 0.0) {
        result.add_error(format!("non-positive input amount {}", route.amount_in));
    }
    if !(route.expected_amount_out.is_finite() && route.expected_amount_out > 0.0) {
        result.add_error(format!("non-positive output amount {}", route.expected_amount_out));
    }
    if !(0.0..=1.0).contains(&route.price_impact) {
        result.add_error(format!("price impact {} outside [0, 1]", route.price_impact));
    }

    if !result.is_valid {
        warn!(route = %route.id, errors = ?result.errors, "route failed validation");
    }
    result
}
