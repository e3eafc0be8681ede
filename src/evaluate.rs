//! Evaluators and the read → evaluate → write exchange.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{InterfaceError, Result};
use crate::params::Parameters;
use crate::results::{OutputFormat, Results};
use crate::surrogate::LinearSurrogate;

/// Metadata label filled with the evaluation wall time when requested.
pub const ELAPSED_MS: &str = "elapsed_ms";

/// Fills the requested subset of {value, gradient, hessian} for each response.
///
/// Implementations only need to consult each response's active set; the
/// setters on [`Response`](crate::Response) drop anything not requested and
/// the writer reports anything requested but missing.
pub trait Evaluator {
    fn name(&self) -> &str;

    fn evaluate(&self, params: &Parameters, results: &mut Results) -> Result<()>;
}

/// Evaluates a fitted surrogate owned by the caller.
pub struct SurrogateEvaluator<'a> {
    model: &'a LinearSurrogate,
}

impl<'a> SurrogateEvaluator<'a> {
    pub fn new(model: &'a LinearSurrogate) -> Self {
        Self { model }
    }

    /// Gradient position of each model input among the continuous variables.
    fn input_positions(&self, params: &Parameters) -> Result<Vec<usize>> {
        let dims = self.model.dims();
        match self.model.variable_labels() {
            Some(labels) => {
                if labels.len() != dims {
                    return Err(InterfaceError::label_mismatch(
                        "surrogate variable labels",
                        dims,
                        labels.len(),
                    ));
                }
                let positions: Vec<usize> = labels
                    .iter()
                    .filter_map(|label| params.continuous_index(label))
                    .collect();
                if positions.len() != dims {
                    return Err(InterfaceError::label_mismatch(
                        "surrogate variables found among continuous variables",
                        dims,
                        positions.len(),
                    ));
                }
                Ok(positions)
            }
            None => {
                let n = params.num_continuous();
                if n != dims {
                    return Err(InterfaceError::label_mismatch("continuous variables", dims, n));
                }
                Ok((0..n).collect())
            }
        }
    }
}

impl Evaluator for SurrogateEvaluator<'_> {
    fn name(&self) -> &str {
        "surrogate"
    }

    fn evaluate(&self, params: &Parameters, results: &mut Results) -> Result<()> {
        let positions = self.input_positions(params)?;
        let x = params.continuous_values();
        let point: Vec<f64> = positions.iter().map(|&i| x[i]).collect();
        let dim = results.dim();
        let target = self.model.response_labels().map(|labels| labels[0].clone());

        let value = self.model.predict_one(&point)?;
        let mut gradient = vec![0.0; dim];
        for (&i, &w) in positions.iter().zip(self.model.slope()) {
            gradient[i] = w;
        }

        for response in results.responses_mut() {
            if let Some(target) = &target {
                if response.label() != target {
                    debug!(response = response.label(), "not produced by surrogate '{target}'");
                    continue;
                }
            }
            let asv = response.asv();
            if asv.function {
                response.set_value(value);
            }
            if asv.gradient {
                response.set_gradient(gradient.clone());
            }
            if asv.hessian {
                response.set_hessian(vec![vec![0.0; dim]; dim]);
            }
        }
        Ok(())
    }
}

/// `f = 100 (x2 - x1²)² + (1 - x1)²` over the first two continuous variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rosenbrock;

impl Evaluator for Rosenbrock {
    fn name(&self) -> &str {
        "rosenbrock"
    }

    fn evaluate(&self, params: &Parameters, results: &mut Results) -> Result<()> {
        let x = params.continuous_values();
        if x.len() < 2 {
            return Err(InterfaceError::label_mismatch(
                "rosenbrock continuous variables",
                2,
                x.len(),
            ));
        }
        if results.len() != 1 {
            return Err(InterfaceError::label_mismatch("rosenbrock responses", 1, results.len()));
        }
        let dim = results.dim();
        let (x1, x2) = (x[0], x[1]);
        let a = x2 - x1 * x1;
        let b = 1.0 - x1;

        let Some(response) = results.by_index_mut(0) else {
            return Ok(());
        };
        let asv = response.asv();
        if asv.function {
            response.set_value(100.0 * a * a + b * b);
        }
        if asv.gradient {
            let mut g = vec![0.0; dim];
            g[0] = -400.0 * x1 * a - 2.0 * b;
            g[1] = 200.0 * a;
            response.set_gradient(g);
        }
        if asv.hessian {
            let mut h = vec![vec![0.0; dim]; dim];
            h[0][0] = 1200.0 * x1 * x1 - 400.0 * x2 + 2.0;
            h[0][1] = -400.0 * x1;
            h[1][0] = -400.0 * x1;
            h[1][1] = 200.0;
            response.set_hessian(h);
        }
        Ok(())
    }
}

/// Objective `Σ (xᵢ - 1)⁴` with the two constraints
/// `c1 = x1² - x2/2` and `c2 = x2² - x1/2`.
///
/// Responses are taken in order: objective, then up to two constraints.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextBook;

impl TextBook {
    const MAX_RESPONSES: usize = 3;
}

impl Evaluator for TextBook {
    fn name(&self) -> &str {
        "text_book"
    }

    fn evaluate(&self, params: &Parameters, results: &mut Results) -> Result<()> {
        let x = params.continuous_values();
        let dim = results.dim();
        if results.len() > Self::MAX_RESPONSES {
            return Err(InterfaceError::label_mismatch(
                "text_book responses (at most)",
                Self::MAX_RESPONSES,
                results.len(),
            ));
        }
        if results.len() > 1 && x.len() < 2 {
            return Err(InterfaceError::label_mismatch(
                "text_book constraint variables",
                2,
                x.len(),
            ));
        }

        for response in results.responses_mut() {
            let asv = response.asv();
            let mut value = 0.0;
            let mut g = vec![0.0; dim];
            let mut h = vec![vec![0.0; dim]; dim];
            match response.index() {
                0 => {
                    for (i, xi) in x.iter().enumerate() {
                        let d = xi - 1.0;
                        value += d.powi(4);
                        g[i] = 4.0 * d.powi(3);
                        h[i][i] = 12.0 * d * d;
                    }
                }
                1 => {
                    value = x[0] * x[0] - 0.5 * x[1];
                    g[0] = 2.0 * x[0];
                    g[1] = -0.5;
                    h[0][0] = 2.0;
                }
                _ => {
                    value = x[1] * x[1] - 0.5 * x[0];
                    g[0] = -0.5;
                    g[1] = 2.0 * x[1];
                    h[1][1] = 2.0;
                }
            }
            if asv.function {
                response.set_value(value);
            }
            if asv.gradient {
                response.set_gradient(g);
            }
            if asv.hessian {
                response.set_hessian(h);
            }
        }
        Ok(())
    }
}

/// One full exchange: read `params_path`, evaluate, write `results_path`.
pub fn run_exchange(
    params_path: impl AsRef<Path>,
    results_path: impl AsRef<Path>,
    evaluator: &dyn Evaluator,
    format: OutputFormat,
) -> Result<Results> {
    let (params, mut results) = Parameters::read(params_path)?;

    let start = Instant::now();
    evaluator.evaluate(&params, &mut results)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    if results.is_metadata_requested(ELAPSED_MS) {
        results.set_metadata(ELAPSED_MS, elapsed_ms);
    }
    results.write(results_path, format)?;

    info!(
        evaluator = evaluator.name(),
        variables = params.variables().len(),
        responses = results.len(),
        elapsed_ms,
        "evaluation complete"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn exchange(text: &str, evaluator: &dyn Evaluator) -> Results {
        let params = Parameters::parse(text).unwrap();
        let mut results = Results::template(&params);
        evaluator.evaluate(&params, &mut results).unwrap();
        results
    }

    #[test]
    fn test_rosenbrock_minimum() {
        let results = exchange("2 variables\n1.0 x1\n1.0 x2\n1 functions\n7 f\n", &Rosenbrock);
        let f = results.get("f").unwrap();
        assert_eq!(f.value(), Some(0.0));
        assert_eq!(f.gradient(), Some(&[0.0, 0.0][..]));
        let h = f.hessian().unwrap();
        assert_relative_eq!(h[0][0], 802.0);
        assert_relative_eq!(h[0][1], -400.0);
        assert_relative_eq!(h[1][1], 200.0);
    }

    #[test]
    fn test_rosenbrock_needs_two_variables() {
        let params = Parameters::parse("1 variables\n1.0 x1\n1 functions\n1 f\n").unwrap();
        let mut results = Results::template(&params);
        let err = Rosenbrock.evaluate(&params, &mut results).unwrap_err();
        assert_eq!(err.category(), "LabelMismatchError");
    }

    #[test]
    fn test_text_book_constraints() {
        let results = exchange(
            "2 variables\n2.0 x1\n3.0 x2\n3 functions\n3 obj\n3 c1\n1 c2\n",
            &TextBook,
        );
        let obj = results.get("obj").unwrap();
        assert_relative_eq!(obj.value().unwrap(), 1.0 + 16.0);
        assert_eq!(obj.gradient(), Some(&[4.0, 32.0][..]));

        let c1 = results.get("c1").unwrap();
        assert_relative_eq!(c1.value().unwrap(), 4.0 - 1.5);
        assert_eq!(c1.gradient(), Some(&[4.0, -0.5][..]));

        let c2 = results.get("c2").unwrap();
        assert_relative_eq!(c2.value().unwrap(), 9.0 - 1.0);
        assert!(c2.gradient().is_none());
        results.validate().unwrap();
    }

    #[test]
    fn test_text_book_rejects_extra_responses() {
        let params =
            Parameters::parse("2 variables\n0 a\n0 b\n4 functions\n1 f\n1 g\n1 h\n1 k\n").unwrap();
        let mut results = Results::template(&params);
        assert!(TextBook.evaluate(&params, &mut results).is_err());
    }
}
