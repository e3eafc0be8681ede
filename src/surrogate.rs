//! Linear regression surrogate.
//!
//! The model is `y = b + x·w`, fit once by solving the normal equations
//! `(XᵗX)⁻¹Xᵗy` where `X` is the sample matrix with a leading column of ones.
//! A fitted [`LinearSurrogate`] is immutable, apart from label metadata that
//! may be attached exactly once, and can be shared between threads.

use std::path::Path;
use std::sync::OnceLock;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InterfaceError, Result};
use crate::io;

/// Options for fitting a surrogate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateConfig {
    /// Polynomial degree. Only `1` (bias plus linear terms) is supported.
    #[serde(default = "default_degree")]
    pub degree: u32,
    /// `XᵗX` counts as singular when its smallest singular value is at most
    /// this fraction of its largest.
    #[serde(default = "default_singular_tolerance")]
    pub singular_tolerance: f64,
    /// Input names, one per column of the training samples.
    #[serde(default)]
    pub variable_labels: Option<Vec<String>>,
    /// Output names; a linear surrogate has exactly one.
    #[serde(default)]
    pub response_labels: Option<Vec<String>>,
}

fn default_degree() -> u32 {
    1
}

fn default_singular_tolerance() -> f64 {
    1e-12
}

impl Default for SurrogateConfig {
    fn default() -> Self {
        Self {
            degree: 1,
            singular_tolerance: 1e-12,
            variable_labels: None,
            response_labels: None,
        }
    }
}

impl SurrogateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.degree != 1 {
            return Err(InterfaceError::Config(format!(
                "surrogate degree {} is not supported (only 1)",
                self.degree
            )));
        }
        if !(self.singular_tolerance.is_finite() && (0.0..1.0).contains(&self.singular_tolerance)) {
            return Err(InterfaceError::Config(
                "surrogate singular_tolerance must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Labels {
    variables: Vec<String>,
    responses: Vec<String>,
}

/// Fitted degree-1 polynomial regression.
#[derive(Debug)]
pub struct LinearSurrogate {
    /// `[bias, w_0, .., w_{D-1}]`
    coefficients: DVector<f64>,
    labels: OnceLock<Labels>,
}

impl LinearSurrogate {
    pub const NUM_RESPONSES: usize = 1;

    /// Fit to `samples` (N×D) and `responses` (N).
    pub fn construct(
        config: &SurrogateConfig,
        samples: &DMatrix<f64>,
        responses: &DVector<f64>,
    ) -> Result<Self> {
        config.validate()?;
        let (n, d) = samples.shape();
        if responses.len() != n {
            return Err(InterfaceError::label_mismatch("training responses", n, responses.len()));
        }
        if n < d + 1 {
            return Err(InterfaceError::SingularMatrix(format!(
                "{n} samples cannot determine {} coefficients",
                d + 1
            )));
        }
        if samples.iter().chain(responses.iter()).any(|v| !v.is_finite()) {
            return Err(InterfaceError::SingularMatrix(
                "training data contains non-finite values".to_string(),
            ));
        }

        let x = samples.clone().insert_column(0, 1.0);
        let xt = x.transpose();
        let xtx = &xt * &x;

        let sv = xtx.clone().svd(false, false).singular_values;
        let (largest, smallest) = (sv.max(), sv.min());
        debug!(samples = n, dims = d, largest, smallest, "normal equations conditioning");
        if !(largest > 0.0) || smallest <= config.singular_tolerance * largest {
            return Err(InterfaceError::SingularMatrix(format!(
                "XᵗX is rank deficient (singular values {smallest:e} / {largest:e})"
            )));
        }

        let inverse = xtx
            .try_inverse()
            .ok_or_else(|| InterfaceError::SingularMatrix("XᵗX is not invertible".to_string()))?;
        let coefficients = inverse * (xt * responses);
        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(InterfaceError::SingularMatrix(
                "least squares solution is not finite".to_string(),
            ));
        }

        let model = Self {
            coefficients,
            labels: OnceLock::new(),
        };
        if config.variable_labels.is_some() || config.response_labels.is_some() {
            let variables = config
                .variable_labels
                .clone()
                .unwrap_or_else(|| (0..d).map(|i| format!("x{}", i + 1)).collect());
            let responses = config
                .response_labels
                .clone()
                .unwrap_or_else(|| vec!["f".to_string()]);
            model.set_labels(variables, responses)?;
        }
        Ok(model)
    }

    /// Fit from row-major training data.
    pub fn fit(config: &SurrogateConfig, data: &TrainingData) -> Result<Self> {
        let (samples, responses) = data.to_matrices()?;
        let mut config = config.clone();
        if config.variable_labels.is_none() && !data.variables.is_empty() {
            config.variable_labels = Some(data.variables.clone());
        }
        if config.response_labels.is_none() {
            if let Some(response) = &data.response {
                config.response_labels = Some(vec![response.clone()]);
            }
        }
        let model = Self::construct(&config, &samples, &responses)?;
        info!(
            samples = samples.nrows(),
            dims = model.dims(),
            r_squared = model.r_squared(&samples, &responses)?,
            "fitted linear surrogate"
        );
        Ok(model)
    }

    /// Number of input variables `D`.
    pub fn dims(&self) -> usize {
        self.coefficients.len() - 1
    }

    pub fn bias(&self) -> f64 {
        self.coefficients[0]
    }

    pub fn slope(&self) -> &[f64] {
        &self.coefficients.as_slice()[1..]
    }

    fn check_points(&self, points: &DMatrix<f64>) -> Result<()> {
        if points.ncols() != self.dims() {
            return Err(InterfaceError::label_mismatch(
                "surrogate input columns",
                self.dims(),
                points.ncols(),
            ));
        }
        Ok(())
    }

    /// Evaluate at each row of `points` (M×D).
    pub fn predict(&self, points: &DMatrix<f64>) -> Result<DVector<f64>> {
        self.check_points(points)?;
        let slope = self.coefficients.rows(1, self.dims());
        Ok((points * slope).add_scalar(self.bias()))
    }

    /// Evaluate at a single point through the same path as [`predict`](Self::predict).
    pub fn predict_one(&self, point: &[f64]) -> Result<f64> {
        let points = DMatrix::from_row_slice(1, point.len(), point);
        Ok(self.predict(&points)?[0])
    }

    /// Gradient of the model. The model is linear, so this is the slope
    /// regardless of where it is evaluated.
    pub fn gradient(&self, points: &DMatrix<f64>) -> Result<DVector<f64>> {
        self.check_points(points)?;
        Ok(DVector::from_column_slice(self.slope()))
    }

    pub fn hessian(&self, points: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        self.check_points(points)?;
        Ok(DMatrix::zeros(self.dims(), self.dims()))
    }

    /// Coefficient of determination over the given data.
    pub fn r_squared(&self, samples: &DMatrix<f64>, responses: &DVector<f64>) -> Result<f64> {
        let predicted = self.predict(samples)?;
        if predicted.len() != responses.len() {
            return Err(InterfaceError::label_mismatch(
                "responses",
                predicted.len(),
                responses.len(),
            ));
        }
        let mean = responses.mean();
        let ss_res = (responses - &predicted).norm_squared();
        let ss_tot = responses.map(|y| y - mean).norm_squared();
        if ss_tot == 0.0 {
            return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
        }
        Ok(1.0 - ss_res / ss_tot)
    }

    /// Attach variable and response names. May only be done once.
    pub fn set_labels(&self, variables: Vec<String>, responses: Vec<String>) -> Result<()> {
        if variables.len() != self.dims() {
            return Err(InterfaceError::label_mismatch(
                "variable labels",
                self.dims(),
                variables.len(),
            ));
        }
        if responses.len() != Self::NUM_RESPONSES {
            return Err(InterfaceError::label_mismatch(
                "response labels",
                Self::NUM_RESPONSES,
                responses.len(),
            ));
        }
        self.labels
            .set(Labels { variables, responses })
            .map_err(|_| InterfaceError::LabelsAlreadySet)
    }

    pub fn variable_labels(&self) -> Option<&[String]> {
        self.labels.get().map(|l| l.variables.as_slice())
    }

    pub fn response_labels(&self) -> Option<&[String]> {
        self.labels.get().map(|l| l.responses.as_slice())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = SurrogateFile {
            degree: 1,
            bias: self.bias(),
            slope: self.slope().to_vec(),
            variable_labels: self.variable_labels().map(<[String]>::to_vec),
            response_labels: self.response_labels().map(<[String]>::to_vec),
        };
        io::write_atomic(path, &serde_json::to_string_pretty(&file)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file: SurrogateFile = serde_json::from_str(&io::read_to_string(path)?)?;
        if file.degree != 1 {
            return Err(InterfaceError::Config(format!(
                "surrogate degree {} is not supported (only 1)",
                file.degree
            )));
        }
        let mut coefficients = Vec::with_capacity(file.slope.len() + 1);
        coefficients.push(file.bias);
        coefficients.extend_from_slice(&file.slope);
        let model = Self {
            coefficients: DVector::from_vec(coefficients),
            labels: OnceLock::new(),
        };
        if file.variable_labels.is_some() || file.response_labels.is_some() {
            model.set_labels(
                file.variable_labels.unwrap_or_default(),
                file.response_labels.unwrap_or_default(),
            )?;
        }
        Ok(model)
    }
}

/// On-disk form of a fitted surrogate.
#[derive(Debug, Serialize, Deserialize)]
struct SurrogateFile {
    degree: u32,
    bias: f64,
    slope: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variable_labels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response_labels: Option<Vec<String>>,
}

/// Training set as stored in a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingData {
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub response: Option<String>,
    pub samples: Vec<Vec<f64>>,
    pub values: Vec<f64>,
}

impl TrainingData {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&io::read_to_string(path)?)?)
    }

    /// Sample matrix and response vector; every row must have the same width.
    pub fn to_matrices(&self) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let width = self
            .samples
            .first()
            .map_or(self.variables.len(), Vec::len);
        if let Some(row) = self.samples.iter().find(|row| row.len() != width) {
            return Err(InterfaceError::label_mismatch("training sample width", width, row.len()));
        }
        if !self.variables.is_empty() && self.variables.len() != width {
            return Err(InterfaceError::label_mismatch(
                "training variables",
                width,
                self.variables.len(),
            ));
        }
        let flat: Vec<f64> = self.samples.iter().flatten().copied().collect();
        let samples = DMatrix::from_row_slice(self.samples.len(), width, &flat);
        Ok((samples, DVector::from_column_slice(&self.values)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn plane_data() -> (DMatrix<f64>, DVector<f64>) {
        let rows = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [2.0, 3.0], [-1.5, 0.5], [4.0, -2.0]];
        let samples = DMatrix::from_fn(rows.len(), 2, |i, j| rows[i][j]);
        let responses =
            DVector::from_fn(rows.len(), |i, _| 2.0 * rows[i][0] + 3.0 * rows[i][1] + 1.0);
        (samples, responses)
    }

    fn fit_default(samples: &DMatrix<f64>, responses: &DVector<f64>) -> Result<LinearSurrogate> {
        LinearSurrogate::construct(&SurrogateConfig::default(), samples, responses)
    }

    #[test]
    fn test_recovers_plane() {
        let (samples, responses) = plane_data();
        let model = fit_default(&samples, &responses).unwrap();

        assert_relative_eq!(model.bias(), 1.0, epsilon = 1e-10);
        let points = DMatrix::from_row_slice(3, 2, &[0.3, -0.7, 10.0, 20.0, -5.0, 1.25]);
        let predicted = model.predict(&points).unwrap();
        for i in 0..3 {
            let expected = 2.0 * points[(i, 0)] + 3.0 * points[(i, 1)] + 1.0;
            assert_relative_eq!(predicted[i], expected, epsilon = 1e-9);
        }

        let grad = model.gradient(&points).unwrap();
        assert_relative_eq!(grad[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(grad[1], 3.0, epsilon = 1e-10);
        assert_relative_eq!(model.r_squared(&samples, &responses).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_single_point_matches_batch() {
        let (samples, responses) = plane_data();
        let model = fit_default(&samples, &responses).unwrap();
        let batch = model
            .predict(&DMatrix::from_row_slice(2, 2, &[0.1, 0.4, 0.7, -0.2]))
            .unwrap();
        assert_eq!(model.predict_one(&[0.1, 0.4]).unwrap().to_bits(), batch[0].to_bits());
        assert_eq!(model.predict_one(&[0.7, -0.2]).unwrap().to_bits(), batch[1].to_bits());
    }

    #[test]
    fn test_too_few_samples_is_singular() {
        let samples = DMatrix::from_row_slice(1, 2, &[0.5, 0.5]);
        let responses = DVector::from_vec(vec![1.0]);
        let err = fit_default(&samples, &responses).unwrap_err();
        assert_eq!(err.category(), "SingularMatrixError");
    }

    #[test]
    fn test_collinear_samples_are_singular() {
        let samples = DMatrix::from_row_slice(4, 2, &[0.0, 0.0, 1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let responses = DVector::from_vec(vec![0.0, 1.0, 2.0, 3.0]);
        let err = fit_default(&samples, &responses).unwrap_err();
        assert_eq!(err.category(), "SingularMatrixError");
    }

    #[test]
    fn test_config_validated_eagerly() {
        let (samples, responses) = plane_data();
        let config = SurrogateConfig {
            degree: 2,
            ..SurrogateConfig::default()
        };
        let err = LinearSurrogate::construct(&config, &samples, &responses).unwrap_err();
        assert_eq!(err.category(), "ConfigError");
    }

    #[test]
    fn test_labels_set_once_and_checked() {
        let (samples, responses) = plane_data();
        let model = fit_default(&samples, &responses).unwrap();

        let err = model.set_labels(vec!["a".into()], vec!["f".into()]).unwrap_err();
        assert_eq!(err.category(), "LabelMismatchError");

        model.set_labels(vec!["a".into(), "b".into()], vec!["f".into()]).unwrap();
        let err = model
            .set_labels(vec!["c".into(), "d".into()], vec!["g".into()])
            .unwrap_err();
        assert_eq!(err.category(), "LabelMismatchError");
        assert_eq!(model.variable_labels().unwrap(), &["a".to_string(), "b".to_string()]);

        let wrong_points = DMatrix::from_row_slice(1, 3, &[1.0, 2.0, 3.0]);
        assert_eq!(model.predict(&wrong_points).unwrap_err().category(), "LabelMismatchError");
    }

    #[test]
    fn test_mismatched_label_config_fails_construction() {
        let (samples, responses) = plane_data();
        let config = SurrogateConfig {
            variable_labels: Some(vec!["only_one".into()]),
            ..SurrogateConfig::default()
        };
        let err = LinearSurrogate::construct(&config, &samples, &responses).unwrap_err();
        assert_eq!(err.category(), "LabelMismatchError");
    }

    #[test]
    fn test_save_and_load() {
        let (samples, responses) = plane_data();
        let config = SurrogateConfig {
            variable_labels: Some(vec!["x1".into(), "x2".into()]),
            response_labels: Some(vec!["f".into()]),
            ..SurrogateConfig::default()
        };
        let model = LinearSurrogate::construct(&config, &samples, &responses).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("surrogate.json");
        model.save(&path).unwrap();
        let loaded = LinearSurrogate::load(&path).unwrap();

        assert_eq!(loaded.bias().to_bits(), model.bias().to_bits());
        assert_eq!(loaded.slope(), model.slope());
        assert_eq!(loaded.response_labels(), model.response_labels());
    }

    #[test]
    fn test_ragged_training_rows() {
        let data = TrainingData {
            samples: vec![vec![1.0, 2.0], vec![3.0]],
            values: vec![1.0, 2.0],
            ..TrainingData::default()
        };
        assert_eq!(data.to_matrices().unwrap_err().category(), "LabelMismatchError");
    }
}
