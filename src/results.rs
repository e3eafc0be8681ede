//! Results collection and writer.
//!
//! A [`Results`] value is created from a parameter file as a template: one
//! [`Response`] per requested function, each carrying its active set. An
//! evaluator fills in the requested fields, then [`Results::write`] checks
//! that every requested field is present and publishes the file. Fields
//! whose active set bit is clear are never written.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::asv::ActiveSet;
use crate::error::{InterfaceError, Result};
use crate::io;
use crate::params::Parameters;
use crate::{legacy, structured};

/// Serialization used for results files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Flat text, one field per line.
    #[default]
    Legacy,
    /// JSON document keyed by label.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown results format '{other}' (use 'legacy' or 'json')")),
        }
    }
}

/// Data returned for one response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    label: String,
    index: usize,
    asv: ActiveSet,
    pub(crate) value: Option<f64>,
    pub(crate) gradient: Option<Vec<f64>>,
    pub(crate) hessian: Option<Vec<Vec<f64>>>,
}

impl Response {
    fn new(label: String, index: usize, asv: ActiveSet) -> Self {
        Self {
            label,
            index,
            asv,
            value: None,
            gradient: None,
            hessian: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn asv(&self) -> ActiveSet {
        self.asv
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn gradient(&self) -> Option<&[f64]> {
        self.gradient.as_deref()
    }

    pub fn hessian(&self) -> Option<&[Vec<f64>]> {
        self.hessian.as_deref()
    }

    /// Store the function value. Returns `false` (and drops it) when not requested.
    pub fn set_value(&mut self, value: f64) -> bool {
        if !self.asv.function {
            debug!(response = %self.label, "function value not requested, dropped");
            return false;
        }
        self.value = Some(value);
        true
    }

    pub fn set_gradient(&mut self, gradient: Vec<f64>) -> bool {
        if !self.asv.gradient {
            debug!(response = %self.label, "gradient not requested, dropped");
            return false;
        }
        self.gradient = Some(gradient);
        true
    }

    pub fn set_hessian(&mut self, hessian: Vec<Vec<f64>>) -> bool {
        if !self.asv.hessian {
            debug!(response = %self.label, "hessian not requested, dropped");
            return false;
        }
        self.hessian = Some(hessian);
        true
    }

    fn check(&self, dim: usize) -> Result<()> {
        if self.asv.function && self.value.is_none() {
            return Err(InterfaceError::incomplete(&self.label, "function value"));
        }
        if self.asv.gradient {
            match &self.gradient {
                None => return Err(InterfaceError::incomplete(&self.label, "gradient")),
                Some(g) if g.len() != dim => {
                    return Err(InterfaceError::incomplete(
                        &self.label,
                        format!("gradient of length {dim} (got {})", g.len()),
                    ))
                }
                Some(_) => {}
            }
        }
        if self.asv.hessian {
            match &self.hessian {
                None => return Err(InterfaceError::incomplete(&self.label, "hessian")),
                Some(h) if h.len() != dim || h.iter().any(|row| row.len() != dim) => {
                    return Err(InterfaceError::incomplete(
                        &self.label,
                        format!("{dim}x{dim} hessian"),
                    ))
                }
                Some(h) => {
                    if let Some((i, j)) = asymmetry(h) {
                        return Err(InterfaceError::incomplete(
                            &self.label,
                            format!("symmetric hessian (entries ({i}, {j}) and ({j}, {i}) differ)"),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// First `(i, j)` with `h[i][j] != h[j][i]`. Identical bit patterns count as
/// equal so a NaN mirrored across the diagonal is accepted.
fn asymmetry(h: &[Vec<f64>]) -> Option<(usize, usize)> {
    (0..h.len())
        .flat_map(|i| (i + 1..h.len()).map(move |j| (i, j)))
        .find(|&(i, j)| {
            let (a, b) = (h[i][j], h[j][i]);
            a != b && a.to_bits() != b.to_bits()
        })
}

/// Ordered responses plus requested metadata for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Results {
    responses: Vec<Response>,
    metadata: Vec<(String, Option<f64>)>,
    dim: usize,
}

impl Results {
    /// Empty results sized to what `params` requested.
    pub fn template(params: &Parameters) -> Self {
        let responses = params
            .responses()
            .iter()
            .enumerate()
            .map(|(i, r)| Response::new(r.label.clone(), i, r.asv))
            .collect();
        let metadata = params.metadata().iter().map(|m| (m.clone(), None)).collect();
        Self {
            responses,
            metadata,
            dim: params.num_continuous(),
        }
    }

    /// Number of continuous variables; the length of every gradient.
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn responses(&self) -> &[Response] {
        &self.responses
    }

    pub fn responses_mut(&mut self) -> impl Iterator<Item = &mut Response> {
        self.responses.iter_mut()
    }

    pub fn get(&self, label: &str) -> Option<&Response> {
        self.responses.iter().find(|r| r.label == label)
    }

    pub fn get_mut(&mut self, label: &str) -> Option<&mut Response> {
        self.responses.iter_mut().find(|r| r.label == label)
    }

    pub fn by_index(&self, index: usize) -> Option<&Response> {
        self.responses.get(index)
    }

    pub fn by_index_mut(&mut self, index: usize) -> Option<&mut Response> {
        self.responses.get_mut(index)
    }

    pub fn metadata(&self) -> &[(String, Option<f64>)] {
        &self.metadata
    }

    pub fn is_metadata_requested(&self, label: &str) -> bool {
        self.metadata.iter().any(|(l, _)| l == label)
    }

    /// Record a metadata value. Unrequested labels are dropped and `false` returned.
    pub fn set_metadata(&mut self, label: &str, value: f64) -> bool {
        match self.metadata.iter_mut().find(|(l, _)| l == label) {
            Some((_, slot)) => {
                *slot = Some(value);
                true
            }
            None => {
                warn!(label, "metadata not requested, dropped");
                false
            }
        }
    }

    /// Fail with `IncompleteResults` unless every requested field is present.
    pub fn validate(&self) -> Result<()> {
        for response in &self.responses {
            response.check(self.dim)?;
        }
        for (label, value) in &self.metadata {
            if value.is_none() {
                return Err(InterfaceError::incomplete(label, "metadata value"));
            }
        }
        Ok(())
    }

    pub fn to_legacy_string(&self) -> Result<String> {
        self.validate()?;
        Ok(legacy::render(self))
    }

    pub fn to_json_string(&self) -> Result<String> {
        self.validate()?;
        structured::render(self)
    }

    /// Validate, render and atomically publish the results file.
    pub fn write(&self, path: impl AsRef<Path>, format: OutputFormat) -> Result<()> {
        let path = path.as_ref();
        let text = match format {
            OutputFormat::Legacy => self.to_legacy_string()?,
            OutputFormat::Json => self.to_json_string()?,
        };
        io::write_atomic(path, &text)?;
        info!(path = %path.display(), %format, responses = self.len(), "wrote results");
        Ok(())
    }

    /// Read a results file back against this template's request.
    pub fn read(&self, path: impl AsRef<Path>, format: OutputFormat) -> Result<Self> {
        let text = io::read_to_string(path)?;
        match format {
            OutputFormat::Legacy => self.parse_legacy(&text),
            OutputFormat::Json => self.parse_json(&text),
        }
    }

    pub fn parse_legacy(&self, text: &str) -> Result<Self> {
        let mut filled = self.cleared();
        legacy::parse_into(&mut filled, text)?;
        filled.validate()?;
        Ok(filled)
    }

    pub fn parse_json(&self, text: &str) -> Result<Self> {
        let mut filled = self.cleared();
        structured::parse_into(&mut filled, text)?;
        filled.validate()?;
        Ok(filled)
    }

    fn cleared(&self) -> Self {
        Self {
            responses: self
                .responses
                .iter()
                .map(|r| Response::new(r.label.clone(), r.index, r.asv))
                .collect(),
            metadata: self.metadata.iter().map(|(l, _)| (l.clone(), None)).collect(),
            dim: self.dim,
        }
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut [(String, Option<f64>)] {
        &mut self.metadata
    }
}
