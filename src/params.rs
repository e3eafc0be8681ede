//! Parameter file reader.
//!
//! A parameter file is a sequence of sections. Each section starts with a
//! `<count> <keyword>` header followed by `count` entry lines, normally
//! `<value> <label>`:
//!
//! ```text
//! 2 variables
//! 1.0e-1 x1
//! 4.0e-1 x2
//! 1 functions
//! 7 f
//! 2 derivative_variables
//! 1 x1
//! 2 x2
//! 0 analysis_components
//! 1 metadata
//! elapsed_ms
//! ```
//!
//! `variables` and `continuous_variables` blocks hold reals. The typed
//! `discrete_integer_variables`, `discrete_string_variables` and
//! `discrete_real_variables` blocks hold the discrete categories. All
//! variable blocks precede `functions`.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::asv::ActiveSet;
use crate::error::{InterfaceError, Result};
use crate::results::Results;

/// Category a variable was declared under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Continuous,
    DiscreteInteger,
    DiscreteString,
    DiscreteReal,
}

impl VariableKind {
    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "variables" | "continuous_variables" => Some(Self::Continuous),
            "discrete_integer_variables" => Some(Self::DiscreteInteger),
            "discrete_string_variables" => Some(Self::DiscreteString),
            "discrete_real_variables" => Some(Self::DiscreteReal),
            _ => None,
        }
    }

    fn parse_value(self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            Self::Continuous | Self::DiscreteReal => raw
                .parse::<f64>()
                .map(Value::Real)
                .map_err(|_| format!("'{raw}' is not a real number")),
            Self::DiscreteInteger => raw
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("'{raw}' is not an integer")),
            Self::DiscreteString => Ok(Value::Text(raw.to_string())),
        }
    }
}

/// A variable value, typed by its declared category.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Real(f64),
    Integer(i64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Real(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub label: String,
    pub kind: VariableKind,
    pub value: Value,
}

/// Requested response: label plus its active set.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRequest {
    pub label: String,
    pub asv: ActiveSet,
}

/// An active derivative variable; `index` is 0-based into the continuous variables.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivativeVariable {
    pub index: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisComponent {
    pub value: String,
    pub label: String,
}

/// Everything a parameter file declares, in declared order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    variables: Vec<Variable>,
    responses: Vec<ResponseRequest>,
    derivative_variables: Vec<DerivativeVariable>,
    analysis_components: Vec<AnalysisComponent>,
    metadata: Vec<String>,
}

impl Parameters {
    /// Read a parameter file and build the matching results template.
    pub fn read(path: impl AsRef<Path>) -> Result<(Self, Results)> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| InterfaceError::io(path, e))?;
        let params = Self::parse(&text)?;
        debug!(
            path = %path.display(),
            variables = params.variables.len(),
            functions = params.responses.len(),
            "read parameter file"
        );
        let results = Results::template(&params);
        Ok((params, results))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = Lines::new(text);
        let mut params = Self::default();
        let mut seen_labels = HashSet::new();
        let mut seen_sections = HashSet::new();
        let mut have_functions = false;

        while let Some((line_no, count, keyword)) = lines.next_header()? {
            if let Some(kind) = VariableKind::from_keyword(keyword) {
                if have_functions {
                    return Err(InterfaceError::parse(
                        line_no,
                        format!("'{keyword}' must precede the functions section"),
                    ));
                }
                for _ in 0..count {
                    let (n, raw, label) = lines.entry(keyword)?;
                    let value = kind
                        .parse_value(&raw)
                        .map_err(|msg| InterfaceError::parse(n, format!("{label}: {msg}")))?;
                    if !seen_labels.insert(label.clone()) {
                        return Err(InterfaceError::parse(
                            n,
                            format!("duplicate variable '{label}'"),
                        ));
                    }
                    params.variables.push(Variable { label, kind, value });
                }
                continue;
            }

            if !seen_sections.insert(keyword.to_string()) {
                return Err(InterfaceError::parse(
                    line_no,
                    format!("duplicate '{keyword}' section"),
                ));
            }

            match keyword {
                "functions" => {
                    have_functions = true;
                    let mut seen = HashSet::new();
                    for _ in 0..count {
                        let (n, raw, label) = lines.entry(keyword)?;
                        let code: i64 = raw.parse().map_err(|_| {
                            InterfaceError::parse(n, format!("'{raw}' is not an active set code"))
                        })?;
                        let asv = ActiveSet::from_code(code).ok_or_else(|| {
                            InterfaceError::parse(n, format!("active set code {code} not in 0..=7"))
                        })?;
                        let label = strip_asv_prefix(&label).to_string();
                        if !seen.insert(label.clone()) {
                            return Err(InterfaceError::parse(
                                n,
                                format!("duplicate response '{label}'"),
                            ));
                        }
                        params.responses.push(ResponseRequest { label, asv });
                    }
                }
                "derivative_variables" => {
                    let n_continuous = params.num_continuous();
                    for _ in 0..count {
                        let (n, raw, label) = lines.entry(keyword)?;
                        let index: usize = raw.parse().map_err(|_| {
                            InterfaceError::parse(n, format!("'{raw}' is not a variable index"))
                        })?;
                        if index == 0 || index > n_continuous {
                            return Err(InterfaceError::parse(
                                n,
                                format!("derivative index {index} not in 1..={n_continuous}"),
                            ));
                        }
                        params.derivative_variables.push(DerivativeVariable {
                            index: index - 1,
                            label,
                        });
                    }
                }
                "analysis_components" => {
                    for _ in 0..count {
                        let (_, value, label) = lines.entry(keyword)?;
                        params.analysis_components.push(AnalysisComponent { value, label });
                    }
                }
                "metadata" => {
                    for _ in 0..count {
                        let (n, label) = lines.bare(keyword)?;
                        if params.metadata.contains(&label) {
                            return Err(InterfaceError::parse(
                                n,
                                format!("duplicate metadata '{label}'"),
                            ));
                        }
                        params.metadata.push(label);
                    }
                }
                other => {
                    return Err(InterfaceError::parse(
                        line_no,
                        format!("unknown section '{other}'"),
                    ));
                }
            }
        }

        if !have_functions {
            return Err(InterfaceError::parse(lines.last_line, "missing functions section"));
        }
        Ok(params)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.variables.iter().find(|v| v.label == label).map(|v| &v.value)
    }

    pub fn continuous(&self) -> impl Iterator<Item = &Variable> {
        self.of_kind(VariableKind::Continuous)
    }

    pub fn of_kind(&self, kind: VariableKind) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(move |v| v.kind == kind)
    }

    pub fn num_continuous(&self) -> usize {
        self.continuous().count()
    }

    pub fn continuous_values(&self) -> Vec<f64> {
        self.continuous().filter_map(|v| v.value.as_f64()).collect()
    }

    pub fn continuous_labels(&self) -> Vec<&str> {
        self.continuous().map(|v| v.label.as_str()).collect()
    }

    /// Position of a continuous variable, as used to index gradients.
    pub fn continuous_index(&self, label: &str) -> Option<usize> {
        self.continuous().position(|v| v.label == label)
    }

    pub fn responses(&self) -> &[ResponseRequest] {
        &self.responses
    }

    pub fn num_functions(&self) -> usize {
        self.responses.len()
    }

    pub fn derivative_variables(&self) -> &[DerivativeVariable] {
        &self.derivative_variables
    }

    pub fn analysis_components(&self) -> &[AnalysisComponent] {
        &self.analysis_components
    }

    pub fn metadata(&self) -> &[String] {
        &self.metadata
    }
}

/// Legacy engines write response labels as `ASV_<k>:<label>`.
fn strip_asv_prefix(label: &str) -> &str {
    match label.split_once(':') {
        Some((prefix, rest))
            if prefix.len() > 4
                && prefix.starts_with("ASV_")
                && prefix[4..].bytes().all(|b| b.is_ascii_digit()) =>
        {
            rest
        }
        _ => label,
    }
}

/// Non-blank lines with their 1-based line numbers.
struct Lines<'a> {
    inner: Box<dyn Iterator<Item = (usize, &'a str)> + 'a>,
    last_line: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: Box::new(
                text.lines()
                    .enumerate()
                    .map(|(i, line)| (i + 1, line.trim()))
                    .filter(|(_, line)| !line.is_empty()),
            ),
            last_line: text.lines().count().max(1),
        }
    }

    fn next_header(&mut self) -> Result<Option<(usize, usize, &'a str)>> {
        let Some((n, line)) = self.inner.next() else {
            return Ok(None);
        };
        let mut tokens = line.split_whitespace();
        let (Some(count), Some(keyword), None) = (tokens.next(), tokens.next(), tokens.next())
        else {
            return Err(InterfaceError::parse(
                n,
                format!("expected '<count> <section>', found '{line}'"),
            ));
        };
        let count = count
            .parse::<usize>()
            .map_err(|_| InterfaceError::parse(n, format!("'{count}' is not a count")))?;
        Ok(Some((n, count, keyword)))
    }

    /// Next `<value> <label>` line; quoted values may contain spaces.
    fn entry(&mut self, section: &str) -> Result<(usize, String, String)> {
        let (n, line) = self.take(section)?;
        let (value, rest) =
            split_value(line).ok_or_else(|| InterfaceError::parse(n, "unterminated quoted value"))?;
        let label = rest.trim();
        if label.is_empty() || label.contains(char::is_whitespace) {
            return Err(InterfaceError::parse(
                n,
                format!("expected '<value> <label>', found '{line}'"),
            ));
        }
        Ok((n, value.to_string(), label.to_string()))
    }

    fn bare(&mut self, section: &str) -> Result<(usize, String)> {
        let (n, line) = self.take(section)?;
        if line.contains(char::is_whitespace) {
            return Err(InterfaceError::parse(
                n,
                format!("expected a single label, found '{line}'"),
            ));
        }
        Ok((n, line.to_string()))
    }

    fn take(&mut self, section: &str) -> Result<(usize, &'a str)> {
        self.inner
            .next()
            .ok_or_else(|| {
                InterfaceError::parse(self.last_line, format!("'{section}' section is truncated"))
            })
    }
}

fn split_value(line: &str) -> Option<(&str, &str)> {
    let first = line.chars().next()?;
    if first == '"' || first == '\'' {
        let body = &line[1..];
        let end = body.find(first)?;
        return Some((&body[..end], &body[end + 1..]));
    }
    match line.find(char::is_whitespace) {
        Some(i) => Some((&line[..i], &line[i..])),
        None => Some((line, "")),
    }
}
