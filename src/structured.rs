//! JSON results format.
//!
//! ```json
//! {
//!   "functions": { "f": 1.5 },
//!   "gradients": { "f": [2.0, 3.0] },
//!   "hessians": { "f": [[0.0, 0.0], [0.0, 0.0]] },
//!   "metadata": { "elapsed_ms": 12.5 }
//! }
//! ```
//!
//! Non-finite numbers are written as the bare tokens `NaN`, `Infinity` and
//! `-Infinity`. `serde_json` has no notion of these, so they are emitted as
//! strings and the formatter drops the quotes outside object keys. On the way
//! in the bare tokens are rewritten to marked strings before parsing, so a
//! quoted `"NaN"` value is still rejected.

use std::io;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::ser::{Formatter, PrettyFormatter};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{InterfaceError, Result};
use crate::results::Results;

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

/// Leads every string produced from a bare token by `quote_special_tokens`.
const TOKEN_MARK: char = '\u{0}';

struct Real(f64);

impl Serialize for Real {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let v = self.0;
        if v.is_nan() {
            serializer.serialize_str(NAN)
        } else if v == f64::INFINITY {
            serializer.serialize_str(INFINITY)
        } else if v == f64::NEG_INFINITY {
            serializer.serialize_str(NEG_INFINITY)
        } else {
            serializer.serialize_f64(v)
        }
    }
}

struct Reals<'a>(&'a [f64]);

impl Serialize for Reals<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for v in self.0 {
            seq.serialize_element(&Real(*v))?;
        }
        seq.end()
    }
}

struct Matrix<'a>(&'a [Vec<f64>]);

impl Serialize for Matrix<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for row in self.0 {
            seq.serialize_element(&Reals(row))?;
        }
        seq.end()
    }
}

/// Label-keyed entries kept in insertion order.
struct Labeled<'a, T>(Vec<(&'a str, T)>);

impl<T: Serialize> Serialize for Labeled<'_, T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, value) in &self.0 {
            map.serialize_entry(label, value)?;
        }
        map.end()
    }
}

#[derive(Serialize)]
struct Document<'a> {
    functions: Labeled<'a, Real>,
    gradients: Labeled<'a, Reals<'a>>,
    hessians: Labeled<'a, Matrix<'a>>,
    metadata: Labeled<'a, Real>,
}

/// Pretty printer that leaves strings outside object keys unquoted.
struct TokenFormatter<'a> {
    pretty: PrettyFormatter<'a>,
    in_key: bool,
}

impl TokenFormatter<'_> {
    fn new() -> Self {
        Self {
            pretty: PrettyFormatter::with_indent(b"  "),
            in_key: false,
        }
    }
}

impl Formatter for TokenFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.pretty.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.in_key = true;
        self.pretty.begin_object_key(writer, first)
    }

    fn end_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.in_key = false;
        self.pretty.end_object_key(writer)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.pretty.end_object_value(writer)
    }

    fn begin_string<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.in_key {
            writer.write_all(b"\"")?;
        }
        Ok(())
    }

    fn end_string<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        if self.in_key {
            writer.write_all(b"\"")?;
        }
        Ok(())
    }
}

pub(crate) fn render(results: &Results) -> Result<String> {
    let mut doc = Document {
        functions: Labeled(Vec::new()),
        gradients: Labeled(Vec::new()),
        hessians: Labeled(Vec::new()),
        metadata: Labeled(Vec::new()),
    };
    for r in results.responses() {
        let asv = r.asv();
        if let (true, Some(v)) = (asv.function, r.value()) {
            doc.functions.0.push((r.label(), Real(v)));
        }
        if let (true, Some(g)) = (asv.gradient, r.gradient()) {
            doc.gradients.0.push((r.label(), Reals(g)));
        }
        if let (true, Some(h)) = (asv.hessian, r.hessian()) {
            doc.hessians.0.push((r.label(), Matrix(h)));
        }
    }
    for (label, value) in results.metadata() {
        if let Some(v) = value {
            doc.metadata.0.push((label.as_str(), Real(*v)));
        }
    }

    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, TokenFormatter::new());
    doc.serialize(&mut ser)?;
    buf.push(b'\n');
    String::from_utf8(buf).map_err(|e| InterfaceError::malformed(e.to_string()))
}

/// Turn bare `NaN`/`Infinity`/`-Infinity` tokens into marked strings so
/// `serde_json` accepts them.
fn quote_special_tokens(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut in_string = false;
    let mut escaped = false;
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = [NEG_INFINITY, INFINITY, NAN]
            .into_iter()
            .find(|t| rest.starts_with(t))
        {
            out.push_str("\"\\u0000");
            out.push_str(token);
            out.push('"');
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn real(value: &Value, context: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| InterfaceError::malformed(format!("{context}: number out of range"))),
        Value::String(s) => match s.strip_prefix(TOKEN_MARK) {
            Some(NAN) => Ok(f64::NAN),
            Some(INFINITY) => Ok(f64::INFINITY),
            Some(NEG_INFINITY) => Ok(f64::NEG_INFINITY),
            _ => Err(InterfaceError::malformed(format!(
                "{context}: expected a number, found string {s:?}"
            ))),
        },
        other => Err(InterfaceError::malformed(format!(
            "{context}: expected a number, found {other}"
        ))),
    }
}

fn reals(value: &Value, context: &str) -> Result<Vec<f64>> {
    value
        .as_array()
        .ok_or_else(|| InterfaceError::malformed(format!("{context}: expected an array")))?
        .iter()
        .map(|v| real(v, context))
        .collect()
}

fn section<'a>(doc: &'a Map<String, Value>, key: &str) -> Result<Option<&'a Map<String, Value>>> {
    match doc.get(key) {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(InterfaceError::malformed(format!("'{key}' must be an object"))),
    }
}

/// Fill `results` (a cleared template) from a JSON document.
pub(crate) fn parse_into(results: &mut Results, text: &str) -> Result<()> {
    let doc: Map<String, Value> = serde_json::from_str(&quote_special_tokens(text))?;
    let functions = section(&doc, "functions")?;
    let gradients = section(&doc, "gradients")?;
    let hessians = section(&doc, "hessians")?;
    let metadata = section(&doc, "metadata")?;

    for r in results.responses_mut() {
        let asv = r.asv();
        let label = r.label().to_string();
        match functions.and_then(|m| m.get(&label)) {
            Some(v) if asv.function => r.value = Some(real(v, &label)?),
            Some(_) => warn!(response = %label, "ignoring unrequested function value"),
            None => {}
        }
        match gradients.and_then(|m| m.get(&label)) {
            Some(v) if asv.gradient => r.gradient = Some(reals(v, &label)?),
            Some(_) => warn!(response = %label, "ignoring unrequested gradient"),
            None => {}
        }
        match hessians.and_then(|m| m.get(&label)) {
            Some(v) if asv.hessian => {
                let rows = v
                    .as_array()
                    .ok_or_else(|| {
                        InterfaceError::malformed(format!("{label}: hessian must be an array"))
                    })?
                    .iter()
                    .map(|row| reals(row, &label))
                    .collect::<Result<Vec<_>>>()?;
                r.hessian = Some(rows);
            }
            Some(_) => warn!(response = %label, "ignoring unrequested hessian"),
            None => {}
        }
    }

    for (label, slot) in results.metadata_mut() {
        if let Some(v) = metadata.and_then(|m| m.get(label.as_str())) {
            *slot = Some(real(v, label)?);
        }
    }
    Ok(())
}
