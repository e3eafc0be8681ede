//! Flat text results format.
//!
//! ```text
//!   1.0000000000000000e0 f
//! [   2.0000000000000000e0   3.0000000000000000e0 ] f
//! [[   0.0000000000000000e0 ... ] [ ... ]] f
//! #
//!   1.2500000000000000e1 elapsed_ms
//! ```
//!
//! Numbers are right-aligned in 24 columns with 17 significant digits, which
//! is enough for every finite `f64` to read back bit-for-bit.

use std::fmt::Write;

use crate::error::{InterfaceError, Result};
use crate::results::Results;

const WIDTH: usize = 24;

pub(crate) fn format_real(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{v:.16e}")
    }
}

pub(crate) fn parse_real(token: &str) -> Option<f64> {
    match token.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => token.parse().ok(),
    }
}

fn block(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| format!("{:>WIDTH$}", format_real(*v)))
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn render(results: &Results) -> String {
    let mut out = String::new();
    for r in results.responses() {
        let asv = r.asv();
        if asv.function {
            if let Some(v) = r.value() {
                let _ = writeln!(out, "{:>WIDTH$} {}", format_real(v), r.label());
            }
        }
        if asv.gradient {
            if let Some(g) = r.gradient() {
                let _ = writeln!(out, "[ {} ] {}", block(g), r.label());
            }
        }
        if asv.hessian {
            if let Some(h) = r.hessian() {
                let rows: Vec<String> = h.iter().map(|row| block(row)).collect();
                let _ = writeln!(out, "[[ {} ]] {}", rows.join(" ] [ "), r.label());
            }
        }
    }
    if !results.metadata().is_empty() {
        out.push_str("#\n");
        for (label, value) in results.metadata() {
            if let Some(v) = value {
                let _ = writeln!(out, "{:>WIDTH$} {}", format_real(*v), label);
            }
        }
    }
    out
}

/// Fill `results` (a cleared template) from legacy text.
pub(crate) fn parse_into(results: &mut Results, text: &str) -> Result<()> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());
    let last = text.lines().count().max(1);
    let mut next = |what: &str| {
        lines
            .next()
            .ok_or_else(|| InterfaceError::parse(last, format!("results file ends before {what}")))
    };

    for r in results.responses_mut() {
        let asv = r.asv();
        if asv.function {
            let (n, line) = next("function value")?;
            let (token, label) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| InterfaceError::parse(n, "expected '<value> <label>'"))?;
            expect_label(n, label, r.label())?;
            r.value = Some(real(n, token)?);
        }
        if asv.gradient {
            let (n, line) = next("gradient")?;
            let (body, label) = bracketed(n, line, "[", "]")?;
            expect_label(n, label, r.label())?;
            r.gradient = Some(reals(n, body)?);
        }
        if asv.hessian {
            let (n, line) = next("hessian")?;
            let (body, label) = bracketed(n, line, "[[", "]]")?;
            expect_label(n, label, r.label())?;
            let rows = body
                .split(']')
                .map(|row| row.trim().trim_start_matches('[').trim())
                .filter(|row| !row.is_empty())
                .map(|row| reals(n, row))
                .collect::<Result<Vec<_>>>()?;
            r.hessian = Some(rows);
        }
    }

    if !results.metadata().is_empty() {
        let (n, line) = next("metadata separator")?;
        if line != "#" {
            return Err(InterfaceError::parse(n, format!("expected '#', found '{line}'")));
        }
        for (label, slot) in results.metadata_mut() {
            let (n, line) = next("metadata")?;
            let (token, found) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| InterfaceError::parse(n, "expected '<value> <label>'"))?;
            expect_label(n, found, label)?;
            *slot = Some(real(n, token)?);
        }
    }

    if let Some((n, line)) = lines.next() {
        return Err(InterfaceError::parse(n, format!("unexpected trailing line '{line}'")));
    }
    Ok(())
}

fn bracketed<'a>(n: usize, line: &'a str, open: &str, close: &str) -> Result<(&'a str, &'a str)> {
    let inner = line
        .strip_prefix(open)
        .ok_or_else(|| InterfaceError::parse(n, format!("expected '{open}'")))?;
    let end = inner
        .rfind(close)
        .ok_or_else(|| InterfaceError::parse(n, format!("expected '{close}'")))?;
    Ok((&inner[..end], &inner[end + close.len()..]))
}

fn expect_label(n: usize, found: &str, expected: &str) -> Result<()> {
    let found = found.trim();
    if found != expected {
        return Err(InterfaceError::parse(
            n,
            format!("expected label '{expected}', found '{found}'"),
        ));
    }
    Ok(())
}

fn real(n: usize, token: &str) -> Result<f64> {
    parse_real(token).ok_or_else(|| InterfaceError::parse(n, format!("'{token}' is not a number")))
}

fn reals(n: usize, body: &str) -> Result<Vec<f64>> {
    body.split_whitespace().map(|t| real(n, t)).collect()
}
