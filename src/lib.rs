//! Parameter/results file protocol and linear surrogate models.
//!
//! An external optimization engine writes a parameter file, runs a driver,
//! and reads back a results file. This crate provides the pieces of that
//! exchange:
//!
//! - [`Parameters`] reads the parameter file and produces a [`Results`]
//!   template sized to the request.
//! - An [`Evaluator`] fills in the values, gradients and hessians that each
//!   response's [`ActiveSet`] asks for.
//! - [`Results::write`] refuses to publish incomplete results and never
//!   writes unrequested fields.
//! - [`LinearSurrogate`] is a least-squares regression model that can stand
//!   in for an expensive evaluation.

pub mod asv;
pub mod error;
pub mod evaluate;
pub mod io;
pub mod params;
pub mod results;
pub mod surrogate;

mod legacy;
mod structured;


pub use asv::ActiveSet;
pub use error::{InterfaceError, Result};
pub use evaluate::{run_exchange, Evaluator, Rosenbrock, SurrogateEvaluator, TextBook, ELAPSED_MS};
pub use params::{Parameters, Value, Variable, VariableKind};
pub use results::{OutputFormat, Response, Results};
pub use surrogate::{LinearSurrogate, SurrogateConfig, TrainingData};
