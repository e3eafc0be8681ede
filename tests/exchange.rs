//! End-to-end parameter file → results file exchanges.

use std::fs;
use std::process::Command;

use analysis_driver::{
    run_exchange, ActiveSet, LinearSurrogate, OutputFormat, Parameters, Rosenbrock,
    SurrogateConfig, SurrogateEvaluator, TrainingData, ELAPSED_MS,
};
use approx::assert_relative_eq;
use tempfile::tempdir;

/// Samples of `y = x0 + 2 x0 x1 + 3 x1` on a 5x5 grid over [0, 1]².
fn bilinear_training() -> TrainingData {
    let mut samples = Vec::new();
    let mut values = Vec::new();
    for i in 0..5 {
        for j in 0..5 {
            let (x0, x1) = (i as f64 / 4.0, j as f64 / 4.0);
            samples.push(vec![x0, x1]);
            values.push(x0 + 2.0 * x0 * x1 + 3.0 * x1);
        }
    }
    TrainingData {
        variables: vec!["x1".into(), "x2".into()],
        response: Some("response_fn_1".into()),
        samples,
        values,
    }
}

const PARAMS: &str = "\
2 variables
1.0000000000000001e-1 x1
4.0000000000000002e-1 x2
1 functions
7 response_fn_1
2 derivative_variables
1 x1
2 x2
0 analysis_components
";

#[test]
fn test_surrogate_exchange_writes_value_gradient_and_zero_hessian() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.out");
    fs::write(&params_path, PARAMS).unwrap();

    let model = LinearSurrogate::fit(&SurrogateConfig::default(), &bilinear_training()).unwrap();
    let results = run_exchange(
        &params_path,
        &results_path,
        &SurrogateEvaluator::new(&model),
        OutputFormat::Legacy,
    )
    .unwrap();

    // The parameter file is left as it was.
    assert_eq!(fs::read_to_string(&params_path).unwrap(), PARAMS);

    let text = fs::read_to_string(&results_path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.ends_with(" response_fn_1")));

    let back = results.read(&results_path, OutputFormat::Legacy).unwrap();
    let r = back.get("response_fn_1").unwrap();
    assert_relative_eq!(r.value().unwrap(), model.predict_one(&[0.1, 0.4]).unwrap());
    assert_eq!(r.gradient().unwrap(), model.slope());
    assert_eq!(r.hessian().unwrap(), &[vec![0.0, 0.0], vec![0.0, 0.0]]);

    // Least squares over the symmetric grid splits the x0 x1 term evenly.
    assert_relative_eq!(model.slope()[0], 2.0, epsilon = 1e-10);
    assert_relative_eq!(model.slope()[1], 4.0, epsilon = 1e-10);
    assert_relative_eq!(model.bias(), -0.5, epsilon = 1e-10);

}

#[test]
fn test_json_exchange_with_metadata() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.json");
    fs::write(
        &params_path,
        "2 variables\n1.5 x1\n-0.5 x2\n1 functions\n3 f\n1 metadata\nelapsed_ms\n",
    )
    .unwrap();

    let results =
        run_exchange(&params_path, &results_path, &Rosenbrock, OutputFormat::Json).unwrap();
    let back = results.read(&results_path, OutputFormat::Json).unwrap();
    let f = back.get("f").unwrap();
    assert_eq!(f.asv(), ActiveSet::from_code(3).unwrap());
    assert_relative_eq!(f.value().unwrap(), 100.0 * (-0.5 - 2.25_f64).powi(2) + 0.25);
    assert!(f.hessian().is_none());

    let (label, elapsed) = &back.metadata()[0];
    assert_eq!(label, ELAPSED_MS);
    assert!(elapsed.unwrap() >= 0.0);

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&results_path).unwrap()).unwrap();
    assert!(doc["hessians"].as_object().unwrap().is_empty());

}

#[test]
fn test_incomplete_results_leave_no_file() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.out");
    // Surrogate labelled "f" cannot answer response "g".
    fs::write(&params_path, "2 variables\n0.1 x1\n0.4 x2\n2 functions\n1 f\n1 g\n").unwrap();

    let model = LinearSurrogate::fit(
        &SurrogateConfig {
            response_labels: Some(vec!["f".into()]),
            ..SurrogateConfig::default()
        },
        &bilinear_training(),
    )
    .unwrap();
    let err = run_exchange(
        &params_path,
        &results_path,
        &SurrogateEvaluator::new(&model),
        OutputFormat::Legacy,
    )
    .unwrap_err();
    assert_eq!(err.category(), "IncompleteResultsError");
    assert!(!results_path.exists());
    assert_eq!(fs::read_dir(dir).unwrap().count(), 1);

}

#[test]
fn test_parameters_read_templates_results() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    fs::write(&params_path, PARAMS).unwrap();

    let (params, results) = Parameters::read(&params_path).unwrap();
    assert_eq!(params.derivative_variables().len(), 2);
    assert!(params.analysis_components().is_empty());
    assert_eq!(results.len(), 1);
    assert_eq!(results.dim(), 2);
    assert!(results.by_index(0).unwrap().value().is_none());

}

// =============================================================================
// Command Line Tests
// =============================================================================

fn driver() -> Command {
    Command::new(env!("CARGO_BIN_EXE_driver"))
}

#[test]
fn test_cli_success() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.out");
    fs::write(&params_path, "2 variables\n1.0 x1\n1.0 x2\n1 functions\n1 f\n").unwrap();

    let output = driver()
        .arg(&params_path)
        .arg(&results_path)
        .args(["--model", "rosenbrock"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let text = fs::read_to_string(&results_path).unwrap();
    assert_eq!(text.trim(), "0.0000000000000000e0 f");

}

#[test]
fn test_cli_parse_error_exit_code() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.out");
    fs::write(&params_path, "2 variables\n1.0 x1\nnot-a-number x2\n1 functions\n1 f\n").unwrap();

    let output = driver()
        .arg(&params_path)
        .arg(&results_path)
        .args(["--model", "text_book"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[ParseError]"), "{stderr}");
    assert!(!results_path.exists());

}

#[test]
fn test_cli_fit_then_evaluate() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let training_path = dir.join("training.json");
    let model_path = dir.join("model.json");
    let params_path = dir.join("params.in");
    let results_path = dir.join("results.json");
    fs::write(&training_path, serde_json::to_string(&bilinear_training()).unwrap()).unwrap();
    fs::write(&params_path, PARAMS).unwrap();

    let fit = driver()
        .arg("fit")
        .arg("--training")
        .arg(&training_path)
        .arg("--out")
        .arg(&model_path)
        .output()
        .unwrap();
    assert!(fit.status.success(), "{}", String::from_utf8_lossy(&fit.stderr));

    let eval = driver()
        .arg(&params_path)
        .arg(&results_path)
        .arg("--surrogate")
        .arg(&model_path)
        .args(["--format", "json"])
        .output()
        .unwrap();
    assert!(eval.status.success(), "{}", String::from_utf8_lossy(&eval.stderr));

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&results_path).unwrap()).unwrap();
    let grad = doc["gradients"]["response_fn_1"].as_array().unwrap();
    assert_relative_eq!(grad[0].as_f64().unwrap(), 2.0, epsilon = 1e-10);
    assert_relative_eq!(grad[1].as_f64().unwrap(), 4.0, epsilon = 1e-10);

}

#[test]
fn test_cli_singular_training_data() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let training_path = dir.join("training.json");
    let model_path = dir.join("model.json");
    fs::write(
        &training_path,
        r#"{"variables": ["a", "b"], "samples": [[0.5, 0.5]], "values": [1.0]}"#,
    )
    .unwrap();

    let output = driver()
        .arg("fit")
        .arg("--training")
        .arg(&training_path)
        .arg("--out")
        .arg(&model_path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("error[SingularMatrixError]"));
    assert!(!model_path.exists());

}

#[test]
fn test_cli_config_errors_are_categorized() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path();
    let bad = dir.join("bad.toml");
    fs::write(&bad, "[driver\nmodel=").unwrap();

    let output = driver().arg("validate").arg("--config").arg(&bad).output().unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[ConfigError]"), "{stderr}");

    let output = driver()
        .arg("validate")
        .arg("--config")
        .arg(dir.join("absent.toml"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error[IoError]"), "{stderr}");
}
