//! Harness runs over the bundled samples.
//!
//! Every sample must pass the harness for every runtime version, and the
//! resolved `(opname, text)` pairs must match the recorded baseline in
//! `tests/sample_results/<version>.json`.
//!
//! ## Updating Baselines
//!
//! A missing baseline fails the run like a mismatch does. After an
//! intentional change, or to record a baseline for a new version:
//! ```bash
//! WHENCE_UPDATE_BASELINE=1 cargo nextest run -p whence baseline
//! git diff tests/sample_results/  # Review changes
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use whence::{check_paths, Report, Resolver, RuntimeVersion, SourceRegistry};

// ============================================================================
// Test Infrastructure
// ============================================================================

fn samples_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("samples")
}

fn results_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("sample_results")
}

/// Check if baseline update mode is enabled.
fn update_mode() -> bool {
    std::env::var("WHENCE_UPDATE_BASELINE").is_ok()
}

fn check_samples(version: RuntimeVersion) -> Report {
    let resolver = Resolver::new(Arc::new(SourceRegistry::new()), version);
    check_paths(&resolver, &[samples_dir()]).unwrap()
}

fn describe_failures(report: &Report) -> String {
    let mut out = String::new();
    for file in &report.files {
        for failure in &file.failures {
            out.push_str(&format!("{}: {:?}\n", file.filename, failure));
        }
    }
    out
}

/// Compare against the recorded baseline, rewriting it in update mode.
fn compare_baseline(report: &Report) -> Result<(), String> {
    let actual = serde_json::to_value(report.baseline())
        .map_err(|e| format!("Failed to serialize baseline: {}", e))?;
    let path = results_dir().join(format!("{}.json", report.version));

    if update_mode() {
        fs::create_dir_all(results_dir())
            .map_err(|e| format!("Failed to create {:?}: {}", results_dir(), e))?;
        let pretty = serde_json::to_string_pretty(&actual)
            .map_err(|e| format!("Failed to serialize JSON: {}", e))?;
        fs::write(&path, pretty + "\n")
            .map_err(|e| format!("Failed to write baseline: {}", e))?;
        eprintln!("Recorded baseline: {:?}", path);
        return Ok(());
    }
    if !path.exists() {
        return Err(format!(
            "missing baseline {:?}; run with WHENCE_UPDATE_BASELINE=1 to record it",
            path
        ));
    }

    let content = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read baseline {:?}: {}", path, e))?;
    let expected: Value = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse baseline: {}", e))?;
    if expected == actual {
        return Ok(());
    }

    let (Value::Object(expected), Value::Object(actual)) = (&expected, &actual) else {
        return Err("baseline is not an object keyed by file name".to_string());
    };
    let mut mismatched: Vec<_> = expected
        .keys()
        .chain(actual.keys())
        .filter(|name| expected.get(*name) != actual.get(*name))
        .cloned()
        .collect();
    mismatched.sort();
    mismatched.dedup();
    Err(format!(
        "baseline mismatch for {} in: {}",
        report.version,
        mismatched.join(", ")
    ))
}

fn run_version(version: RuntimeVersion) {
    let report = check_samples(version);
    assert!(
        report.files.len() >= 4,
        "expected the bundled samples, found {}",
        report.files.len()
    );
    assert_eq!(
        report.failure_count(),
        0,
        "harness failures on {}:\n{}",
        version,
        describe_failures(&report)
    );
    if let Err(message) = compare_baseline(&report) {
        panic!("{}", message);
    }
}

// ============================================================================
// Per-version runs
// ============================================================================

#[test]
fn samples_pass_on_3_8() {
    run_version(RuntimeVersion::V3_8);
}

#[test]
fn samples_pass_on_3_9() {
    run_version(RuntimeVersion::V3_9);
}

#[test]
fn samples_pass_on_3_10() {
    run_version(RuntimeVersion::V3_10);
}

#[test]
fn samples_pass_on_3_11() {
    run_version(RuntimeVersion::V3_11);
}

#[test]
fn samples_resolve_calls_on_every_line_of_a_multiline_statement() {
    for version in RuntimeVersion::ALL {
        let report = check_samples(version);
        let functions = report
            .files
            .iter()
            .find(|f| f.filename.ends_with("functions.py"))
            .unwrap();
        let outer = functions
            .entries
            .iter()
            .filter(|e| e.1 == "tester(\n    tester(3),\n    tester(4),\n)")
            .count();
        assert_eq!(outer, 1, "{}", version);
    }
}

#[test]
fn every_version_has_a_committed_baseline() {
    for version in RuntimeVersion::ALL {
        let path = results_dir().join(format!("{}.json", version));
        let content = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("baseline {:?} is not committed: {}", path, e));
        let recorded: Value = serde_json::from_str(&content).unwrap();
        let names: Vec<_> = recorded.as_object().unwrap().keys().cloned().collect();
        assert_eq!(
            names,
            ["basics.py", "classes.py", "control_flow.py", "functions.py"],
            "{}",
            version
        );
    }
}
