#![allow(missing_docs)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

/// `nums.Where(n => n > 3).Count()`
const WHERE_COUNT: &str = r#"{
    "element_type": {"kind": "int32"},
    "root": {
        "node": "call",
        "owner": "Queryable",
        "method": "Count",
        "returns": {"kind": "int32"},
        "args": [{
            "node": "call",
            "owner": "Queryable",
            "method": "Where",
            "args": [
                {"node": "source", "name": "nums", "element_type": {"kind": "int32"}},
                {
                    "node": "lambda",
                    "params": [{"name": "n", "type": {"kind": "int32"}}],
                    "body": {
                        "node": "binary",
                        "op": "greater_than",
                        "left": {"node": "parameter", "name": "n"},
                        "right": {"node": "constant", "value": {"t": "Int", "v": 3}, "type": {"kind": "int32"}}
                    }
                }
            ]
        }]
    }
}"#;

fn write_tree(name: &str, contents: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.json"));
    fs::write(&path, contents).expect("write tree");
    (dir, path)
}

#[test]
fn parse_prints_model_as_text() {
    let (_dir, tree) = write_tree("where-count", WHERE_COUNT);
    let output = cargo_bin_cmd!("qmodel")
        .args(["--plain", "parse"])
        .arg(&tree)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    for clause in ["from i32 n in nums", "where ([n] > 3)", "select [n]", "=> Count()"] {
        assert!(text.contains(&format!("  {clause}\n")), "{text}");
    }
    assert!(text.contains("scalar<i32>"), "{text}");
    assert!(text.contains("MainFrom"), "{text}");
}

#[test]
fn parse_emits_json() {
    let (_dir, tree) = write_tree("where-count", WHERE_COUNT);
    let output = cargo_bin_cmd!("qmodel")
        .args(["--format", "json", "parse"])
        .arg(&tree)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["explain"]["output_shape"], "scalar<i32>");
    assert_eq!(json["sources"].as_array().map(Vec::len), Some(1));
    assert!(json["model"].as_str().unwrap_or_default().contains("Count()"));
}

#[test]
fn shape_emits_json_descriptor() {
    let (_dir, tree) = write_tree("where-count", WHERE_COUNT);
    let output = cargo_bin_cmd!("qmodel")
        .args(["--format", "json", "shape"])
        .arg(&tree)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["shape"]["shape"], "scalar");
    assert_eq!(json["rendered"], "scalar<i32>");
    assert_eq!(json["result_operators"][0], "Count()");
}

#[test]
fn unknown_operator_fails_with_code() {
    let (_dir, tree) = write_tree("zip", &WHERE_COUNT.replace("Count", "Zip"));
    let output = cargo_bin_cmd!("qmodel")
        .arg("parse")
        .arg(&tree)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("[UnrecognizedChainShape]"), "{stderr}");
}

#[test]
fn config_file_bounds_chain_length() {
    let (dir, tree) = write_tree("where-count", WHERE_COUNT);
    let config = dir.path().join("parser.toml");
    fs::write(&config, "max_chain_length = 1\n").expect("write config");
    let output = cargo_bin_cmd!("qmodel")
        .arg("--config")
        .arg(&config)
        .arg("shape")
        .arg(&tree)
        .assert()
        .failure()
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8");
    assert!(stderr.contains("[InvalidArgument]"), "{stderr}");
}

#[test]
fn malformed_tree_is_reported() {
    let (_dir, tree) = write_tree("broken", "{\"root\": 1}");
    cargo_bin_cmd!("qmodel")
        .arg("parse")
        .arg(&tree)
        .assert()
        .failure();
}
