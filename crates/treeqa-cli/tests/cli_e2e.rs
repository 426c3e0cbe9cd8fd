use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn treeqa_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_treeqa"))
}

/// Run offline from `dir` so no local treeqa.toml or API key leaks in.
fn run(dir: &Path, args: &[&str]) -> Output {
    Command::new(treeqa_bin())
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("TREEQA_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .args(["--provider", "mock"])
        .args(args)
        .output()
        .expect("run treeqa")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

const DATASET: &str = r#"[
  {"_id": "q1", "question": "Who composed the music for Manru?", "answer": "Ignacy Jan Paderewski"},
  {"_id": "q2", "question": "Where was Paderewski born?", "answer": "Kuryłówka"},
  {"_id": "q3", "question": "Which answer is mocked?", "answer": "Mock answer"}
]"#;

#[test]
fn test_single_question_prints_answer_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let output = run(dir.path(), &["single", "--question", "Who composed the music for Manru?"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let text = stdout(&output);
    assert!(text.contains("Mock answer"));
    assert!(text.contains("Total tokens"));
    assert!(text.contains("**Input Question:**"));
}

#[test]
fn test_dataset_eval_render_round() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dev.json"), DATASET).unwrap();

    let output = run(
        dir.path(),
        &["dataset", "--format", "2wiki", "--input", "dev.json", "--output", "out/results.jsonl", "--workers", "2", "--limit", "2"],
    );
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let results = dir.path().join("out/results.jsonl");
    assert_eq!(fs::read_to_string(&results).unwrap().lines().count(), 2);

    // Resume: only q3 is new.
    let output = run(
        dir.path(),
        &["dataset", "--format", "2wiki", "--input", "dev.json", "--output", "out/results.jsonl"],
    );
    assert!(output.status.success());
    let lines: Vec<serde_json::Value> = fs::read_to_string(&results)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l["fix_count"] == 0));

    let output = run(dir.path(), &["eval", "--input", "out/results.jsonl", "--json", "--errors", "misses.jsonl"]);
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["records"], 3);
    assert!((report["contains_match"].as_f64().unwrap() - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(fs::read_to_string(dir.path().join("misses.jsonl")).unwrap().lines().count(), 2);

    let output = run(dir.path(), &["render", "--input", "out/results.jsonl", "--id", "q3"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Which answer is mocked?"));

    let output = run(dir.path(), &["render", "--input", "out/results.jsonl", "--id", "nope"]);
    assert!(!output.status.success());
}
