use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

/// Seeds a minimal governance corpus: one governing doc with a normative
/// claim, one operational pitfall doc, and a baseline-shaped duplicate is
/// intentionally omitted (baseline is local-only for this smoke test).
fn seed_corpus(root: &std::path::Path) {
    std::fs::create_dir_all(root.join("canon")).unwrap();
    std::fs::write(
        root.join("canon/auth.md"),
        "---\ntags: [auth, security]\nintent: operational\n---\n\
         # Authentication policy\n\n\
         ## Requirements\n\n\
         All endpoints must validate the session token before handling a request.\n",
    )
    .unwrap();
    std::fs::write(
        root.join("canon/onboarding.md"),
        "---\ntags: [onboarding]\nstart_here: true\nstart_here_order: 1\n---\n\
         # Start here\n\nRead `auth.md` before touching the login flow.\n",
    )
    .unwrap();
}

fn run_cli(bin: &str, root: &std::path::Path, args: &[&str]) -> serde_json::Value {
    let output = Command::new(bin)
        .arg("run")
        .args(args)
        .arg("--root")
        .arg(root)
        .output()
        .expect("spawn epistemic-arbiter run");
    assert!(output.status.success(), "run subcommand failed: {}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).expect("run subcommand prints a JSON envelope")
}

#[test]
fn run_catalog_lists_seeded_documents() {
    let bin = env!("CARGO_BIN_EXE_epistemic-arbiter");
    let tmp = tempfile::tempdir().unwrap();
    seed_corpus(tmp.path());

    let envelope = run_cli(bin, tmp.path(), &["--action", "catalog"]);
    assert_eq!(envelope["action"], "catalog");
    assert_eq!(envelope["result"]["count"], 2);
}

#[test]
fn run_search_prefers_governing_doc_and_extracts_evidence() {
    let bin = env!("CARGO_BIN_EXE_epistemic-arbiter");
    let tmp = tempfile::tempdir().unwrap();
    seed_corpus(tmp.path());

    let envelope = run_cli(bin, tmp.path(), &["--action", "search", "--input", "session token validation requirements"]);
    assert_eq!(envelope["result"]["status"], "FOUND");
    let hits = envelope["result"]["hits"].as_array().unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0]["path"], "canon/auth.md");
    assert!(!envelope["result"]["evidence"].as_array().unwrap().is_empty());
}

#[test]
fn run_validate_requires_artifacts_for_bare_completion_claim() {
    let bin = env!("CARGO_BIN_EXE_epistemic-arbiter");
    let tmp = tempfile::tempdir().unwrap();
    seed_corpus(tmp.path());

    let envelope = run_cli(bin, tmp.path(), &["--action", "validate", "--input", "done, shipped the auth change"]);
    assert_eq!(envelope["result"]["verdict"], "NEEDS_ARTIFACTS");
}

#[test]
fn run_unknown_action_surfaces_structured_error() {
    let bin = env!("CARGO_BIN_EXE_epistemic-arbiter");
    let tmp = tempfile::tempdir().unwrap();
    seed_corpus(tmp.path());

    let envelope = run_cli(bin, tmp.path(), &["--action", "delete_everything"]);
    assert_eq!(envelope["result"]["error"]["code"], "UNKNOWN_ACTION");
}

#[test]
fn mcp_stdio_advertises_single_tool_and_routes_search() {
    let bin = env!("CARGO_BIN_EXE_epistemic-arbiter");
    let tmp = tempfile::tempdir().unwrap();
    seed_corpus(tmp.path());
    let repo_root = tmp.path().to_path_buf();

    let mut child = Command::new(bin)
        .arg("mcp")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn epistemic-arbiter mcp");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05" }
            })
        )
        .unwrap();

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/list"
            })
        )
        .unwrap();

        writeln!(
            stdin,
            "{}",
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {
                    "name": "epistemic_retrieve",
                    "arguments": { "repoPath": repo_root, "action": "search", "input": "session token validation" }
                }
            })
        )
        .unwrap();
    }

    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();

    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v.get("id").and_then(|x| x.as_i64()).expect("json-rpc response id");
        replies_by_id.insert(id, v);
        if replies_by_id.len() >= 3 {
            break;
        }
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "mcp process should exit cleanly");

    {
        let v = replies_by_id.get(&1).expect("initialize reply");
        let result = v.get("result").expect("initialize result");
        assert!(result.get("capabilities").is_some());
    }

    {
        let v = replies_by_id.get(&2).expect("tools/list reply");
        let tools = v.get("result").and_then(|r| r.get("tools")).and_then(|t| t.as_array()).expect("tools array");
        assert_eq!(tools.len(), 1, "only epistemic_retrieve should be advertised");
        assert_eq!(tools[0]["name"], "epistemic_retrieve");
    }

    {
        let v = replies_by_id.get(&3).expect("tools/call reply");
        let result = v.get("result").expect("tools/call result");
        assert_eq!(result.get("isError").and_then(|x| x.as_bool()), Some(false));
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|x| x.get("text"))
            .and_then(|x| x.as_str())
            .expect("tool-call text");
        let envelope: serde_json::Value = serde_json::from_str(text).expect("tool-call text is the JSON envelope");
        assert_eq!(envelope["action"], "search");
        assert_eq!(envelope["result"]["status"], "FOUND");
    }
}
