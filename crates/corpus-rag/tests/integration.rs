use std::fs;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const CORPUS: &str = include_str!("../../../demos/display-tech.json");

fn crag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("crag");
    path
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn setup_test_env(port: u16) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let corpus_path = root.join("corpus.json");
    fs::write(&corpus_path, CORPUS).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/crag.sqlite"

[retrieval]
final_limit = 5

[embedding]
provider = "hash"
dims = 256

[server]
bind = "127.0.0.1:{}"

[personas.david]
tags = ["lightfield", "3d-display"]
document_kinds = ["patent", "paper"]
"#,
        root.display(),
        port
    );

    let config_path = config_dir.join("crag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, corpus_path)
}

fn run_crag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = crag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run crag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn imported_env(port: u16) -> (TempDir, PathBuf) {
    let (tmp, config_path, corpus_path) = setup_test_env(port);
    let (_, stderr, ok) = run_crag(&config_path, &["init"]);
    assert!(ok, "init failed: {}", stderr);
    let (stdout, stderr, ok) = run_crag(&config_path, &["import", corpus_path.to_str().unwrap()]);
    assert!(ok, "import failed: stdout={}, stderr={}", stdout, stderr);
    (tmp, config_path)
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path, _) = setup_test_env(free_port());

    let (stdout, stderr, success) = run_crag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Database initialized successfully."));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env(free_port());

    let (_, _, success1) = run_crag(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_crag(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_import_reports_counts() {
    let (_tmp, config_path, corpus_path) = setup_test_env(free_port());
    run_crag(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_crag(&config_path, &["import", corpus_path.to_str().unwrap()]);
    assert!(success, "import failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 4"));
    assert!(stdout.contains("edges: 3"));
    assert!(stdout.contains("embeddings pending: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_import_idempotent() {
    let (_tmp, config_path) = imported_env(free_port());
    let (before, _, _) = run_crag(&config_path, &["stats"]);

    let corpus = config_path.parent().unwrap().parent().unwrap().join("corpus.json");
    let (_, stderr, ok) = run_crag(&config_path, &["import", corpus.to_str().unwrap()]);
    assert!(ok, "second import failed: {}", stderr);

    let (after, _, _) = run_crag(&config_path, &["stats"]);
    let counts = |s: &str| -> Vec<String> {
        s.lines()
            .filter(|l| !l.contains("Size:"))
            .map(str::to_string)
            .collect()
    };
    assert_eq!(counts(before.as_str()), counts(after.as_str()));
}

#[test]
fn test_stats_lists_graph_counts() {
    let (_tmp, config_path) = imported_env(free_port());

    let (stdout, stderr, success) = run_crag(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Documents:   4"));
    assert!(stdout.contains("Edges:       3"));
    assert!(stdout.contains("patent"));
}

#[test]
fn test_search_patent_is_top_result() {
    let (_tmp, config_path) = imported_env(free_port());

    let (stdout, stderr, success) =
        run_crag(&config_path, &["search", "diffractive backlighting patents"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout
        .lines()
        .find(|l| l.starts_with("1. "))
        .unwrap_or_else(|| panic!("no ranked results: {}", stdout));
    assert!(first.contains("[A1]"));
    assert!(first.contains("Diffractive backlighting for multiview screens"));
}

#[test]
fn test_search_json_reports_metadata() {
    let (_tmp, config_path) = imported_env(free_port());

    let (stdout, stderr, success) =
        run_crag(&config_path, &["search", "lightfield displays", "--json"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);

    let resp: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let recognized = resp["metadata"]["entities_recognized"].as_array().unwrap();
    assert!(recognized.iter().any(|e| e == "lightfield"));
    assert_eq!(resp["metadata"]["tier_stats"].as_array().unwrap().len(), 3);

    let docs: Vec<&str> = resp["results"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["document_id"].as_str())
        .collect();
    assert!(docs.contains(&"leia-history"), "{:?}", docs);
}

#[test]
fn test_search_deterministic() {
    let (_tmp, config_path) = imported_env(free_port());

    let (first, _, _) = run_crag(&config_path, &["search", "lightfield displays", "--json"]);
    let (second, _, _) = run_crag(&config_path, &["search", "lightfield displays", "--json"]);
    let strip = |s: &str| {
        let mut v: serde_json::Value = serde_json::from_str(s).unwrap();
        v["metadata"]["elapsed_ms"] = serde_json::Value::Null;
        for stat in v["metadata"]["tier_stats"].as_array_mut().unwrap() {
            stat["elapsed_ms"] = serde_json::Value::Null;
        }
        v
    };
    assert_eq!(strip(first.as_str()), strip(second.as_str()));
}

#[test]
fn test_search_empty_query_fails() {
    let (_tmp, config_path) = imported_env(free_port());

    let (_, stderr, success) = run_crag(&config_path, &["search", "   "]);
    assert!(!success);
    assert!(stderr.contains("invalid query"), "{}", stderr);
}

#[test]
fn test_search_unknown_persona_fails() {
    let (_tmp, config_path) = imported_env(free_port());

    let (_, stderr, success) = run_crag(
        &config_path,
        &["search", "lightfield", "--persona", "nobody"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown persona"), "{}", stderr);
}

#[test]
fn test_search_empty_corpus() {
    let (_tmp, config_path, _) = setup_test_env(free_port());
    run_crag(&config_path, &["init"]);

    let (stdout, stderr, success) = run_crag(&config_path, &["search", "lightfield displays"]);
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_expand_prints_neighbourhood() {
    let (_tmp, config_path) = imported_env(free_port());

    let (stdout, stderr, success) =
        run_crag(&config_path, &["expand", "Leia Inc", "--max-hops", "1"]);
    assert!(success, "expand failed: {}", stderr);
    assert!(stdout.contains("Leia Inc [leia-inc]"));
    assert!(stdout.contains("lightfield [lightfield]"));
    assert!(stdout.contains("implements"));
    assert!(!stdout.contains("3d display [3d-display]"));
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_crag(&tmp.path().join("nope.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

// ============ HTTP server ============

struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn start_server(config_path: &Path, port: u16) -> ServerGuard {
    let child = Command::new(crag_binary())
        .arg("--config")
        .arg(config_path)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let guard = ServerGuard(child);

    let url = format!("http://127.0.0.1:{}/health", port);
    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if reqwest::blocking::get(&url).map(|r| r.status().is_success()).unwrap_or(false) {
            return guard;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("server did not start on port {}", port);
}

#[test]
fn test_server_retrieve_and_errors() {
    let port = free_port();
    let (_tmp, config_path) = imported_env(port);
    let _server = start_server(&config_path, port);
    let client = reqwest::blocking::Client::new();
    let url = format!("http://127.0.0.1:{}/retrieve", port);

    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "query": "diffractive backlighting patents", "limit": 3 }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["results"][0]["document_id"], "patent-us11281020");
    assert_eq!(body["results"][0]["citation"], "A1");
    assert!(body["results"].as_array().unwrap().len() <= 3);

    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "query": "" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    let resp = client
        .post(&url)
        .json(&serde_json::json!({ "query": "lightfield", "persona_id": "nobody" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);

    let resp = client
        .post(&url)
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
}

#[test]
fn test_server_persona_filter() {
    let port = free_port();
    let (_tmp, config_path) = imported_env(port);
    let _server = start_server(&config_path, port);

    let resp = reqwest::blocking::Client::new()
        .post(format!("http://127.0.0.1:{}/retrieve", port))
        .json(&serde_json::json!({ "query": "lightfield displays", "persona_id": "david" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: serde_json::Value = resp.json().unwrap();
    for r in body["results"].as_array().unwrap() {
        let kind = r["kind"].as_str().unwrap();
        assert!(kind == "patent" || kind == "paper", "{}", kind);
    }
}
