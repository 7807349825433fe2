use anyhow::Result;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::load_config;
use crate::dispatcher::{self, DispatchInput, Pipeline};
use crate::state::ServiceState;

#[derive(Default)]
pub struct ServerState {
    /// Canonical workspace root. Populated from (highest priority first):
    ///   1. `repoPath` field in a tool call — per-call override.
    ///   2. MCP `initialize` params (`rootUri` / `rootPath` / `workspaceFolders`).
    ///   3. CLI `--root` / `EPISTEMIC_ROOT` env var — startup bootstrap.
    ///   4. IDE-specific env vars (VSCODE_WORKSPACE_FOLDER, IDEA_INITIAL_DIRECTORY, …).
    ///   5. `cwd` — last resort; refused if it equals $HOME or OS root.
    repo_root: Option<PathBuf>,
}

/// Returns `true` for "useless" roots that indicate the server started with the
/// wrong cwd (usually $HOME or filesystem root on any OS).
fn is_dead_root(p: &std::path::Path) -> bool {
    if p.parent().is_none() {
        return true;
    }
    if p.components().count() <= 1 {
        return true;
    }
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        if p == std::path::Path::new(home.trim()) {
            return true;
        }
    }
    false
}

/// Parse a file URI (or plain path string) into an OS-native `PathBuf`.
fn extract_path_from_uri(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://").unwrap_or(uri);

    let rest = if rest.starts_with('/')
        && rest.len() >= 3
        && rest.as_bytes()[1].is_ascii_alphabetic()
        && rest.as_bytes()[2] == b':'
    {
        &rest[1..]
    } else {
        rest
    };

    let s = rest.trim_end_matches('/');
    if s.is_empty() {
        None
    } else {
        Some(PathBuf::from(s))
    }
}

/// Timestamp used for `generated_at` fields across the dispatcher and index
/// cache. Millisecond-precision RFC 3339 in UTC, computed from the system
/// clock directly since the rest of the crate has no `chrono` dependency.
pub fn now_iso8601() -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs();
    let millis = now.subsec_millis();

    let days_since_epoch = secs / 86_400;
    let secs_of_day = secs % 86_400;
    let (hour, minute, second) = (secs_of_day / 3600, (secs_of_day % 3600) / 60, secs_of_day % 60);

    let (year, month, day) = civil_from_days(days_since_epoch as i64);
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{millis:03}Z")
}

/// Howard Hinnant's `civil_from_days` algorithm: days-since-epoch to
/// proleptic Gregorian (y, m, d), avoiding a `chrono`/`time` dependency for
/// a single formatting call.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

impl ServerState {
    /// Called once when the MCP `initialize` request is received.
    fn capture_init_root(&mut self, params: &serde_json::Value) {
        let raw_uri = params
            .get("workspaceFolders")
            .and_then(|f| f.as_array())
            .and_then(|a| a.first())
            .and_then(|f| f.get("uri").or_else(|| f.get("path")))
            .and_then(|v| v.as_str())
            .or_else(|| {
                params
                    .get("rootUri")
                    .or_else(|| params.get("rootPath"))
                    .and_then(|v| v.as_str())
            });

        let root = raw_uri.and_then(extract_path_from_uri);

        if let Some(r) = root {
            self.repo_root = Some(r);
        }
    }

    fn repo_root_from_params(&mut self, params: &serde_json::Value) -> Result<PathBuf, String> {
        // ── Step 1: Explicit parameter (highest priority) ─────────────────────
        if let Some(path) = params.get("repoPath").and_then(|v| v.as_str()) {
            let pb = PathBuf::from(path);
            self.repo_root = Some(pb.clone());
            return Ok(pb);
        }

        // ── Step 2: Cached root (from MCP `initialize` or prior successful call)
        if let Some(root) = &self.repo_root {
            return Ok(root.clone());
        }

        // ── Step 3: Cross-IDE environment variable cascade ────────────────────
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_default();
        let env_root = std::env::var("EPISTEMIC_ROOT")
            .ok()
            .or_else(|| std::env::var("VSCODE_WORKSPACE_FOLDER").ok())
            .or_else(|| std::env::var("IDEA_INITIAL_DIRECTORY").ok())
            .or_else(|| {
                std::env::var("INIT_CWD")
                    .ok()
                    .filter(|v| v.trim() != home.trim())
            })
            .or_else(|| {
                std::env::var("PWD")
                    .ok()
                    .filter(|v| v.trim() != home.trim())
            })
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        if let Some(pb) = env_root {
            self.repo_root = Some(pb.clone());
            return Ok(pb);
        }

        // ── Step 4: CRITICAL safeguard — last resort is cwd ──────────────────
        let fallback = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if is_dead_root(&fallback) {
            return Err(format!(
                "CRITICAL: Workspace root resolved to '{}' (OS root or Home directory). \
                This would allow tools to scan the entire filesystem for governance documents. \
                Please provide the 'repoPath' parameter pointing to your project directory, \
                e.g. repoPath='/Users/you/projects/my-app'.",
                fallback.display()
            ));
        }

        self.repo_root = Some(fallback.clone());
        Ok(fallback)
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "epistemic_retrieve",
                        "description": "📚 EPISTEMIC RETRIEVAL & ARBITRATION — 🔥 ALWAYS call this BEFORE starting a task in an unfamiliar repo, claiming completion, or resolving a conflict between two pieces of guidance. Indexes governance documents (local conventions + an optional remote baseline corpus), scores them against your query, and arbitrates between conflicting documents using authority, intent, and evidence signals rather than raw lexical rank alone. DECISION GUIDE → `search`: ask a question, get ranked candidate documents with extracted evidence quotes and an arbitration outcome (prefer/defer/escalate). → `catalog`: list every indexed document when you don't have a specific query yet. → `preflight`: before starting work in a scope, get the governing constraints and known pitfalls that apply. → `validate`: before claiming a task is done, check whether your completion claim cites the evidence it needs. → `orient`: classify what epistemic mode you're in (exploring/preflight/clarifying/closing) from free text. → `challenge`: surface tensions between candidate documents for a query without picking a single answer. → `gate`: check whether scope prerequisites (e.g. required onboarding docs) are satisfied. → `encode`: generate a blank decision-record template to capture a new judgment call. → `get`: fetch one document's exact content by path or canonical ref. → `version`: report tool/schema/baseline-commit versions. → `cleanup`: prune stale baseline cache snapshots. If no `action` is given, the query text is matched against a fixed set of phrases to infer one — but passing `action` explicitly is always preferred.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "action": {
                                    "type": "string",
                                    "enum": ["search", "catalog", "preflight", "validate", "orient", "challenge", "gate", "encode", "get", "version", "cleanup"],
                                    "description": "Selects the retrieval/arbitration operation. Omit to let phrase-matching infer one from `input`/`context` (defaults to `search`)."
                                },
                                "input": { "type": "string", "description": "The query (search/challenge), completion claim (validate), document ref (get), decision subject (encode), or free text to classify (orient)." },
                                "context": { "type": "string", "description": "Optional additional free text — scope hint for preflight/gate, surrounding conversation for orient." },
                                "mode": { "type": "string", "description": "Optional caller-asserted mode hint; currently informational." },
                                "canon_url": { "type": "string", "description": "Optional override for the baseline corpus URL for this call only (defaults to the configured baseline)." },
                                "state": { "description": "Optional opaque client-side state echoed back unchanged in the response envelope." },
                                "repoPath": { "type": "string", "description": "Optional absolute path to the repo root (defaults to the captured workspace root or cwd)." },
                                "max_chars": { "type": "integer", "description": "Optional: Maximum output characters. Default 8000." }
                            },
                            "required": []
                        }
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));
        let max_chars = negotiated_max_chars(&args);

        let ok = |text: String| {
            let text = force_inline_truncate(text, max_chars);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": false }
            })
        };

        let err = |msg: String| {
            let msg = force_inline_truncate(msg, max_chars);
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": msg }], "isError": true }
            })
        };

        match name {
            "epistemic_retrieve" => {
                let repo_root = match self.repo_root_from_params(&args) {
                    Ok(r) => r,
                    Err(e) => return err(e),
                };
                let config = load_config(&repo_root);
                let state_dir = if config.state.state_dir.is_absolute() {
                    config.state.state_dir.clone()
                } else {
                    repo_root.join(&config.state.state_dir)
                };
                let baseline_cache_root = if config.baseline.cache_root.is_absolute() {
                    config.baseline.cache_root.clone()
                } else {
                    repo_root.join(&config.baseline.cache_root)
                };
                let state = ServiceState::new(state_dir, baseline_cache_root);
                let pipeline = Pipeline { local_root: &repo_root, config: &config, state: &state };

                let input: DispatchInput = match serde_json::from_value(args.clone()) {
                    Ok(v) => v,
                    Err(e) => return err(format!("Invalid arguments for epistemic_retrieve: {e}")),
                };

                let envelope = dispatcher::dispatch(&pipeline, input);
                let is_error = envelope.result.get("error").is_some();
                let text = serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.assistant_text.clone());
                if is_error {
                    err(text)
                } else {
                    ok(text)
                }
            }
            _ => err(format!("Tool not found: {name}. Only 'epistemic_retrieve' is exposed by this server.")),
        }
    }
}

pub fn run_stdio_server(startup_root: Option<PathBuf>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    let mut state = ServerState::default();
    // ── Bootstrap repo_root before the first tool call arrives ──────────────
    // Priority (first non-None wins; the MCP initialize handler may overwrite
    // this later with the editor's authoritative root):
    //
    //   1. --root <PATH>  / EPISTEMIC_ROOT       — explicit config (always wins)
    //   2. VSCODE_WORKSPACE_FOLDER               — VS Code / Cursor / Windsurf
    //   3. VSCODE_CWD                            — VS Code secondary
    //   4. IDEA_INITIAL_DIRECTORY                — JetBrains IDEs
    //   5. PWD / INIT_CWD (≠ $HOME)               — Zed, Neovim, npm runners
    //
    // This is a best-effort bootstrap only. The MCP `initialize` request
    // (capture_init_root) is the canonical, protocol-level source and will
    // overwrite this value when the editor sends it.
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_default();
    let env_root = std::env::var("EPISTEMIC_ROOT")
        .ok()
        .or_else(|| std::env::var("VSCODE_WORKSPACE_FOLDER").ok())
        .or_else(|| std::env::var("VSCODE_CWD").ok())
        .or_else(|| std::env::var("IDEA_INITIAL_DIRECTORY").ok())
        .or_else(|| {
            std::env::var("PWD")
                .ok()
                .filter(|v| v.trim() != home.trim())
        })
        .or_else(|| {
            std::env::var("INIT_CWD")
                .ok()
                .filter(|v| v.trim() != home.trim())
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(PathBuf::from);
    if let Some(r) = startup_root.or(env_root) {
        state.repo_root = Some(r);
    }

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let has_id = msg.get("id").is_some();
        if !has_id {
            continue;
        }

        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => {
                if let Some(p) = msg.get("params") {
                    state.capture_init_root(p);
                }
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                        "capabilities": { "tools": { "listChanged": true } },
                        "serverInfo": { "name": "epistemic-arbiter", "version": env!("CARGO_PKG_VERSION") }
                    }
                })
            }
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => state.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                state.tool_call(id, &params)
            }
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "resources": [] }
            }),
            "prompts/list" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "prompts": [] }
            }),
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };

        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }

    Ok(())
}

const DEFAULT_MAX_CHARS: usize = 8_000;

fn negotiated_max_chars(args: &serde_json::Value) -> usize {
    args.get("max_chars")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_CHARS)
}

/// Hard inline cap: always truncates in the response body — never writes to disk.
/// Safe for any MCP client; the truncation marker makes partial output obvious.
fn force_inline_truncate(mut content: String, max_chars: usize) -> String {
    if content.len() <= max_chars {
        return content;
    }
    let total_len = content.len();
    let mut cut = max_chars.min(content.len());
    while cut > 0 && !content.is_char_boundary(cut) {
        cut -= 1;
    }
    content.truncate(cut);
    content.push_str(&format!(
        "\n\n... ✂️ [TRUNCATED: {max_chars}/{total_len} chars to prevent IDE spill]"
    ));
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso8601_has_expected_shape() {
        let s = now_iso8601();
        assert_eq!(s.len(), 24);
        assert!(s.ends_with('Z'));
        assert_eq!(&s[4..5], "-");
        assert_eq!(&s[7..8], "-");
        assert_eq!(&s[10..11], "T");
    }

    #[test]
    fn dead_root_rejects_home_and_os_root() {
        assert!(is_dead_root(std::path::Path::new("/")));
        assert!(is_dead_root(std::path::Path::new(".")));
    }

    #[test]
    fn unsupported_tool_name_is_reported() {
        let mut state = ServerState::default();
        let reply = state.tool_call(json!(1), &json!({ "name": "nonexistent_tool", "arguments": {} }));
        assert_eq!(reply["result"]["isError"], true);
    }
}
