//! Integration tests for the wxpub-accounts CLI

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// Isolated config with two accounts and a token cache directory
struct TestEnv {
    _temp_dir: TempDir,
    config_path: PathBuf,
    cache_dir: PathBuf,
}

impl TestEnv {
    fn new(base_url: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join("tokens");
        let config_path = temp_dir.path().join("config.toml");

        let config = format!(
            r#"
active_account = "main"

[api]
base_url = "{}"
timeout_secs = 5

[cache]
dir = "{}"

[[accounts]]
id = "main"
app_id = "wx1"
app_secret = "secret-one"
name = "Main Account"

[[accounts]]
id = "side"
app_id = "wx2"
app_secret = "secret-two"
use_stable_token = true
"#,
            base_url,
            cache_dir.to_string_lossy().replace('\\', "\\\\")
        );
        fs::write(&config_path, config).unwrap();

        Self {
            _temp_dir: temp_dir,
            config_path,
            cache_dir,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("wxpub-accounts").unwrap();
        cmd.env("WXPUB_CONFIG", &self.config_path);
        for key in [
            "WECHAT_APP_ID",
            "WECHAT_APP_SECRET",
            "WECHAT_ACCOUNTS",
            "WECHAT_USE_STABLE_TOKEN",
        ] {
            cmd.env_remove(key);
        }
        cmd
    }

    fn token_file(&self, id: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.token.json", id))
    }
}

fn mock_tokens(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/cgi-bin/token").query_param("appid", "wx1");
        then.status(200)
            .json_body(serde_json::json!({"access_token": "TOK_MAIN", "expires_in": 7200}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/cgi-bin/stable_token");
        then.status(200)
            .json_body(serde_json::json!({"errcode": 40125, "errmsg": "invalid appsecret"}));
    });
}

#[test]
fn test_list_hides_secrets() {
    let env = TestEnv::new("http://127.0.0.1:9/cgi-bin");

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("* main (wx1) \"Main Account\" token: unknown"))
        .stdout(predicate::str::contains("  side (wx2) token: unknown [stable]"))
        .stdout(predicate::str::contains("secret-one").not());
}

#[test]
fn test_list_json() {
    let env = TestEnv::new("http://127.0.0.1:9/cgi-bin");

    let output = env.cmd().args(["list", "--format", "json"]).output().unwrap();
    assert!(output.status.success());

    let accounts: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(accounts[0]["id"], "main");
    assert_eq!(accounts[0]["is_active"], true);
    assert_eq!(accounts[1]["token_status"], "unknown");
}

#[test]
fn test_validate_active_account_persists_token() {
    let server = MockServer::start();
    mock_tokens(&server);
    let env = TestEnv::new(&server.url("/cgi-bin"));

    env.cmd()
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("main: ok"));
    assert!(env.token_file("main").exists());

    // a later process sees the stored token
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("main (wx1) \"Main Account\" token: valid"));
}

#[test]
fn test_validate_all_reports_failures() {
    let server = MockServer::start();
    mock_tokens(&server);
    let env = TestEnv::new(&server.url("/cgi-bin"));

    env.cmd()
        .args(["validate", "--all"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("main: ok"))
        .stdout(predicate::str::contains("side: FAILED"))
        .stderr(predicate::str::contains("1 of 2 account(s) failed validation"));
}

#[test]
fn test_validate_unknown_account() {
    let env = TestEnv::new("http://127.0.0.1:9/cgi-bin");

    env.cmd()
        .args(["validate", "ghost"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Account not found: ghost"));
}

#[test]
fn test_clear_cache() {
    let server = MockServer::start();
    mock_tokens(&server);
    let env = TestEnv::new(&server.url("/cgi-bin"));

    env.cmd().args(["validate", "main"]).assert().success();
    assert!(env.token_file("main").exists());

    env.cmd()
        .args(["clear-cache", "main"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cleared cached token for account 'main'"));
    assert!(!env.token_file("main").exists());
}

#[test]
fn test_clear_cache_all_and_missing_target() {
    let env = TestEnv::new("http://127.0.0.1:9/cgi-bin");

    env.cmd()
        .args(["clear-cache", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("all accounts"));

    env.cmd()
        .arg("clear-cache")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Either specify an account id or use --all"));
}

#[test]
fn test_export_has_no_secrets() {
    let env = TestEnv::new("http://127.0.0.1:9/cgi-bin");

    env.cmd()
        .arg("export")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"active_account\": \"main\""))
        .stdout(predicate::str::contains("secret-two").not());
}
