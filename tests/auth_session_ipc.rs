use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar(
    workspace: &Path,
    extra_env: &[(&str, &str)],
) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut cmd = Command::new(exe);
    cmd.current_dir(workspace)
        .env(
            "TUITION_BACKEND_URL",
            format!("sqlite://{}", workspace.join("backend.sqlite3").display()),
        )
        .env("TUITION_BACKEND_KEY", "auth-key")
        .env("TUITION_RETRY_DELAY_MS", "0")
        .env("TUITION_PASSWORD_COST", "4");
    for (k, v) in extra_env {
        cmd.env(k, v);
    }
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

#[test]
fn sign_up_sign_out_and_sign_in_drive_the_session() {
    let workspace = temp_dir("tuition-auth-session");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace, &[]);

    let mismatch = request(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "fullName": "Priya Nair",
            "email": "priya@example.com",
            "password": "secret1",
            "confirmPassword": "secret2"
        }),
    );
    assert_eq!(mismatch["ok"], json!(false));
    assert_eq!(mismatch["error"]["code"], json!("auth_error"));
    assert_eq!(mismatch["error"]["message"], json!("Passwords do not match"));

    let signed_up = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signUp",
        json!({
            "fullName": "Priya Nair",
            "email": "priya@example.com",
            "phone": "555-0101",
            "password": "secret1",
            "confirmPassword": "secret1"
        }),
    );
    let user_id = signed_up["session"]["user"]["id"]
        .as_str()
        .expect("user id")
        .to_string();
    let state = &signed_up["state"];
    assert_eq!(state["isAuthenticated"], json!(true));
    assert_eq!(state["isTeacher"], json!(true));
    assert_eq!(state["isStudent"], json!(false));
    assert_eq!(state["loading"], json!(false));
    assert_eq!(state["profile"]["fullName"], json!("Priya Nair"));
    assert_eq!(state["profile"]["role"], json!("teacher"));

    let current = request_ok(&mut stdin, &mut reader, "3", "profile.current", json!({}));
    assert_eq!(current["profile"]["id"], json!(user_id));

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.signUp",
        json!({
            "fullName": "Priya Again",
            "email": "PRIYA@example.com",
            "password": "secret1"
        }),
    );
    assert_eq!(duplicate["error"]["code"], json!("auth_error"));

    let out = request_ok(&mut stdin, &mut reader, "5", "auth.signOut", json!({}));
    assert_eq!(out["state"]["isAuthenticated"], json!(false));
    assert_eq!(out["state"]["profile"], json!(null));

    let health = request_ok(&mut stdin, &mut reader, "6", "health", json!({}));
    assert_eq!(health["authenticated"], json!(false));

    let bad = request(
        &mut stdin,
        &mut reader,
        "7",
        "auth.signIn",
        json!({ "email": "priya@example.com", "password": "wrong-pass" }),
    );
    assert_eq!(bad["ok"], json!(false));
    assert_eq!(bad["error"]["code"], json!("auth_error"));
    assert_eq!(bad["error"]["message"], json!("Invalid login credentials"));

    let after_bad = request_ok(&mut stdin, &mut reader, "8", "auth.state", json!({}));
    assert_eq!(after_bad["state"]["loading"], json!(false));
    assert_eq!(after_bad["state"]["user"], json!(null));

    let signed_in = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "auth.signIn",
        json!({ "email": "priya@example.com", "password": "secret1" }),
    );
    assert_eq!(signed_in["state"]["user"]["id"], json!(user_id));
    assert_eq!(signed_in["state"]["profile"]["phone"], json!("555-0101"));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "profile.update",
        json!({ "fullName": "Priya N. Nair" }),
    );
    assert_eq!(updated["profile"]["fullName"], json!("Priya N. Nair"));
    let state = request_ok(&mut stdin, &mut reader, "11", "auth.state", json!({}));
    assert_eq!(state["state"]["profile"]["fullName"], json!("Priya N. Nair"));

    let refreshed = request_ok(&mut stdin, &mut reader, "12", "auth.refresh", json!({}));
    assert_eq!(refreshed["session"]["user"]["id"], json!(user_id));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn unconfirmed_accounts_wait_for_email_verification() {
    let workspace = temp_dir("tuition-auth-confirm");
    let (mut child, mut stdin, mut reader) =
        spawn_sidecar(&workspace, &[("TUITION_AUTO_CONFIRM", "false")]);

    let signed_up = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "auth.signUp",
        json!({
            "fullName": "Sam Okafor",
            "email": "sam@example.com",
            "password": "secret1",
            "role": "student"
        }),
    );
    assert_eq!(signed_up["confirmationRequired"], json!(true));
    let token = signed_up["confirmationToken"]
        .as_str()
        .expect("confirmation token")
        .to_string();

    let early = request(
        &mut stdin,
        &mut reader,
        "2",
        "auth.signIn",
        json!({ "email": "sam@example.com", "password": "secret1" }),
    );
    assert_eq!(early["ok"], json!(false));
    assert_eq!(early["error"]["message"], json!("Email not confirmed"));

    let verified = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "auth.verifyEmail",
        json!({ "email": "sam@example.com", "token": token }),
    );
    assert_eq!(verified["state"]["isAuthenticated"], json!(true));
    assert_eq!(verified["state"]["isStudent"], json!(true));
    assert_eq!(verified["state"]["isTeacher"], json!(false));

    drop(stdin);
    let _ = child.wait();
}
