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

fn spawn_sidecar(workspace: &Path) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_tuitiond");
    let mut child = Command::new(exe)
        .current_dir(workspace)
        .env(
            "TUITION_BACKEND_URL",
            format!("sqlite://{}", workspace.join("backend.sqlite3").display()),
        )
        .env("TUITION_BACKEND_KEY", "classes-key")
        .env("TUITION_RETRY_DELAY_MS", "0")
        .env("TUITION_PASSWORD_COST", "4")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tuitiond");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert_eq!(value["ok"], json!(true), "{} failed: {}", method, value);
    value["result"].clone()
}

fn sign_up(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    name: &str,
    email: &str,
    role: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        id,
        "auth.signUp",
        json!({
            "fullName": name,
            "email": email,
            "password": "password1",
            "role": role
        }),
    );
    res["session"]["user"]["id"]
        .as_str()
        .expect("user id")
        .to_string()
}

#[test]
fn enrollment_and_attendance_refresh_cached_reads() {
    let workspace = temp_dir("tuition-classes-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&workspace);

    let student_id = sign_up(&mut stdin, &mut reader, "1", "Lena Ortiz", "lena@example.com", "student");
    let teacher_id = sign_up(&mut stdin, &mut reader, "2", "Omar Haddad", "omar@example.com", "teacher");
    assert_ne!(student_id, teacher_id);

    let institution = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "institutions.create",
        json!({ "name": "Northside Tuition", "ownerId": teacher_id }),
    );
    let institution_id = institution["institution"]["id"]
        .as_str()
        .expect("institution id")
        .to_string();

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({
            "name": "Algebra I",
            "subject": "Mathematics",
            "roomCode": "MATH-101",
            "teacherId": teacher_id,
            "institutionId": institution_id
        }),
    );
    let class_id = created["class"]["id"].as_str().expect("class id").to_string();
    assert_eq!(created["class"]["teacherName"], json!("Omar Haddad"));
    assert_eq!(created["class"]["isActive"], json!(true));

    let listed = request_ok(&mut stdin, &mut reader, "5", "classes.list", json!({}));
    let classes = listed["classes"].as_array().expect("classes");
    assert_eq!(classes.len(), 1);
    assert_eq!(classes[0]["studentCount"], json!(0));

    let enrolled = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.enroll",
        json!({ "studentId": student_id, "classId": class_id }),
    );
    assert_eq!(enrolled["enrollment"]["isActive"], json!(true));

    // The cached list was invalidated by the enrollment.
    let listed = request_ok(&mut stdin, &mut reader, "7", "classes.list", json!({}));
    assert_eq!(listed["classes"][0]["studentCount"], json!(1));

    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.byClass",
        json!({ "classId": class_id }),
    );
    let roster = roster["students"].as_array().expect("students");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0]["fullName"], json!("Lena Ortiz"));
    assert_eq!(roster[0]["status"], json!("active"));

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.stats",
        json!({ "classId": class_id }),
    );
    assert_eq!(before["stats"]["total"], json!(0));

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "attendance.mark",
        json!({
            "studentId": student_id,
            "classId": class_id,
            "date": "2026-03-02",
            "status": "present"
        }),
    );
    assert_eq!(first["records"][0]["markedBy"], json!(teacher_id));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "attendance.mark",
        json!({
            "records": [{
                "studentId": student_id,
                "classId": class_id,
                "date": "2026-03-02",
                "status": "absent",
                "notes": "called in sick"
            }]
        }),
    );
    assert_eq!(second["records"][0]["id"], first["records"][0]["id"]);

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.byClass",
        json!({ "classId": class_id, "date": "2026-03-02" }),
    );
    let records = day["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], json!("absent"));
    assert_eq!(records[0]["studentName"], json!("Lena Ortiz"));
    assert_eq!(records[0]["notes"], json!("called in sick"));

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "attendance.stats",
        json!({ "classId": class_id, "startDate": "2026-03-01", "endDate": "2026-03-31" }),
    );
    assert_eq!(
        after["stats"],
        json!({ "present": 0, "absent": 1, "late": 0, "total": 1 })
    );

    let unenrolled = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "students.unenroll",
        json!({ "studentId": student_id, "classId": class_id }),
    );
    assert_eq!(unenrolled["enrollment"]["isActive"], json!(false));
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "students.byClass",
        json!({ "classId": class_id }),
    );
    assert_eq!(roster["students"], json!([]));

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "classes.update",
        json!({ "classId": class_id, "patch": { "name": "Algebra II" } }),
    );
    assert_eq!(renamed["class"]["name"], json!("Algebra II"));
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "classes.get",
        json!({ "classId": class_id }),
    );
    assert_eq!(fetched["class"]["name"], json!("Algebra II"));

    request_ok(&mut stdin, &mut reader, "18", "classes.delete", json!({ "classId": class_id }));
    let listed = request_ok(&mut stdin, &mut reader, "19", "classes.list", json!({}));
    assert_eq!(listed["classes"], json!([]));

    drop(stdin);
    let _ = child.wait();
}
