#![allow(clippy::single_match_else, clippy::uninlined_format_args)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::{params, Connection};
use serde_json::Value;
use ulid::Ulid;

fn vetclinic_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_vetclinic") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/vetclinic");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "vetclinic-cli", "--bin", "vetclinic"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build vetclinic binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn unique_db_path(label: &str) -> PathBuf {
    std::env::temp_dir().join(format!("vetclinic-cli-{label}-{}.sqlite3", Ulid::new()))
}

fn vetclinic_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(vetclinic_binary_path());
    command
        .env_remove("VETCLINIC_DATABASE_URL")
        .arg("--database-url")
        .arg(format!("sqlite://{}", db_path.display()));
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run vetclinic command {:?}: {err}", args),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn successful_json(db_path: &Path, args: &[&str]) -> Value {
    let output = vetclinic_output(db_path, args);
    assert!(
        output.status.success(),
        "command {:?} failed: stderr={}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    stdout_json(&output)
}

fn open_db(db_path: &Path) -> Connection {
    match Connection::open(db_path) {
        Ok(conn) => conn,
        Err(err) => panic!("failed to open {}: {err}", db_path.display()),
    }
}

fn cleanup(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
    }
}

#[test]
fn help_contract_lists_expected_subcommands() {
    let output = match Command::new(vetclinic_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["db", "seed", "--database-url"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain {required}; output={stdout}"
        );
    }

    let output = match Command::new(vetclinic_binary_path()).args(["db", "--help"]).output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run db help command: {err}"),
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["status", "history", "upgrade", "downgrade", "backups"] {
        assert!(stdout.contains(required), "db help is missing {required}; output={stdout}");
    }
}

#[test]
fn fresh_database_reports_baseline_status() {
    let db_path = unique_db_path("status");
    let status = successful_json(&db_path, &["db", "status"]);

    assert_eq!(status.get("current_version").and_then(Value::as_i64), Some(0));
    assert_eq!(status.get("head_version").and_then(Value::as_i64), Some(5));
    assert_eq!(status.get("head_revision").and_then(Value::as_str), Some("b1c2d3e4f5a6"));
    assert_eq!(status.get("at_head").and_then(Value::as_bool), Some(false));
    assert_eq!(
        status.get("pending").and_then(Value::as_array).map(Vec::len),
        Some(5)
    );
    cleanup(&db_path);
}

#[test]
fn upgrade_then_downgrade_to_base_restores_every_step() {
    let db_path = unique_db_path("roundtrip");

    let upgrade = successful_json(&db_path, &["db", "upgrade"]);
    assert_eq!(upgrade.get("to_version").and_then(Value::as_i64), Some(5));
    assert_eq!(upgrade.get("applied").and_then(Value::as_array).map(Vec::len), Some(5));

    let downgrade = successful_json(&db_path, &["db", "downgrade", "--to", "base"]);
    assert_eq!(downgrade.get("to_version").and_then(Value::as_i64), Some(0));
    let reverted = match downgrade.get("reverted").and_then(Value::as_array) {
        Some(value) => value.clone(),
        None => panic!("downgrade report has no reverted steps: {downgrade}"),
    };
    assert_eq!(reverted.len(), 5);
    for step in &reverted {
        assert_eq!(
            step.get("outcome").and_then(|outcome| outcome.get("status")).and_then(Value::as_str),
            Some("restored"),
            "step did not restore cleanly: {step}"
        );
    }

    let history = successful_json(&db_path, &["db", "history"]);
    assert_eq!(history.as_array().map(Vec::len), Some(10));
    cleanup(&db_path);
}

#[test]
fn unknown_revision_fails_with_message() {
    let db_path = unique_db_path("unknown-revision");
    let output = vetclinic_output(&db_path, &["db", "upgrade", "--to", "zzzz"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("unknown revision"), "stderr={stderr}");
    cleanup(&db_path);
}

#[test]
fn seed_is_idempotent_and_preflight_aborts_without_yes() {
    let db_path = unique_db_path("seed");

    let first = successful_json(
        &db_path,
        &["seed", "--profile", "sample", "--anchor-date", "2025-04-10"],
    );
    assert_eq!(first.get("aborted").and_then(Value::as_bool), Some(false));

    let second = successful_json(
        &db_path,
        &["seed", "--profile", "sample", "--anchor-date", "2025-04-10"],
    );
    assert_eq!(second.get("aborted").and_then(Value::as_bool), Some(true));

    let forced = successful_json(
        &db_path,
        &["seed", "--profile", "sample", "--anchor-date", "2025-04-11", "--yes"],
    );
    let created: Vec<i64> = forced
        .get("tables")
        .and_then(Value::as_array)
        .map(|tables| {
            tables
                .iter()
                .filter_map(|table| table.get("created").and_then(Value::as_i64))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(created, vec![0, 0, 0, 0]);

    let conn = open_db(&db_path);
    let appointments: i64 = match conn.query_row("SELECT COUNT(*) FROM appointments", [], |row| {
        row.get(0)
    }) {
        Ok(value) => value,
        Err(err) => panic!("failed to count appointments: {err}"),
    };
    assert_eq!(appointments, 30);
    drop(conn);
    cleanup(&db_path);
}

#[test]
fn medical_records_step_backfills_one_record_per_completed_visit() {
    let db_path = unique_db_path("medical-records");
    successful_json(&db_path, &["db", "status"]);

    let conn = open_db(&db_path);
    let inserted = conn.execute_batch(
        "INSERT INTO veterinarians(license_number, first_name, last_name, email)
           VALUES ('LIC-001', 'Ana', 'Perez', 'ana@clinic.test');
         INSERT INTO owners(first_name, last_name, email)
           VALUES ('Luis', 'Gomez', 'luis@clinic.test');
         INSERT INTO pets(name, species, weight, owner_id) VALUES ('Rex', 'dog', 12.5, 1);
         INSERT INTO appointments(pet_id, veterinarian_id, appointment_date, reason, status, notes)
           VALUES (1, 1, '2025-01-05T10:00:00Z', 'Limping', 'completed', 'Rest two weeks');
         INSERT INTO appointments(pet_id, veterinarian_id, appointment_date, reason, status)
           VALUES (1, 1, '2025-01-06T10:00:00Z', 'Follow-up', 'scheduled');",
    );
    if let Err(err) = inserted {
        panic!("failed to insert fixture rows: {err}");
    }
    drop(conn);

    let upgrade = successful_json(&db_path, &["db", "upgrade", "--to", "d8f3"]);
    assert_eq!(upgrade.get("to_version").and_then(Value::as_i64), Some(1));

    let conn = open_db(&db_path);
    let rows: Vec<(i64, String, String)> = {
        let mut stmt = match conn
            .prepare("SELECT appointment_id, diagnosis, treatment FROM medical_records")
        {
            Ok(stmt) => stmt,
            Err(err) => panic!("failed to query medical records: {err}"),
        };
        let mapped = match stmt.query_map(params![], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        {
            Ok(rows) => rows,
            Err(err) => panic!("failed to map medical records: {err}"),
        };
        mapped.filter_map(Result::ok).collect()
    };
    assert_eq!(
        rows,
        vec![(1, "Limping".to_string(), "Rest two weeks".to_string())]
    );
    drop(conn);
    cleanup(&db_path);
}
