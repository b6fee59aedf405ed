//! End-to-end tests for the `keel` binary

mod common;

use predicates::prelude::*;

use common::Project;

#[test]
fn test_validate_schema_accepts_valid_schema() {
    let project = Project::new();
    project
        .keel()
        .arg("validate-schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("2 service(s)"));
}

#[test]
fn test_validate_schema_lists_every_violation() {
    let project = Project::with_schema(
        r#"
project: broken
services:
  - name: a
    image: x
    depends_on: [b]
  - name: b
    image: y
    depends_on: [a]
  - name: a
    image: z
    depends_on: [a]
environments:
  production:
    profiles: [ghost]
"#,
    );
    project
        .keel()
        .arg("validate-schema")
        .assert()
        .failure()
        .stderr(predicate::str::contains("defined more than once"))
        .stderr(predicate::str::contains("dependency cycle: a -> b -> a"))
        .stderr(predicate::str::contains("profile 'ghost'"));
}

#[test]
fn test_production_flow_succeeds() {
    let project = Project::new();

    project
        .keel()
        .args(["generate-compose", "--environment", "production"])
        .assert()
        .success();
    let manifest = std::fs::read_to_string(project.manifest("production")).unwrap();
    assert!(manifest.contains("${DB_PASSWORD:?DB_PASSWORD is required}"));
    assert!(manifest.contains("shop/api:1.4.2"));

    project
        .keel()
        .args(["setup-secrets", "--environment", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DB_PASSWORD: created"));

    project
        .keel()
        .args(["validate-credentials", "--environment", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 error(s)"));
}

#[test]
fn test_validate_before_setup_names_db_password() {
    let project = Project::new();
    project
        .keel()
        .args(["generate-compose", "--environment", "production"])
        .assert()
        .success();

    project
        .keel()
        .args(["validate-credentials", "--environment", "production"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[unresolved]"))
        .stdout(predicate::str::contains("DB_PASSWORD"));
}

#[test]
fn test_strict_blocks_on_warnings() {
    let project = Project::new();
    for cmd in ["generate-compose", "setup-secrets"] {
        project
            .keel()
            .args([cmd, "--environment", "production"])
            .assert()
            .success();
    }
    // the optional maps key is unset, which is only a warning
    project
        .keel()
        .args(["validate-credentials", "--environment", "production", "--strict"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("optional-unset"));
}

#[test]
fn test_setup_is_idempotent_and_never_prints_values() {
    let project = Project::new();
    let first = project
        .keel()
        .args(["setup-secrets", "--environment", "production"])
        .assert()
        .success();
    let value = project.stored_value("production", "DB_PASSWORD");

    let second = project
        .keel()
        .args(["setup-secrets", "--environment", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("DB_PASSWORD: unchanged"));
    assert_eq!(project.stored_value("production", "DB_PASSWORD"), value);

    for output in [first.get_output(), second.get_output()] {
        assert!(!String::from_utf8_lossy(&output.stdout).contains(&value));
        assert!(!String::from_utf8_lossy(&output.stderr).contains(&value));
    }
}

#[test]
fn test_shared_secret_rendered_identically() {
    let project = Project::new();
    project
        .keel()
        .args(["setup-secrets", "--environment", "development"])
        .assert()
        .success();
    let value = project.stored_value("development", "DB_PASSWORD");
    let api = std::fs::read_to_string(project.rendered("development").join("api.env")).unwrap();
    let db = std::fs::read_to_string(project.rendered("development").join("db.env")).unwrap();
    assert!(api.contains(&format!("DB_PASSWORD={}", value)));
    assert!(db.contains(&format!("POSTGRES_PASSWORD={}", value)));
}

#[test]
fn test_environments_do_not_share_secrets() {
    let project = Project::new();
    for env in ["development", "production"] {
        project
            .keel()
            .args(["setup-secrets", "--environment", env])
            .assert()
            .success();
    }
    assert_ne!(
        project.stored_value("development", "DB_PASSWORD"),
        project.stored_value("production", "DB_PASSWORD")
    );
}

#[test]
fn test_generate_all_environments() {
    let project = Project::new();
    project
        .keel()
        .arg("generate-compose")
        .assert()
        .success();
    assert!(project.manifest("development").exists());
    assert!(project.manifest("production").exists());
    assert!(!project.manifest("staging").exists());
}

#[test]
fn test_missing_overlay_is_an_error() {
    let project = Project::new();
    project
        .keel()
        .args(["generate-compose", "--environment", "staging"])
        .assert()
        .failure();
    assert!(!project.manifest("staging").exists());
}

#[test]
fn test_set_secret_reads_stdin() {
    let project = Project::new();
    project
        .keel()
        .args([
            "set-secret",
            "--environment",
            "production",
            "--name",
            "MAPS_API_KEY",
        ])
        .write_stdin("mk_Qw3Er5Ty7Ui9Op1As2Df4Gh6Jk8Lz\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("stored version 1"));
    assert_eq!(
        project.stored_value("production", "MAPS_API_KEY"),
        "mk_Qw3Er5Ty7Ui9Op1As2Df4Gh6Jk8Lz"
    );
}

#[test]
fn test_rotate_creates_new_version() {
    let project = Project::new();
    project
        .keel()
        .args(["setup-secrets", "--environment", "production"])
        .assert()
        .success();
    let before = project.stored_value("production", "SESSION_KEY");
    project
        .keel()
        .args([
            "rotate-secrets",
            "--environment",
            "production",
            "--variable",
            "SESSION_KEY",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("SESSION_KEY: rotated to version 2"));
    assert_ne!(project.stored_value("production", "SESSION_KEY"), before);
}

#[test]
fn test_wipe_requires_confirmation() {
    let project = Project::new();
    project
        .keel()
        .args(["setup-secrets", "--environment", "production"])
        .assert()
        .success();

    project
        .keel()
        .args(["wipe", "--environment", "production", "--confirm", "yes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("wipe-production"));
    assert!(project.store("production").exists());
}

#[test]
fn test_wipe_removes_environment_state_only() {
    let project = Project::new();
    for env in ["development", "production"] {
        for cmd in ["generate-compose", "setup-secrets"] {
            project
                .keel()
                .args([cmd, "--environment", env])
                .assert()
                .success();
        }
    }

    for _ in 0..2 {
        project
            .keel()
            .args([
                "wipe",
                "--environment",
                "production",
                "--confirm",
                "wipe-production",
            ])
            .assert()
            .success();
    }
    assert!(!project.manifest("production").exists());
    assert!(!project.store("production").exists());
    assert!(!project.rendered("production").exists());
    assert!(project.manifest("development").exists());
    assert!(project.store("development").exists());
}

#[test]
fn test_status_reports_state() {
    let project = Project::new();
    project
        .keel()
        .args(["status", "--environment", "production"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has not been generated"))
        .stdout(predicate::str::contains("DB_PASSWORD: missing"));
}
