//! Shared fixtures for CLI integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

pub const SCHEMA: &str = r#"
project: shop
networks:
  backend: {}
volumes:
  pgdata: {}
services:
  - name: db
    image: postgres:16
    volumes: ["pgdata:/var/lib/postgresql/data"]
    networks: [backend]
    healthcheck:
      test: ["CMD-SHELL", "pg_isready -U $${POSTGRES_USER}"]
    environment:
      POSTGRES_USER: { default: shop }
      POSTGRES_PASSWORD: { secret: true, class: core-credential, shares: DB_PASSWORD }
  - name: api
    image: shop/api:latest
    depends_on: [db]
    networks: [backend]
    ports: ["8080:8080"]
    environment:
      DB_PASSWORD: { secret: true, class: core-credential }
      SESSION_KEY: { secret: true, class: signing-key }
      MAPS_API_KEY: { secret: true, class: external-api-key, required: false }
      PUBLIC_URL: { default: "https://{{ service }}.{{ environment }}.example.com" }
environments:
  development: {}
  production:
    overrides:
      api:
        image: shop/api:1.4.2
"#;

/// A temp directory holding a schema and the state directory
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self::with_schema(SCHEMA)
    }

    pub fn with_schema(schema: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("keel.yaml"), schema).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn state(&self) -> PathBuf {
        self.dir.path().join(".keel")
    }

    /// `keel` with this project's schema and state, and a runtime that
    /// accepts every command without doing anything
    pub fn keel(&self) -> Command {
        let mut cmd = Command::cargo_bin("keel").unwrap();
        cmd.current_dir(self.root())
            .env("KEEL_SCHEMA", self.root().join("keel.yaml"))
            .env("KEEL_STATE_DIR", self.state())
            .env("KEEL_RUNTIME", "true")
            .env_remove("RUST_LOG");
        cmd
    }

    pub fn manifest(&self, env: &str) -> PathBuf {
        self.state()
            .join("manifests")
            .join(format!("docker-compose.{}.yml", env))
    }

    pub fn store(&self, env: &str) -> PathBuf {
        self.state().join("secrets").join(format!("{}.json", env))
    }

    pub fn rendered(&self, env: &str) -> PathBuf {
        self.state().join("rendered").join(env)
    }

    /// Current value of a secret in the store file
    pub fn stored_value(&self, env: &str, name: &str) -> String {
        let raw = std::fs::read_to_string(self.store(env)).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        json["entries"][name]["value"].as_str().unwrap().to_string()
    }
}
