#![allow(deprecated)]

use assert_cmd::Command;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

pub const NETWORK_KDL: &str = r#"
stack "network"

variables {
    cidr "10.0.0.0/16"
}

resource "subnet1" type="aws_subnet" {
    vpc_id (ref)"vpc.id"
    cidr_block "10.0.3.0/24"
}

resource "igw" type="aws_internet_gateway" {
    vpc_id (ref)"vpc.id"
}

resource "vpc" type="aws_vpc" {
    cidr_block "{{ cidr }}"
}

output "vpc_id" (ref)"vpc.id"
"#;

pub const CYCLIC_KDL: &str = r#"
stack "cyclic"

resource "a" type="aws_vpc" {
    peer (ref)"b.id"
}

resource "b" type="aws_vpc" {
    peer (ref)"a.id"
}
"#;

pub struct TestProject {
    pub root: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        Self { root }
    }

    pub fn with_stack(content: &str) -> Self {
        let project = Self::new();
        project.write_stack_kdl(content);
        project
    }

    pub fn write_stack_kdl(&self, content: &str) {
        fs::write(self.path().join("stack.kdl"), content).unwrap();
    }

    pub fn path(&self) -> PathBuf {
        self.root.path().to_path_buf()
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path().join("state")
    }

    /// `stack` inside the project with an isolated state directory
    pub fn stack(&self) -> Command {
        let mut cmd = Command::cargo_bin("stack").unwrap();
        cmd.current_dir(self.path())
            .env("NO_COLOR", "1")
            .env_remove("STACK_CONFIG_PATH")
            .env_remove("STACK_LOCAL_FAULTS")
            .env_remove("STACK_LOCAL_LATENCY_MS")
            .arg("--state-dir")
            .arg(self.state_dir());
        cmd
    }

    #[allow(dead_code)]
    pub fn output_json(&self) -> serde_json::Value {
        let output = self.stack().args(["output", "--json"]).output().unwrap();
        assert!(output.status.success());
        serde_json::from_slice(&output.stdout).unwrap()
    }
}
