//! CLI argument parsing tests for the nfqueue command.
//!
//! Only invocations that clap rejects or answers itself (help, version)
//! are run, so none of these bind a queue or need root.

use assert_cmd::Command;
use predicates::prelude::*;

fn nfqueue_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_nfqueue"))
}

mod global_flags {
    use super::*;

    #[test]
    fn test_help() {
        nfqueue_cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Netfilter queue and log utility"))
            .stdout(predicate::str::contains("--json"))
            .stdout(predicate::str::contains("--verbose"));
    }

    #[test]
    fn test_version() {
        nfqueue_cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("nfqueue"));
    }

    #[test]
    fn test_requires_subcommand() {
        nfqueue_cmd().assert().failure();
    }

    #[test]
    fn test_invalid_subcommand() {
        nfqueue_cmd()
            .arg("invalid_command")
            .assert()
            .failure()
            .stderr(predicate::str::contains("error"));
    }

    #[test]
    fn test_json_and_verbose_before_subcommand() {
        nfqueue_cmd()
            .args(["-j", "-vvv", "queue", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Bind a queue"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        nfqueue_cmd()
            .args(["log", "--json", "-v", "--help"])
            .assert()
            .success();
    }

    #[test]
    fn test_unknown_flag() {
        nfqueue_cmd()
            .args(["-x", "queue", "-n", "1"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unexpected argument"));
    }
}

mod queue_command {
    use super::*;

    #[test]
    fn test_queue_help() {
        nfqueue_cmd()
            .args(["queue", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--num"))
            .stdout(predicate::str::contains("--max-len"))
            .stdout(predicate::str::contains("--copy-range"))
            .stdout(predicate::str::contains("--verdict"))
            .stdout(predicate::str::contains("--mark"))
            .stdout(predicate::str::contains("--fail-open"))
            .stdout(predicate::str::contains("accept"))
            .stdout(predicate::str::contains("drop"));
    }

    #[test]
    fn test_queue_requires_num() {
        nfqueue_cmd()
            .args(["queue", "--verdict", "drop"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"));
    }

    #[test]
    fn test_queue_num_out_of_range() {
        nfqueue_cmd()
            .args(["queue", "-n", "65536"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn test_invalid_verdict() {
        nfqueue_cmd()
            .args(["queue", "-n", "1", "--verdict", "reject"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"))
            .stderr(predicate::str::contains("reject"));
    }

    #[test]
    fn test_invalid_copy_range() {
        nfqueue_cmd()
            .args(["queue", "-n", "1", "--copy-range", "lots"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }

    #[test]
    fn test_negative_mark() {
        nfqueue_cmd()
            .args(["queue", "-n", "1", "--mark", "-1"])
            .assert()
            .failure();
    }
}

mod log_command {
    use super::*;

    #[test]
    fn test_log_help() {
        nfqueue_cmd()
            .args(["log", "--help"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--group"))
            .stdout(predicate::str::contains("--copy-range"))
            .stdout(predicate::str::contains("--prefix-only"));
    }

    #[test]
    fn test_log_requires_group() {
        nfqueue_cmd()
            .arg("log")
            .assert()
            .failure()
            .stderr(predicate::str::contains("required"))
            .stderr(predicate::str::contains("--group"));
    }

    #[test]
    fn test_log_group_must_be_numeric() {
        nfqueue_cmd()
            .args(["log", "-g", "all"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("invalid value"));
    }
}
