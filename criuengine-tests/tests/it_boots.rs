use std::process;

use criuengine_common::env;
use criuengine_tests::util::{clean_env, criuengine_bin, FakeCriu};

/// The helper with a clean environment, ready for per-test variables.
fn helper() -> process::Command {
    let mut cmd = process::Command::new(criuengine_bin());
    clean_env(&mut cmd).env("RUST_LOG", "warn");
    cmd
}

fn run(cmd: &mut process::Command) -> (Option<i32>, String) {
    let output = cmd.output().unwrap();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    print!("{stderr}");
    (output.status.code(), stderr)
}

#[test]
fn it_boots() {
    let (code, stderr) = run(&mut helper());

    // neither an action nor a criu callback
    assert_eq!(code, Some(1));
    assert!(stderr.contains("unknown context"));
}

#[test]
fn it_has_no_help_flag() {
    for flag in ["-h", "--help", "--version"] {
        let (code, stderr) = run(helper().arg(flag));

        assert_eq!(code, Some(1));
        assert!(stderr.contains("unknown context"), "{flag}: {stderr}");
    }
}

#[test]
fn it_rejects_unknown_actions() {
    let (code, stderr) = run(helper().arg("dump"));

    assert_eq!(code, Some(1));
    assert!(stderr.contains("unknown command-line action: dump"));
}

#[test]
fn it_fails_without_running_a_missing_criu() {
    let criu = FakeCriu::exiting_with(0);
    let missing = criu.path.with_file_name("missing-criu");
    let img = tempfile::tempdir().unwrap();

    for action in ["checkpoint", "restore"] {
        let (code, stderr) = run(helper()
            .args([action, img.path().to_str().unwrap()])
            .env(env::CRIU_PATH, &missing));

        assert_eq!(code, Some(1));
        assert!(stderr.contains("does not exist"));
    }
    assert!(!img.path().join("pid").exists());
}

#[test]
fn it_requires_an_image_dir() {
    let criu = FakeCriu::exiting_with(0);
    let (code, stderr) = run(helper()
        .arg("checkpoint")
        .env(env::CRIU_PATH, &criu.path));

    assert_eq!(code, Some(1));
    assert!(stderr.contains("requires an image directory"));
    assert_eq!(criu.recorded_args(), None);
}
