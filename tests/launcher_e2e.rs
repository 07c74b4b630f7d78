//! End-to-end launcher tests against the built binary

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn auditbox() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_auditbox"));
    cmd.env_remove("RUST_LOG").env_remove("AUDITBOX_PATH");
    cmd
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn run_logged(dir: &TempDir, script: &Path, args: &[&str]) -> (Output, Vec<String>) {
    let log = dir.path().join("audit.log");
    let output = auditbox()
        .env("AUDITBOX_LOG", &log)
        .arg(script)
        .args(args)
        .output()
        .unwrap();
    let lines = fs::read_to_string(&log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect();
    (output, lines)
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_successful_script_exits_zero() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "hello.py", "print hello\nargv\n");
    let (output, lines) = run_logged(&dir, &script, &["one", "two"]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.starts_with("hello\n"));
    assert!(out.contains("hello.py one two"));

    let path = script.display().to_string();
    assert_eq!(lines[0], format!("auditbox.open_for_import: '{}'; allowed = True", path));
    assert_eq!(lines[1], format!("compile: compiling from file {}", path));
    assert!(lines[2].starts_with("exec: <code object <module> at 0x"));
    assert_eq!(lines.last().unwrap(), "sys._clearaudithooks: closing log");
}

#[test]
fn test_system_is_denied_and_logged() {
    let dir = TempDir::new().unwrap();
    let marker = dir.path().join("pwned");
    let script = write_script(
        dir.path(),
        "evil.py",
        &format!("system touch {}\nprint unreachable\n", marker.display()),
    );
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("RuntimeError: system() is disallowed"));
    assert!(!stdout(&output).contains("unreachable"));
    assert!(!marker.exists());

    let n = lines.len();
    assert_eq!(lines[n - 2], format!("system: touch {}", marker.display()));
    assert_eq!(lines[n - 1], "sys._clearaudithooks: closing log");
}

#[test]
fn test_log_defaults_to_program_path() {
    use std::os::unix::process::CommandExt;

    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "ok.py", "print fine\n");
    let program = dir.path().join("launcher");
    let output = auditbox()
        .env_remove("AUDITBOX_LOG")
        .arg0(&program)
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    let log = fs::read_to_string(dir.path().join("launcher.log")).unwrap();
    assert!(log.ends_with("sys._clearaudithooks: closing log\n"));
}

#[test]
fn test_unopenable_log_is_fatal() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "ok.py", "print fine\n");
    let output = auditbox()
        .env("AUDITBOX_LOG", dir.path())
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Fatal error: failed to open log file"));
    assert!(!stdout(&output).contains("fine"));
}

#[test]
fn test_missing_script_prints_usage() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("audit.log");
    let output = auditbox().env("AUDITBOX_LOG", &log).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("file [arg] ..."));
    assert!(!log.exists());
}

#[test]
fn test_non_source_script_is_refused() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "notes.txt", "print hello\n");
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("failed to open source file"));
    assert!(stdout(&output).is_empty());
    assert_eq!(
        lines[0],
        format!("auditbox.open_for_import: '{}'; allowed = False", script.display())
    );
}

#[test]
fn test_script_cannot_add_hooks() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "hook.py", "addhook mine\nprint after\n");
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("SystemError: hook not permitted"));
    assert!(!stdout(&output).contains("after"));
    assert!(lines.iter().any(|l| l == "sys.addaudithook: hook was not added"));
}

#[test]
fn test_sibling_import_is_logged() {
    let dir = TempDir::new().unwrap();
    let helper = write_script(dir.path(), "helper.py", "print from helper\n");
    let script = write_script(dir.path(), "main.py", "import helper\nprint done\n");
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "from helper\ndone\n");
    let expected = format!("import: importing helper from {}", helper.display());
    assert!(lines.contains(&expected), "log: {:?}", lines);
    assert!(lines.contains(&format!(
        "auditbox.open_for_import: '{}'; allowed = True",
        helper.display()
    )));
}

#[test]
fn test_overrunning_code_object_is_rejected() {
    let dir = TempDir::new().unwrap();
    // STORE_FAST 3 with only two locals
    let script = write_script(dir.path(), "code.py", "code evil.py f 2 7d03\nprint after\n");
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ValueError: invalid code object"));
    assert!(lines.iter().any(|l| l == "code.__new__: compiling: 'evil.py'"));
    assert!(lines
        .iter()
        .any(|l| l == "code.__new__: code stores to local 3 but only allocates 2"));
}

#[test]
fn test_attribute_changes_are_logged_after_startup() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "attrs.py", "new obj C\nsetattr obj x 1\ndelattr obj x\n");
    let (output, lines) = run_logged(&dir, &script, &[]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    // the start-up sys.path assignment is never logged
    assert!(!lines.iter().any(|l| l.contains("\"path\"")));
    assert!(lines.iter().any(|l| l.starts_with("object.__setattr__: setattr(")
        && l.contains("\"x\", <class 'int'> instance at 0x")));
    assert!(lines.iter().any(|l| l.starts_with("object.__delattr__: delattr(")));
}

#[test]
fn test_flags_after_script_are_script_arguments() {
    let dir = TempDir::new().unwrap();
    let script = write_script(dir.path(), "s.py", "argv\n");
    let (output, lines) = run_logged(&dir, &script, &["-i", "x"]);

    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), format!("{} -i x\n", script.display()));
    // the trail goes to the log file only
    let err = stderr(&output);
    assert!(!err.contains("auditbox.open_for_import"), "stderr: {}", err);
    assert!(!err.contains("closing log"), "stderr: {}", err);
    assert_eq!(
        lines[0],
        format!("auditbox.open_for_import: '{}'; allowed = True", script.display())
    );
    assert_eq!(lines.last().unwrap(), "sys._clearaudithooks: closing log");

    let (output, _) = run_logged(&dir, &script, &["--help"]);
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout(&output), format!("{} --help\n", script.display()));
}

#[test]
fn test_search_path_environment_is_ignored() {
    let dir = TempDir::new().unwrap();
    let extra_dir = TempDir::new().unwrap();
    write_script(extra_dir.path(), "extra.py", "print from extra\n");
    let script = write_script(dir.path(), "main.py", "import extra\n");

    let log = dir.path().join("audit.log");
    let output = auditbox()
        .env("AUDITBOX_LOG", &log)
        .env("AUDITBOX_PATH", extra_dir.path())
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("ModuleNotFoundError: No module named 'extra'"));
    assert!(!stdout(&output).contains("from extra"));
    let trail = fs::read_to_string(&log).unwrap();
    assert!(!trail.contains(&extra_dir.path().display().to_string()));
}
