use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// `linkback` with HOME and the config path pointed into `temp_dir`
fn linkback(temp_dir: &TempDir) -> Result<Command, Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("linkback")?;
    cmd.env("HOME", temp_dir.path())
        .env("LINKBACK_CONFIG_PATH", temp_dir.path().join("config.toml"))
        .env_remove("LINKBACK_LOG");
    Ok(cmd)
}

fn source_tree(temp_dir: &TempDir) -> Result<(), Box<dyn std::error::Error>> {
    let source = temp_dir.path().join("docs");
    fs::create_dir_all(source.join("notes"))?;
    fs::write(source.join("readme.txt"), "hello")?;
    fs::write(source.join("notes/todo.txt"), "buy milk")?;
    Ok(())
}

#[test]
fn test_no_arguments_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    linkback(&temp_dir)?.assert().code(64);
    Ok(())
}

#[test]
fn test_destination_only_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    linkback(&temp_dir)?
        .arg(temp_dir.path().join("dest"))
        .assert()
        .code(64)
        .stderr(predicate::str::contains("No sources given"));
    Ok(())
}

#[test]
fn test_bad_limit_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    linkback(&temp_dir)?
        .args(["--ml", "lots", "a", "b"])
        .assert()
        .code(64);
    linkback(&temp_dir)?
        .args(["--ml", "0", "a", "b"])
        .assert()
        .code(64);
    Ok(())
}

#[test]
fn test_help_and_version_succeed() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    linkback(&temp_dir)?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--max-hard-links-per-file"));
    linkback(&temp_dir)?
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn test_missing_source_exits_with_failure() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let destination = temp_dir.path().join("dest");
    linkback(&temp_dir)?
        .arg(temp_dir.path().join("missing"))
        .arg(&destination)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Path error"));
    assert!(!destination.exists());
    Ok(())
}

#[test]
fn test_successful_backup_prints_summary() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    source_tree(&temp_dir)?;
    let destination = temp_dir.path().join("dest");

    linkback(&temp_dir)?
        .arg(temp_dir.path().join("docs"))
        .arg(&destination)
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup written to"))
        .stdout(predicate::str::contains("2 total, 2 copied, 0 linked"));

    linkback(&temp_dir)?
        .args(["--ma", "unlimited"])
        .arg(temp_dir.path().join("docs"))
        .arg(&destination)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 total, 0 copied, 2 linked"));
    Ok(())
}

#[test]
fn test_quiet_run_prints_nothing_on_stdout() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    source_tree(&temp_dir)?;

    linkback(&temp_dir)?
        .arg("-q")
        .arg(temp_dir.path().join("docs"))
        .arg(temp_dir.path().join("dest"))
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
    Ok(())
}

#[test]
fn test_sources_file_with_rules() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    source_tree(&temp_dir)?;
    let sources_file = temp_dir.path().join("sources.txt");
    fs::write(
        &sources_file,
        format!(
            "# documents\n{}\n-notes/.*\n",
            temp_dir.path().join("docs").display()
        ),
    )?;

    linkback(&temp_dir)?
        .arg("--sf")
        .arg(&sources_file)
        .arg(temp_dir.path().join("dest"))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 total, 1 copied"));
    Ok(())
}

#[test]
fn test_rule_before_source_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let sources_file = temp_dir.path().join("sources.txt");
    fs::write(&sources_file, "-tmp/.*\n/home\n")?;

    linkback(&temp_dir)?
        .arg("--sources-file")
        .arg(&sources_file)
        .arg(temp_dir.path().join("dest"))
        .assert()
        .code(64)
        .stderr(predicate::str::contains("sources.txt:1"));
    Ok(())
}

#[test]
fn test_malformed_config_is_usage_error() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    source_tree(&temp_dir)?;
    fs::write(temp_dir.path().join("config.toml"), "[linking\nbroken")?;

    linkback(&temp_dir)?
        .arg(temp_dir.path().join("docs"))
        .arg(temp_dir.path().join("dest"))
        .assert()
        .code(64);
    Ok(())
}

#[test]
fn test_config_limit_is_applied() -> Result<(), Box<dyn std::error::Error>> {
    let temp_dir = TempDir::new()?;
    let source = temp_dir.path().join("same");
    fs::create_dir_all(&source)?;
    for name in ["a", "b", "c", "d"] {
        fs::write(source.join(name), "identical")?;
        filetime::set_file_mtime(
            source.join(name),
            filetime::FileTime::from_unix_time(1_690_000_000, 0),
        )?;
    }
    fs::write(
        temp_dir.path().join("config.toml"),
        "[linking]\nmax_hard_links_per_file = 2\n",
    )?;

    linkback(&temp_dir)?
        .arg(&source)
        .arg(temp_dir.path().join("dest"))
        .assert()
        .success()
        .stdout(predicate::str::contains("4 total, 2 copied, 2 linked"));
    Ok(())
}
