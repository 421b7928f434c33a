use assert_cmd::Command;
use std::path::Path;
use tempfile::TempDir;

#[allow(deprecated)]
fn pagelda_cmd() -> Command {
    let mut cmd = Command::cargo_bin("pagelda").unwrap();
    cmd.env_remove("PAGELDA_CONFIG").env("RUST_LOG", "warn");
    cmd
}

fn write_corpus(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("corpus.json");
    std::fs::write(
        &path,
        r#"{"1": ["cat", "cat", "dog"], "2": ["dog", "fish"], "3": ["cat", "fish", "fish"]}"#,
    )
    .unwrap();
    path
}

#[test]
fn stopwords_removes_most_even_token() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(dir.path());
    let out = pagelda_cmd()
        .args(["stopwords", "--count", "1"])
        .arg(&corpus)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    let rows: Vec<&str> = stdout.lines().skip(1).collect();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].starts_with("cat\t1\t"), "{stdout}");
    // cat appears in two of the three documents
    assert!(rows[0].ends_with("\t2"), "{stdout}");
}

#[test]
fn stopwords_all_lists_every_token() {
    let dir = TempDir::new().unwrap();
    let corpus = write_corpus(dir.path());
    let out = pagelda_cmd()
        .args(["stopwords", "--all"])
        .arg(&corpus)
        .output()
        .unwrap();
    let stdout = String::from_utf8(out.stdout).unwrap();
    let tokens: Vec<&str> = stdout
        .lines()
        .skip(1)
        .map(|l| l.split('\t').next().unwrap())
        .collect();
    assert_eq!(tokens, vec!["cat", "fish", "dog"]);
}

#[test]
fn stopwords_normalizes_raw_terms() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("raw.json");
    std::fs::write(
        &path,
        r#"{"a": ["The Wolves", "of the"], "b": ["wolves", "full moon"]}"#,
    )
    .unwrap();
    let out = pagelda_cmd()
        .args(["stopwords", "--all", "--normalize"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert!(stdout.contains("wolv\t"), "{stdout}");
    assert!(stdout.contains("full_moon\t"), "{stdout}");
    assert!(!stdout.contains("the\t"));
}

#[test]
fn stopwords_missing_file_fails() {
    pagelda_cmd()
        .args(["stopwords", "/nonexistent/corpus.json"])
        .assert()
        .code(1);
}

#[test]
fn terminate_requires_instance_ids() {
    pagelda_cmd().arg("terminate").assert().failure();
}

#[test]
fn invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    std::fs::write(&config, "[fleet]\nbid_price = \"free\"\n").unwrap();
    let out = pagelda_cmd()
        .arg("--config")
        .arg(&config)
        .args(["build", "--partition", "1"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("bid price"));
}

/// Config with a file term source, a filesystem store and a shell trainer
/// that copies a canned three-term model and counts its invocations.
#[cfg(unix)]
fn build_fixture(dir: &Path, trainer_script: &str) -> std::path::PathBuf {
    let terms = dir.join("terms");
    std::fs::create_dir_all(&terms).unwrap();
    std::fs::write(
        terms.join("831.json"),
        r#"{"1": ["moon", "tide", "moon"], "2": ["wolf", "howl"], "3": ["moon", "wolf"]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("model.json"),
        r#"{"num_topics": 2, "id2word": ["a", "b", "c"], "topics": [[0.4, 0.3, 0.3], [0.3, 0.3, 0.4]]}"#,
    )
    .unwrap();

    let config = dir.join("config.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[build]
num_topics = 2
stopword_count = 1
local_prefix = "{local}/"

[store]
root = "{store}"

[trainer]
program = "sh"
args = ["-c", '{trainer_script}', "trainer"]

[[services]]
name = "fixtures"
kind = "file"
path = "{terms}"
"#,
            local = dir.join("local").display(),
            store = dir.join("store").display(),
            terms = terms.display(),
        ),
    )
    .unwrap();
    config
}

#[cfg(unix)]
fn build_cmd(config: &Path) -> Command {
    let mut cmd = pagelda_cmd();
    cmd.arg("--config").arg(config).args([
        "build",
        "--partition",
        "831",
        "--auto-launch",
        "false",
        "--code-revision",
        "abc1234",
        "--model-prefix",
        "2024-01-01-00-00",
    ]);
    cmd
}

#[cfg(unix)]
#[test]
fn build_persists_and_then_reuses_local_model() {
    let dir = TempDir::new().unwrap();
    let calls = dir.path().join("calls");
    let script = format!(
        "echo run >> {calls}; cp {model} \"$4\"",
        calls = calls.display(),
        model = dir.path().join("model.json").display()
    );
    let config = build_fixture(dir.path(), &script);
    let name = "abc1234-2024-01-01-00-00-page-lda-wid-831-2topics.model";

    let out = build_cmd(&config).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8(out.stdout).unwrap().trim(), name);

    let local = dir.path().join("local");
    assert!(local.join(name).exists());
    assert!(
        local
            .join("abc1234-2024-01-01-00-00-page-lda-wid-831-2topics-sparse-topics.csv")
            .exists()
    );
    let remote = dir.path().join("store/nlp-data/models/page");
    assert!(remote.join(name).exists());
    assert!(
        remote
            .join("abc1234-2024-01-01-00-00-page-lda-wid-831-2topics-topic-features.csv")
            .exists()
    );

    let out = build_cmd(&config).output().unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8(out.stdout).unwrap().trim(), name);
    let runs = std::fs::read_to_string(&calls).unwrap();
    assert_eq!(runs.lines().count(), 1);
}

#[cfg(unix)]
#[test]
fn failed_training_exits_with_build_failure() {
    let dir = TempDir::new().unwrap();
    let config = build_fixture(dir.path(), "exit 3");
    let out = build_cmd(&config).output().unwrap();
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed"));
    assert!(!dir.path().join("store/nlp-data").exists());
}
