//! Configuration resolution and validation tests against real files.
//!
//! Covers:
//! - Resolution order (preset > CLI > env path > env dir)
//! - Parse and semantic failures surfaced as typed errors
//! - Snapshot hashing of loaded files

use forkpipe_config::{
    load_config, resolve_config_path, ConfigError, ConfigOptions, ConfigSnapshot, ConfigSource,
    ForkMode, PresetName, SimConfig, ValidationError,
};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tempfile::TempDir;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const ENV_KEYS: &[&str] = &["FORKPIPE_CONFIG", "FORKPIPE_CONFIG_DIR"];

struct EnvGuard {
    keys: Vec<String>,
    saved: Vec<Option<String>>,
}

impl EnvGuard {
    fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::with_capacity(keys.len());
        for key in keys {
            saved.push(env::var(key).ok());
        }
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            saved,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (idx, key) in self.keys.iter().enumerate() {
            match self.saved.get(idx).and_then(|v| v.as_ref()) {
                Some(val) => env::set_var(key, val),
                None => env::remove_var(key),
            }
        }
    }
}

fn with_env_lock<T>(f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .expect("env lock poisoned");
    f()
}

fn write_config(path: &Path, json: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create config parent");
    }
    fs::write(path, json).expect("write config");
}

#[test]
fn test_cli_path_wins_over_env() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let cli = tmp.path().join("cli.json");
        let from_env = tmp.path().join("env.json");
        write_config(&cli, r#"{"max_pipes": 3}"#);
        write_config(&from_env, r#"{"max_pipes": 5}"#);
        env::set_var("FORKPIPE_CONFIG", &from_env);

        let loaded = load_config(&ConfigOptions {
            path: Some(cli.clone()),
            preset: None,
        })
        .expect("load cli config");

        assert_eq!(loaded.source, ConfigSource::CliArgument);
        assert_eq!(loaded.config.max_pipes, 3);
        assert_eq!(loaded.path.as_deref(), Some(cli.as_path()));
    });
}

#[test]
fn test_env_path_then_env_dir() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let dir = tmp.path().join("conf");
        write_config(&dir.join("forkpipe.json"), r#"{"fork_mode": "child"}"#);

        env::remove_var("FORKPIPE_CONFIG");
        env::set_var("FORKPIPE_CONFIG_DIR", &dir);
        let (path, source) = resolve_config_path(None);
        assert_eq!(source, ConfigSource::Environment);
        assert_eq!(path, Some(dir.join("forkpipe.json")));

        let loaded = load_config(&ConfigOptions::default()).expect("load env dir config");
        assert_eq!(loaded.config.fork_mode, ForkMode::Child);

        let direct = tmp.path().join("direct.json");
        write_config(&direct, r#"{"pipe_buffer_size": 64}"#);
        env::set_var("FORKPIPE_CONFIG", &direct);
        let loaded = load_config(&ConfigOptions::default()).expect("load env path config");
        assert_eq!(loaded.config.pipe_buffer_size, 64);
        assert_eq!(loaded.config.fork_mode, ForkMode::Parent);
    });
}

#[test]
fn test_env_path_to_missing_file_is_skipped() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().expect("tempdir");
        env::set_var("FORKPIPE_CONFIG", tmp.path().join("absent.json"));
        env::set_var("FORKPIPE_CONFIG_DIR", tmp.path().join("absent-dir"));

        let (path, source) = resolve_config_path(None);
        assert_ne!(source, ConfigSource::Environment);
        if source == ConfigSource::BuiltinDefault {
            assert!(path.is_none());
        }
    });
}

#[test]
fn test_preset_ignores_files() {
    with_env_lock(|| {
        let _env = EnvGuard::new(ENV_KEYS);
        let tmp = TempDir::new().expect("tempdir");
        let bad = tmp.path().join("bad.json");
        write_config(&bad, "{broken");
        env::set_var("FORKPIPE_CONFIG", &bad);

        let loaded = load_config(&ConfigOptions {
            path: None,
            preset: Some(PresetName::Roomy),
        })
        .expect("preset load");
        assert_eq!(loaded.source, ConfigSource::Preset(PresetName::Roomy));
        assert_eq!(loaded.config.max_pipes, 256);
    });
}

#[test]
fn test_parse_error_reports_path() {
    let tmp = TempDir::new().expect("tempdir");
    let bad = tmp.path().join("bad.json");
    write_config(&bad, "{broken");

    let err = load_config(&ConfigOptions {
        path: Some(bad.clone()),
        preset: None,
    })
    .expect_err("broken json must fail");

    match err {
        ConfigError::ParseError { path, .. } => assert_eq!(path, bad),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_semantic_error_is_surfaced() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("zero.json");
    write_config(&path, r#"{"max_pipes": 0}"#);

    let err = load_config(&ConfigOptions {
        path: Some(path),
        preset: None,
    })
    .expect_err("zero pipes must fail");

    assert!(matches!(
        err,
        ConfigError::ValidationError(ValidationError::InvalidValue { .. })
    ));
}

#[test]
fn test_snapshot_hash_matches_file() {
    let tmp = TempDir::new().expect("tempdir");
    let path = tmp.path().join("forkpipe.json");
    let json = serde_json::to_string_pretty(&SimConfig::default().with_max_pipes(4))
        .expect("serialize config");
    write_config(&path, &json);

    let loaded = load_config(&ConfigOptions {
        path: Some(path.clone()),
        preset: None,
    })
    .expect("load written config");
    let snapshot = ConfigSnapshot::capture(&loaded);

    assert_eq!(snapshot.summary.max_pipes, 4);
    assert_eq!(snapshot.summary.max_descriptors, 8);
    assert_eq!(
        snapshot.hash.as_deref(),
        Some(forkpipe_config::resolve::compute_hash(&json).as_str())
    );
    assert_eq!(snapshot.path, Some(path.display().to_string()));
}
