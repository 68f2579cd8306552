//! Tests for root folder resolution

use serial_test::serial;
use yiba_common::config::{database_path, documents_path, ensure_root_folder, resolve_root_folder};

const ENV_VAR: &str = "YIBA_TEST_ROOT_FOLDER";

#[test]
#[serial]
fn test_cli_arg_wins() {
    std::env::set_var(ENV_VAR, "/from/env");
    let root = resolve_root_folder(Some("/from/cli"), ENV_VAR);
    assert_eq!(root, std::path::PathBuf::from("/from/cli"));
    std::env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_used_when_no_cli_arg() {
    std::env::set_var(ENV_VAR, "/from/env");
    let root = resolve_root_folder(None, ENV_VAR);
    assert_eq!(root, std::path::PathBuf::from("/from/env"));
    std::env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_empty_env_var_ignored() {
    std::env::set_var(ENV_VAR, "");
    let root = resolve_root_folder(None, ENV_VAR);
    assert_ne!(root, std::path::PathBuf::from(""));
    std::env::remove_var(ENV_VAR);
}

#[test]
#[serial]
fn test_fallback_produces_some_path() {
    std::env::remove_var(ENV_VAR);
    let root = resolve_root_folder(None, ENV_VAR);
    assert!(!root.as_os_str().is_empty());
}

#[test]
fn test_standard_paths_under_root() {
    let root = std::path::Path::new("/data/yiba");
    assert_eq!(database_path(root), root.join("yiba.db"));
    assert_eq!(documents_path(root), root.join("documents"));
}

#[test]
fn test_ensure_root_folder_creates_subdirs() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("nested").join("root");
    ensure_root_folder(&root).unwrap();
    assert!(root.join("documents").is_dir());
}
