// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;

use super::*;

fn base_config(command: &[&str]) -> Config {
    Config {
        gateway: "http://127.0.0.1:4317".to_owned(),
        token: None,
        project: None,
        repo: None,
        agent: None,
        title: None,
        ide: None,
        no_probe: false,
        command: command.iter().map(|s| (*s).to_owned()).collect(),
    }
}

#[test]
fn task_id_shape() {
    let id = mint_task_id("claude");
    let parts: Vec<&str> = id.splitn(3, '-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "claude");
    assert!(parts[1].chars().all(|c| c.is_ascii_digit()), "epoch millis: {id}");
    assert_eq!(parts[2].len(), 6);
    assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn task_ids_are_unique() {
    assert_ne!(mint_task_id("claude"), mint_task_id("claude"));
}

#[test]
fn overrides_win_over_discovery() {
    let mut config = base_config(&["claude", "--continue"]);
    config.project = Some("my-project".to_owned());
    config.repo = Some(std::path::PathBuf::from("/definitely/not/here"));
    config.title = Some("review session".to_owned());
    config.ide = Some("zed".to_owned());

    let identity = discover(&config);
    assert_eq!(identity.project_name, "my-project");
    assert_eq!(identity.repo_path, "/definitely/not/here");
    assert_eq!(identity.title, "review session");
    assert_eq!(identity.preferred_ide.as_deref(), Some("zed"));
    assert_eq!(identity.agent, "claude");
    assert!(identity.task_id.starts_with("claude-"));
}

#[test]
fn defaults_derive_from_repo_and_command() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut config = base_config(&["gemini"]);
    config.repo = Some(dir.path().to_path_buf());
    config.ide = Some("vscode".to_owned()); // pin so parent detection stays out

    let identity = discover(&config);
    let expected_name = dir
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .unwrap_or_default();
    assert_eq!(identity.project_name, expected_name);
    assert_eq!(identity.title, "gemini");
    Ok(())
}

#[test]
fn ide_detection_walks_the_parent_chain() {
    let mut tree: HashMap<u32, (u32, String)> = HashMap::new();
    tree.insert(100, (90, "tallr".to_owned()));
    tree.insert(90, (80, "zsh".to_owned()));
    tree.insert(80, (1, "Cursor Helper".to_owned()));

    let ide = detect_ide_with(100, |pid| tree.get(&pid).cloned());
    assert_eq!(ide.as_deref(), Some("cursor"));
}

#[test]
fn ide_detection_stops_at_init() {
    let mut tree: HashMap<u32, (u32, String)> = HashMap::new();
    tree.insert(100, (1, "zsh".to_owned()));

    assert_eq!(detect_ide_with(100, |pid| tree.get(&pid).cloned()), None);
}

#[test]
fn ide_detection_tolerates_lookup_failure() {
    assert_eq!(detect_ide_with(4242, |_| None), None);
}

#[test]
fn ide_table_recognizes_helper_processes() {
    let mut tree: HashMap<u32, (u32, String)> = HashMap::new();
    tree.insert(5, (4, "node".to_owned()));
    tree.insert(4, (1, "Code Helper (Renderer)".to_owned()));

    assert_eq!(detect_ide_with(5, |pid| tree.get(&pid).cloned()).as_deref(), Some("vscode"));
}
