// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::os::unix::fs::PermissionsExt;

use super::*;

#[test]
fn mint_is_64_lowercase_hex() {
    let token = mint();
    assert_eq!(token.len(), 64);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[test]
fn mint_is_unique() {
    assert_ne!(mint(), mint());
}

#[test]
fn token_file_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let token = mint();
    let path = write_token_file(dir.path(), &token)?;

    assert_eq!(path.file_name().and_then(|n| n.to_str()), Some(TOKEN_FILE));
    let contents = std::fs::read_to_string(&path)?;
    assert_eq!(contents, format!("{token}\n"), "single line plus newline");
    assert_eq!(read_token_file(dir.path())?, token);
    Ok(())
}

#[test]
fn token_file_is_owner_only() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_token_file(dir.path(), &mint())?;
    let mode = std::fs::metadata(&path)?.permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    Ok(())
}

#[test]
fn rewrite_truncates_previous_token() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    write_token_file(dir.path(), &mint())?;
    let second = mint();
    write_token_file(dir.path(), &second)?;
    assert_eq!(read_token_file(dir.path())?, second);
    Ok(())
}
