/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use directories::ProjectDirs;
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding},
    RsaPrivateKey,
};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("FEDI3_DATA_DIR") {
        return Ok(PathBuf::from(v));
    }
    let proj = ProjectDirs::from("net", "fedi3", "Fedi3Tasks")
        .context("unable to determine platform data dir")?;
    Ok(proj.data_local_dir().to_path_buf())
}

/// Reads the actor's private key, generating and persisting a new one if the
/// file does not exist yet. Returns the PKCS#8 PEM.
pub fn load_or_generate_private_key(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    if path.exists() {
        let pem = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        RsaPrivateKey::from_pkcs8_pem(&pem).context("parse private key pem")?;
        return Ok(pem);
    }
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create key dir: {}", dir.display()))?;
    }
    let mut rng = OsRng;
    let key = RsaPrivateKey::new(&mut rng, 2048)?;
    let pem = key.to_pkcs8_pem(LineEnding::LF)?.to_string();
    fs::write(path, &pem).with_context(|| format!("write {}", path.display()))?;
    Ok(pem)
}
