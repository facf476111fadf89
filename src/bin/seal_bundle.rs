//! Bundle sealing utility for Hemasense model bundles.
//!
//! Writes `manifest.json` with the SHA-256 digest of every bundle asset, so
//! the loader can detect a swapped or edited file. With `--check` it only
//! verifies an existing manifest.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin seal_bundle -- <bundle_dir> [--check]
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use hemasense::adapters::bundle::{BundleLoader, BundleManifest, BUNDLE_ASSETS};

fn usage() -> String {
    "Usage: seal_bundle <bundle_dir> [--check]".to_string()
}

fn parse_args() -> Result<(PathBuf, bool)> {
    let mut bundle_dir: Option<PathBuf> = None;
    let mut check_only = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--check" => check_only = true,
            "-h" | "--help" => bail!(usage()),
            _ if bundle_dir.is_none() => bundle_dir = Some(PathBuf::from(arg)),
            _ => bail!(usage()),
        }
    }

    let bundle_dir = bundle_dir.with_context(usage)?;
    Ok((bundle_dir, check_only))
}

fn main() -> Result<()> {
    let (bundle_dir, check_only) = parse_args()?;

    if !check_only {
        let manifest = BundleManifest::seal(&bundle_dir, &BUNDLE_ASSETS)
            .with_context(|| format!("Failed to hash assets in {bundle_dir:?}"))?;
        let path = manifest.write(&bundle_dir)?;
        println!("Wrote manifest: {path:?}");
        for (file, digest) in &manifest.files {
            println!("  {file}  {digest}");
        }
    }

    // Loading with a required manifest checks both integrity and shape.
    let bundle = BundleLoader::new(&bundle_dir)
        .require_manifest(true)
        .load()
        .with_context(|| format!("Bundle in {bundle_dir:?} failed verification"))?;

    println!(
        "Bundle OK: {} feature(s) [{}]",
        bundle.used_features.len(),
        bundle
            .used_features
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}
