use anyhow::Result;
use chrono::TimeZone;
use std::env;
use std::fs;
use std::process::Command;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    // Generate git information
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let gitcl_res = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = gitcl_res {
        eprintln!("error occurred while generating instructions: {e:?}");
        Emitter::default().idempotent().fail_on_error().emit()?;
    }

    // Reproducible builds pin the timestamp through SOURCE_DATE_EPOCH
    let now = env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|val| val.parse::<i64>().ok())
        .and_then(|secs| chrono::Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(chrono::Utc::now);

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        now.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let iamf_version = get_iamf_version_from_metadata().unwrap_or_else(|_| {
        read_iamf_version_fallback().unwrap_or_else(|_| "unknown".to_string())
    });
    println!("cargo:rustc-env=IAMF_VERSION={iamf_version}");

    println!("cargo:rerun-if-changed=iamf/Cargo.toml");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    Ok(())
}

/// Looks up the iamf library version, local workspace member or registry dependency.
fn get_iamf_version_from_metadata() -> Result<String> {
    let output = Command::new("cargo")
        .args(["metadata", "--format-version", "1"])
        .output()?;

    if !output.status.success() {
        anyhow::bail!("cargo metadata failed");
    }

    let metadata: serde_json::Value = serde_json::from_slice(&output.stdout)?;

    if let Some(packages) = metadata["packages"].as_array() {
        let version = packages
            .iter()
            .find(|package| package["name"].as_str() == Some("iamf"))
            .and_then(|package| package["version"].as_str());
        if let Some(version) = version {
            return Ok(version.to_string());
        }
    }

    // Registry ids look like "iamf 0.1.0 (registry+...)"
    if let Some(nodes) = metadata["resolve"]["nodes"].as_array() {
        for node in nodes {
            let Some(id) = node["id"].as_str() else {
                continue;
            };
            let mut parts = id.split(' ');
            if parts.next() == Some("iamf") {
                if let Some(version) = parts.next() {
                    return Ok(version.to_string());
                }
            }
        }
    }

    anyhow::bail!("iamf package not found in metadata");
}

fn read_iamf_version_fallback() -> Result<String> {
    let toml_content = fs::read_to_string("iamf/Cargo.toml")?;

    for line in toml_content.lines() {
        let line = line.trim();
        if !line.starts_with("version") {
            continue;
        }
        if let Some((_, value)) = line.split_once('=') {
            return Ok(value.trim().trim_matches('"').trim_matches('\'').to_string());
        }
    }

    anyhow::bail!("Could not find version in iamf/Cargo.toml");
}
