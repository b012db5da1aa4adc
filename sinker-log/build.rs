use std::env;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

fn emit_release_var() -> Result<(), io::Error> {
    let cmd = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .stderr(Stdio::inherit())
        .output()?;

    let version = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    if cmd.status.success() {
        let revision = String::from_utf8_lossy(&cmd.stdout);
        println!("cargo:rustc-env=SINKER_RELEASE=sinker@{version}+{}", revision.trim());
    } else {
        println!("cargo:rustc-env=SINKER_RELEASE=sinker@{version}");
    }

    Ok(())
}

fn list_crates() -> Result<Vec<String>, io::Error> {
    let mut crates = Vec::new();

    for result in fs::read_dir("../")? {
        let entry = result?;

        if !entry.file_type()?.is_dir() {
            continue;
        }

        if let Some(s) = entry.file_name().to_str() {
            if s.starts_with("sinker") {
                // Module paths use underscores where crate directories use dashes.
                crates.push(s.replace('-', "_"));
            }
        }
    }

    crates.sort();
    Ok(crates)
}

fn emit_crate_list() -> Result<(), io::Error> {
    let crates = list_crates()?;

    let out_dir = env::var("OUT_DIR").map_err(io::Error::other)?;
    let dest_path = Path::new(&out_dir).join("constants.gen.rs");
    let mut f = File::create(dest_path)?;

    write!(f, "const CRATE_NAMES: &[&str] = &[")?;
    for name in &crates {
        write!(f, "\"{name}\",")?;
    }
    writeln!(f, "];")?;

    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    if emit_release_var().is_err() {
        println!("cargo:rustc-env=SINKER_RELEASE=sinker@unknown");
    }
    emit_crate_list().expect("failed to write the workspace crate list");
}
