#![forbid(unsafe_code)]
//! Writes the canonical fixture image to disk, for exercising the CLI
//! against a file instead of an in-memory buffer.

use anyhow::{Context, Result};
use lfsr_harness::ImageBuilder;
use std::env;
use std::fs;

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| "sample.lfs".to_owned());
    let image = ImageBuilder::sample().build();
    fs::write(&path, &image).with_context(|| format!("failed to write {path}"))?;
    println!("wrote {} bytes to {path}", image.len());
    Ok(())
}
