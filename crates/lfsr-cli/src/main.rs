#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use lfsr_block::BlockStore;
use lfsr_core::{MountedImage, NodeKind, Tree, TreeNode, read_content};
use lfsr_recover::{recover_by_name, scan_image};
use serde::Serialize;
use std::env::VarError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── logging setup ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    const ENV_KEY: &'static str = "LFSR_LOG_FORMAT";

    fn parse(raw: &str) -> Result<Self> {
        <Self as ValueEnum>::from_str(raw.trim(), true).map_err(|_| {
            anyhow::anyhow!(
                "invalid {key}={raw:?}; expected one of: human, json",
                key = Self::ENV_KEY
            )
        })
    }

    fn from_env() -> Result<Option<Self>> {
        match std::env::var(Self::ENV_KEY) {
            Ok(value) => Ok(Some(Self::parse(&value)?)),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => {
                bail!("{key} contains non-UTF-8 bytes", key = Self::ENV_KEY)
            }
        }
    }
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn init_logging(log_format_override: Option<LogFormat>) -> Result<()> {
    let format = log_format_override
        .or(LogFormat::from_env()?)
        .unwrap_or(LogFormat::Human);

    match format {
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize human logger: {err}"))?,
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(default_env_filter())
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to initialize JSON logger: {err}"))?,
    }

    Ok(())
}

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "lfsr", about = "lfsrescue: forensic inspector for littlefs-style images")]
struct Cli {
    /// Log output format (`human` or `json`).
    ///
    /// Precedence: `--log-format` > `LFSR_LOG_FORMAT` > `human`.
    #[arg(long, value_enum, global = true)]
    log_format: Option<LogFormat>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the superblock summary.
    Inspect {
        /// Path to the flash image.
        image: PathBuf,
        /// Erase block size in bytes.
        #[arg(long, short = 'b', default_value_t = 512)]
        block_size: u32,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Print the directory tree, optionally with file contents.
    Tree {
        /// Path to the flash image.
        image: PathBuf,
        /// Erase block size in bytes.
        #[arg(long, short = 'b', default_value_t = 512)]
        block_size: u32,
        /// Dump file contents as well as the tree.
        #[arg(long, short = 'c')]
        contents: bool,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Decode every block's raw record stream, live or not.
    Scan {
        /// Path to the flash image.
        image: PathBuf,
        /// Erase block size in bytes.
        #[arg(long, short = 'b', default_value_t = 512)]
        block_size: u32,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Carve the bytes behind a name record, bypassing the live tree.
    Recover {
        /// Path to the flash image.
        image: PathBuf,
        /// File name to search for (directory prefixes are not part of
        /// name records; pass the final component).
        name: String,
        /// Erase block size in bytes.
        #[arg(long, short = 'b', default_value_t = 512)]
        block_size: u32,
        /// Write the carved bytes here instead of `recovered_<name>`.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Command::Inspect {
            image,
            block_size,
            json,
        } => inspect(&image, block_size, json),
        Command::Tree {
            image,
            block_size,
            contents,
            json,
        } => tree(&image, block_size, contents, json),
        Command::Scan {
            image,
            block_size,
            json,
        } => scan(&image, block_size, json),
        Command::Recover {
            image,
            name,
            block_size,
            out,
            json,
        } => recover(&image, &name, block_size, out, json),
    }
}

fn open_store(image: &Path, block_size: u32) -> Result<BlockStore> {
    BlockStore::open(image, block_size)
        .with_context(|| format!("failed to open {} as a flash image", image.display()))
}

// ── inspect ─────────────────────────────────────────────────────────────────

fn inspect(image: &Path, block_size: u32, json: bool) -> Result<()> {
    let store = open_store(image, block_size)?;
    let mounted = MountedImage::mount(store)
        .with_context(|| format!("no decodable filesystem in {}", image.display()))?;
    let summary = mounted.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let sb = &summary.superblock;
    println!("[superblock @ block {}]", summary.block);
    println!("  revision    : {}", summary.revision);
    println!("  version     : {}.{}", sb.version_major, sb.version_minor);
    println!("  block size  : {}", sb.block_size);
    println!("  block count : {}", sb.block_count);
    println!("  name max    : {}", sb.name_max);
    println!("  file max    : {}", sb.file_max);
    println!("  attr max    : {}", sb.attr_max);
    Ok(())
}

// ── tree ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct TreeOutput<'a> {
    root: &'a TreeNode,
    warnings: &'a [String],
}

fn tree(image: &Path, block_size: u32, contents: bool, json: bool) -> Result<()> {
    let store = open_store(image, block_size)?;
    let mounted = MountedImage::mount(store)
        .with_context(|| format!("no decodable filesystem in {}", image.display()))?;
    let tree = mounted.tree().context("directory tree reconstruction failed")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&TreeOutput {
                root: &tree.root,
                warnings: &tree.warnings,
            })?
        );
        return Ok(());
    }

    let sb = mounted.summary().superblock;
    println!(
        "Mounted '{}' ({} KiB, {} blocks)",
        image.display(),
        u64::from(sb.block_size) * u64::from(sb.block_count) / 1024,
        sb.block_count
    );
    println!("/");
    print_children(&tree.root, "");

    for warning in &tree.warnings {
        eprintln!("warning: {warning}");
    }

    if contents {
        dump_contents(&tree, mounted.store())?;
    }
    Ok(())
}

fn print_children(node: &TreeNode, indent: &str) {
    for (position, child) in node.children.iter().enumerate() {
        let last = position == node.children.len() - 1;
        let branch = if last { "└── " } else { "├── " };
        let suffix = if child.kind == NodeKind::Dir { "/" } else { "" };
        println!("{indent}{branch}{}{suffix}", child.name);

        if child.kind == NodeKind::Dir {
            let child_indent = if last { "    " } else { "│   " };
            print_children(child, &format!("{indent}{child_indent}"));
        }
    }
}

fn dump_contents(tree: &Tree, store: &BlockStore) -> Result<()> {
    let mut stack = vec![(String::new(), &tree.root)];
    while let Some((path, node)) = stack.pop() {
        for child in node.children.iter().rev() {
            let child_path = format!("{path}/{}", child.name);
            match child.kind {
                NodeKind::Dir => stack.push((child_path, child)),
                NodeKind::File => {
                    let Some(file_struct) = &child.file_struct else {
                        continue;
                    };
                    match read_content(store, file_struct) {
                        Ok(data) => {
                            let text = String::from_utf8(data.clone())
                                .unwrap_or_else(|_| "[binary data omitted]".to_owned());
                            println!("\n--- {child_path}  ({} bytes) ---\n{text}", data.len());
                        }
                        Err(err) => {
                            eprintln!("warning: {child_path}: {err}");
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

// ── scan ────────────────────────────────────────────────────────────────────

fn scan(image: &Path, block_size: u32, json: bool) -> Result<()> {
    let store = open_store(image, block_size)?;
    let scans = scan_image(&store);

    if json {
        println!("{}", serde_json::to_string_pretty(&scans)?);
        return Ok(());
    }

    for block in &scans {
        if block.records.is_empty() {
            continue;
        }
        if block.has_superblock_magic {
            println!("=== block {} (superblock) ===", block.block);
        }
        for record in &block.records {
            print!(
                "[blk {:3}] +{:04X}: {:<6} id={:3} len={:3} chk=0x{:02X}",
                block.block.0,
                record.offset,
                record.kind.to_string(),
                record.id,
                record.length,
                record.chunk
            );
            if let Some(valid) = record.crc_valid {
                print!(" crc={}", if valid { "ok" } else { "MISMATCH" });
            }
            println!();
            if let Some(detail) = &record.detail {
                println!("           └─ {detail}");
            }
        }
    }
    Ok(())
}

// ── recover ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RecoverOutput {
    found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_block: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    byte_offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    written_to: Option<String>,
}

fn recover(
    image: &Path,
    name: &str,
    block_size: u32,
    out: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let store = open_store(image, block_size)?;

    let Some(fragment) = recover_by_name(&store, name.as_bytes()) else {
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&RecoverOutput {
                    found: false,
                    name: None,
                    source_block: None,
                    byte_offset: None,
                    bytes: None,
                    written_to: None,
                })?
            );
        } else {
            println!("filename '{name}' not found in image");
        }
        return Ok(());
    };

    let out_path = out.unwrap_or_else(|| PathBuf::from(format!("recovered_{}", fragment.name)));
    fs::write(&out_path, &fragment.data)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    info!(
        block = %fragment.source_block,
        offset = fragment.byte_offset,
        bytes = fragment.data.len(),
        "carved fragment written"
    );

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&RecoverOutput {
                found: true,
                name: Some(fragment.name.clone()),
                source_block: Some(fragment.source_block.0),
                byte_offset: Some(fragment.byte_offset),
                bytes: Some(fragment.data.len()),
                written_to: Some(out_path.display().to_string()),
            })?
        );
    } else {
        println!(
            "found name record in block {}, image offset 0x{:X}",
            fragment.source_block, fragment.byte_offset
        );
        println!(
            "recovered {} bytes (best effort, validate before trusting) -> {}",
            fragment.data.len(),
            out_path.display()
        );
    }
    Ok(())
}
