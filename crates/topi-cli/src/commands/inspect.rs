//! Inspect command - show the tables of a compiled container.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use topi_bytecode::{Container, FormatVersion};

#[derive(Args)]
pub struct InspectCommand {
    /// Compiled dialogue file
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// List the decoded instructions of the code section
    #[arg(short, long)]
    pub disassemble: bool,
}

#[derive(Serialize)]
struct Report {
    version: u16,
    layout: &'static str,
    code_len: usize,
    globals: Vec<GlobalInfo>,
    boughs: Vec<BoughInfo>,
    externs: Vec<String>,
}

#[derive(Serialize)]
struct GlobalInfo {
    name: String,
    index: u32,
    is_extern: bool,
    is_mutable: bool,
}

#[derive(Serialize)]
struct BoughInfo {
    name: String,
    entry: u32,
}

impl Report {
    fn collect(container: &Container) -> Self {
        let version = container.version();
        Self {
            version: version as u16,
            layout: match version {
                FormatVersion::Sequential => "sequential",
                FormatVersion::Offset => "offset",
            },
            code_len: container.code().len(),
            globals: container
                .globals()
                .iter()
                .map(|g| GlobalInfo {
                    name: g.name.clone(),
                    index: g.index,
                    is_extern: g.is_extern,
                    is_mutable: g.is_mutable,
                })
                .collect(),
            boughs: container
                .boughs()
                .iter()
                .map(|b| BoughInfo {
                    name: b.name.clone(),
                    entry: b.entry,
                })
                .collect(),
            externs: container.externs().into_iter().collect(),
        }
    }
}

impl InspectCommand {
    pub fn run(&self) -> Result<()> {
        let bytes = std::fs::read(&self.file)
            .with_context(|| format!("failed to read {}", self.file.display()))?;
        let container = Container::parse(bytes)
            .with_context(|| format!("{} is not a compiled container", self.file.display()))?;
        let report = Report::collect(&container);

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_human_readable(&report);
        }
        if self.disassemble {
            disassemble(&container)?;
        }
        Ok(())
    }
}

fn print_human_readable(report: &Report) {
    println!("Version:     {} ({})", report.version, report.layout);
    println!("Code:        {} bytes", report.code_len);
    println!();
    println!("Globals:");
    for global in &report.globals {
        let mut flags = Vec::new();
        if global.is_extern {
            flags.push("extern");
        }
        if !global.is_mutable {
            flags.push("const");
        }
        println!("  {:>4}  {} {}", global.index, global.name, flags.join(" "));
    }
    println!();
    println!("Boughs:");
    for bough in &report.boughs {
        println!("  {:>6}  {}", bough.entry, bough.name);
    }
}

fn disassemble(container: &Container) -> Result<()> {
    println!();
    println!("Code:");
    let mut ip = 0u32;
    while (ip as usize) < container.code().len() {
        let (instruction, next) = container.instruction_at(ip)?;
        if let Some(bough) = container.boughs().iter().find(|b| b.entry == ip) {
            println!("{}:", bough.name);
        }
        println!("  {ip:>6}  {instruction:?}");
        ip = next;
    }
    Ok(())
}
