//! xtask for linkback - build automation and tooling

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::fs;
use std::path::Path;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for linkback")]
enum Task {
    /// Generate the linkback(1) man page from the clap definitions
    GenerateManPages {
        /// Output directory for man pages (default: ./man)
        #[arg(short, long, default_value = "man")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    match Task::parse() {
        Task::GenerateManPages { output } => generate_man_page(&output),
    }
}

fn generate_man_page(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let man_path = output_dir.join("linkback.1");
    let man_file = fs::File::create(&man_path)
        .with_context(|| format!("Failed to create man page: {}", man_path.display()))?;

    clap_mangen::Man::new(linkback::cli::Cli::command())
        .render(&mut std::io::BufWriter::new(man_file))
        .with_context(|| format!("Failed to render man page: {}", man_path.display()))?;

    println!("Generated: {}", man_path.display());
    println!("View it with: man {}", man_path.display());
    Ok(())
}
