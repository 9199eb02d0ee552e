use std::{
    fs, io,
    path::{Path, PathBuf},
};

use clap::{ArgAction, Parser};
use colored::Colorize;
use tracing::Level;
use vasm::{Arch, AssembleError, Assembler, Assembly, synthesize::exe::RawBinary};

#[derive(Parser)]
#[command(version, about = "Assembles textual IR into 8051 or x86-64 machine code")]
struct Cli {
    file: PathBuf,
    /// Target architecture: 8051 (mcs51) or x86_64 (x64)
    #[arg(short, long, default_value_t = Arch::X86_64)]
    arch: Arch,
    /// Output file, defaults to `ctarget/<name>.<arch>.bin`
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Print a hex dump of the generated code
    #[arg(long)]
    hex: bool,
    /// Print the symbol table
    #[arg(long)]
    symbols: bool,
    /// More logging, repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<(), Error> {
    let args = Cli::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    let Some(module) = args.file.file_stem() else {
        return Err(Error::InvalidFile);
    };

    let out_path = match args.output {
        Some(path) => path,
        None => target_mod(Path::new(module).with_extension(format!("{}.bin", args.arch)))?,
    };

    let assembler = Assembler::<RawBinary>::new(args.arch);
    let assembly = assembler.assemble(&args.file, &out_path)?;

    println!(
        "{:>12} {} for {} ({} bytes) -> {}",
        "Assembled".bright_green(),
        module.to_string_lossy(),
        args.arch,
        assembly.code.len(),
        out_path.display()
    );

    if args.hex {
        print_hex(&assembly);
    }

    if args.symbols {
        print_symbols(&assembly);
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error("path is not an assemblable file")]
    InvalidFile,
    #[error(transparent)]
    AssemblyFailed(#[from] AssembleError),
    #[error("io error")]
    Io(#[from] io::Error),
}

fn target_mod(module: impl AsRef<Path>) -> Result<PathBuf, Error> {
    let target_dir = Path::new("ctarget");
    if !target_dir.exists() {
        fs::create_dir(target_dir)?;
    }

    Ok(target_dir.join(module.as_ref()))
}

/// Sixteen bytes per row, data after the code highlighted.
fn print_hex(assembly: &Assembly) {
    for (row, chunk) in assembly.code.chunks(16).enumerate() {
        let offset = row * 16;
        let bytes: Vec<String> = chunk
            .iter()
            .enumerate()
            .map(|(i, byte)| {
                let hex = format!("{:02X}", byte);
                if offset + i < assembly.code_size {
                    hex.normal().to_string()
                } else {
                    hex.cyan().to_string()
                }
            })
            .collect();

        println!("{} {}", format!("{:08X}", offset).dimmed(), bytes.join(" "));
    }

    if !assembly.ram.is_empty() && assembly.ram.iter().any(|b| *b != 0) {
        println!("{}", "internal ram".bold());
        for (row, chunk) in assembly.ram.chunks(16).enumerate() {
            let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
            println!("{} {}", format!("{:02X}", row * 16).dimmed(), bytes.join(" "));
        }
    }
}

fn print_symbols(assembly: &Assembly) {
    for (name, symbol) in assembly.symbols.sorted() {
        println!(
            "{:>12} {:#06x} {}",
            symbol.kind.to_string().bright_blue(),
            symbol.address,
            name
        );
    }
}
