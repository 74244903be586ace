use std::fs;
use std::io::stdout;
use std::process;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};

use armscope::{
    AnalysisConfig, AnalysisContext, BlockAnalyzer, CapstoneArm64Disassembler, FixtureBinary,
    FunctionAnalyzer, StaticSelectorTable,
};

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

/// Disassemble a flat ARM64 byte blob and run the function analyzer over it.
///
/// This demo binary stands in for a real Mach-O-aware host: it treats its
/// input file as a single contiguous code region starting at `--base-address`
/// rather than parsing load commands or recovering Objective-C metadata,
/// both of which are out of scope for the library (see `armscope::binary`).
#[derive(Parser, Debug)]
#[command(name = env!("CARGO_PKG_NAME"), version, about = env!("CARGO_PKG_DESCRIPTION"))]
struct Cli {
    /// Path to a flat file of raw ARM64 instruction bytes.
    input: String,

    /// Virtual address the first byte of `input` is loaded at.
    #[arg(short = 'b', long, default_value = "0x0")]
    base_address: String,

    /// Number of bytes to disassemble, starting at `base-address`.
    #[arg(short = 'l', long)]
    length: Option<usize>,

    /// Output format.
    #[arg(short = 'F', long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    /// Print the resolved contents of REGISTER at instruction index INDEX,
    /// given as "REGISTER:INDEX" (e.g. "x1:3").
    #[arg(short = 'r', long)]
    register_at: Option<String>,

    /// Locate the blr that invokes block->invoke, given the register
    /// holding the incoming block pointer (e.g. "x0").
    #[arg(long)]
    find_block_invoke: Option<String>,
}

fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).context("invalid hex address")
    } else {
        s.parse::<u64>().context("invalid decimal address")
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let base_address = parse_address(&cli.base_address)?;
    let bytes = fs::read(&cli.input).with_context(|| format!("reading {}", cli.input))?;
    let length = cli.length.unwrap_or(bytes.len());

    let binary = FixtureBinary::new(base_address, bytes).with_text_range(base_address, base_address + length as u64);
    let context = AnalysisContext::new(
        Box::new(binary),
        Box::new(CapstoneArm64Disassembler::new()?),
        Box::new(StaticSelectorTable::new()),
        AnalysisConfig::default(),
    );

    let function = FunctionAnalyzer::for_function(&context, base_address, length)?;

    if let Some(block_register) = &cli.find_block_invoke {
        let analyzer = BlockAnalyzer::new(function.clone(), block_register);
        let (instr, index) = analyzer.find_block_invoke(&context)?;
        log::info!("block invoke found at index {index}: {instr}");
        match cli.format {
            OutputFormat::Json => serde_json::to_writer(stdout(), &instr)?,
            OutputFormat::Text => println!("{instr}"),
        }
        return Ok(());
    }

    if let Some(spec) = &cli.register_at {
        let (register, index) = spec
            .split_once(':')
            .ok_or_else(|| anyhow!("--register-at expects REGISTER:INDEX"))?;
        let index: usize = index.parse().context("invalid instruction index")?;
        let contents = function.get_register_contents_at(&context, register, index)?;
        match cli.format {
            OutputFormat::Json => serde_json::to_writer(stdout(), &contents)?,
            OutputFormat::Text => println!("{contents:?}"),
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => serde_json::to_writer(stdout(), function.instructions())?,
        OutputFormat::Text => {
            for instr in function.instructions() {
                println!("{instr}");
            }
        }
    }

    Ok(())
}

fn main() {
    env_logger::init();

    process::exit(match run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Fatal: {:#}", e);
            1
        }
    });
}
