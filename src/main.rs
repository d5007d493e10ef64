//! Weft CLI
//!
//! The driver for the Weft compiler core. Programs arrive in the JSON
//! interchange form produced by the front-end; the driver selects a
//! pipeline, runs it, and prints the resulting IR for the code
//! generator.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use weft::pass::PassConfig;
use weft::{interchange, PassManager, Pipeline, VERSION};

#[derive(Parser)]
#[command(name = "weftc")]
#[command(author, version, about = "Optimizing compiler core for the Weft array language", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Program (JSON interchange) to compile with the default pipeline
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace);
    /// also attaches program dumps to pass failures
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Skip the consumption rules while typechecking between passes
    #[arg(long)]
    inhibit_uniqueness_checking: bool,

    /// Skip re-typechecking between passes
    #[arg(long)]
    unchecked: bool,

    /// Sequentialize all SOACs instead of extracting kernels
    #[arg(long)]
    first_order_transform: bool,

    /// Run only the enabling optimisations (simplification and fusion)
    #[arg(long)]
    enabling_optimisations: bool,

    /// Run the higher-order optimizations (kernel extraction) pipeline
    #[arg(long)]
    higher_order_optimizations: bool,

    /// Rename the program before anything else
    #[arg(long)]
    rename: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pretty-print a program without transforming it
    Print {
        /// The interchange file to print
        file: PathBuf,
    },

    /// Typecheck a program and report the first error
    Check {
        /// The interchange file to check
        file: PathBuf,
    },

    /// Run the full pipeline and print the final IR
    Compile {
        /// The interchange file to compile
        file: PathBuf,
        /// Write the final IR here instead of standard output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let result = match &cli.command {
        Some(Commands::Print { file }) => print_program(file),
        Some(Commands::Check { file }) => check_program(file, &cli),
        Some(Commands::Compile { file, output }) => compile(file, output.as_deref(), &cli),
        None => match &cli.file {
            Some(file) => compile(file, None, &cli),
            None => {
                eprintln!("error: no input file; see weftc --help");
                return ExitCode::from(1);
            }
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_program(file: &PathBuf) -> anyhow::Result<()> {
    let unit = interchange::load(file)
        .with_context(|| format!("reading {}", file.display()))?;
    print!("{}", unit.program);
    Ok(())
}

fn check_program(file: &PathBuf, cli: &Cli) -> anyhow::Result<()> {
    let unit = interchange::load(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let cfg = weft::typecheck::CheckConfig {
        check_uniqueness: !cli.inhibit_uniqueness_checking,
    };
    weft::typecheck::check_program_with(&unit.program, &cfg)?;
    println!("ok");
    Ok(())
}

fn select_pipeline(cli: &Cli) -> weft::Result<Pipeline> {
    if cli.enabling_optimisations {
        weft::enabling_pipeline()
    } else if cli.higher_order_optimizations && !cli.first_order_transform {
        weft::gpu_pipeline()
    } else {
        // --first-order-transform is also the default backend shape.
        weft::sequential_pipeline()
    }
}

fn compile(file: &PathBuf, output: Option<&std::path::Path>, cli: &Cli) -> anyhow::Result<()> {
    let unit = interchange::load(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let mut ns = unit.name_source();
    let mut program = unit.program;

    if cli.rename {
        program = weft::ir::rename::rename_program(program, &mut ns);
    }

    let pipeline = select_pipeline(cli)?;
    let manager = PassManager::with_config(PassConfig {
        check_types: !cli.unchecked,
        check_uniqueness: !cli.inhibit_uniqueness_checking,
        verbose: cli.verbose > 0,
    });
    let program = manager.run(&pipeline, program, &mut ns)?;

    let rendered = program.to_string();
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", rendered),
    }
    tracing::info!(version = VERSION, "compilation finished");
    Ok(())
}
