//! Shardbox CLI - passphrase-based chunked markdown encryption
//!
//! Command-line interface for sealing markdown documents into chunked
//! payload files, revealing them, updating them in place, and searching
//! inside them without writing plaintext to disk.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use shardbox::file_ops;
use shardbox::passphrase::{PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader};

#[derive(Parser)]
#[command(name = "shardbox")]
#[command(version)]
#[command(about = "Passphrase-based chunked markdown encryption.", long_about = None)]
struct Cli {
    /// Read passphrase from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Seal a markdown file into a payload document
    #[command(alias = "e")]
    Encode {
        /// Path to the markdown file to seal
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the payload document to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Reveal a payload document back to markdown
    #[command(alias = "d")]
    Decode {
        /// Path to the payload document to reveal
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the markdown file to write
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Update a payload document with new content, while validating
    /// that the passphrase is not accidentally changed.
    #[command(alias = "u")]
    Update {
        /// Path to the markdown file with the new content
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Path to the existing payload document to replace
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Search inside a payload document without writing plaintext
    #[command(alias = "s")]
    Search {
        /// Path to the payload document to search
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        /// Query text (case-insensitive substring)
        query: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut reader = get_passphrase_reader(cli.passphrase_stdin);

    let result = match cli.command {
        Commands::Encode { input, output } => file_ops::encode_file(&input, &output, &mut *reader),
        Commands::Decode { input, output } => file_ops::decode_file(&input, &output, &mut *reader),
        Commands::Update { input, output } => file_ops::update_file(&input, &output, &mut *reader),
        Commands::Search { input, query } => {
            run_search(&input, &query, &mut *reader)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn run_search(
    input: &std::path::Path,
    query: &str,
    reader: &mut dyn PassphraseReader,
) -> shardbox::error::Result<()> {
    let results = file_ops::search_file(input, query, reader, |done, total| {
        eprint!("\rScanning chunk {done}/{total}");
    })?;
    eprintln!();

    if results.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for found in &results {
        println!(
            "chunk {}: {} match{} - {}",
            found.chunk_index,
            found.match_count,
            if found.match_count == 1 { "" } else { "es" },
            found.preview
        );
    }
    Ok(())
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}
