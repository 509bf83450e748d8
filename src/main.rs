//! Command-line text generation with a pretrained GPT-2
//!
//! ## Usage
//!
//! ```bash
//! # Weights exported as one .npy file per parameter, plus the vocabulary
//! touchstone --weights gpt2-weights/ --vocab gpt2_vocabulary.json \
//!     --prompt "The meaning of life is" -k 40 --max-tokens 64
//!
//! # Reproducible, greedy, without the newline stop
//! touchstone --weights gpt2-weights/ --vocab gpt2_vocabulary.json \
//!     --prompt "Once upon a time" -k 1 --no-stop --seed 7
//!
//! # Non-default architecture, with step-level logging
//! touchstone --weights tiny/ --vocab vocab.json --config tiny/config.json -v
//! ```
//!
//! Without `--prompt` the prompt is read from stdin. Fragments are streamed
//! to stdout as they are sampled; logs go to stderr.

use clap::Parser;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use touchstone::{Config, GenerationOptions, Generator};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "touchstone",
    version,
    about = "Generate text with a pretrained GPT-2 model"
)]
struct Args {
    /// Directory containing one `<parameter>.npy` file per weight
    #[arg(long)]
    weights: PathBuf,

    /// Vocabulary JSON file (`{"token_to_id": {...}}`)
    #[arg(long)]
    vocab: PathBuf,

    /// Architecture JSON file (defaults to GPT-2 Small)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Prompt text (read from stdin when omitted)
    #[arg(long)]
    prompt: Option<String>,

    /// Number of candidates kept when sampling
    #[arg(short = 'k', long = "top-k", default_value = "40")]
    top_k: usize,

    /// Maximum number of tokens to generate
    #[arg(long, default_value = "32")]
    max_tokens: usize,

    /// Fragment that ends generation
    #[arg(long, default_value = "\n", conflicts_with = "no_stop")]
    stop: String,

    /// Generate until --max-tokens regardless of the stop fragment
    #[arg(long)]
    no_stop: bool,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();
}

fn run(args: Args) -> touchstone::Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::gpt2_small(),
    };
    let options = GenerationOptions {
        top_k: args.top_k,
        max_new_tokens: args.max_tokens,
        stop_token: (!args.no_stop).then(|| args.stop.clone()),
        seed: args.seed,
    };

    let prompt = match args.prompt {
        Some(prompt) => prompt,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf.trim_end_matches('\n').to_string()
        }
    };

    let mut generator = Generator::from_pretrained(&args.weights, &args.vocab, config, options)?;

    let mut stdout = io::stdout().lock();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let mut write_error = None;
    let generation = generator.generate_with(&prompt, |fragment| {
        if write_error.is_none() {
            if let Err(e) = write!(stdout, "{}", fragment).and_then(|_| stdout.flush()) {
                write_error = Some(e);
            }
        }
    })?;
    if let Some(e) = write_error {
        return Err(e.into());
    }
    writeln!(stdout)?;

    tracing::info!(
        steps = generation.steps,
        finish = ?generation.finish,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
