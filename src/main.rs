use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Parser, ValueEnum};

use zbor::config::TransducerConfig;
use zbor::engine::{EngineRegistry, MODEL_REAZONSPEECH};
use zbor::worker::CancellationToken;
use zbor::{ZbError, ZbResult};

static SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Srt,
    Vtt,
}

/// Offline audio transcription for the zbor knowledge base.
#[derive(Debug, Parser)]
#[command(name = "zbor", version)]
struct Cli {
    /// Input audio file (WAV format)
    #[arg(short = 'i', long = "input")]
    input: PathBuf,

    /// Output file (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value = "text")]
    format: OutputFormat,

    /// Number of threads for inference
    #[arg(short = 't', long = "threads", default_value_t = 2)]
    threads: usize,

    /// Model directory path
    #[arg(
        short = 'm',
        long = "model",
        default_value = "models/sherpa-onnx-zipformer-ja-reazonspeech-2024-08-01"
    )]
    model: PathBuf,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() {
    zbor::logging::init();

    // Flag validation failures use a plain `Error:` prefix and exit 1, not
    // clap's default exit code.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return;
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let hook = cancel.clone();
    let _ = ctrlc::set_handler(move || {
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
        hook.cancel();
    });

    if let Err(error) = run(cli, &cancel) {
        if SHUTDOWN_FLAG.load(Ordering::SeqCst) {
            eprintln!("interrupted");
            std::process::exit(130);
        }
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli, cancel: &CancellationToken) -> ZbResult<()> {
    if !cli.input.exists() {
        return Err(ZbError::InvalidInput(format!(
            "input file not found: {}",
            cli.input.display()
        )));
    }

    if cli.verbose {
        eprintln!("Loading model from: {}", cli.model.display());
    }

    let mut config = TransducerConfig::from_model_dir(&cli.model)?;
    config.num_threads = cli.threads;
    config.validate()?;

    let registry = build_registry(&config);
    let mut recognizer = registry.create_recognizer(MODEL_REAZONSPEECH, config.sample_rate)?;

    if cli.verbose {
        eprintln!("Transcribing: {}", cli.input.display());
    }

    let wav_path = if zbor::media::needs_conversion(&cli.input) {
        Some(zbor::media::convert_to_wav_temp(&cli.input)?)
    } else {
        None
    };
    cancel.checkpoint()?;

    let result = recognizer.transcribe_wav_file(wav_path.as_deref().unwrap_or(&cli.input));
    if let Some(converted) = wav_path {
        let _ = std::fs::remove_file(converted);
    }
    let result = result?;

    if cli.verbose {
        eprintln!("Transcription completed in {:.2} seconds", result.duration);
    }

    let output = match cli.format {
        OutputFormat::Text => result.format_as_text(),
        OutputFormat::Json => result.format_as_json()?,
        OutputFormat::Srt => result.format_as_srt(),
        OutputFormat::Vtt => result.format_as_vtt(),
    };

    match &cli.output {
        Some(path) => {
            std::fs::write(path, output)?;
            if cli.verbose {
                eprintln!("Output written to: {}", path.display());
            }
        }
        None => println!("{output}"),
    }

    Ok(())
}

/// Engines are host plug-ins; the registry here is where a build wires its
/// concrete recognisers in.
fn build_registry(_config: &TransducerConfig) -> EngineRegistry {
    EngineRegistry::new()
}
