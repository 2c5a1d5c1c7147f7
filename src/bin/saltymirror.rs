//! Saltymirror CLI - encrypt every file of a directory tree into a mirror tree
//!
//! Each file is sealed with NaCl secretbox (XSalsa20Poly1305) under a key
//! derived from the passphrase with scrypt.

use clap::Parser;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::error;

use saltymirror::config::{DEFAULT_SUFFIX, MirrorConfig};
use saltymirror::error::{ErrorCategory, ErrorKind, ExitStatus, MirrorError, exit_status_for};
use saltymirror::mirror;
use saltymirror::passphrase::{
    PassphraseReader, ReaderPassphraseReader, TerminalPassphraseReader, read_secret,
};
use saltymirror::report::Outcome;
use saltymirror::secretcrypt::{self, SECRETBOX_BACKEND};

#[derive(Parser)]
#[command(name = "saltymirror")]
#[command(version)]
#[command(about = "Mirror a directory tree into a passphrase-encrypted copy.", long_about = None)]
struct Cli {
    /// Directory whose files are to be encrypted; never modified
    #[arg(value_name = "SOURCE_DIR")]
    source: PathBuf,

    /// Directory to write the encrypted mirror to; created if missing
    #[arg(value_name = "DEST_DIR")]
    destination: PathBuf,

    /// Read passphrase from stdin instead of from terminal
    #[arg(long)]
    passphrase_stdin: bool,

    /// Number of files to encrypt concurrently (0 = one per CPU)
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Suffix appended to every encrypted file name
    #[arg(long, default_value = DEFAULT_SUFFIX)]
    suffix: String,

    /// Cipher backend
    #[arg(long, default_value = SECRETBOX_BACKEND)]
    cipher: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, env = "SALTYMIRROR_LOG", default_value = "warn")]
    log: String,

    /// Do not print a status line per file
    #[arg(short, long)]
    quiet: bool,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log);

    let status = match run(&cli) {
        Ok(status) => status,
        Err(e) => {
            error!(kind = ?e.kind, "{}", e.chain_message());
            eprintln!("Error: {}", e.chain_message());
            exit_status_for(&e)
        }
    };
    process::exit(status.code());
}

fn run(cli: &Cli) -> Result<ExitStatus, MirrorError> {
    let mut config = MirrorConfig::new(&cli.source, &cli.destination);
    config.suffix = cli.suffix.clone();
    config.jobs = cli.jobs;
    config.cipher = cli.cipher.clone();
    let config = config.validate()?;

    let cipher = secretcrypt::backend_by_name(&config.cipher).ok_or_else(|| {
        MirrorError::with_kind(
            ErrorCategory::User,
            ErrorKind::BackendUnavailable,
            format!(
                "cipher backend {:?} is not available (supported: {})",
                config.cipher, SECRETBOX_BACKEND
            ),
        )
    })?;

    let mut reader = get_passphrase_reader(cli.passphrase_stdin);
    let secret = read_secret(&mut *reader)?;

    let quiet = cli.quiet;
    let observer = move |relative_path: &Path, outcome: &Outcome| {
        if !quiet {
            print_status(relative_path, outcome);
        }
    };
    let summary = mirror::execute(&config, &*cipher, secret, &observer)?;

    // A closed stdout must not turn a finished run into a panic.
    let _ = writeln!(io::stdout().lock(), "{}", summary);
    Ok(if summary.has_failures() {
        ExitStatus::CompletedWithFailures
    } else {
        ExitStatus::Success
    })
}

fn print_status(relative_path: &Path, outcome: &Outcome) {
    let mut out = io::stdout().lock();
    // A closed stdout must not abort the run.
    let _ = match outcome {
        Outcome::Encrypted => writeln!(out, "encrypted {}", relative_path.display()),
        Outcome::Skipped => writeln!(out, "skipped   {}", relative_path.display()),
        Outcome::Failed(failure) => writeln!(
            out,
            "FAILED    {}: {}: {}",
            relative_path.display(),
            failure.reason,
            failure.message
        ),
    };
}

fn get_passphrase_reader(use_stdin: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(std::io::stdin())))
    } else {
        Box::new(TerminalPassphraseReader::new())
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
