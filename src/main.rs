use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser};
use log::{debug, info, LevelFilter};

use imap_backup::archive::{DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_LEVEL};
use imap_backup::{
    ArchiveOptions, Backup, BackupOptions, ConnectionConfig, Credentials, LogReporter,
    MailboxFailurePolicy, SecurityMode, TrustPolicy,
};

const IMAP_USERNAME: &str = "IMAP_USERNAME";
const IMAP_PASSWORD: &str = "IMAP_PASSWORD";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Arguments {
    #[command(flatten)]
    verbosity: Verbosity,

    #[command(flatten)]
    authentication: Authentication,

    #[command(flatten)]
    tuning: Tuning,

    #[arg(help = "The name of the host to connect with")]
    hostname: String,

    #[arg(help = "The port number to connect with")]
    port: u16,

    #[arg(help = "A path on the filesystem to write the archive to")]
    output: PathBuf,
}

#[derive(Args)]
#[group(multiple = false)]
struct Verbosity {
    #[arg(short = 'd', long = "debug", help = "Show every command and response")]
    debug: bool,

    #[arg(short = 'v', long = "verbose", help = "Show every archived message")]
    verbose: bool,

    #[arg(short = 'q', long = "quiet", help = "Only show warnings and errors")]
    quiet: bool,
}

impl Verbosity {
    fn to_filter(&self) -> LevelFilter {
        if self.debug {
            LevelFilter::Trace
        } else if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }
}

#[derive(Args)]
struct Authentication {
    #[arg(short = 'u', long = "username", help = "The username to log in with")]
    username: Option<String>,

    #[arg(short = 'p', long = "password", help = "The password to log in with")]
    password: Option<String>,

    #[arg(short = 'i', long = "insecure", help = "Accept invalid TLS certificates")]
    insecure: bool,

    #[arg(
        short = 's',
        long = "starttls",
        conflicts_with = "plaintext",
        help = "Connect in plaintext and upgrade with STARTTLS"
    )]
    starttls: bool,

    #[arg(long = "plaintext", help = "Never encrypt the connection")]
    plaintext: bool,
}

impl Authentication {
    fn security(&self) -> SecurityMode {
        if self.starttls {
            SecurityMode::StartTls
        } else if self.plaintext {
            SecurityMode::Plain
        } else {
            SecurityMode::ImplicitTls
        }
    }

    fn trust(&self) -> TrustPolicy {
        if self.insecure {
            TrustPolicy::AcceptUntrusted
        } else {
            TrustPolicy::Verify
        }
    }
}

#[derive(Args)]
struct Tuning {
    #[arg(long = "timeout", value_name = "SECS", default_value_t = 60, help = "Network timeout")]
    timeout: u64,

    #[arg(
        long = "compression-level",
        value_name = "N",
        default_value_t = DEFAULT_COMPRESSION_LEVEL,
        allow_negative_numbers = true,
        help = "zstd compression level"
    )]
    compression_level: i32,

    #[arg(
        long = "block-size",
        value_name = "BYTES",
        default_value_t = DEFAULT_BLOCK_SIZE,
        help = "Size of the chunks messages are streamed in"
    )]
    block_size: usize,

    #[arg(
        long = "abort-on-mailbox-error",
        help = "Stop instead of skipping a mailbox that cannot be opened"
    )]
    abort_on_mailbox_error: bool,
}

fn setup_logging(verbosity: &Verbosity) -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(verbosity.to_filter())
        .format_level(true)
        .format_target(false)
        .format_module_path(false)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init()?;
    Ok(())
}

// the first candidate that is set and not empty
fn first_present<I: IntoIterator<Item = Option<String>>>(candidates: I) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}

fn dotenv_values() -> HashMap<String, String> {
    match dotenvy::dotenv_iter() {
        Ok(iter) => {
            debug!("loading credentials from .env");
            iter.filter_map(|item| item.ok()).collect()
        }
        Err(e) => {
            debug!("no .env file: {}", e);
            HashMap::new()
        }
    }
}

// moves the values out of the arguments, so the only copy of the password is the one
// inside `Credentials`
fn get_credentials(authentication: &mut Authentication) -> anyhow::Result<Credentials> {
    let mut dotenv = dotenv_values();
    let mut lookup = |argument: Option<String>, key: &str| {
        first_present([argument, dotenv.remove(key), env::var(key).ok()])
    };

    let username = lookup(authentication.username.take(), IMAP_USERNAME)
        .ok_or_else(|| anyhow!("must provide a username (-u or {})", IMAP_USERNAME))?;
    let password = lookup(authentication.password.take(), IMAP_PASSWORD)
        .ok_or_else(|| anyhow!("must provide a password (-p or {})", IMAP_PASSWORD))?;
    Ok(Credentials::new(username, password))
}

fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let seconds = total % 60;
    let minutes = total / 60 % 60;
    let hours = total / 60 / 60;
    format!("{:0>2}:{:0>2}:{:0>2}", hours, minutes, seconds)
}

fn main() -> anyhow::Result<ExitCode> {
    let mut arguments = Arguments::parse();
    setup_logging(&arguments.verbosity)?;

    let config = ConnectionConfig::new(arguments.hostname.as_str(), arguments.port)
        .security(arguments.authentication.security())
        .trust(arguments.authentication.trust())
        .timeout(Duration::from_secs(arguments.tuning.timeout));
    let options = BackupOptions {
        on_mailbox_error: if arguments.tuning.abort_on_mailbox_error {
            MailboxFailurePolicy::Abort
        } else {
            MailboxFailurePolicy::Skip
        },
        archive: ArchiveOptions {
            compression_level: arguments.tuning.compression_level,
            block_size: arguments.tuning.block_size,
            ..ArchiveOptions::default()
        },
        ..BackupOptions::default()
    };
    let credentials = get_credentials(&mut arguments.authentication)?;

    let backup = Backup::new(config, options);
    let summary = backup
        .run(credentials, &arguments.output, &mut LogReporter)
        .with_context(|| {
            format!(
                "backup of {}:{} failed",
                arguments.hostname, arguments.port
            )
        })?;

    info!("Copy completed in {}", format_elapsed(summary.elapsed));
    println!("{}", summary);
    if summary.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        eprint!("{}", summary.describe_missing());
        Ok(ExitCode::FAILURE)
    }
}
