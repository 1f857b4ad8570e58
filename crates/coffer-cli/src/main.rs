//! coffer: encrypted file vault CLI
//!
//! Commands:
//!   derive                          - unlock and print the vault key fingerprint
//!   seal <file> / open <file>       - keyed container with sealed metadata
//!   stage <files..> / unstage <f>   - size-selected single-shot or streaming blobs
//!   inspect <file>                  - show format and headers
//!   export <dir> <containers..>     - write a share bundle
//!   import <dir>                    - re-encrypt a share bundle into this vault
//!   config show                     - display current configuration
//!
//! Every command that needs the vault key takes `--pattern 1,5,9,12 --grid 4`
//! (or `COFFER_PATTERN`) or `--phrase` to prompt for the recovery phrase.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

use coffer_core::config::{expand_tilde, CofferConfig};
use coffer_core::types::FormatKind;
use coffer_crypto::share::read_manifest;
use coffer_crypto::stream::{StreamHeader, STREAM_HEADER_SIZE};
use coffer_crypto::{
    decrypt_file, derive_key_from_pattern, derive_key_from_phrase, encrypt_file, export_bundle,
    import_bundle, read_header, sniff_format, stage_batch, stage_file, staging_dir, unstage_file,
    KdfParams, StageJob, StagingPolicy, StreamControl, SymmetricKey,
};
use coffer_secrets::open_salt_store;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffer",
    version,
    about = "Encrypted file vault",
    long_about = "coffer: seal files under a key derived from a gesture pattern or recovery phrase bound to this device"
)]
struct Cli {
    /// Path to coffer.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "COFFER_CONFIG",
        default_value = "~/.config/coffer/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [log] level
    #[arg(long, env = "COFFER_LOG", global = true)]
    log: Option<String>,

    /// Log format; overrides [log] format
    #[arg(long, env = "COFFER_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// How to unlock the vault
#[derive(Args, Debug, Clone)]
struct UnlockArgs {
    /// Gesture pattern as comma-separated dot indices, e.g. 1,5,9,12,8,4
    #[arg(long, env = "COFFER_PATTERN", conflicts_with = "phrase", hide_env_values = true)]
    pattern: Option<String>,

    /// Pattern grid size (N for an NxN grid)
    #[arg(long, default_value_t = 3)]
    grid: u8,

    /// Prompt for the recovery phrase instead of using a pattern
    #[arg(long)]
    phrase: bool,
}

impl UnlockArgs {
    fn is_provided(&self) -> bool {
        self.pattern.is_some() || self.phrase
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive the vault key and print its fingerprint
    Derive {
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Seal a file into a keyed container (sealed header + sealed content)
    Seal {
        input: PathBuf,
        /// Output path (default: <input>.coffer)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// MIME type recorded in the sealed header
        #[arg(long, default_value = "application/octet-stream")]
        mime: String,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Open a keyed container
    Open {
        input: PathBuf,
        /// Output path (default: the original filename in the current directory)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Encrypt files into the staging area, streaming large ones
    Stage {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Output directory (default: this vault's staging directory)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Decrypt a staged blob of either format
    Unstage {
        input: PathBuf,
        /// Output path (default: input without its .coffer extension)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Show the format of an encrypted file and any readable header
    Inspect {
        input: PathBuf,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Export containers as a bundle sealed under a share key
    Export {
        /// Bundle directory to create
        dir: PathBuf,
        #[arg(required = true)]
        containers: Vec<PathBuf>,
        /// Share key as 64 hex characters (default: generate and print one)
        #[arg(long, env = "COFFER_SHARE_KEY", hide_env_values = true)]
        share_key: Option<String>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Import a bundle, re-encrypting every file under this vault's key
    Import {
        /// Bundle directory
        dir: PathBuf,
        /// Share key as 64 hex characters
        #[arg(long, env = "COFFER_SHARE_KEY", hide_env_values = true)]
        share_key: String,
        /// Output directory (default: this vault's staging directory)
        #[arg(long, short = 'o')]
        out_dir: Option<PathBuf>,
        #[command(flatten)]
        unlock: UnlockArgs,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = load_config(&config_path).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    config.validate().context("invalid configuration")?;
    tracing::debug!(config = %config_path.display(), "coffer starting");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, stopping after the current chunk");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    match cli.command {
        Commands::Derive { unlock } => cmd_derive(&config, &unlock).await,
        Commands::Seal { input, output, mime, unlock } => {
            cmd_seal(&config, &input, output, &mime, &unlock).await
        }
        Commands::Open { input, output, unlock } => cmd_open(&config, &input, output, &unlock).await,
        Commands::Stage { inputs, out_dir, unlock } => {
            cmd_stage(&config, inputs, out_dir, &unlock, &cancel).await
        }
        Commands::Unstage { input, output, unlock } => {
            cmd_unstage(&config, &input, output, &unlock, &cancel).await
        }
        Commands::Inspect { input, unlock } => cmd_inspect(&config, &input, &unlock).await,
        Commands::Export { dir, containers, share_key, unlock } => {
            cmd_export(&config, &dir, containers, share_key.as_deref(), &unlock).await
        }
        Commands::Import { dir, share_key, out_dir, unlock } => {
            cmd_import(&config, &dir, &share_key, out_dir, &unlock).await
        }
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Config loading ────────────────────────────────────────────────────────────

async fn load_config(path: &Path) -> Result<CofferConfig> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading config: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config: {}", path.display()))
    } else {
        Ok(CofferConfig::default())
    }
}

// ── Unlock ────────────────────────────────────────────────────────────────────

enum UnlockSecret {
    Pattern { dots: Zeroizing<Vec<u8>>, grid: u8 },
    Phrase(SecretString),
}

fn read_unlock_secret(unlock: &UnlockArgs) -> Result<UnlockSecret> {
    if unlock.phrase {
        let phrase = rpassword::prompt_password("Recovery phrase: ")
            .context("reading recovery phrase")?;
        return Ok(UnlockSecret::Phrase(SecretString::from(phrase)));
    }
    let pattern = unlock
        .pattern
        .as_deref()
        .context("no unlock secret: pass --pattern or --phrase")?;
    Ok(UnlockSecret::Pattern {
        dots: parse_pattern(pattern)?,
        grid: unlock.grid,
    })
}

fn parse_pattern(raw: &str) -> Result<Zeroizing<Vec<u8>>> {
    let mut dots = Zeroizing::new(Vec::new());
    for part in raw.split(',') {
        let dot = part
            .trim()
            .parse::<u8>()
            .map_err(|_| anyhow::anyhow!("pattern must be comma-separated dot indices (0-255)"))?;
        dots.push(dot);
    }
    Ok(dots)
}

/// Run the slow KDF off the async runtime.
async fn unlock_vault(config: &CofferConfig, unlock: &UnlockArgs) -> Result<SymmetricKey> {
    let secret = read_unlock_secret(unlock)?;
    let salts = open_salt_store(&config.secrets);
    let params = KdfParams::from(&config.kdf);

    let spinner = make_spinner("unlock");
    spinner.set_message("deriving key");
    let key = tokio::task::spawn_blocking(move || match secret {
        UnlockSecret::Pattern { dots, grid } => {
            derive_key_from_pattern(&dots, grid, salts.as_ref(), &params)
        }
        UnlockSecret::Phrase(phrase) => derive_key_from_phrase(&phrase, salts.as_ref(), &params),
    })
    .await
    .context("key derivation task failed")?;
    spinner.finish_and_clear();

    let key = key?;
    tracing::info!(fingerprint = %key.fingerprint(), "vault unlocked");
    Ok(key)
}

fn parse_share_key(hex_key: &str) -> Result<SymmetricKey> {
    let raw = Zeroizing::new(
        hex::decode(hex_key.trim()).context("share key must be 64 hex characters")?,
    );
    Ok(SymmetricKey::from_slice(&raw)?)
}

fn vault_staging_dir(config: &CofferConfig, key: &SymmetricKey) -> PathBuf {
    staging_dir(&expand_tilde(&config.staging.root), key)
}

// ── Progress display ──────────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── File output ───────────────────────────────────────────────────────────────

/// Write via a temp file in the destination directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).with_context(|| format!("creating dir: {}", dir.display()))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(".coffer-tmp-")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("not a file path: {}", path.display()))
}

// ── `coffer derive` ───────────────────────────────────────────────────────────

async fn cmd_derive(config: &CofferConfig, unlock: &UnlockArgs) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;
    println!("{}", key.fingerprint());
    Ok(())
}

// ── `coffer seal` / `coffer open` ─────────────────────────────────────────────

async fn cmd_seal(
    config: &CofferConfig,
    input: &Path,
    output: Option<PathBuf>,
    mime: &str,
    unlock: &UnlockArgs,
) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;
    let filename = file_name_of(input)?;
    let output = output.unwrap_or_else(|| PathBuf::from(format!("{}.coffer", input.display())));

    let input = input.to_path_buf();
    let mime = mime.to_string();
    let (out, size) = tokio::task::spawn_blocking(move || -> Result<(PathBuf, u64)> {
        let data = Zeroizing::new(
            std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?,
        );
        let file = encrypt_file(&data, &filename, &mime, &key)?;
        write_atomic(&output, &file.to_bytes())?;
        Ok((output, data.len() as u64))
    })
    .await??;

    println!("sealed {size} bytes -> {}", out.display());
    Ok(())
}

async fn cmd_open(
    config: &CofferConfig,
    input: &Path,
    output: Option<PathBuf>,
    unlock: &UnlockArgs,
) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;

    let input = input.to_path_buf();
    let (out, size) = tokio::task::spawn_blocking(move || -> Result<(PathBuf, usize)> {
        let data = std::fs::read(&input).with_context(|| format!("reading {}", input.display()))?;
        let (header, content) = decrypt_file(&data, &key)?;
        let content = Zeroizing::new(content);

        // Only the final component of the stored name is trusted.
        let output = match output {
            Some(p) => p,
            None => PathBuf::from(file_name_of(Path::new(&header.original_filename))?),
        };
        write_atomic(&output, &content)?;
        Ok((output, content.len()))
    })
    .await??;

    println!("opened {size} bytes -> {}", out.display());
    Ok(())
}

// ── `coffer stage` / `coffer unstage` ─────────────────────────────────────────

async fn cmd_stage(
    config: &CofferConfig,
    inputs: Vec<PathBuf>,
    out_dir: Option<PathBuf>,
    unlock: &UnlockArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;
    let policy = StagingPolicy::from(&config.staging);
    let out_dir = out_dir.unwrap_or_else(|| vault_staging_dir(config, &key));

    let jobs = inputs
        .iter()
        .map(|source| -> Result<StageJob> {
            Ok(StageJob {
                source: source.clone(),
                dest: out_dir.join(format!("{}.coffer", file_name_of(source)?)),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if let [job] = jobs.as_slice() {
        let job = job.clone();
        let total = std::fs::metadata(&job.source)
            .with_context(|| format!("stat: {}", job.source.display()))?
            .len();
        let pb = make_progress_bar(total, "stage");
        let pb_task = pb.clone();
        let cancel = cancel.clone();

        let staged = tokio::task::spawn_blocking(move || {
            let on_progress = move |done: u64, total: u64| {
                pb_task.set_length(total);
                pb_task.set_position(done);
            };
            let control = StreamControl::default()
                .with_cancel(&cancel)
                .with_progress(&on_progress);
            stage_file(&job.source, &job.dest, &key, &policy, control)
        })
        .await?;
        pb.finish_and_clear();

        let staged = staged?;
        println!(
            "{} -> {} ({}, {} bytes)",
            inputs[0].display(),
            staged.path.display(),
            staged.format,
            staged.encrypted_size
        );
        return Ok(());
    }

    let spinner = make_spinner("stage");
    spinner.set_message(format!("{} files", jobs.len()));
    let cancel = cancel.clone();
    let batch_jobs = jobs.clone();
    let results =
        tokio::task::spawn_blocking(move || stage_batch(&batch_jobs, &key, &policy, Some(&cancel)))
            .await?;
    spinner.finish_and_clear();

    let mut failed = 0usize;
    for (job, result) in jobs.iter().zip(results) {
        match result {
            Ok(staged) => println!(
                "{} -> {} ({})",
                job.source.display(),
                staged.path.display(),
                staged.format
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: {e}", job.source.display());
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files failed to stage", jobs.len());
    }
    Ok(())
}

async fn cmd_unstage(
    config: &CofferConfig,
    input: &Path,
    output: Option<PathBuf>,
    unlock: &UnlockArgs,
    cancel: &CancellationToken,
) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;
    let output = match output {
        Some(p) => p,
        None => match input.extension() {
            Some(ext) if ext == "coffer" => input.with_extension(""),
            _ => PathBuf::from(format!("{}.plain", input.display())),
        },
    };

    let total = std::fs::metadata(input)
        .with_context(|| format!("stat: {}", input.display()))?
        .len();
    let pb = make_progress_bar(total, "unstage");
    let pb_task = pb.clone();
    let cancel = cancel.clone();
    let src = input.to_path_buf();
    let dest = output.clone();

    let written = tokio::task::spawn_blocking(move || {
        let on_progress = move |done: u64, total: u64| {
            pb_task.set_length(total);
            pb_task.set_position(done);
        };
        let control = StreamControl::default()
            .with_cancel(&cancel)
            .with_progress(&on_progress);
        unstage_file(&src, &dest, &key, control)
    })
    .await?;
    pb.finish_and_clear();

    println!("unstaged {} bytes -> {}", written?, output.display());
    Ok(())
}

// ── `coffer inspect` ──────────────────────────────────────────────────────────

async fn cmd_inspect(config: &CofferConfig, input: &Path, unlock: &UnlockArgs) -> Result<()> {
    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let format = sniff_format(&data);
    println!("file:    {}", input.display());
    println!("size:    {} bytes", data.len());
    println!("format:  {format}");

    match format {
        FormatKind::Streaming => {
            let header = StreamHeader::parse(&data)?;
            println!("version: {}", header.version);
            println!("chunk:   {} bytes", header.chunk_size);
            println!("chunks:  {}", header.total_chunks);
            println!("plain:   {} bytes", header.original_size);
            if header.encrypted_len() != data.len() as u64 {
                println!(
                    "warning: expected {} bytes on disk (header {STREAM_HEADER_SIZE} + chunks)",
                    header.encrypted_len()
                );
            }
        }
        FormatKind::SingleShot if unlock.is_provided() => {
            let key = unlock_vault(config, unlock).await?;
            match read_header(&data, &key) {
                Ok(header) => {
                    println!("id:      {}", header.file_id);
                    println!("name:    {}", header.original_filename);
                    println!("mime:    {}", header.mime_type);
                    println!("plain:   {} bytes", header.original_size);
                    println!("created: {:.0} (unix)", header.created_at);
                }
                Err(e) => println!("header:  unreadable as a container ({e})"),
            }
        }
        FormatKind::SingleShot => {
            println!("header:  pass --pattern or --phrase to read container metadata");
        }
    }
    Ok(())
}

// ── `coffer export` / `coffer import` ─────────────────────────────────────────

async fn cmd_export(
    config: &CofferConfig,
    dir: &Path,
    containers: Vec<PathBuf>,
    share_key: Option<&str>,
    unlock: &UnlockArgs,
) -> Result<()> {
    let key = unlock_vault(config, unlock).await?;
    let (share, generated) = match share_key {
        Some(hex_key) => (parse_share_key(hex_key)?, false),
        None => (SymmetricKey::generate()?, true),
    };

    let mut blobs = Vec::with_capacity(containers.len());
    for path in &containers {
        blobs.push(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        );
    }

    let dir = dir.to_path_buf();
    let task_share = share.clone();
    let bundle =
        tokio::task::spawn_blocking(move || export_bundle(&blobs, &dir, &key, &task_share))
            .await??;

    println!(
        "exported {} files -> {}",
        bundle.container_paths.len(),
        bundle.manifest_path.display()
    );
    println!("share key fingerprint: {}", bundle.share_key_fingerprint);
    if generated {
        let hex_key = Zeroizing::new(hex::encode(share.as_bytes()));
        println!("share key: {}", hex_key.as_str());
        eprintln!("keep the share key secret; anyone holding it can open the bundle");
    }
    Ok(())
}

async fn cmd_import(
    config: &CofferConfig,
    dir: &Path,
    share_key: &str,
    out_dir: Option<PathBuf>,
    unlock: &UnlockArgs,
) -> Result<()> {
    let share = parse_share_key(share_key)?;
    let key = unlock_vault(config, unlock).await?;
    let out_dir = out_dir.unwrap_or_else(|| vault_staging_dir(config, &key));

    let dir = dir.to_path_buf();
    let count = tokio::task::spawn_blocking(move || -> Result<usize> {
        let manifest = read_manifest(&dir, &share)?;
        tracing::info!(entries = manifest.entries.len(), "opened bundle manifest");

        let imported = import_bundle(&dir, &share, &key)?;
        for entry in &imported {
            let path = out_dir.join(format!("{}.coffer", entry.header.file_id));
            write_atomic(&path, &entry.container.to_bytes())?;
            println!(
                "{} -> {}",
                entry.header.original_filename,
                path.display()
            );
        }
        Ok(imported.len())
    })
    .await??;

    println!("imported {count} files");
    Ok(())
}

// ── `coffer config show` ──────────────────────────────────────────────────────

fn cmd_config_show(config: &CofferConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
