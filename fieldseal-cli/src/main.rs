//! `fieldseal` CLI tool for key management and column operations.

#![warn(clippy::pedantic, clippy::nursery)]

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use fieldseal::blind_index::TrimLowercase;
use fieldseal::compression::CompressionConfig;
use fieldseal::key_provider::KeyProvider;
use fieldseal::Cipher;
use fieldseal_key_file::FileKeyProvider;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fieldseal")]
#[command(about = "Column-level searchable encryption CLI", long_about = None)]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a master key in a key directory
    Keygen {
        /// Key directory, created if missing
        #[arg(short, long, default_value = "./keys")]
        dir: PathBuf,
        /// Id of the new key; without it an empty directory gets `v1`
        #[arg(long)]
        id: Option<String>,
        /// Make the new key the default for sealing
        #[arg(long)]
        current: bool,
    },
    /// Seal a value and print it as hex
    Seal {
        /// Key directory
        #[arg(short, long)]
        keys: PathBuf,
        /// Seal under this key instead of the current one
        #[arg(long)]
        key_id: Option<String>,
        /// Never compress
        #[arg(long)]
        no_compress: bool,
        /// Plaintext
        text: String,
    },
    /// Open a hex-encoded sealed value
    Open {
        /// Key directory
        #[arg(short, long)]
        keys: PathBuf,
        /// Sealed value as hex
        sealed: String,
    },
    /// Print the blind index of a value under the current key
    Index {
        /// Key directory
        #[arg(short, long)]
        keys: PathBuf,
        /// Trim and lowercase before indexing
        #[arg(long)]
        normalize: bool,
        /// Value to index
        text: String,
    },
    /// Re-seal a hex-encoded value under the current key
    Rotate {
        /// Key directory
        #[arg(short, long)]
        keys: PathBuf,
        /// Sealed value as hex
        sealed: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen { dir, id, current } => keygen(&dir, id.as_deref(), current),
        Commands::Seal {
            keys,
            key_id,
            no_compress,
            text,
        } => {
            let mut builder = Cipher::builder();
            if no_compress {
                builder = builder.compression(CompressionConfig::disabled());
            }
            let cipher = builder.with_provider(&open_provider(&keys)?)?.build()?;

            let sealed = match key_id {
                Some(key_id) => cipher.seal_with_key(&key_id, text.as_bytes())?,
                None => cipher.seal(text.as_bytes())?,
            };
            println!("{}", hex::encode(sealed));
            Ok(())
        }
        Commands::Open { keys, sealed } => {
            let cipher = load_cipher(&keys)?;
            let plaintext = cipher.open(&decode_sealed(&sealed)?)?;
            match std::str::from_utf8(&plaintext) {
                Ok(text) => println!("{text}"),
                Err(_) => println!("{}", hex::encode(&plaintext)),
            }
            Ok(())
        }
        Commands::Index {
            keys,
            normalize,
            text,
        } => {
            let mut builder = Cipher::builder();
            if normalize {
                builder = builder.normalizer(TrimLowercase);
            }
            let cipher = builder.with_provider(&open_provider(&keys)?)?.build()?;
            println!("{}", cipher.blind_index(text.as_bytes())?);
            Ok(())
        }
        Commands::Rotate { keys, sealed } => {
            let cipher = load_cipher(&keys)?;
            let sealed = decode_sealed(&sealed)?;
            if !cipher.needs_rotation(&sealed)? {
                tracing::info!(key_id = cipher.default_key_id(), "value already under current key");
            }
            println!("{}", hex::encode(cipher.rotate(&sealed)?));
            Ok(())
        }
    }
}

fn keygen(dir: &Path, id: Option<&str>, current: bool) -> anyhow::Result<()> {
    let provider = match id {
        None => {
            if current {
                bail!("--current requires --id");
            }
            FileKeyProvider::init(dir)?
        }
        Some(id) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating key directory {}", dir.display()))?;
            let provider = FileKeyProvider::new(dir)?;
            provider.create_key(id)?;
            if current || provider.default_key_id()?.is_none() {
                provider.set_current(id)?;
            }
            provider
        }
    };

    let default = provider.default_key_id()?.unwrap_or_default();
    for key_id in provider.key_ids()? {
        let marker = if key_id == default { " (current)" } else { "" };
        println!("{key_id}{marker}");
    }
    Ok(())
}

fn open_provider(dir: &Path) -> anyhow::Result<FileKeyProvider> {
    FileKeyProvider::new(dir).with_context(|| format!("opening key directory {}", dir.display()))
}

fn load_cipher(dir: &Path) -> anyhow::Result<Cipher> {
    Ok(Cipher::builder().with_provider(&open_provider(dir)?)?.build()?)
}

fn decode_sealed(input: &str) -> anyhow::Result<Vec<u8>> {
    hex::decode(input.trim()).context("sealed value is not valid hex")
}
