//! zero-common - storage maintenance and token CLI
//!
//! Drives the configured uploader from the command line: upload a file, list,
//! copy and delete keys, or mint a JWT with the configured secret.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use zero_common::auth::{JwtIssuer, TokenOption};
use zero_common::config::{AppConfig, ConfigLoader};
use zero_common::{build_uploader, logging};

/// zero-common - storage maintenance and token CLI
#[derive(Parser, Debug)]
#[command(name = "zero-common")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file. Without it, defaults plus ZC_* overrides apply
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a local file to a key
    Put { key: String, file: PathBuf },

    /// List keys under a directory
    Ls {
        dir: String,
        /// Keep only keys ending in this suffix (repeatable)
        #[arg(long)]
        suffix: Vec<String>,
    },

    /// Delete one key
    Rm { key: String },

    /// Delete a directory, keeping excluded sub-paths
    Rmdir {
        dir: String,
        /// Sub-path to keep (repeatable)
        #[arg(long)]
        exclude: Vec<String>,
    },

    /// Copy every key under one directory to another
    Cp { src: String, dest: String },

    /// Mint a JWT with the configured secret
    Token {
        /// Extra claim as key=value; JSON values are parsed (repeatable)
        #[arg(long)]
        claim: Vec<String>,
    },
}

fn parse_claim(raw: &str) -> anyhow::Result<TokenOption> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("claim must be key=value, got {:?}", raw))?;
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok(TokenOption::new(key, value))
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ConfigLoader::from_yaml_str("{}")?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_ref())?;
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    logging::init(&config.log)?;

    info!("Starting zero-common v{}", zero_common::VERSION);

    if let Command::Token { claim } = &args.command {
        let jwt = config
            .jwt
            .as_ref()
            .context("jwt section is required to mint tokens")?;
        let options = claim
            .iter()
            .map(|raw| parse_claim(raw))
            .collect::<anyhow::Result<Vec<_>>>()?;
        println!("{}", JwtIssuer::new(jwt).issue(&options)?);
        return Ok(());
    }

    let uploader = build_uploader(&config.storage).await?;
    info!(driver = uploader.driver(), "Storage ready");

    match args.command {
        Command::Put { key, file } => {
            let mut source = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("failed to open {}", file.display()))?;
            let key = uploader.upload_file(&key, &mut source).await?;
            println!("{}", key);
        }
        Command::Ls { dir, suffix } => {
            let filters: Vec<&str> = suffix.iter().map(String::as_str).collect();
            for key in uploader.list_files(&dir, &filters).await? {
                println!("{}", key);
            }
        }
        Command::Rm { key } => {
            uploader.delete_file(&key).await?;
        }
        Command::Rmdir { dir, exclude } => {
            let exclude: Vec<&str> = exclude.iter().map(String::as_str).collect();
            uploader.delete_folder(&dir, &exclude).await?;
        }
        Command::Cp { src, dest } => {
            uploader.copy_folder(&src, &dest).await?;
        }
        Command::Token { .. } => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_claim() {
        let option = parse_claim("userId=42").unwrap();
        assert_eq!(option.key, "userId");
        assert_eq!(option.value, serde_json::json!(42));

        let option = parse_claim("role=admin").unwrap();
        assert_eq!(option.value, serde_json::json!("admin"));

        assert!(parse_claim("novalue").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "zero-common",
            "rmdir",
            "users/1",
            "--exclude",
            "avatar",
            "--exclude",
            "docs",
        ])
        .unwrap();
        match args.command {
            Command::Rmdir { dir, exclude } => {
                assert_eq!(dir, "users/1");
                assert_eq!(exclude, vec!["avatar", "docs"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
