#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tenant_keyset::{KeyPurpose, Keyset};

#[derive(Parser)]
#[command(name = "keyset-tool")]
#[command(about = "Create and rotate the master keysets used by profile-service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a new keyset with a single primary key.
    Generate(GenerateArgs),
    /// Add a fresh enabled key, optionally promoting it to primary.
    AddKey(AddKeyArgs),
    Promote(KeyArgs),
    Enable(KeyArgs),
    Disable(KeyArgs),
    /// Wipe a key's material. The id stays reserved.
    Destroy(KeyArgs),
    /// Print key ids and statuses; never prints material.
    Show(ShowArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum Purpose {
    Aead,
    Mac,
}

impl From<Purpose> for KeyPurpose {
    fn from(value: Purpose) -> Self {
        match value {
            Purpose::Aead => KeyPurpose::Aead,
            Purpose::Mac => KeyPurpose::Mac,
        }
    }
}

#[derive(Args)]
struct GenerateArgs {
    #[arg(long, value_enum)]
    purpose: Purpose,
    #[arg(long)]
    out: PathBuf,
    /// Replace an existing file.
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct AddKeyArgs {
    #[arg(long)]
    keyset: PathBuf,
    #[arg(long)]
    promote: bool,
}

#[derive(Args)]
struct KeyArgs {
    #[arg(long)]
    keyset: PathBuf,
    #[arg(long)]
    key_id: u32,
}

#[derive(Args)]
struct ShowArgs {
    #[arg(long)]
    keyset: PathBuf,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Generate(args) => run_generate(&args),
        Commands::AddKey(args) => run_add_key(&args),
        Commands::Promote(args) => update(&args.keyset, |keyset| Ok(keyset.promote(args.key_id)?)),
        Commands::Enable(args) => update(&args.keyset, |keyset| Ok(keyset.enable(args.key_id)?)),
        Commands::Disable(args) => update(&args.keyset, |keyset| Ok(keyset.disable(args.key_id)?)),
        Commands::Destroy(args) => update(&args.keyset, |keyset| Ok(keyset.destroy(args.key_id)?)),
        Commands::Show(args) => {
            let keyset = load(&args.keyset)?;
            print_summary(&keyset)
        }
    }
}

fn run_generate(args: &GenerateArgs) -> Result<()> {
    if args.out.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to replace it",
            args.out.display()
        );
    }
    let keyset = Keyset::generate(args.purpose.into());
    keyset
        .save(&args.out)
        .with_context(|| format!("write {}", args.out.display()))?;
    print_summary(&keyset)
}

fn run_add_key(args: &AddKeyArgs) -> Result<()> {
    update(&args.keyset, |keyset| {
        let key_id = keyset.add_key();
        if args.promote {
            keyset.promote(key_id)?;
        }
        Ok(())
    })
}

fn load(path: &Path) -> Result<Keyset> {
    Keyset::load(path).with_context(|| format!("load {}", path.display()))
}

fn update(path: &Path, change: impl FnOnce(&mut Keyset) -> Result<()>) -> Result<()> {
    let mut keyset = load(path)?;
    change(&mut keyset)?;
    keyset.validate()?;
    keyset
        .save(path)
        .with_context(|| format!("write {}", path.display()))?;
    print_summary(&keyset)
}

fn print_summary(keyset: &Keyset) -> Result<()> {
    let summary = json!({
        "purpose": keyset.purpose().as_str(),
        "primary_key_id": keyset.primary_key_id(),
        "keys": keyset
            .keys()
            .iter()
            .map(|key| json!({ "key_id": key.key_id(), "status": key.status() }))
            .collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
