mod output;
mod telemetry;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use credstore_aws::{AwsProviderConfig, BackendComponents, build_backend_with};
use credstore_core::{
    Credstore, EncryptionContext, KeyManagement, RecordBackend, StoreConfig, Version,
};
use output::{OutputFormat, TableWriter, print_secret};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

type Client = Credstore<Box<dyn RecordBackend>, Box<dyn KeyManagement>>;

#[derive(Parser, Debug)]
#[command(
    name = "credstore",
    version,
    about = "Store and retrieve KMS-encrypted secrets in DynamoDB"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// DynamoDB table holding the secrets.
    #[arg(long, short = 't', global = true, env = "CREDSTORE_TABLE")]
    table: Option<String>,
    /// KMS key id or alias used for new writes.
    #[arg(long, short = 'k', global = true, env = "CREDSTORE_KEY_ALIAS")]
    alias: Option<String>,
    /// Encryption context pair, repeatable.
    #[arg(
        long = "enc-context",
        short = 'E',
        global = true,
        value_name = "KEY:VALUE",
        value_parser = parse_context_pair
    )]
    enc_context: Vec<(String, String)>,
    #[arg(long, short = 'o', global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
    /// Shorthand for `--format csv`.
    #[arg(long, short = 'c', global = true)]
    csv: bool,
    /// AWS region, overriding the SDK default chain.
    #[arg(long, short = 'r', global = true, env = "CREDSTORE_AWS_REGION")]
    region: Option<String>,
    #[arg(long, short = 'd', global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the secret table and wait for it to become active.
    Setup {
        #[arg(long)]
        read: Option<i64>,
        #[arg(long)]
        write: Option<i64>,
    },
    /// Print one secret; version 0 or none means the newest.
    Get {
        name: String,
        version: Option<u64>,
        /// Do not append a newline.
        #[arg(long, short = 'n')]
        noline: bool,
    },
    /// Decrypt every secret in the table.
    Getall {
        #[arg(long, short = 'a')]
        all: bool,
    },
    /// List secret names and versions without decrypting.
    List {
        #[arg(long, short = 'a')]
        all: bool,
    },
    /// Store a secret; version 0 or none means the next free one.
    Put {
        name: String,
        value: String,
        version: Option<u64>,
    },
    /// Store the contents of a file as a secret.
    PutFile {
        name: String,
        path: PathBuf,
        version: Option<u64>,
    },
    /// Delete every version of a secret.
    Delete { name: String },
}

fn parse_context_pair(raw: &str) -> Result<(String, String), String> {
    EncryptionContext::parse_pair(raw).map_err(|err| err.to_string())
}

/// Effective settings after flags are laid over the environment.
#[derive(Debug)]
struct Settings {
    store: StoreConfig,
    aws: AwsProviderConfig,
    context: EncryptionContext,
    format: OutputFormat,
}

impl Settings {
    fn resolve(global: &GlobalArgs) -> Self {
        let mut store = StoreConfig::from_env();
        if let Some(table) = global.table.clone() {
            store.table = table;
        }
        if let Some(alias) = global.alias.clone() {
            store.key_alias = alias;
        }

        let mut aws = AwsProviderConfig::from_env();
        if global.region.is_some() {
            aws.region = global.region.clone();
        }

        Self {
            store,
            aws,
            context: global.enc_context.iter().cloned().collect(),
            format: if global.csv {
                OutputFormat::Csv
            } else {
                global.format
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = telemetry::init(cli.global.debug) {
        eprintln!("failed to initialise logging: {err:#}");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::resolve(&cli.global);
    let client = connect(&settings).await?;
    let table = settings.store.table.as_str();
    let mut stdout = io::stdout().lock();

    match cli.command {
        Command::Setup { read, write } => {
            let read = read.unwrap_or(settings.store.read_capacity);
            let write = write.unwrap_or(settings.store.write_capacity);
            client
                .setup(table, read, write)
                .await
                .with_context(|| format!("failed to set up table {table}"))?;
            info!(table, "table is active");
        }
        Command::Get {
            name,
            version,
            noline,
        } => {
            let secret = match version.unwrap_or(0) {
                0 => client.get_highest_secret(table, &name, &settings.context).await,
                v => {
                    client
                        .get_secret(table, &name, Version::new(v)?, &settings.context)
                        .await
                }
            }
            .with_context(|| format!("failed to get secret {name}"))?;
            print_secret(&mut stdout, &secret.secret(), noline)?;
        }
        Command::Getall { all } => {
            let secrets = client
                .get_all_secrets(table, all, &settings.context)
                .await
                .context("failed to get secrets")?;
            let mut out = if all {
                TableWriter::new(["Name", "Version", "Secret"])
            } else {
                TableWriter::new(["Name", "Secret"])
            };
            for secret in &secrets {
                let value = secret.secret().into_owned();
                if all {
                    out.push([secret.name().to_string(), secret.version().to_string(), value]);
                } else {
                    out.push([secret.name().to_string(), value]);
                }
            }
            out.render(settings.format, &mut stdout)?;
        }
        Command::List { all } => {
            let listings = client
                .list_secrets(table, all)
                .await
                .context("failed to list secrets")?;
            let mut out = TableWriter::new(["Name", "Version", "Created-At"]);
            for listing in &listings {
                out.push([
                    listing.name.clone(),
                    listing.version.clone(),
                    listing.created_at_display(),
                ]);
            }
            out.render(settings.format, &mut stdout)?;
        }
        Command::Put {
            name,
            value,
            version,
        } => {
            store_secret(&client, &settings, &name, value.as_bytes(), version).await?;
        }
        Command::PutFile {
            name,
            path,
            version,
        } => {
            let contents = fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            store_secret(&client, &settings, &name, &contents, version).await?;
        }
        Command::Delete { name } => {
            let deleted = client
                .delete_secret(table, &name)
                .await
                .with_context(|| format!("failed to delete secret {name}"))?;
            info!(table, name = %name, versions = deleted.len(), "deleted secret");
        }
    }

    stdout.flush()?;
    Ok(())
}

async fn connect(settings: &Settings) -> Result<Client> {
    let BackendComponents {
        backend,
        key_provider,
    } = build_backend_with(settings.aws.clone())
        .await
        .context("failed to initialise aws clients")?;
    Ok(Credstore::from_config(backend, key_provider, &settings.store))
}

async fn store_secret(
    client: &Client,
    settings: &Settings,
    name: &str,
    plaintext: &[u8],
    version: Option<u64>,
) -> Result<()> {
    let version = client
        .put_secret(
            &settings.store.table,
            &settings.store.key_alias,
            name,
            plaintext,
            version.unwrap_or(0),
            &settings.context,
        )
        .await
        .with_context(|| format!("failed to store secret {name}"))?;
    info!(name, version = %version, "secret has been stored");
    Ok(())
}
