mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use commands::{EXIT_CACHE_ERROR, EXIT_CONFIG_ERROR, EXIT_FAILURE, EXIT_MANIFEST_ERROR};
use nah_package::PackageFormat;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "nah",
    version,
    about = "Native application host: deterministic launch contracts for native apps"
)]
struct Cli {
    /// Host configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// NAK catalog index (TOML).
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Nap,
    Nak,
}

impl From<FormatArg> for PackageFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Nap => PackageFormat::Nap,
            FormatArg::Nak => PackageFormat::Nak,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pack a directory into a NAP or NAK archive.
    Pack {
        /// Directory whose files become the payload.
        dir: PathBuf,
        /// Archive kind.
        #[arg(long, value_enum)]
        format: FormatArg,
        /// App manifest (nap) or NAK properties (nak).
        #[arg(long)]
        manifest: PathBuf,
        /// Output archive path.
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Decode an archive and show its contents.
    Inspect {
        /// Archive path.
        archive: PathBuf,
    },
    /// Add a NAK archive to the catalog index.
    Publish {
        /// NAK archive path.
        archive: PathBuf,
    },
    /// Show the NAK a manifest resolves to.
    Resolve {
        /// Path to manifest TOML file.
        #[arg(default_value = "nah.toml")]
        manifest: PathBuf,
    },
    /// Resolve and unpack the NAK a manifest needs.
    Materialize {
        /// Path to manifest TOML file.
        #[arg(default_value = "nah.toml")]
        manifest: PathBuf,
    },
    /// Install an application package under the apps root.
    Install {
        /// NAP archive path.
        archive: PathBuf,
    },
    /// List installed applications and their pinned NAKs.
    List,
    /// Remove an installed application.
    Uninstall {
        /// Application id.
        app_id: String,
    },
    /// Print the launch contract for a manifest.
    Contract {
        /// Path to manifest TOML file.
        #[arg(default_value = "nah.toml")]
        manifest: PathBuf,
        /// Use an installed app instead of a manifest file.
        #[arg(long, conflicts_with = "manifest")]
        app: Option<String>,
    },
    /// Verify every cached NAK against its completion marker.
    VerifyCache,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("NAH_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .init();

    let ctx = commands::Context {
        config: cli.config,
        catalog: cli.catalog,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Pack {
            dir,
            format,
            manifest,
            output,
        } => commands::pack::run(&dir, format.into(), &manifest, &output, ctx.json),
        Commands::Inspect { archive } => commands::inspect::run(&archive, ctx.json),
        Commands::Publish { archive } => commands::publish::run(&ctx, &archive),
        Commands::Resolve { manifest } => commands::resolve::run(&ctx, &manifest),
        Commands::Materialize { manifest } => commands::materialize::run(&ctx, &manifest),
        Commands::Install { archive } => commands::install::run(&ctx, &archive),
        Commands::List => commands::list::run(&ctx),
        Commands::Uninstall { app_id } => commands::uninstall::run(&ctx, &app_id),
        Commands::Contract { manifest, app } => {
            commands::contract::run(&ctx, &manifest, app.as_deref())
        }
        Commands::VerifyCache => commands::verify_cache::run(&ctx),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") || msg.starts_with("failed to read manifest") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("cache error:") {
        EXIT_CACHE_ERROR
    } else if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}
