use clap::{Parser, Subcommand};
use redkit_core::redkit_files::{archive, ChrootService};
use redkit_core::{CoreConfig, KitService};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "redkit")]
#[command(about = "redkit upload root and kit export CLI")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a ZIP of a directory, following symlinks to their files
    Archive {
        /// Directory to archive
        dir: PathBuf,
        /// Output file (stdout if omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write parts, concatenated in order, to NAME under ROOT
    Put {
        /// Root directory
        root: PathBuf,
        /// Destination path relative to the root (trailing `/` creates a directory)
        name: String,
        /// Files whose contents are written in order
        parts: Vec<PathBuf>,
    },
    /// Show where NAME would be written under ROOT
    Resolve {
        /// Root directory
        root: PathBuf,
        /// Requested path
        name: String,
    },
    /// List kits that have a bin directory
    Kits {
        /// Kits directory (defaults to REDKIT_KITS_DIR or `kits`)
        #[arg(long)]
        kits: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Archives may go to stdout, so logs go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("redkit_files=warn".parse()?),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Archive { dir, output }) => {
            let summary = match output {
                Some(path) => {
                    let mut out = BufWriter::new(File::create(&path)?);
                    archive::archive(&dir, &mut out)?
                }
                None => {
                    let mut out = BufWriter::new(io::stdout().lock());
                    archive::archive(&dir, &mut out)?
                }
            };
            eprintln!(
                "Archived {} file(s), {} bytes",
                summary.entries, summary.bytes
            );
        }
        Some(Commands::Put { root, name, parts }) => {
            let chroot = ChrootService::new(&root)?;
            let target = chroot.resolve(&name)?;
            let files = parts
                .iter()
                .map(File::open)
                .collect::<Result<Vec<_>, _>>()?;
            match chroot.write_file(&target, files)? {
                Some(written) => println!(
                    "Wrote {} ({} part(s), {} bytes)",
                    written.path.display(),
                    written.parts,
                    written.bytes
                ),
                None => println!("Created directory {}", target.absolute().display()),
            }
        }
        Some(Commands::Resolve { root, name }) => {
            let chroot = ChrootService::new(&root)?;
            match chroot.resolve(&name) {
                Ok(path) => println!("{}", path.absolute().display()),
                Err(e) => {
                    eprintln!("Rejected: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Kits { kits }) => {
            let kits_dir = match kits {
                Some(dir) => dir,
                None => CoreConfig::from_env()?.kits_dir().to_path_buf(),
            };
            // Listing is read-only; a missing kits directory is an error.
            let service = KitService::open(&kits_dir)?;
            let names = service.list_kits()?;
            if names.is_empty() {
                println!("No kits found.");
            } else {
                for name in names {
                    println!("{}", name);
                }
            }
        }
        None => {
            println!("Use 'redkit --help' for commands");
        }
    }

    io::stdout().flush()?;
    Ok(())
}
