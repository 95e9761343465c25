use clap::{Parser, Subcommand};
use content_seal::config::{self, SealConfig};
use content_seal::manifest::Manifest;
use content_seal::pipeline::{self, Mode, PipelineError};
use content_seal::{output, verify};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "content-seal")]
#[command(about = "Sanitize a static site and publish it under content-addressed names")]
#[command(long_about = "\
Sanitize a static site and publish it under content-addressed names

Markdown and HTML are checked against an allowlist policy. Anything critical
(script, iframe, event handlers, javascript: URLs, ...) quarantines the file
and aborts the run before anything is written. Every other asset is published
as assets/<dir>/<name>-<hash>.<ext>, references are rewritten to match, and an
integrity manifest records the SHA-256 of every published file.

Layout:

  content/                       dist/
  ├── seal.toml      (policy)    ├── index.html
  ├── index.html           →     ├── about.md
  ├── about.md                   ├── assets/
  ├── style.css                  │   ├── style-3f2a9c01be.css
  └── img/logo.png               │   └── img/logo-77e0c2d4aa.png
                                 └── integrity-manifest.json

Exit codes:
  0  published, no warnings
  1  published with warnings (stripped markup, unresolved references, orphans)
  2  quarantine, hash collision, verification failure or any other error

Run 'content-seal gen-config' to generate a documented seal.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Source content directory
    #[arg(long, default_value = "content", global = true)]
    source: PathBuf,

    /// Output directory
    #[arg(long, default_value = "dist", global = true)]
    output: PathBuf,

    /// Policy file (default: seal.toml in the source directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline and publish to the output directory
    Build,
    /// Run the pipeline without writing anything
    Check,
    /// Verify a published tree against its integrity manifest
    Verify {
        /// Manifest to verify against (default: the one inside --output)
        #[arg(long)]
        manifest: Option<PathBuf>,
    },
    /// Print a stock seal.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<u8, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build => {
            let config = config::load_config(&cli.source, cli.config.as_deref())?;
            println!("==> Building {} → {}", cli.source.display(), cli.output.display());
            run_pipeline(&cli.source, &cli.output, &config, Mode::Build)
        }
        Command::Check => {
            let config = config::load_config(&cli.source, cli.config.as_deref())?;
            println!("==> Checking {}", cli.source.display());
            run_pipeline(&cli.source, &cli.output, &config, Mode::Check)
        }
        Command::Verify { manifest } => {
            let config = config::load_config(&cli.source, cli.config.as_deref())?;
            let manifest_path =
                manifest.unwrap_or_else(|| cli.output.join(&config.manifest.file_name));
            println!(
                "==> Verifying {} against {}",
                cli.output.display(),
                manifest_path.display()
            );
            let loaded = Manifest::load(&manifest_path)?;
            let manifest_rel = relative_to(&manifest_path, &cli.output);
            let report = verify::verify(
                &cli.output,
                &loaded,
                manifest_rel.as_deref(),
                &config.verify,
            )?;
            output::print_verification(&report);
            Ok(report.exit_code())
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(0)
        }
    }
}

fn run_pipeline(
    source: &Path,
    output: &Path,
    config: &SealConfig,
    mode: Mode,
) -> Result<u8, Box<dyn std::error::Error>> {
    match pipeline::run(source, output, config, mode) {
        Ok(report) => {
            output::print_pipeline_report(&report, &config.manifest.file_name);
            match mode {
                Mode::Build => println!("==> Build complete: {}", output.display()),
                Mode::Check if report.exit_code() == 0 => println!("==> Content is valid"),
                Mode::Check => println!("==> Content is valid, with warnings"),
            }
            Ok(report.exit_code())
        }
        Err(PipelineError::Quarantined { files, violations }) => {
            output::print_quarantine(&files, &violations);
            println!("==> Aborted: nothing was published");
            Ok(2)
        }
        Err(e) => Err(e.into()),
    }
}

/// `path` relative to `root` as a `/`-separated string, if it lies inside.
fn relative_to(path: &Path, root: &Path) -> Option<String> {
    let path = path.canonicalize().ok()?;
    let root = root.canonicalize().ok()?;
    let rel = path.strip_prefix(&root).ok()?;
    let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
