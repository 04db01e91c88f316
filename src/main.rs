use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tbpkg::commands::{self, Action, InstallOptions};
use tbpkg::config::{Config, Overrides};
use tbpkg::installer::DEFAULT_CONCURRENCY;
use tbpkg::source::SourceSpec;
use tbpkg::version::Version;
use tokio_util::sync::CancellationToken;

/// tbpkg - Triforce Blitz generator package manager
///
/// Downloads randomizer generator releases, caches them and installs them
/// into a per-version directory layout.
///
/// If the GITHUB_TOKEN environment variable is set, it will be used for authentication.
///
/// Examples:
///   tbpkg list                        # Show every available generator
///   tbpkg install                     # Install every generator on the blitz branch
///   tbpkg install 7.1.0-blitz-0.43    # Install one generator
#[derive(Parser, Debug)]
#[command(author, version = env!("TBPKG_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Generator install directory (also via TRIFORCEBLITZ_GENERATORS_DIR)
    #[arg(long = "generators-dir", value_name = "PATH", global = true)]
    generators_dir: Option<PathBuf>,

    /// Package cache directory (also via TRIFORCEBLITZ_PACKAGE_CACHE_DIR)
    #[arg(long = "cache-dir", value_name = "PATH", global = true)]
    cache_dir: Option<PathBuf>,

    /// Lock file path (also via TRIFORCEBLITZ_LOCK_FILE)
    #[arg(long = "lock-file", value_name = "PATH", global = true)]
    lock_file: Option<PathBuf>,

    /// GitHub API URL (defaults to https://api.github.com)
    #[arg(long = "api-url", value_name = "URL", global = true)]
    api_url: Option<String>,

    /// Package source, `github:OWNER/REPO` or `local:PATH`. Repeat to add
    /// fallbacks; earlier sources are tried first.
    #[arg(long = "source", value_name = "SOURCE", global = true)]
    sources: Vec<SourceSpec>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List available generators
    List,

    /// Install generators
    Install(InstallArgs),
}

#[derive(clap::Args, Debug)]
struct InstallArgs {
    /// Comma-separated branches to install when no versions are given
    #[arg(short = 'b', value_name = "BRANCHES", default_value = "blitz", value_delimiter = ',')]
    branches: Vec<String>,

    /// Remove downloaded packages from the cache after installing
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Number of generators installed at the same time (0 = no limit)
    #[arg(short = 'j', long = "jobs", default_value_t = DEFAULT_CONCURRENCY)]
    jobs: usize,

    /// Versions to install, e.g. 7.1.0-blitz-0.43
    #[arg(value_name = "VERSION")]
    versions: Vec<Version>,
}

impl From<InstallArgs> for InstallOptions {
    fn from(args: InstallArgs) -> Self {
        Self {
            versions: args.versions,
            branches: args.branches,
            no_cache: args.no_cache,
            jobs: args.jobs,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = Arc::new(tbpkg::runtime::RealRuntime);

    let overrides = Overrides {
        generators_dir: cli.generators_dir,
        cache_dir: cli.cache_dir,
        lock_file: cli.lock_file,
        api_url: cli.api_url,
        sources: cli.sources,
    };
    let config = Config::new(runtime, overrides)?;

    let action = match cli.command {
        Commands::List => Action::List,
        Commands::Install(args) => Action::Install(args.into()),
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if commands::run(config, action, cancel).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_list_parsing() {
        let cli = Cli::try_parse_from(["tbpkg", "list"]).unwrap();
        assert!(matches!(cli.command, Commands::List));
        assert!(cli.sources.is_empty());
        assert_eq!(cli.generators_dir, None);
    }

    #[test]
    fn test_cli_install_defaults() {
        let cli = Cli::try_parse_from(["tbpkg", "install"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.branches, vec!["blitz"]);
                assert!(!args.no_cache);
                assert_eq!(args.jobs, DEFAULT_CONCURRENCY);
                assert!(args.versions.is_empty());
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from([
            "tbpkg",
            "install",
            "-b",
            "blitz,dev",
            "--no-cache",
            "-j",
            "0",
            "7.1.0-blitz-0.43",
            "7.1.0-blitz-0.44",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.branches, vec!["blitz", "dev"]);
                assert!(args.no_cache);
                assert_eq!(args.jobs, 0);
                assert_eq!(
                    args.versions,
                    vec![
                        "7.1.0-blitz-0.43".parse::<Version>().unwrap(),
                        "7.1.0-blitz-0.44".parse::<Version>().unwrap()
                    ]
                );
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_rejects_invalid_version() {
        assert!(Cli::try_parse_from(["tbpkg", "install", "7.1"]).is_err());
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "tbpkg",
            "--generators-dir",
            "/srv/generators",
            "list",
            "--source",
            "local:/srv/mirror",
            "--source",
            "github:Elagatua/OoT-Randomizer",
        ])
        .unwrap();
        assert_eq!(cli.generators_dir, Some(PathBuf::from("/srv/generators")));
        assert_eq!(cli.sources.len(), 2);
        assert_eq!(cli.sources[0].to_string(), "local:/srv/mirror");
    }

    #[test]
    fn test_cli_rejects_bad_source() {
        assert!(Cli::try_parse_from(["tbpkg", "--source", "ftp:x", "list"]).is_err());
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        assert!(Cli::try_parse_from(["tbpkg"]).is_err());
    }
}
