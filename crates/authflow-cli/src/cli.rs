use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

/// Output format for CLI commands
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        matches!(self, OutputFormat::Json)
    }
}

#[derive(Parser)]
#[command(name = "authflow")]
#[command(version, about = "Authflow - batch OAuth authorization through the CPAMC console")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.config/authflow/config.toml)
    #[arg(long, global = true, env = "AUTHFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mirror logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Authorize every account in a file through the console
    Run(RunArgs),

    /// Scan credential artifacts and merge them into the rotation index
    Rotate(RotateArgs),

    /// Normalize an account file and list what would be processed
    Accounts(AccountsArgs),

    /// Check that a usable Chromium is available
    Probe(ProbeArgs),

    /// Configuration inspection
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Console connection overrides shared by commands that talk to the console.
#[derive(Args, Debug, Default)]
pub struct ConsoleArgs {
    /// Console base URL
    #[arg(long, env = "AUTHFLOW_CONSOLE_URL")]
    pub console_url: Option<String>,

    /// Management secret key (prompted when absent and stdin is a terminal)
    #[arg(long, env = "AUTHFLOW_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Directory the console writes credential artifacts into
    #[arg(long, env = "AUTHFLOW_AUTH_DIR")]
    pub auth_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Account file (JSON or line-based)
    #[arg(short, long)]
    pub accounts: PathBuf,

    /// Plan tag for accounts that carry none
    #[arg(long)]
    pub plan: Option<String>,

    /// Process at most this many accounts
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip accounts that already have a credential artifact
    #[arg(long)]
    pub skip_existing: bool,

    /// Report path (defaults to ~/.authflow/reports/run-<timestamp>.json)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Run Chromium headless
    #[arg(long, conflicts_with = "headed")]
    pub headless: bool,

    /// Run Chromium with a visible window
    #[arg(long)]
    pub headed: bool,

    /// Attach to a running Chromium instead of launching one
    #[arg(long, env = "AUTHFLOW_CDP_URL")]
    pub cdp_url: Option<String>,

    /// Save screenshots of failed attempts
    #[arg(long)]
    pub screenshots: bool,

    #[command(flatten)]
    pub console: ConsoleArgs,
}

#[derive(Args, Debug)]
pub struct RotateArgs {
    /// Directory holding credential artifacts
    #[arg(long, env = "AUTHFLOW_AUTH_DIR")]
    pub auth_dir: Option<PathBuf>,

    /// Index path (defaults to ~/.authflow/rotate-index.json)
    #[arg(long)]
    pub index: Option<PathBuf>,

    /// List every indexed account
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug)]
pub struct AccountsArgs {
    /// Account file (JSON or line-based)
    #[arg(short, long)]
    pub accounts: PathBuf,

    /// Plan tag for accounts that carry none
    #[arg(long)]
    pub plan: Option<String>,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Probe a running Chromium's DevTools endpoint instead
    #[arg(long, env = "AUTHFLOW_CDP_URL")]
    pub cdp_url: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,

    /// Print the default config file location
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "authflow",
            "run",
            "--accounts",
            "accounts.txt",
            "--limit",
            "3",
            "--skip-existing",
            "--headed",
        ])
        .expect("parse run");
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.accounts, PathBuf::from("accounts.txt"));
        assert_eq!(args.limit, Some(3));
        assert!(args.skip_existing);
        assert!(args.headed);
        assert!(!args.headless);
    }

    #[test]
    fn headless_and_headed_conflict() {
        let result = Cli::try_parse_from([
            "authflow",
            "run",
            "-a",
            "accounts.txt",
            "--headless",
            "--headed",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn run_requires_accounts() {
        assert!(Cli::try_parse_from(["authflow", "run"]).is_err());
    }

    #[test]
    fn parses_rotate_command() {
        let cli = Cli::try_parse_from(["authflow", "rotate", "--index", "idx.json", "--list"])
            .expect("parse rotate");
        let Commands::Rotate(args) = cli.command else {
            panic!("expected rotate");
        };
        assert_eq!(args.index, Some(PathBuf::from("idx.json")));
        assert!(args.list);
    }

    #[test]
    fn parses_global_format() {
        let cli = Cli::try_parse_from(["authflow", "probe", "--format", "json"])
            .expect("parse probe");
        assert!(cli.format.is_json());
        assert!(matches!(cli.command, Commands::Probe(_)));
    }

    #[test]
    fn parses_config_show_command() {
        let cli = Cli::try_parse_from(["authflow", "config", "show"]).expect("parse config show");
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: ConfigCommands::Show
            }
        ));
    }
}
