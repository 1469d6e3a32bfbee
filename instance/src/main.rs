mod cmd {
    pub mod exec;
    pub mod id;
    pub mod process;
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use instance::config::load_config;
use instance::{InstanceConfig, QuitHandle};

#[derive(Clone, Debug)]
struct Ctx {
    config: InstanceConfig,
}

#[derive(Parser)]
#[command(name = "single-instance")]
struct Cli {
    /// Config file (default: <config dir>/single-instance/instance.toml, if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Application name the instance id is derived from.
    #[arg(long, global = true)]
    app_name: Option<String>,

    #[arg(long, global = true)]
    vendor: Option<String>,

    /// One instance per machine instead of one per user.
    #[arg(long, global = true)]
    global: bool,

    /// Take over as master when the running master does not answer.
    #[arg(long, global = true)]
    auto_recovery: bool,

    /// Directory for the lock file and socket.
    #[arg(long, global = true)]
    runtime_dir: Option<PathBuf>,

    /// Handshake deadline in milliseconds.
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Become master and print forwarded arguments until one starts with --quit,
    /// or forward ours to the running master.
    Run {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Same as `run`, driven by a hand-written loop instead of `single_exec`.
    Process {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Print the instance id, its lock/socket paths and whether a master holds the lock.
    ///
    /// The check never creates the lock file, but when no master runs it holds
    /// the lock for an instant; a launch racing it may see a busy lock.
    Id,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Enable logging when the user sets RUST_LOG (kept quiet by default).
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();

    let cli = Cli::parse();
    let ctx = Ctx {
        config: build_config(&cli)?,
    };

    let code = match cli.cmd {
        Commands::Run { args } => cmd::exec::run_exec(&ctx, with_program_name(args)).await?,
        Commands::Process { args } => {
            cmd::process::run_process(&ctx, with_program_name(args)).await?
        }
        Commands::Id => {
            cmd::id::print_id(&ctx)?;
            0
        }
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<InstanceConfig> {
    let mut config = load_config(cli.config.as_deref())?;
    if let Some(name) = &cli.app_name {
        config.app_name = name.clone();
    }
    if let Some(vendor) = &cli.vendor {
        config.vendor = vendor.clone();
    }
    if cli.global {
        config.global = true;
    }
    if cli.auto_recovery {
        config.auto_recovery = true;
    }
    if let Some(dir) = &cli.runtime_dir {
        config.runtime_dir = Some(dir.clone());
    }
    if let Some(ms) = cli.timeout_ms {
        config.handshake_timeout_ms = ms;
    }
    Ok(config)
}

// Forward a plain argv: program name first, user arguments from index 1.
fn with_program_name(args: Vec<String>) -> Vec<String> {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "single-instance".to_string());
    std::iter::once(program).chain(args).collect()
}

fn is_quit_request(args: &[String]) -> bool {
    matches!(args.get(1).map(String::as_str), Some("--quit") | Some("-quit"))
}

fn quit_on_ctrl_c(quit: QuitHandle) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            quit.quit(130);
        }
    });
}
