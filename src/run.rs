//! Command-line entry point.

use crate::canon::target_name;
use crate::config::{Config, Flags, LOG_VAR};
use crate::converge::converge;
use crate::db::DiskStore;
use crate::dofile::DoRules;
use crate::progress::ConsoleProgress;
use crate::stamp::{stamp_path, StampMode};
use crate::work::Engine;
use crate::{ipc, signal};
use anyhow::{anyhow, bail};
use argh::FromArgs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// restamp: an incremental build tool with dependencies declared at build time.
struct Args {
    /// chdir before running
    #[argh(option, short = 'C')]
    chdir: Option<String>,

    /// build database path [default=.restamp.db]
    #[argh(option)]
    db: Option<String>,

    /// debugging tools, use "-d list" to list
    #[argh(option, short = 'd')]
    debug: Option<String>,

    /// print the script behind each build
    #[argh(switch, short = 'v')]
    verbose: bool,

    /// environment variable (e.g. VIRTUAL_ENV) that must be set to build
    #[argh(option)]
    require_env: Option<String>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Build(BuildArgs),
    Install(InstallArgs),
    Converge(ConvergeArgs),
    IfChange(IfChangeArgs),
    Stamp(StampArgs),
}

#[derive(FromArgs)]
/// Bring targets up to date.
#[argh(subcommand, name = "build")]
struct BuildArgs {
    /// targets to build
    #[argh(positional)]
    targets: Vec<String>,
}

#[derive(FromArgs)]
/// Bring the "install" target up to date.
#[argh(subcommand, name = "install")]
struct InstallArgs {}

#[derive(FromArgs)]
/// Rebuild a target until its output stops changing.
#[argh(subcommand, name = "converge")]
struct ConvergeArgs {
    /// target to converge
    #[argh(positional)]
    target: String,

    /// maximum number of rebuilds, at least 2 [default=5]
    #[argh(option, short = 'n', default = "5")]
    max_iterations: usize,

    /// compare outputs by their sorted, comment-free lines
    #[argh(switch)]
    canonical: bool,
}

#[derive(FromArgs)]
/// Declare dependencies of the running build (for use in .do scripts).
#[argh(subcommand, name = "ifchange")]
struct IfChangeArgs {
    /// dependencies
    #[argh(positional)]
    deps: Vec<String>,
}

#[derive(FromArgs)]
/// Print the stamp of each path.
#[argh(subcommand, name = "stamp")]
struct StampArgs {
    /// paths to stamp
    #[argh(positional)]
    paths: Vec<String>,

    /// content, lines or tree [default: tree for directories, else content]
    #[argh(option)]
    mode: Option<StampMode>,
}

fn init_logging(explain: bool) {
    let filter = if explain {
        EnvFilter::new("restamp=debug")
    } else {
        EnvFilter::try_from_env(LOG_VAR).unwrap_or_else(|_| EnvFilter::new("restamp=info"))
    };
    // Fails only if a subscriber is already installed, which is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn summarize(ran: usize) {
    match ran {
        // Special case: don't print numbers when no work done.
        0 => println!("restamp: no work to do"),
        1 => println!("restamp: ran 1 build, now up to date"),
        n => println!("restamp: ran {} builds, now up to date", n),
    }
}

fn build(config: &Config, targets: &[String]) -> anyhow::Result<i32> {
    if targets.is_empty() {
        bail!("no target specified");
    }
    config.check_environment()?;

    let rules = DoRules::new(config.root.clone());
    let mut store = DiskStore::open(&config.db_path)?;
    let mut progress = ConsoleProgress::new(config.verbose);
    let mut engine = Engine::new(&rules, &mut store, &mut progress);
    for target in targets {
        engine.ensure_built(&target_name(&config.root, target))?;
    }
    summarize(engine.ran());
    Ok(0)
}

fn converge_target(config: &Config, args: &ConvergeArgs) -> anyhow::Result<i32> {
    config.check_environment()?;

    let target = target_name(&config.root, &args.target);
    let mut rules = DoRules::new(config.root.clone());
    if args.canonical {
        rules.set_mode(&target, StampMode::Lines);
    }
    let mut store = DiskStore::open(&config.db_path)?;
    let mut progress = ConsoleProgress::new(config.verbose);
    let mut engine = Engine::new(&rules, &mut store, &mut progress);
    let result = converge(&mut engine, &target, args.max_iterations)?;
    println!(
        "restamp: {} converged after {} iterations ({})",
        target, result.iterations, result.stamp
    );
    Ok(0)
}

/// Inside a build script: hand the dependencies to the parent build.
/// Outside one: just build them.
fn ifchange(flags: Flags, deps: &[String]) -> anyhow::Result<i32> {
    let socket = match std::env::var_os(ipc::SOCKET_VAR) {
        Some(socket) => socket,
        None => {
            init_logging(flags.explain);
            return build(&Config::from_env(flags)?, deps);
        }
    };
    let cwd = std::env::current_dir().map_err(|err| anyhow!("getcwd: {}", err))?;
    let deps: Vec<String> = deps
        .iter()
        .map(|dep| cwd.join(dep).to_string_lossy().into_owned())
        .collect();
    ipc::request(Path::new(&socket), &deps)?;
    Ok(0)
}

fn stamp(args: &StampArgs) -> anyhow::Result<i32> {
    for path in &args.paths {
        let stamp =
            stamp_path(Path::new(path), args.mode).map_err(|err| anyhow!("{}: {}", path, err))?;
        println!("{}  {}", stamp, path);
    }
    Ok(0)
}

/// Run the command line, returning the process exit code.
pub fn run() -> anyhow::Result<i32> {
    let args: Args = argh::from_env();

    let mut explain = false;
    if let Some(debug) = &args.debug {
        match debug.as_str() {
            "list" => {
                println!("debug tools:");
                println!("  explain  print why each target is or isn't rebuilt");
                return Ok(1);
            }
            "explain" => explain = true,
            _ => bail!("unknown -d {:?}, use -d list to list", debug),
        }
    }

    if let Some(dir) = &args.chdir {
        let dir = Path::new(dir);
        std::env::set_current_dir(dir).map_err(|err| anyhow!("chdir {:?}: {}", dir, err))?;
    }

    let flags = Flags {
        db: args.db,
        require_env: args.require_env,
        verbose: args.verbose,
        explain,
    };
    match args.command {
        Command::IfChange(sub) => ifchange(flags, &sub.deps),
        Command::Stamp(sub) => stamp(&sub),
        Command::Build(sub) => {
            init_logging(flags.explain);
            signal::register_sigint();
            build(&Config::from_env(flags)?, &sub.targets)
        }
        Command::Install(_) => {
            init_logging(flags.explain);
            signal::register_sigint();
            build(&Config::from_env(flags)?, &["install".to_owned()])
        }
        Command::Converge(sub) => {
            init_logging(flags.explain);
            signal::register_sigint();
            converge_target(&Config::from_env(flags)?, &sub)
        }
    }
}
