//! `mirao-dm` command line entry point.
//!
//! Drives a simulated MIRAO 52-e through the same session, property and actor
//! layers a control host would use.
//!
//! Script lines (`#` starts a comment):
//!
//! ```text
//! init
//! Z20 = 0.25
//! Set diversity preferences path = MIRAO/init/Diversity_prefs_v2.xml
//! ApplyZernikes = 1
//! get Z20
//! status
//! shutdown
//! ```

use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueHint};
use mirao_dm::actor::{SessionActor, SessionHandle, DEFAULT_QUEUE_CAPACITY};
use mirao_dm::config::{DmConfig, DEFAULT_CONFIG_PATH};
use mirao_dm::driver::simulated::SimulatedMirror;
use mirao_dm::property::describe_properties;
use mirao_dm::session::{DispatchMode, WavefrontSession};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(author, version, about = "Zernike-mode control of a MIRAO 52-e deformable mirror")]
struct Cli {
    /// Configuration file (TOML); `MIRAO_*` environment variables override it
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH, value_hint = ValueHint::FilePath)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a command script against a simulated mirror
    Run {
        /// Script file; reads stdin when omitted
        #[arg(value_hint = ValueHint::FilePath)]
        script: Option<PathBuf>,

        /// Dispatch every Zernike set immediately
        #[arg(long)]
        immediate: bool,

        /// Report failed lines and continue instead of stopping
        #[arg(long)]
        keep_going: bool,
    },

    /// Initialize the mirror and print the session state as JSON
    Status,

    /// Print the property table as JSON
    Properties,

    /// Print the effective configuration as TOML
    DefaultConfig,
}

#[derive(Debug, PartialEq)]
enum ScriptLine<'a> {
    Init,
    Apply,
    Status,
    Shutdown,
    Get(&'a str),
    Set(&'a str, &'a str),
}

fn parse_line(line: &str) -> Result<Option<ScriptLine<'_>>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    if let Some((name, value)) = line.split_once('=') {
        return Ok(Some(ScriptLine::Set(name.trim(), value.trim())));
    }
    let parsed = match line {
        "init" => ScriptLine::Init,
        "apply" => ScriptLine::Apply,
        "status" => ScriptLine::Status,
        "shutdown" => ScriptLine::Shutdown,
        _ => match line.strip_prefix("get ") {
            Some(name) => ScriptLine::Get(name.trim()),
            None => bail!("unrecognized command '{line}'"),
        },
    };
    Ok(Some(parsed))
}

async fn execute(handle: &SessionHandle, line: ScriptLine<'_>) -> Result<()> {
    match line {
        ScriptLine::Init => handle.initialize().await?,
        ScriptLine::Apply => handle.apply_pending().await?,
        ScriptLine::Shutdown => handle.release().await?,
        ScriptLine::Status => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        ScriptLine::Get(name) => {
            let value = handle.get_property(name).await?;
            println!("{name} = {value}");
        }
        ScriptLine::Set(name, value) => handle.set_property(name, value).await?,
    }
    Ok(())
}

fn read_script(script: Option<&PathBuf>) -> Result<String> {
    match script {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display())),
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("Failed to read script from stdin")?;
            Ok(text)
        }
    }
}

fn new_session(config: DmConfig) -> WavefrontSession<SimulatedMirror> {
    let mirror = SimulatedMirror::with_settle_time(config.driver.settle_time);
    WavefrontSession::new(mirror, config)
}

async fn run_script(config: DmConfig, script: Option<PathBuf>, keep_going: bool) -> Result<()> {
    let text = read_script(script.as_ref())?;
    let (handle, task) = SessionActor::spawn(new_session(config), DEFAULT_QUEUE_CAPACITY);

    let mut failures = 0usize;
    for (number, raw) in text.lines().enumerate() {
        let number = number + 1;
        let outcome = match parse_line(raw) {
            Ok(Some(line)) => execute(&handle, line).await,
            Ok(None) => continue,
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            let e = e.context(format!("line {number}: {}", raw.trim()));
            if !keep_going {
                let _ = handle.shutdown().await;
                return Err(e);
            }
            let message = format!("{e:#}");
            error!(line = number, error = %message, "Script command failed");
            failures += 1;
        }
    }

    let _ = handle.shutdown().await;
    task.await.context("Session actor panicked")?;

    if failures > 0 {
        return Err(anyhow!("{failures} script command(s) failed"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DmConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            script,
            immediate,
            keep_going,
        } => {
            if immediate {
                config.device.dispatch_mode = DispatchMode::Immediate;
            }
            info!(mode = ?config.device.dispatch_mode, "Running script");
            run_script(config, script, keep_going).await?;
        }
        Command::Status => {
            let mut session = new_session(config);
            session.initialize().context("Failed to initialize mirror")?;
            println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
            session.shutdown();
        }
        Command::Properties => {
            println!("{}", serde_json::to_string_pretty(&describe_properties())?);
        }
        Command::DefaultConfig => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_lines_parse() {
        assert_eq!(parse_line("  # comment").unwrap(), None);
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("init").unwrap(), Some(ScriptLine::Init));
        assert_eq!(
            parse_line("Z2-2 = -0.4").unwrap(),
            Some(ScriptLine::Set("Z2-2", "-0.4"))
        );
        assert_eq!(
            parse_line("Set calibration path = /tmp/c.aomi").unwrap(),
            Some(ScriptLine::Set("Set calibration path", "/tmp/c.aomi"))
        );
        assert_eq!(
            parse_line("get Load wavefront").unwrap(),
            Some(ScriptLine::Get("Load wavefront"))
        );
        assert!(parse_line("explode").is_err());
    }
}
