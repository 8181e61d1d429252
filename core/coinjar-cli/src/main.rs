//! coinjar: command-line host for a shared coin jar.
//!
//! Every subcommand opens the jar under the storage root, pulls the room once
//! (when remote sync is configured), applies one operation and exits. Pushes
//! run inline so nothing is lost when the process ends.
//!
//! ## Subcommands
//!
//! - `status`: Current coins, capacity, pending title and totals
//! - `add`: Add coins (negative or zero amounts are ignored)
//! - `record`: Score sliders and deposit the result
//! - `task`: Register a pending task, or parse a block of text into tasks
//! - `title`: Set or clear the pending archive title
//! - `capacity` / `settings`: Tune the jar
//! - `archives`: List sealed archives, one page at a time
//! - `reset`: Empty the jar without sealing
//! - `pull`: Fetch the room's latest state
//! - `watch`: Poll the room in the background and print events

mod logging;
mod render;

use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use coinjar_core::{
    AppConfig, DispatchMode, JarEngine, JarError, PendingTask, SettingsPatch, Slider,
    StorageConfig,
};
use serde_json::json;

const WATCH_TICK: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "coinjar")]
#[command(about = "Shared coin jar")]
#[command(version)]
struct Cli {
    /// Storage root (defaults to $COINJAR_HOME or ~/.coinjar)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Config file (defaults to <root>/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the jar
    Status,

    /// Add coins to the jar
    Add {
        #[arg(value_name = "AMOUNT", allow_hyphen_values = true)]
        amount: i64,

        /// Carry overflow into the next jar instead of dropping it
        #[arg(long)]
        carry: bool,
    },

    /// Convert slider scores into coins
    Record {
        /// Archive title for the coins (defaults to 今日の成果)
        #[arg(long, default_value = "")]
        title: String,

        /// VALUE or VALUE:WEIGHT
        #[arg(value_name = "SLIDER", value_parser = parse_slider, required = true)]
        sliders: Vec<Slider>,
    },

    /// Register a pending task
    Task {
        #[arg(value_name = "TITLE", required_unless_present = "text")]
        title: Option<String>,

        #[arg(long)]
        detail: Option<String>,

        /// Parse free-form text into tasks ("-" reads stdin)
        #[arg(long, conflicts_with_all = ["title", "detail"])]
        text: Option<String>,
    },

    /// Set the pending archive title; omit to clear it
    Title {
        #[arg(value_name = "TITLE")]
        title: Option<String>,
    },

    /// Set the jar capacity (clamped to 20..=500)
    Capacity {
        #[arg(value_name = "VALUE")]
        value: f64,
    },

    /// Show or change the tunable settings
    Settings {
        #[arg(long)]
        jar_capacity: Option<f64>,
        #[arg(long)]
        drop_interval: Option<f64>,
        #[arg(long)]
        coin_bounciness: Option<f64>,
        #[arg(long)]
        coin_friction: Option<f64>,
        #[arg(long)]
        coin_static_friction: Option<f64>,
    },

    /// List sealed archives
    Archives {
        /// Zero-based page index
        #[arg(long, default_value_t = 0)]
        page: usize,
    },

    /// Empty the jar without sealing an archive
    Reset {
        #[arg(long, default_value_t = 0)]
        coins: u32,
    },

    /// Pull the room's latest state
    Pull,

    /// Poll the room and print events as they arrive
    Watch {
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let storage = match &cli.root {
        Some(root) => StorageConfig::with_root(root.clone()),
        None => match StorageConfig::discover() {
            Ok(storage) => storage,
            Err(err) => {
                eprintln!("coinjar: {}", err);
                std::process::exit(1);
            }
        },
    };
    let config_path = cli.config.clone().unwrap_or_else(|| storage.config_file());
    let loaded = AppConfig::load(&config_path);
    let level = loaded
        .as_ref()
        .map(|config| config.logging.level.clone())
        .unwrap_or_else(|_| "info".to_string());

    let _logging_guard = logging::init(&storage.logs_dir(), &level);

    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "Config unreadable; using defaults");
            AppConfig::default()
        }
    }
    .with_env_overrides();

    if let Err(err) = run(cli.command, &storage, &config) {
        tracing::error!(error = %err, "coinjar failed");
        eprintln!("coinjar: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands, storage: &StorageConfig, config: &AppConfig) -> Result<(), JarError> {
    let watching = matches!(command, Commands::Watch { .. });
    let dispatch = if watching {
        DispatchMode::Background
    } else {
        DispatchMode::Inline
    };
    let mut engine = JarEngine::from_config(storage, config, dispatch)?;
    if !watching {
        engine.sync_now();
    }

    match command {
        Commands::Watch { seconds } => {
            watch(engine, Duration::from_secs(seconds));
            return Ok(());
        }
        Commands::Status | Commands::Pull => {}
        Commands::Add { amount, carry } => {
            let steps = if carry {
                engine.deposit(amount)
            } else {
                vec![engine.add_coins(amount)]
            };
            render::print(&json!({
                "steps": steps.iter().map(render::outcome).collect::<Vec<_>>(),
            }));
        }
        Commands::Record { title, sliders } => {
            let outcome = engine.record(&title, &sliders);
            render::print(&render::record(&outcome));
        }
        Commands::Task {
            title,
            detail,
            text,
        } => {
            let registered = match text {
                Some(text) => engine.register_tasks_from_text(&read_text(&text)?),
                None => title
                    .as_deref()
                    .and_then(|title| PendingTask::new(title, detail.as_deref()))
                    .map(|task| usize::from(engine.register_task(&task)))
                    .unwrap_or(0),
            };
            render::print(&json!({ "registered": registered }));
        }
        Commands::Title { title } => engine.set_pending_title(title.as_deref()),
        Commands::Capacity { value } => {
            engine.set_capacity(value);
        }
        Commands::Settings {
            jar_capacity,
            drop_interval,
            coin_bounciness,
            coin_friction,
            coin_static_friction,
        } => {
            let patch = SettingsPatch {
                jar_capacity,
                drop_interval,
                coin_bounciness,
                coin_friction,
                coin_static_friction,
            };
            let settings = if patch.is_empty() {
                engine.settings()
            } else {
                engine.update_settings(&patch)
            };
            render::print(&json!(settings));
            return Ok(());
        }
        Commands::Archives { page } => {
            render::print(&render::page(&engine.archive_page(page)));
            return Ok(());
        }
        Commands::Reset { coins } => engine.reset_coins(coins),
    }

    render::print(&render::status(&engine));
    Ok(())
}

fn watch(mut engine: JarEngine, duration: Duration) {
    if !engine.gateway().is_enabled() {
        tracing::warn!("Remote sync is not configured; nothing to watch");
        render::print(&render::status(&engine));
        return;
    }

    let (_listener, events) = engine.events().channel();
    engine.start_sync();
    tracing::info!(seconds = duration.as_secs(), "Watching room");

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        engine.pump();
        for event in events.try_iter() {
            render::print(&render::event(&event));
        }
        std::thread::sleep(WATCH_TICK);
    }
    engine.stop_sync();
}

fn read_text(arg: &str) -> Result<String, JarError> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut text = String::new();
    std::io::stdin()
        .read_to_string(&mut text)
        .map_err(|source| JarError::Io {
            context: "reading tasks from stdin".to_string(),
            source,
        })?;
    Ok(text)
}

fn parse_slider(raw: &str) -> Result<Slider, String> {
    let (value, weight) = match raw.split_once(':') {
        Some((value, weight)) => (value, weight),
        None => (raw, "1"),
    };
    let number = |part: &str| {
        part.trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| format!("invalid slider '{}': expected VALUE or VALUE:WEIGHT", raw))
    };
    Ok(Slider {
        value: number(value)?,
        weight: number(weight)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn slider_defaults_weight_to_one() {
        assert_eq!(
            parse_slider("30").unwrap(),
            Slider {
                value: 30.0,
                weight: 1.0
            }
        );
        assert_eq!(
            parse_slider("40:1.5").unwrap(),
            Slider {
                value: 40.0,
                weight: 1.5
            }
        );
        assert!(parse_slider("high").is_err());
        assert!(parse_slider("1:nan").is_err());
    }

    #[test]
    fn add_accepts_negative_amounts() {
        let cli = Cli::try_parse_from(["coinjar", "add", "-3"]).unwrap();
        assert!(matches!(cli.command, Commands::Add { amount: -3, .. }));
    }

    #[test]
    fn root_is_global() {
        let cli = Cli::try_parse_from(["coinjar", "status", "--root", "/tmp/jar"]).unwrap();
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/jar")));
    }

    #[test]
    fn one_shot_commands_persist_between_runs() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = StorageConfig::with_root(dir.path().to_path_buf());
        let config = AppConfig::default();

        run(
            Commands::Add {
                amount: 7,
                carry: false,
            },
            &storage,
            &config,
        )
        .unwrap();
        run(
            Commands::Title {
                title: Some("garden".to_string()),
            },
            &storage,
            &config,
        )
        .unwrap();

        let engine = JarEngine::from_config(&storage, &config, DispatchMode::Inline).unwrap();
        assert_eq!(engine.coins(), 7);
        assert_eq!(engine.pending_title(), Some("garden"));
    }
}
