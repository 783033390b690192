//! CLI entry point for taurus-core
//!
//! Provides a small command-line front end over the model layer:
//! - Classify and normalize model names
//! - Read attributes once
//! - Poll an attribute and print the events it publishes
//! - Inspect registered schemes and the effective configuration
//!
//! # Usage
//!
//! ```bash
//! taurus names sim:a/b/c/voltage abc res:beam_current --json
//! taurus read a/b/c/voltage
//! taurus poll a/b/c/counter --period 500 --count 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use taurus_core::basetypes::{ElementType, TaurusEventType};
use taurus_core::config::{TaurusConfig, CONFIG_FILE};
use taurus_core::event::listener_fn;
use taurus_core::logging;
use taurus_core::model::{EventValue, TaurusModel};
use taurus_core::validator::{NameResolver, NameTriple};
use taurus_core::TaurusManager;

#[derive(Parser)]
#[command(name = "taurus")]
#[command(about = "Control-system model layer: names, reads and polling", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify model names and print their name forms
    Names {
        /// Model names
        #[arg(required = true)]
        names: Vec<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Read attributes once
    Read {
        /// Attribute names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Poll an attribute and print its events
    Poll {
        /// Attribute name
        name: String,

        /// Polling period in milliseconds
        #[arg(long, default_value = "1000")]
        period: u64,

        /// Number of events to print before exiting
        #[arg(long, default_value = "5")]
        count: usize,
    },

    /// List registered scheme plugins
    Schemes,

    /// Print the effective configuration
    Config,
}

#[derive(Serialize)]
struct NameReport {
    name: String,
    resolved: Option<String>,
    element_type: Option<ElementType>,
    valid_types: Vec<ElementType>,
    names: Option<NameTriple>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TaurusConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    if let Commands::Config = cli.command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let manager = TaurusManager::new(config)?;
    let result = match cli.command {
        Commands::Names { names, json } => show_names(&manager, &names, json),
        Commands::Read { names } => read_attributes(&manager, &names),
        Commands::Poll {
            name,
            period,
            count,
        } => poll_attribute(&manager, &name, period, count),
        Commands::Schemes => {
            for plugin in manager.plugins() {
                println!("{:<12} {}", plugin.name, plugin.schemes.join(", "));
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    };
    manager.clean_up();
    result
}

fn name_report(manager: &TaurusManager, name: &str) -> Result<NameReport> {
    let target = manager.resolve_name(name)?;
    let factory = manager.get_factory(Some(&manager.scheme_of(&target)))?;
    let element_type = factory.find_object_class(&target);
    let resolver: &dyn NameResolver = factory.as_ref();
    let names = element_type
        .and_then(|kind| factory.validators().for_type(kind))
        .and_then(|v| v.get_names(&target, Some(resolver)));
    Ok(NameReport {
        name: name.to_string(),
        resolved: (target != name).then(|| target.clone()),
        element_type,
        valid_types: manager.valid_types_for_name(name, None),
        names,
    })
}

fn show_names(manager: &TaurusManager, names: &[String], json: bool) -> Result<()> {
    let reports = names
        .iter()
        .map(|n| name_report(manager, n))
        .collect::<Result<Vec<_>>>()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    for report in reports {
        match (report.element_type, report.names) {
            (Some(kind), Some(names)) => {
                println!("{} [{}]", report.name, kind);
                if let Some(resolved) = &report.resolved {
                    println!("  resolved: {}", resolved);
                }
                println!("  complete: {}", names.complete.unwrap_or_default());
                println!("  normal:   {}", names.normal.unwrap_or_default());
                println!("  short:    {}", names.short.unwrap_or_default());
            }
            _ => println!("{} [invalid]", report.name),
        }
    }
    Ok(())
}

fn read_attributes(manager: &TaurusManager, names: &[String]) -> Result<()> {
    for name in names {
        let attr = manager.get_attribute(name)?;
        let value = attr.read(false)?;
        let rvalue = value
            .rvalue
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} = {} {} ({:?}, {})",
            attr.full_name(),
            rvalue,
            attr.unit(),
            value.quality,
            value.time
        );
    }
    Ok(())
}

fn poll_attribute(manager: &TaurusManager, name: &str, period: u64, count: usize) -> Result<()> {
    let attr = manager.get_attribute(name)?;
    attr.change_polling_period(period);

    let (tx, rx) = crossbeam_channel::unbounded();
    let listener = listener_fn(move |_src: &dyn TaurusModel, ty: TaurusEventType, value: &EventValue| {
        let text = match value {
            EventValue::Value(v) => v
                .rvalue
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| v.error.clone().unwrap_or_default()),
            EventValue::State(s) => s.to_string(),
            EventValue::Info(i) => i.label.clone(),
            EventValue::Error(e) => e.clone(),
        };
        let _ = tx.send((ty, text));
    });
    attr.add_listener(&listener);

    let timeout = Duration::from_millis(period.saturating_mul(3).max(1000));
    let mut seen = 0;
    while seen < count {
        match rx.recv_timeout(timeout) {
            Ok((ty, text)) => {
                println!("{:?}: {}", ty, text);
                seen += 1;
            }
            Err(_) => {
                tracing::warn!(attribute = %attr.full_name(), "No event within {:?}", timeout);
                break;
            }
        }
    }
    attr.remove_listener(&listener);
    Ok(())
}
