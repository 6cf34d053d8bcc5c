/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use bpaf::Bpaf;
use log::{error, info};
use serde_json::Value;
use url::Url;

use crate::broadcast::{self, TransportError};
use crate::context::{ContextTree, Layout, NodeKey};
use crate::hierarchy::{self, Address};
use crate::page::Location;
use crate::prefs::Settings;
use crate::report::{EventContext, ReportError, Reporter};

/// Inspect browsing-context layouts and report events to a collector.
#[derive(Debug, Clone, Bpaf)]
#[bpaf(options, version)]
pub struct Options {
    /// TOML settings file
    #[bpaf(long, argument("PATH"))]
    settings: Option<PathBuf>,

    /// Log filter directives, overriding the settings file and RUST_LOG
    #[bpaf(long("log-filter"), argument("FILTER"))]
    log_filter: Option<String>,

    #[bpaf(external(action))]
    action: Action,
}

#[derive(Debug, Clone, Bpaf)]
pub enum Action {
    /// Print every context in a layout with its address
    #[bpaf(command("tree"))]
    Tree {
        /// JSON layout file
        #[bpaf(positional("LAYOUT"))]
        layout: PathBuf,
    },

    /// Find the context at an address
    #[bpaf(command("resolve"))]
    Resolve {
        #[bpaf(positional("LAYOUT"))]
        layout: PathBuf,
        #[bpaf(positional("ADDRESS"))]
        address: Address,
    },

    /// Broadcast a message from one context through a logging transport
    #[bpaf(command("broadcast"))]
    Broadcast {
        #[bpaf(positional("LAYOUT"))]
        layout: PathBuf,
        /// Origin context, Top if omitted
        #[bpaf(long("from"), argument("ADDRESS"), fallback(Address::top()))]
        from: Address,
        /// JSON message
        #[bpaf(long("message"), argument("JSON"))]
        message: String,
    },

    /// Send one event report to the collector
    #[bpaf(command("report"))]
    Report {
        /// Collector config resource, overriding the settings file
        #[bpaf(long("config-url"), argument("URL"))]
        config_url: Option<Url>,
        #[bpaf(long("key"), argument("KEY"))]
        key: String,
        /// JSON object with the event fields
        #[bpaf(long("val"), argument("JSON"), fallback("{}".to_owned()))]
        val: String,
        /// Document URL of the reporting context
        #[bpaf(long("href"), argument("URL"))]
        href: String,
        #[bpaf(long("hierarchy"), argument("ADDRESS"), fallback(Address::top()))]
        hierarchy: Address,
    },
}

#[derive(Debug)]
enum CliError {
    Layout(PathBuf, String),
    NoContext(Address),
    Input(String),
    Report(ReportError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Layout(path, e) => write!(f, "failed to load layout {}: {e}", path.display()),
            Self::NoContext(address) => write!(f, "no context at '{address}'"),
            Self::Input(e) => write!(f, "invalid input: {e}"),
            Self::Report(e) => write!(f, "{e}"),
        }
    }
}

pub fn main() -> ExitCode {
    let opts = options().run();

    let settings = match opts.settings.as_deref().map(Settings::load).transpose() {
        Ok(settings) => settings.unwrap_or_default(),
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings.log_filter(opts.log_filter.as_deref()));

    match run(opts.action, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Install the `fmt` subscriber. `log` records reach it through the
/// subscriber's `tracing-log` bridge.
fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(crate::prefs::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(action: Action, settings: &Settings) -> Result<(), CliError> {
    match action {
        Action::Tree { layout } => {
            let tree = load_tree(&layout)?;
            for (key, node) in tree.nodes() {
                let closed = if node.closed { " (closed)" } else { "" };
                println!("{}\t{}{closed}", hierarchy::resolve(&tree, key), node.url);
            }
            Ok(())
        }
        Action::Resolve { layout, address } => {
            let tree = load_tree(&layout)?;
            let key = locate(&tree, &address)?;
            let url = tree.get(key).map(|node| node.url.as_str()).unwrap_or_default();
            println!("{}\t{url}", hierarchy::resolve(&tree, key));
            Ok(())
        }
        Action::Broadcast {
            layout,
            from,
            message,
        } => {
            let tree = load_tree(&layout)?;
            let origin = locate(&tree, &from)?;
            let message: Value =
                serde_json::from_str(&message).map_err(|e| CliError::Input(e.to_string()))?;
            let transport = |target: NodeKey, message: &Value| -> Result<(), TransportError> {
                let address = hierarchy::resolve(&tree, target);
                info!("Delivering to {address}");
                println!("{address}\t{message}");
                Ok(())
            };
            let summary = broadcast::broadcast(&tree, &transport, origin, &message);
            println!(
                "delivered {}, skipped {} closed, {} failed",
                summary.delivered.len(),
                summary.skipped_closed,
                summary.failed.len()
            );
            Ok(())
        }
        Action::Report {
            config_url,
            key,
            val,
            href,
            hierarchy,
        } => {
            let config_url = match config_url {
                Some(url) => url,
                None => settings
                    .config_url
                    .as_deref()
                    .ok_or_else(|| CliError::Input("no config URL given".to_owned()))?
                    .parse()
                    .map_err(|e: url::ParseError| CliError::Input(e.to_string()))?,
            };
            let val: Value =
                serde_json::from_str(&val).map_err(|e| CliError::Input(e.to_string()))?;
            let location = Location::parse(&href).map_err(|e| CliError::Input(e.to_string()))?;
            let reporter = Reporter::with_timeout(config_url, settings.request_timeout())
                .map_err(CliError::Report)?;
            reporter
                .report(&EventContext::new(hierarchy, location), &key, &val)
                .map_err(CliError::Report)?;
            println!("acknowledged");
            Ok(())
        }
    }
}

fn load_tree(path: &Path) -> Result<ContextTree, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Layout(path.to_owned(), e.to_string()))?;
    let layout: Layout = serde_json::from_str(&text)
        .map_err(|e| CliError::Layout(path.to_owned(), e.to_string()))?;
    Ok(ContextTree::from_layout(&layout))
}

fn locate(tree: &ContextTree, address: &Address) -> Result<NodeKey, CliError> {
    hierarchy::locate(tree, tree.primary(), address)
        .ok_or_else(|| CliError::NoContext(address.clone()))
}
