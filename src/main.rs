mod controller;
mod fields;
mod overlay;
mod protocol;
mod report;
mod session;
mod settings;
mod transport;
mod typewriter;

use crate::controller::{HostPage, StaticHostPage, WidgetController};
use crate::overlay::{DraggableOverlay, ViewportBounds};
use crate::protocol::{Direction, PostCallPayload};
use crate::report::{CallReporter, ReportError};
use crate::settings::{SettingsClient, WidgetSettings, resolve_base_url};
use crate::transport::{ScriptedStep, ScriptedTransport, TransportFactory, VoiceTransport};
use crate::typewriter::{TranscriptTypewriter, Viewport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nv-widget")]
#[command(about = "Embeddable voice-call widget core")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and display a page's activation configuration
    Inspect {
        /// Backend base URL (skips origin auto-detection)
        #[arg(long)]
        backend_url: Option<String>,

        /// Origin of the page that embeds the widget
        #[arg(long, default_value = "http://localhost:3000")]
        page_origin: String,

        /// Path of the embedding page
        #[arg(long, default_value = "/")]
        page_path: String,
    },

    /// Replay a scripted call end to end, typing the transcript to stdout
    Simulate {
        /// Scripted call JSON file
        script: PathBuf,

        /// Character reveal interval in milliseconds
        #[arg(long, default_value = "35")]
        char_interval: u64,
    },
}

/// A self-contained scripted call: inline settings, pre-filled contact
/// fields, and the transport event list with per-step delays.
#[derive(Deserialize, Debug)]
struct CallScript {
    activation_key: String,
    settings: WidgetSettings,
    #[serde(default)]
    fields: HashMap<String, String>,
    #[serde(default)]
    consent: bool,
    #[serde(default)]
    events: Vec<ScriptedStep>,
}

fn load_script(path: &PathBuf) -> Result<CallScript> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read script file {}", path.display()))?;
    let script = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse script file {}", path.display()))?;
    Ok(script)
}

/// Viewport that types revealed characters straight to stdout.
struct StdoutViewport {
    lines: Mutex<usize>,
}

impl StdoutViewport {
    fn new() -> Self {
        Self {
            lines: Mutex::new(0),
        }
    }
}

impl Viewport for StdoutViewport {
    fn push_line(&self, direction: Direction) -> usize {
        let Ok(mut count) = self.lines.lock() else {
            return 0;
        };
        let prefix = match direction {
            Direction::Received => "agent  | ",
            Direction::Sent => "caller | ",
        };
        print!("\n{prefix}");
        let _ = std::io::stdout().flush();
        let index = *count;
        *count += 1;
        index
    }

    fn append_char(&self, _line: usize, ch: char) {
        print!("{ch}");
        let _ = std::io::stdout().flush();
    }

    fn scroll_to_bottom(&self) {}

    fn clear(&self) {
        println!();
    }
}

/// Reporter that prints the post-call payload to stdout.
struct StdoutReporter;

#[async_trait]
impl CallReporter for StdoutReporter {
    async fn deliver(&self, payload: &PostCallPayload) -> Result<(), ReportError> {
        match serde_json::to_string_pretty(payload) {
            Ok(json) => println!("\nPost-call payload:\n{json}"),
            Err(e) => eprintln!("Failed to serialize post-call payload: {e}"),
        }
        Ok(())
    }
}

async fn inspect(backend_url: Option<String>, page_origin: String, page_path: String) -> Result<()> {
    let base_url = resolve_base_url(backend_url.as_deref(), &page_origin, None);
    println!("Fetching widget settings from {base_url} for page {page_path}");

    let client = SettingsClient::new(base_url);
    let settings = client.fetch(&page_path).await?;

    if settings.public_key.is_empty() {
        println!("Warning: no public key in response; sessions cannot start");
    }

    println!("Activation points:");
    println!("{:<24} {:<16} {:<10} Collected fields", "Key", "Character", "Booking");
    println!("{}", "-".repeat(90));
    for (key, agent) in &settings.agents {
        let booking = if agent.booking_url.is_some() { "YES" } else { "NO" };
        println!(
            "{:<24} {:<16} {:<10} {}",
            key,
            agent.character,
            booking,
            agent.user_collection_fields.join(", ")
        );
    }
    Ok(())
}

async fn simulate(script_path: PathBuf, char_interval: u64) -> Result<()> {
    let script = load_script(&script_path)?;

    let host = Arc::new(StaticHostPage::new(
        "http://localhost:3000",
        "/",
        [script.activation_key.clone()],
    ));

    let replay_ms: u64 = script.events.iter().map(|s| s.delay_ms).sum();
    let transport = Arc::new(ScriptedTransport::new(script.events));
    let factory: TransportFactory =
        Arc::new(move |_key| Arc::clone(&transport) as Arc<dyn VoiceTransport>);

    let typewriter = TranscriptTypewriter::new(Arc::new(StdoutViewport::new()) as Arc<dyn Viewport>)
        .with_interval(Duration::from_millis(char_interval));

    let base_url = resolve_base_url(None, &host.page_origin(), host.script_origin().as_deref());
    let controller = WidgetController::new(
        Arc::clone(&host) as Arc<dyn HostPage>,
        SettingsClient::new(base_url),
        factory,
        Arc::new(StdoutReporter),
        typewriter,
        DraggableOverlay::new(
            ViewportBounds {
                width: 1280.0,
                height: 800.0,
            },
            320.0,
            480.0,
        ),
    );

    controller.mount();
    let bound = controller.apply_settings(script.settings);
    anyhow::ensure!(bound > 0, "script's activation key matched no host element");

    println!("Activating '{}'", script.activation_key);
    if !controller.activate(&script.activation_key).await {
        anyhow::bail!("activation failed");
    }

    // The collector only accepts fields configured for the active agent,
    // so prefill happens after activation.
    {
        let fields = controller.fields();
        let Ok(mut fields) = fields.lock() else {
            anyhow::bail!("field collector unavailable");
        };
        if !fields.configured_fields().is_empty() {
            println!("Collecting: {}", fields.configured_fields().join(", "));
        }
        for (name, value) in &script.fields {
            fields.set_value(name, value);
        }
        fields.set_consent(script.consent);
        for issue in fields.validate() {
            println!("Field '{}' invalid: {}", issue.field, issue.message);
        }
        if fields.submit() {
            println!("Contact details submitted");
        }
    }

    // Let the scripted events and their reveals play out.
    tokio::time::sleep(Duration::from_millis(replay_ms + 250)).await;
    controller.typewriter().wait_idle().await;

    println!(
        "\n\nEnding call (state was: {})",
        controller.session_state().as_str()
    );
    controller.deactivate().await;

    // Give the fire-and-forget report a beat to print.
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.unmount().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect {
            backend_url,
            page_origin,
            page_path,
        } => {
            if let Err(e) = inspect(backend_url, page_origin, page_path).await {
                eprintln!("Failed to inspect widget settings: {e}");
                std::process::exit(1);
            }
        }

        Commands::Simulate {
            script,
            char_interval,
        } => {
            if let Err(e) = simulate(script, char_interval).await {
                eprintln!("Simulation failed: {e}");
                std::process::exit(1);
            }
        }
    }
}
