use anyhow::{anyhow, Context, Result};
use quickwindow::{LoadOptions, Window, WindowConfig};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let input = std::env::args()
        .nth(1)
        .context("usage: quickwindow <url-or-path>")?;

    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let config = WindowConfig::load(None).unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err}. Using defaults.");
        WindowConfig::default()
    });

    let window = Window::from_config(config)
        .map_err(|err| anyhow!("failed to initialise window: {err}"))?;
    window
        .load(Some(&input), LoadOptions::default())
        .map_err(|err| anyhow!("failed to load {input}: {err}"))?;

    let title = window
        .document()
        .map(|document| document.title())
        .unwrap_or_default();
    println!("url:    {}", window.url());
    println!("title:  {title}");
    println!("frames: {}", window.frames().len());
    for frame in window.frames() {
        println!("  - {} {}", frame.name(), frame.url());
    }
    for message in window.console().messages() {
        println!("console.{:?}: {}", message.level, message.text);
    }
    for err in window.script_errors() {
        eprintln!("script error: {err}");
    }
    Ok(())
}
