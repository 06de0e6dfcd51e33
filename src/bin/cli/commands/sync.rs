use anyhow::{bail, Context, Result};

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub async fn run(app: &App, deck_name: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let deck = app.find_deck(deck_name).await?;
    let Some(manager) = app.sync_manager()? else {
        bail!("No remote configured. Set remote_url in config.toml.");
    };

    let report = manager
        .sync(&app.user_id, deck.id)
        .await
        .context("Sync failed")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Plain => {
            if report.offline {
                println!(
                    "{}",
                    paint("Remote unreachable; progress kept locally.", Color::YELLOW, use_color)
                );
                return Ok(());
            }
            println!(
                "{} updated, {} inserted, {} unchanged",
                report.updated, report.inserted, report.unchanged
            );
            if report.failed > 0 {
                println!(
                    "{}",
                    paint(
                        &format!("{} records failed; run sync again to retry.", report.failed),
                        Color::RED,
                        use_color
                    )
                );
                for error in &report.errors {
                    println!("  {}", error);
                }
            }
        }
    }
    Ok(())
}
