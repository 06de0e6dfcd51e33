use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use recall_lib::storage::StorageInterface;

use crate::app::App;
use crate::OutputFormat;

pub async fn run(app: &App, deck_name: &str, yes: bool, format: &OutputFormat) -> Result<()> {
    let deck = app.find_deck(deck_name).await?;

    if !yes {
        print!(
            "Forget all progress of '{}' for {}? [y/N] ",
            deck.name, app.user_id
        );
        std::io::stdout().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = app
        .storage
        .clear_progress(&app.user_id, deck.id)
        .await
        .context("Failed to clear progress")?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "deckId": deck.id, "cleared": removed })
        ),
        OutputFormat::Plain => println!("Cleared progress for {} cards", removed),
    }
    Ok(())
}
