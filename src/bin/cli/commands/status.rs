use anyhow::{Context, Result};
use chrono::Utc;

use recall_lib::flashcards::ReviewStats;
use recall_lib::session::deck_prompt;
use recall_lib::storage::StorageInterface;

use crate::app::App;
use crate::render::terminal::{paint, render_prompt, render_stats, Color};
use crate::OutputFormat;

pub async fn run(app: &App, deck_name: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let deck = app.find_deck(deck_name).await?;
    let now = Utc::now();

    let cards = app
        .storage
        .get_cards_for_deck(deck.id)
        .await
        .context("Failed to read cards")?;
    let states = app
        .storage
        .deck_progress(&app.user_id, deck.id)
        .await
        .context("Failed to read progress")?;
    let stats = ReviewStats::compute(&cards, |id| states.get(&id), now);
    let due = app
        .storage
        .get_due_cards(&app.user_id, deck.id, now)
        .await
        .context("Failed to read due cards")?;
    let prompt = deck_prompt(app.storage.as_ref(), &app.user_id, deck.id, now)
        .await
        .context("Failed to read deck progress")?;

    let sync_status = match app.sync_manager()? {
        Some(manager) => Some(
            manager
                .status(&app.user_id, deck.id)
                .await
                .context("Failed to read sync status")?,
        ),
        None => None,
    };

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "deck": deck.name,
                "deckId": deck.id,
                "user": app.user_id,
                "stats": stats,
                "prompt": prompt,
                "dueCards": due.iter().map(|card| card.id).collect::<Vec<_>>(),
                "sync": sync_status,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!(
                "{} ({})",
                paint(&deck.name, Color::BOLD, use_color),
                render_prompt(prompt)
            );
            for line in render_stats(&stats, use_color) {
                println!("{}", line);
            }
            if let Some(next) = due.first() {
                println!("  next up      {}", next.front);
            }
            if let Some(status) = sync_status {
                let last = status
                    .last_sync
                    .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "  last sync    {} ({} pending)",
                    last, status.pending_changes
                );
            }
        }
    }
    Ok(())
}
