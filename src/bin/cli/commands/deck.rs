use std::path::Path;

use anyhow::{bail, Context, Result};

use recall_lib::flashcards::{read_cards_csv, Deck};
use recall_lib::storage::StorageInterface;

use crate::app::App;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub async fn run_create(
    app: &App,
    name: String,
    description: Option<String>,
    new_per_day: Option<usize>,
    format: &OutputFormat,
) -> Result<()> {
    let decks = app.list_decks().await?;
    if decks.iter().any(|d| d.name.eq_ignore_ascii_case(&name)) {
        bail!("A deck named '{}' already exists", name);
    }

    let mut deck = Deck::new(name);
    deck.description = description;
    deck.new_cards_per_day = new_per_day.unwrap_or(app.config.new_cards_per_day);
    app.storage
        .store_deck(&deck)
        .await
        .context("Failed to create deck")?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&deck)?),
        OutputFormat::Plain => println!("Created deck '{}' ({})", deck.name, deck.id),
    }
    Ok(())
}

pub async fn run_list(app: &App, format: &OutputFormat, use_color: bool) -> Result<()> {
    let decks = app.list_decks().await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decks)?),
        OutputFormat::Plain => {
            if decks.is_empty() {
                println!("(no decks)");
            }
            for deck in &decks {
                let cap = format!("{} new/day", deck.new_cards_per_day);
                println!(
                    "{}  {} cards  {}",
                    paint(&deck.name, Color::BOLD, use_color),
                    deck.card_count,
                    paint(&cap, Color::GRAY, use_color)
                );
            }
        }
    }
    Ok(())
}

pub async fn run_import(app: &App, deck_name: &str, file: &Path, format: &OutputFormat) -> Result<()> {
    let deck = app.find_deck(deck_name).await?;
    let existing = app
        .storage
        .get_cards_for_deck(deck.id)
        .await
        .context("Failed to read deck cards")?;
    let first_order = existing
        .iter()
        .map(|c| c.sort_order + 1)
        .max()
        .unwrap_or(0);

    let cards = read_cards_csv(file, deck.id, first_order)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    app.storage
        .store_cards(&cards)
        .await
        .context("Failed to store cards")?;

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({ "deckId": deck.id, "imported": cards.len() })
        ),
        OutputFormat::Plain => println!("Imported {} cards into '{}'", cards.len(), deck.name),
    }
    Ok(())
}
