use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::Utc;

use recall_lib::flashcards::{Grade, StudyMode};
use recall_lib::session::deck_prompt;

use crate::app::App;
use crate::render::terminal::{
    paint, render_back, render_choices, render_front, render_progress, render_prompt, Color,
};

pub async fn run(app: &App, deck_name: &str, extra: bool, use_color: bool) -> Result<()> {
    let deck = app.find_deck(deck_name).await?;
    let mode = if extra {
        StudyMode::Extra
    } else {
        StudyMode::Normal
    };

    if mode == StudyMode::Normal {
        let prompt = deck_prompt(app.storage.as_ref(), &app.user_id, deck.id, Utc::now())
            .await
            .context("Failed to read deck progress")?;
        println!(
            "{} {}",
            paint(render_prompt(prompt), Color::CYAN, use_color),
            deck.name
        );
    }

    let mut session = app.session();
    session
        .start(deck.id, mode)
        .await
        .context("Failed to start session")?;
    if session.view().offline {
        println!("Local store is unavailable; nothing to study right now.");
        return Ok(());
    }

    loop {
        let view = session.view();
        let Some(card) = view.current_card.clone() else {
            break;
        };

        println!("\n{}", render_progress(&view, use_color));
        println!("{}", render_front(&card, use_color));
        if read_line("(enter to reveal, q to quit) ")?.trim() == "q" {
            break;
        }
        println!("{}", render_back(&card, use_color));

        let preview = match mode {
            StudyMode::Normal => session.preview_at(Utc::now()).await.ok().flatten(),
            StudyMode::Extra => None,
        };
        let grade = loop {
            match read_line(&format!("{} ", render_choices(preview, use_color)))?.trim() {
                "a" | "1" => break Some(Grade::Again),
                "g" | "3" => break Some(Grade::Good),
                "q" => break None,
                _ => continue,
            }
        };
        let Some(grade) = grade else {
            break;
        };

        if let Err(err) = session.grade(grade).await {
            if !err.is_retryable() {
                return Err(err).context("Failed to record grade");
            }
            let message = format!("Could not save this grade ({}); grade it again.", err);
            eprintln!("{}", paint(&message, Color::RED, use_color));
        }
    }

    let view = session.view();
    if view.is_complete {
        println!("\n{}", paint("Session complete.", Color::GREEN, use_color));
        if mode == StudyMode::Normal && view.new_today + view.reviews_today > 0 {
            println!("Run again with --extra to review today's cards.");
        }
    }
    println!(
        "Today: {} new, {} reviews",
        view.new_today, view.reviews_today
    );
    Ok(())
}

/// Read one line from stdin; end of input reads as quit
fn read_line(prompt: &str) -> Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut line = String::new();
    let read = std::io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok("q".to_string());
    }
    Ok(line)
}
