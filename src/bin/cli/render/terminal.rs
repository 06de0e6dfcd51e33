use recall_lib::flashcards::algorithm::{format_interval, IntervalPreview};
use recall_lib::flashcards::{Card, ReviewStats};
use recall_lib::session::{SessionView, StudyPrompt};

/// ANSI color codes
#[allow(dead_code)]
pub struct Color;

#[allow(dead_code)]
impl Color {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";
    pub const GRAY: &str = "\x1b[90m";
}

/// Wrap `text` in `color` when colors are enabled
pub fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("{}{}{}", color, text, Color::RESET)
    } else {
        text.to_string()
    }
}

/// Progress line shown above each card, e.g. `[2/20] new 1 · reviews 0`
pub fn render_progress(view: &SessionView, use_color: bool) -> String {
    let counter = format!("[{}/{}]", view.position, view.total);
    format!(
        "{} new {} · reviews {}",
        paint(&counter, Color::BOLD, use_color),
        view.new_today,
        view.reviews_today
    )
}

pub fn render_front(card: &Card, use_color: bool) -> String {
    let mut out = paint(&card.front, Color::BOLD, use_color);
    if let Some(media) = &card.media {
        out.push_str(&format!("\n{}", paint(media, Color::GRAY, use_color)));
    }
    out
}

pub fn render_back(card: &Card, use_color: bool) -> String {
    format!("{}\n{}", paint("---", Color::DIM, use_color), card.back)
}

/// Grade choices with the interval each one would give
pub fn render_choices(preview: Option<IntervalPreview>, use_color: bool) -> String {
    let again = paint("[a] Again", Color::RED, use_color);
    let good = paint("[g] Good", Color::GREEN, use_color);
    match preview {
        Some(p) => format!(
            "{} ({})  {} ({})  [q] quit",
            again,
            format_interval(p.again),
            good,
            format_interval(p.good)
        ),
        None => format!("{}  {}  [q] quit", again, good),
    }
}

pub fn render_prompt(prompt: StudyPrompt) -> &'static str {
    match prompt {
        StudyPrompt::Study => "Study",
        StudyPrompt::Continue => "Continue",
        StudyPrompt::StudyAgain => "Study again",
    }
}

pub fn render_stats(stats: &ReviewStats, use_color: bool) -> Vec<String> {
    vec![
        format!("  cards        {}", stats.total_cards),
        format!(
            "  due          {}",
            paint(&stats.due_cards.to_string(), Color::YELLOW, use_color)
        ),
        format!(
            "  unseen       {} ({} admitted)",
            stats.new_cards + stats.admitted_cards,
            stats.admitted_cards
        ),
        format!(
            "  studied today {} ({} new)",
            paint(&stats.graded_today.to_string(), Color::GREEN, use_color),
            stats.new_today
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_paint_without_color_is_plain() {
        assert_eq!(paint("hi", Color::RED, false), "hi");
        assert_eq!(paint("hi", Color::RED, true), "\x1b[31mhi\x1b[0m");
    }

    #[test]
    fn test_choices_show_intervals() {
        let preview = IntervalPreview {
            again: 0.4,
            good: 3.0,
        };
        let line = render_choices(Some(preview), false);
        assert!(line.contains("Again (10h)"));
        assert!(line.contains("Good (3d)"));
    }

    #[test]
    fn test_front_lists_media() {
        let mut card = Card::new(Uuid::new_v4(), "perro".into(), "dog".into(), 0);
        card.media = Some("perro.mp3".into());
        assert_eq!(render_front(&card, false), "perro\nperro.mp3");
    }
}
