//! Card import from CSV (`front,back[,sortOrder]`)

use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;
use uuid::Uuid;

use super::models::Card;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Column positions within a row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    front: usize,
    back: usize,
    sort_order: Option<usize>,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            front: 0,
            back: 1,
            sort_order: Some(2),
        }
    }
}

impl Columns {
    /// Recognize a header row; `None` when the first row is data
    fn from_header(record: &StringRecord) -> Option<Self> {
        let find = |names: &[&str]| {
            record.iter().position(|h| {
                let h = h.to_lowercase().replace(['_', ' '], "");
                names.contains(&h.as_str())
            })
        };
        let front = find(&["front", "question", "term"])?;
        let back = find(&["back", "answer", "definition"])?;
        Some(Self {
            front,
            back,
            sort_order: find(&["sortorder", "order", "position"]),
        })
    }
}

/// Parse cards for `deck_id` from CSV text.
///
/// A header row is optional. Rows without a sort order are numbered from
/// `first_sort_order` in file order; rows with an empty side are skipped.
pub fn parse_cards_csv(
    content: &str,
    deck_id: Uuid,
    first_sort_order: i32,
) -> Result<Vec<Card>, ImportError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());
    let mut records = reader.records();

    let first = match records.next() {
        Some(record) => record?,
        None => return Ok(Vec::new()),
    };
    let mut rows = Vec::new();
    let columns = match Columns::from_header(&first) {
        Some(columns) => columns,
        None => {
            rows.push(first);
            Columns::default()
        }
    };
    for record in records {
        rows.push(record?);
    }

    let mut cards = Vec::with_capacity(rows.len());
    let mut next_order = first_sort_order;
    for (row_idx, row) in rows.iter().enumerate() {
        let front = row.get(columns.front).unwrap_or_default();
        let back = row.get(columns.back).unwrap_or_default();
        if front.is_empty() || back.is_empty() {
            log::warn!("import: skipping row {} with an empty side", row_idx + 1);
            continue;
        }

        let sort_order = columns
            .sort_order
            .and_then(|col| row.get(col))
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(next_order);
        next_order = next_order.max(sort_order).saturating_add(1);

        cards.push(Card::new(
            deck_id,
            front.to_string(),
            back.to_string(),
            sort_order,
        ));
    }

    log::info!("import: parsed {} cards", cards.len());
    Ok(cards)
}

/// Read and parse a CSV file of cards
pub fn read_cards_csv(
    path: &Path,
    deck_id: Uuid,
    first_sort_order: i32,
) -> Result<Vec<Card>, ImportError> {
    let content = std::fs::read_to_string(path)?;
    parse_cards_csv(&content, deck_id, first_sort_order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_header() {
        let deck_id = Uuid::new_v4();
        let csv = "Question,Answer\nhola,hello\n\"adiós, amigo\",goodbye friend\n";

        let cards = parse_cards_csv(csv, deck_id, 0).unwrap();

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[1].front, "adiós, amigo");
        assert_eq!(cards[1].back, "goodbye friend");
        assert_eq!(cards[1].sort_order, 1);
        assert!(cards.iter().all(|c| c.deck_id == deck_id));
    }

    #[test]
    fn test_parse_without_header() {
        let cards = parse_cards_csv("uno,one\ndos,two\n", Uuid::new_v4(), 10).unwrap();

        assert_eq!(cards.len(), 2);
        assert_eq!(cards[0].front, "uno");
        assert_eq!(cards[0].sort_order, 10);
        assert_eq!(cards[1].sort_order, 11);
    }

    #[test]
    fn test_explicit_sort_order_column() {
        let csv = "back,front,sort_order\none,uno,5\ntwo,dos,\nthree,tres,2\n";

        let cards = parse_cards_csv(csv, Uuid::new_v4(), 0).unwrap();
        let orders: Vec<i32> = cards.iter().map(|c| c.sort_order).collect();

        assert_eq!(cards[0].front, "uno");
        assert_eq!(orders, vec![5, 6, 2]);
    }

    #[test]
    fn test_largest_sort_order_does_not_overflow() {
        let csv = "front,back,order\nuno,one,2147483647\ndos,two,\n";

        let cards = parse_cards_csv(csv, Uuid::new_v4(), 0).unwrap();
        let orders: Vec<i32> = cards.iter().map(|c| c.sort_order).collect();

        assert_eq!(orders, vec![i32::MAX, i32::MAX]);
    }

    #[test]
    fn test_skips_rows_with_empty_side() {
        let cards = parse_cards_csv("front,back\nuno,\n,two\ntres,three\n", Uuid::new_v4(), 0)
            .unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].front, "tres");
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_cards_csv("", Uuid::new_v4(), 0).unwrap().is_empty());
    }
}
