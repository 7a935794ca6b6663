//! One-shot import of a legacy message export into the vector store.
//!
//! The legacy format is a headerless CSV with columns
//! `chat_id,message_id,chat_username,sender,date,text`. Rows that fail to
//! parse are logged and skipped; the import is idempotent because `save`
//! drops duplicate keys.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::messages::{parse_date, Message, MessageStore};
use crate::store::VectorStore;

pub fn migrate(store: &Arc<VectorStore>, legacy_path: &Path) -> anyhow::Result<()> {
    log::info!("starting migration from {}", legacy_path.display());

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(legacy_path)
        .with_context(|| format!("cannot open {}", legacy_path.display()))?;

    let mut chat_ids = BTreeSet::new();
    let mut total = 0usize;
    let mut migrated = 0usize;

    for (line, row) in reader.records().enumerate() {
        total += 1;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                log::error!("skipping unreadable row {}: {err}", line + 1);
                continue;
            }
        };

        let message = match parse_row(&row) {
            Some(message) => message,
            None => {
                log::error!("skipping malformed row {}", line + 1);
                continue;
            }
        };

        chat_ids.insert(message.chat_id);
        match store.save(message) {
            Ok(()) => {
                migrated += 1;
                if migrated % 100 == 0 {
                    log::info!("migrated {migrated} messages");
                }
            }
            Err(err) => log::error!("failed to migrate row {}: {err}", line + 1),
        }
    }

    log::info!("migration completed: {migrated}/{total} messages migrated");

    for chat_id in &chat_ids {
        log::info!("chat {chat_id}: {} messages stored", store.count(*chat_id));
    }

    store
        .persist_vectors()
        .context("failed to persist embedding cache")?;
    Ok(())
}

fn parse_row(row: &csv::StringRecord) -> Option<Message> {
    let chat_id = row.get(0)?.trim().parse().ok()?;
    let message_id = row.get(1)?.trim().parse().ok()?;
    let chat_username = row
        .get(2)
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string);
    let sender = row.get(3)?.trim().to_string();
    let date = parse_date(row.get(4)?.trim())?;
    let text = row.get(5)?.to_string();

    Some(Message {
        message_id,
        chat_id,
        chat_username,
        text,
        sender,
        date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_row() {
        let row = csv::StringRecord::from(vec![
            "-100123",
            "7",
            "somechat",
            "olena",
            "2024-06-01T09:30:00Z",
            "привіт усім",
        ]);
        let message = parse_row(&row).unwrap();

        assert_eq!(message.chat_id, -100123);
        assert_eq!(message.message_id, 7);
        assert_eq!(message.chat_username.as_deref(), Some("somechat"));
        assert_eq!(message.sender, "olena");
        assert_eq!(message.text, "привіт усім");
    }

    #[test]
    fn test_parse_row_empty_username_is_none() {
        let row = csv::StringRecord::from(vec![
            "1",
            "2",
            "",
            "bob",
            "2024-06-01 09:30:00",
            "hello",
        ]);
        assert_eq!(parse_row(&row).unwrap().chat_username, None);
    }

    #[test]
    fn test_parse_row_garbage_date() {
        let row = csv::StringRecord::from(vec!["1", "2", "", "bob", "yesterday", "hello"]);
        assert!(parse_row(&row).is_none());
    }
}
