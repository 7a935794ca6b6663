//! Telegram adapter: command dispatch and the catch-all ingestion handler.
//!
//! This layer is deliberately thin. It translates chat events into store and
//! orchestrator calls and formats their results back into Telegram messages;
//! all retrieval logic lives behind those seams. Command failures are caught
//! at the command boundary so one bad request never takes down polling.

use std::sync::Arc;

use teloxide::net::Download;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{LinkPreviewOptions, ParseMode, PhotoSize};
use teloxide::utils::command::BotCommands;

use crate::messages::{Message as StoredMessage, MessageStore, UNKNOWN_SENDER};
use crate::ocr::OcrAvailability;
use crate::orchestrator::{CommandKind, CooldownTracker, RetrievalOrchestrator, SummaryOutcome};
use crate::pipeline::{EnqueueError, OcrJob, OcrPipeline};

/// How many message links to attach under an answer.
const LINKED_MESSAGES: usize = 5;

/// Everything the handlers need, constructed once at startup and shared
/// through the dispatcher's dependency map.
pub struct BotContext {
    pub store: Arc<dyn MessageStore>,
    pub pipeline: Option<Arc<OcrPipeline>>,
    pub ocr_status: OcrAvailability,
    pub orchestrator: RetrievalOrchestrator,
    pub rewriter: Arc<dyn crate::llm::QueryRewriter>,
    pub cooldowns: CooldownTracker,
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Status,
    Ask(String),
    Summary,
    Debug(String),
}

/// Long-poll until the process is interrupted.
pub async fn run(bot: Bot, ctx: Arc<BotContext>) {
    let handler = Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(dptree::endpoint(handle_event));

    log::info!("starting telegram long polling");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx])
        .enable_ctrlc_handler()
        .default_handler(|_| async {})
        .build()
        .dispatch()
        .await;
}

async fn handle_command(
    bot: Bot,
    msg: teloxide::types::Message,
    cmd: Command,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id;

    let result = match cmd {
        Command::Start => cmd_start(&bot, &msg).await,
        Command::Status => cmd_status(&bot, &msg, &ctx).await,
        Command::Ask(question) => cmd_ask(&bot, &msg, &ctx, &question).await,
        Command::Summary => cmd_summary(&bot, &msg, &ctx).await,
        Command::Debug(query) => cmd_debug(&bot, &msg, &ctx, &query).await,
    };

    if let Err(err) = result {
        log::error!("command failed in chat {chat_id}: {err:#}");
        let _ = bot
            .send_message(chat_id, format!("An error occurred: {err}"))
            .await;
    }

    Ok(())
}

async fn cmd_start(bot: &Bot, msg: &teloxide::types::Message) -> anyhow::Result<()> {
    bot.send_message(
        msg.chat.id,
        "🤖 **Welcome to Summary Bot!**\n\n\
         I can help you search and summarize messages using AI.\n\n\
         **📝 Commands:**\n\
         • `/ask <question>` - Search and answer questions\n\
         • `/summary` - Summarize recent chat history\n\
         • `/status` - Show bot health and queue status\n\n\
         **🔍 What I can do:**\n\
         • Search through text messages\n\
         • Extract and search text from images (OCR)\n\
         • Answer in the same language you ask\n\
         • Provide links to original messages\n\n\
         **⚠️ Important:**\n\
         I only know about messages sent **after** I was added to this chat. \
         I cannot search through old messages that were sent before I joined.\n\n\
         **📱 Example:**\n\
         `/ask what did John say about the meeting?`\n\
         `/ask коли буде наступна зустріч?`",
    )
    .parse_mode(ParseMode::Markdown)
    .await?;
    Ok(())
}

async fn cmd_status(
    bot: &Bot,
    msg: &teloxide::types::Message,
    ctx: &BotContext,
) -> anyhow::Result<()> {
    let stored = ctx.store.count(msg.chat.id.0);

    let ocr_line = match (&ctx.pipeline, &ctx.ocr_status) {
        (Some(pipeline), _) => {
            format!(
                "📸 OCR Queue: {}/{}\n👷 Active Workers: {}",
                pipeline.queue_len(),
                pipeline.queue_capacity(),
                pipeline.active_workers().await
            )
        }
        (None, OcrAvailability::Unavailable(reason)) => format!("📸 OCR: unavailable ({reason})"),
        (None, OcrAvailability::Ready(_)) => "📸 OCR: idle".to_string(),
    };

    bot.send_message(
        msg.chat.id,
        format!("🤖 *Bot Status*\n{ocr_line}\n💾 Stored messages: {stored}"),
    )
    .parse_mode(ParseMode::Markdown)
    .await?;
    Ok(())
}

async fn cmd_ask(
    bot: &Bot,
    msg: &teloxide::types::Message,
    ctx: &BotContext,
    question: &str,
) -> anyhow::Result<()> {
    let question = question.trim();
    if question.is_empty() {
        bot.send_message(msg.chat.id, "Please provide a question after /ask command.")
            .await?;
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    if let Err(remaining) = ctx.cooldowns.try_acquire(chat_id, CommandKind::Ask) {
        bot.send_message(
            msg.chat.id,
            format!(
                "Please wait {}s before asking again.",
                remaining.as_secs().max(1)
            ),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "🔍 Generating search query...")
        .await?;

    // The rewriter is best-effort: on failure the raw question is searched.
    let query = match ctx.rewriter.generate_query(question).await {
        Ok(query) => query,
        Err(err) => {
            log::warn!("query rewriting failed, using raw question: {err}");
            question.to_string()
        }
    };

    bot.send_message(msg.chat.id, format!("📱 Searching for: *{query}*"))
        .parse_mode(ParseMode::Markdown)
        .await?;

    let outcome = ctx.orchestrator.search(chat_id, &query).await?;
    if outcome.messages.is_empty() {
        bot.send_message(msg.chat.id, "No messages found for your query.")
            .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "📝 Generating summary...")
        .await?;
    let answer = ctx.orchestrator.answer(question, &outcome).await?;

    let mut parts = vec![
        format!("🔍 *Search Query:* {}", outcome.query),
        format!("📊 *Found:* {} messages", outcome.total_found),
        format!("📝 *Answer:*\n\n{answer}"),
        "\n📌 *Messages:*".to_string(),
    ];
    for message in outcome.messages.iter().take(LINKED_MESSAGES) {
        let stamp = message.date.format("%d.%m %H:%M");
        match message.link() {
            Some(link) => parts.push(format!("• [{stamp}]({link}) - {}", message.sender)),
            None => parts.push(format!("• {stamp} - {} (private chat)", message.sender)),
        }
    }

    bot.send_message(msg.chat.id, parts.join("\n"))
        .parse_mode(ParseMode::Markdown)
        .link_preview_options(no_link_preview())
        .await?;
    Ok(())
}

async fn cmd_summary(
    bot: &Bot,
    msg: &teloxide::types::Message,
    ctx: &BotContext,
) -> anyhow::Result<()> {
    let chat_id = msg.chat.id.0;
    if let Err(remaining) = ctx.cooldowns.try_acquire(chat_id, CommandKind::Summary) {
        bot.send_message(
            msg.chat.id,
            format!(
                "Please wait {}s before requesting another summary.",
                remaining.as_secs().max(1)
            ),
        )
        .await?;
        return Ok(());
    }

    bot.send_message(msg.chat.id, "📝 Summarizing recent messages...")
        .await?;

    match ctx.orchestrator.summary(chat_id).await? {
        SummaryOutcome::NotEnoughMessages(count) => {
            bot.send_message(
                msg.chat.id,
                format!("Not enough messages to summarize yet ({count} stored)."),
            )
            .await?;
        }
        SummaryOutcome::Summary(text) => {
            bot.send_message(msg.chat.id, text).await?;
        }
    }
    Ok(())
}

async fn cmd_debug(
    bot: &Bot,
    msg: &teloxide::types::Message,
    ctx: &BotContext,
    query: &str,
) -> anyhow::Result<()> {
    let query = query.trim().to_string();
    if query.is_empty() {
        bot.send_message(msg.chat.id, "Please provide a query after /debug command.")
            .await?;
        return Ok(());
    }

    let chat_id = msg.chat.id.0;
    let store = ctx.store.clone();
    let report =
        tokio::task::spawn_blocking(move || store.debug_report(chat_id, &query)).await?;

    let mut text = format!(
        "🔍 *Debug Report*\n\
         Query: {}\n\
         Total messages: {}\n\
         Semantic results: {}\n\
         Fuzzy results: {}\n",
        report.query, report.total_messages, report.semantic_results, report.fuzzy_results
    );
    if !report.sample_texts.is_empty() {
        text.push_str("\nRecent samples:\n");
        for sample in &report.sample_texts {
            text.push_str(sample);
            text.push('\n');
        }
    }

    bot.send_message(msg.chat.id, text)
        .parse_mode(ParseMode::Markdown)
        .await?;
    Ok(())
}

/// Catch-all ingestion: every non-command text message is stored, every
/// photo is queued for OCR, captions are stored as text.
async fn handle_event(
    bot: Bot,
    msg: teloxide::types::Message,
    ctx: Arc<BotContext>,
) -> ResponseResult<()> {
    if let Some(text) = msg.text() {
        // Unknown commands fall through to this handler; never store them.
        if !text.starts_with('/') {
            save(&ctx, to_stored(&msg, text.to_string())).await;
        }
        return Ok(());
    }

    if let Some(photos) = msg.photo() {
        match &ctx.pipeline {
            Some(pipeline) => {
                if let Some(image) = download_photo(&bot, photos).await {
                    enqueue_photo(pipeline, &msg, image).await;
                }
            }
            None => log::debug!("ocr unavailable, skipping photo in chat {}", msg.chat.id),
        }

        if let Some(caption) = msg.caption() {
            save(&ctx, to_stored(&msg, format!("[Image Caption] {caption}"))).await;
        }
    }

    Ok(())
}

fn sender_name(msg: &teloxide::types::Message) -> String {
    msg.from
        .as_ref()
        .map(|user| {
            user.username
                .clone()
                .unwrap_or_else(|| user.first_name.clone())
        })
        .unwrap_or_else(|| UNKNOWN_SENDER.to_string())
}

/// Username used for deep links. Private chats have none by design.
fn public_chat_username(msg: &teloxide::types::Message) -> Option<String> {
    if msg.chat.is_private() {
        None
    } else {
        msg.chat.username().map(str::to_string)
    }
}

fn to_stored(msg: &teloxide::types::Message, text: String) -> StoredMessage {
    StoredMessage {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        chat_username: public_chat_username(msg),
        text,
        sender: sender_name(msg),
        date: msg.date,
    }
}

/// Commit through the blocking pool; save embeds the text. Ingestion
/// failures are logged, never echoed into the chat.
async fn save(ctx: &BotContext, message: StoredMessage) {
    let store = ctx.store.clone();
    match tokio::task::spawn_blocking(move || store.save(message)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => log::error!("failed to store message: {err}"),
        Err(err) => log::error!("store task failed: {err}"),
    }
}

/// Download the largest photo variant (last in the array).
async fn download_photo(bot: &Bot, photos: &[PhotoSize]) -> Option<Vec<u8>> {
    let largest = photos.last()?;

    let file = match bot.get_file(largest.file.id.clone()).await {
        Ok(file) => file,
        Err(err) => {
            log::error!("failed to resolve photo file: {err}");
            return None;
        }
    };

    let mut buf = Vec::new();
    if let Err(err) = bot.download_file(&file.path, &mut buf).await {
        log::error!("failed to download photo: {err}");
        return None;
    }
    Some(buf)
}

async fn enqueue_photo(pipeline: &OcrPipeline, msg: &teloxide::types::Message, image: Vec<u8>) {
    let job = OcrJob {
        message_id: msg.id.0,
        chat_id: msg.chat.id.0,
        chat_username: public_chat_username(msg),
        sender: sender_name(msg),
        date: msg.date,
        image,
    };

    match pipeline.enqueue(job).await {
        Ok(()) => {}
        Err(EnqueueError::QueueFull) => log::warn!("OCR queue is full, dropping image"),
        Err(EnqueueError::Closed) => log::warn!("ocr pipeline closed, dropping image"),
    }
}

fn no_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}
