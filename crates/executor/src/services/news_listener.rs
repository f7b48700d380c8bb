use std::sync::Arc;

use chrono::{DateTime, Utc};
use teloxide::prelude::*;
use tracing::{debug, info, warn};

use bus::{BusMessage, InProcessBus, MessageBus, topics};
use common::models::{NewsItem, NewsKind};
use orchestrator::Orchestrator;

/// Builds a news item from a chat post. Posts without text are skipped.
pub fn news_item(chat: &str, text: Option<&str>, is_channel: bool, date: DateTime<Utc>) -> Option<NewsItem> {
    let text = text.map(str::trim).filter(|t| !t.is_empty())?;
    Some(NewsItem {
        channel: chat.to_string(),
        text: text.to_string(),
        kind: if is_channel { NewsKind::Channel } else { NewsKind::Group },
        date,
    })
}

/// True when `text` from `chat` is the operator's `/resume` command.
pub fn resume_requested(operator_chat: ChatId, chat: ChatId, text: Option<&str>) -> bool {
    let Some(command) = text.and_then(|t| t.split_whitespace().next()) else {
        return false;
    };
    chat == operator_chat && (command == "/resume" || command.starts_with("/resume@"))
}

/// The chat allowed to clear a trading halt.
#[derive(Clone)]
pub struct Operator {
    pub chat_id: ChatId,
    pub orchestrator: Arc<Orchestrator>,
}

async fn relay(
    bot: Bot,
    msg: Message,
    bus: Arc<InProcessBus>,
    operator: Option<Operator>,
) -> ResponseResult<()> {
    if let Some(operator) = &operator {
        if resume_requested(operator.chat_id, msg.chat.id, msg.text()) {
            let was_halted = operator.orchestrator.snapshot().risk.is_halted();
            operator.orchestrator.reset_halt();
            info!("Halt reset requested from chat {}", msg.chat.id);
            let reply = if was_halted {
                "Halt cleared. Trading resumes on the next cycle."
            } else {
                "Trading was not halted."
            };
            bot.send_message(msg.chat.id, reply).await?;
            return Ok(());
        }
    }

    let chat = msg
        .chat
        .username()
        .or_else(|| msg.chat.title())
        .map(str::to_string)
        .unwrap_or_else(|| msg.chat.id.to_string());
    let text = msg.text().or_else(|| msg.caption());

    if let Some(item) = news_item(&chat, text, msg.chat.is_channel(), msg.date) {
        debug!("News from {}: {} chars", item.channel, item.text.len());
        if let Err(e) = bus.publish(topics::RAW_NEWS, BusMessage::News(item)).await {
            warn!("Failed to publish news: {}", e);
        }
    }
    Ok(())
}

/// Publishes posts from every channel and group the bot is in on `raw_news`,
/// and takes `/resume` from the operator chat.
pub struct NewsListener {
    bot: Bot,
    bus: Arc<InProcessBus>,
    operator: Option<Operator>,
}

impl NewsListener {
    pub fn new(bot: Bot, bus: Arc<InProcessBus>, operator: Option<Operator>) -> Self {
        Self { bot, bus, operator }
    }

    pub async fn start(self) {
        info!("Starting Telegram News Listener");

        let handler = dptree::entry()
            .branch(Update::filter_message().endpoint(relay))
            .branch(Update::filter_channel_post().endpoint(relay));

        Dispatcher::builder(self.bot, handler)
            .dependencies(dptree::deps![self.bus, self.operator])
            .build()
            .dispatch()
            .await;

        info!("Telegram News Listener stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_posts_become_channel_news() {
        let item = news_item("wublockchain", Some("  SEC approves ETF \n"), true, Utc::now()).unwrap();
        assert_eq!(item.text, "SEC approves ETF");
        assert_eq!(item.kind, NewsKind::Channel);
    }

    #[test]
    fn group_chatter_is_tagged_as_group() {
        let item = news_item("bitcoin_chat", Some("moon soon"), false, Utc::now()).unwrap();
        assert_eq!(item.kind, NewsKind::Group);
    }

    #[test]
    fn resume_only_from_operator_chat() {
        let operator = ChatId(42);
        assert!(resume_requested(operator, ChatId(42), Some("/resume")));
        assert!(resume_requested(operator, ChatId(42), Some("/resume@trading_bot now")));
        assert!(!resume_requested(operator, ChatId(7), Some("/resume")));
        assert!(!resume_requested(operator, ChatId(42), Some("/resumed")));
        assert!(!resume_requested(operator, ChatId(42), Some("please /resume")));
        assert!(!resume_requested(operator, ChatId(42), None));
    }

    #[test]
    fn empty_posts_are_skipped() {
        assert!(news_item("wublockchain", None, true, Utc::now()).is_none());
        assert!(news_item("wublockchain", Some("   "), true, Utc::now()).is_none());
    }
}
