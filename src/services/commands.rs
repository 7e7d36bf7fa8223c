//! Chat command interface.
//!
//! Parses `/start`, `/help`, `/list`, `/add` and `/remove`, runs them against
//! the [`QueryService`] and replies through the [`Notifier`]. Updates are
//! received by long polling `getUpdates`.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::models::{Message, Messages, QueryRequest};
use crate::services::{Notifier, QueryService, TelegramClient};

/// Pause after a failed `getUpdates` call.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    List,
    Add(QueryRequest),
    AddUsage,
    Remove(i64),
    RemoveUsage,
    InvalidId,
    Unknown,
}

impl Command {
    /// Parse message text. Returns `None` for text that is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        // Group chats address commands as `/list@botname`
        let name = name.split('@').next().unwrap_or(name);

        let command = match name {
            "start" | "help" => Self::Help,
            "list" => Self::List,
            "add" => parse_add(args).map_or(Self::AddUsage, Self::Add),
            "remove" if args.is_empty() => Self::RemoveUsage,
            "remove" => match args.parse::<i64>() {
                Ok(id) if id > 0 => Self::Remove(id),
                _ => Self::InvalidId,
            },
            _ => Self::Unknown,
        };
        Some(command)
    }
}

/// `/add term, location, radius[, max price[, min price]]`
fn parse_add(args: &str) -> Option<QueryRequest> {
    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    if !(3..=5).contains(&parts.len()) {
        return None;
    }

    let term = parts[0];
    let location = parts[1];
    if term.is_empty() || location.is_empty() {
        return None;
    }

    let radius_km = parts[2].parse().ok()?;
    let max_price = match parts.get(3) {
        Some(p) => Some(p.parse().ok()?),
        None => None,
    };
    let min_price = match parts.get(4) {
        Some(p) => Some(p.parse().ok()?),
        None => None,
    };

    Some(QueryRequest {
        term: term.to_string(),
        location: location.to_string(),
        radius_km,
        max_price,
        min_price,
        custom_link: None,
    })
}

/// Executes commands on behalf of chat users.
pub struct CommandHandler {
    queries: Arc<QueryService>,
    notifier: Arc<dyn Notifier>,
    messages: Arc<Messages>,
}

impl CommandHandler {
    pub fn new(
        queries: Arc<QueryService>,
        notifier: Arc<dyn Notifier>,
        messages: Arc<Messages>,
    ) -> Self {
        Self {
            queries,
            notifier,
            messages,
        }
    }

    /// Run a command and return the replies for the chat.
    pub async fn execute(&self, chat_id: i64, command: Command) -> Result<Vec<Message>> {
        let m = &self.messages;
        let replies = match command {
            Command::Help => vec![m.text(&m.help)],
            Command::List => {
                let queries = self.queries.list_queries(chat_id).await?;
                if queries.is_empty() {
                    vec![m.text(&m.no_queries)]
                } else {
                    queries.iter().map(|q| m.query_summary(q)).collect()
                }
            }
            Command::Add(request) => match self.queries.create_query(request, chat_id).await {
                Ok(query) => vec![m.query_added(&query)],
                Err(e) if e.is_storage() => return Err(e),
                Err(AppError::Validation(reason)) => vec![m.add_failed(&reason)],
                Err(e) => vec![m.add_failed(&e.to_string())],
            },
            Command::AddUsage => vec![m.text(&m.add_usage)],
            Command::Remove(id) => match self.queries.delete_query(id, chat_id).await {
                Ok(query) => vec![m.query_deleted(&query)],
                Err(AppError::NotFound(_)) => vec![m.text(&m.query_not_found)],
                Err(e) => return Err(e),
            },
            Command::RemoveUsage => vec![m.text(&m.remove_usage)],
            Command::InvalidId => vec![m.text(&m.invalid_id)],
            Command::Unknown => vec![m.text(&m.unknown_command)],
        };
        Ok(replies)
    }

    /// Parse, execute and answer one incoming text.
    pub async fn handle_text(&self, chat_id: i64, text: &str) {
        let Some(command) = Command::parse(text) else {
            log::debug!("Ignoring non-command message from chat {}", chat_id);
            return;
        };
        log::debug!("Chat {} sent {:?}", chat_id, command);

        let replies = match self.execute(chat_id, command).await {
            Ok(replies) => replies,
            Err(e) => {
                log::error!("Command from chat {} failed: {}", chat_id, e);
                return;
            }
        };

        for reply in &replies {
            if let Err(e) = self.notifier.notify(chat_id, reply).await {
                log::warn!("Failed to reply to chat {}: {}", chat_id, e);
                break;
            }
        }
    }

    /// Long-poll for updates until the task is cancelled.
    ///
    /// Each command runs in its own task so a slow `/add` never blocks the
    /// next update.
    pub async fn run(self: Arc<Self>, client: TelegramClient) {
        let mut offset = 0;
        log::info!("Listening for chat commands");

        loop {
            let updates = match client.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    log::warn!("getUpdates failed: {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let Some(message) = update.message else {
                    continue;
                };
                let Some(text) = message.text else {
                    continue;
                };
                log::debug!(
                    "Message from {} ({}): {}",
                    message.chat.id,
                    message.chat.username.as_deref().unwrap_or("-"),
                    text
                );

                let chat_id = message.chat.id;
                let handler = Arc::clone(&self);
                tokio::spawn(async move {
                    handler.handle_text(chat_id, &text).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Listing, ResolvedLocation, SearchParams};
    use crate::services::ListingFetcher;
    use crate::storage::SqliteStorage;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("/start"), Some(Command::Help));
        assert_eq!(Command::parse("/help"), Some(Command::Help));
        assert_eq!(Command::parse(" /list "), Some(Command::List));
        assert_eq!(Command::parse("/list@alert_bot"), Some(Command::List));
        assert_eq!(Command::parse("/clear"), Some(Command::Unknown));
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn test_parse_add() {
        let Some(Command::Add(req)) = Command::parse("/add road bike, Köln, 20") else {
            panic!("expected add");
        };
        assert_eq!(req.term, "road bike");
        assert_eq!(req.location, "Köln");
        assert_eq!(req.radius_km, 20);
        assert_eq!(req.max_price, None);

        let Some(Command::Add(req)) = Command::parse("/add bike, 50667, 10, 300, 50") else {
            panic!("expected add");
        };
        assert_eq!(req.max_price, Some(300));
        assert_eq!(req.min_price, Some(50));
    }

    #[test]
    fn test_parse_add_usage() {
        assert_eq!(Command::parse("/add"), Some(Command::AddUsage));
        assert_eq!(Command::parse("/add bike, Köln"), Some(Command::AddUsage));
        assert_eq!(Command::parse("/add bike, Köln, far"), Some(Command::AddUsage));
        assert_eq!(
            Command::parse("/add bike, Köln, 20, 1, 2, 3"),
            Some(Command::AddUsage)
        );
        assert_eq!(Command::parse("/add bike, Köln, 20, 3.50"), Some(Command::AddUsage));
    }

    #[test]
    fn test_parse_remove() {
        assert_eq!(Command::parse("/remove 12"), Some(Command::Remove(12)));
        assert_eq!(Command::parse("/remove"), Some(Command::RemoveUsage));
        assert_eq!(Command::parse("/remove abc"), Some(Command::InvalidId));
        assert_eq!(Command::parse("/remove -3"), Some(Command::InvalidId));
    }

    struct StaticFetcher;

    #[async_trait]
    impl ListingFetcher for StaticFetcher {
        async fn fetch(&self, _params: &SearchParams) -> Result<Vec<Listing>> {
            Ok(Vec::new())
        }

        async fn resolve_location(&self, name: &str) -> Result<ResolvedLocation> {
            if name == "Köln" {
                Ok(ResolvedLocation {
                    code: 945,
                    name: "Köln".into(),
                })
            } else {
                Err(AppError::not_found(format!("location '{name}'")))
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, owner: i64, message: &Message) -> Result<()> {
            self.sent.lock().unwrap().push((owner, message.plain.clone()));
            Ok(())
        }
    }

    fn handler() -> (CommandHandler, Arc<RecordingNotifier>) {
        let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
        let queries = Arc::new(QueryService::new(storage, Arc::new(StaticFetcher), 200));
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = CommandHandler::new(
            queries,
            notifier.clone(),
            Arc::new(Messages::default()),
        );
        (handler, notifier)
    }

    #[tokio::test]
    async fn test_add_list_remove_flow() {
        let (handler, notifier) = handler();

        handler.handle_text(5, "/list").await;
        handler.handle_text(5, "/add bike, Köln, 20, 300").await;
        handler.handle_text(5, "/list").await;
        handler.handle_text(6, "/remove 1").await;
        handler.handle_text(5, "/remove 1").await;
        handler.handle_text(5, "/list").await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 6);
        assert!(sent[0].1.starts_with("No searches found"));
        assert_eq!(sent[1].1, "Search for bike in Köln added. ID: 1");
        assert!(sent[2].1.contains("Max price: 300 €"));
        assert_eq!(sent[3], (6, "Search not found.".to_string()));
        assert_eq!(sent[4].1, "Search for bike removed.");
        assert!(sent[5].1.starts_with("No searches found"));
    }

    #[tokio::test]
    async fn test_add_with_unknown_location_reports_reason() {
        let (handler, notifier) = handler();
        handler.handle_text(5, "/add bike, Atlantis, 20").await;

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with("Could not add the search:"));
        assert!(sent[0].1.contains("Atlantis"));
    }
}
