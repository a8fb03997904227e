use std::sync::Arc;

use engine::{Client, Credential};
use teloxide::{
    prelude::*,
    types::{ChatId, User},
};

use crate::{ConfigParameters, confirm::ChatConfirm, error::BotError};

/// Telegram refuses longer messages.
const MESSAGE_LIMIT: usize = 4096;
const MAX_DAYS: u32 = 3650;

pub(crate) async fn handle_message(
    bot: Bot,
    msg: Message,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    let Some(credential) = allowed_credential(&cfg, msg.from.as_ref()) else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;

    let command = match parse_command(text) {
        Some(Ok(command)) => command,
        Some(Err(err)) => {
            bot.send_message(chat_id, err).await?;
            return Ok(());
        }
        None => {
            if !cfg.codes.deliver(chat_id, text).await {
                bot.send_message(chat_id, help_text()).await?;
            }
            return Ok(());
        }
    };

    match command {
        Command::UpdateBankStatement { days } => {
            update_bank_statement(bot, chat_id, credential, days, cfg).await?;
        }
        Command::Cancel => {
            let text = if cfg.runs.cancel(chat_id).await {
                "Canceling..."
            } else {
                "Nothing to cancel."
            };
            bot.send_message(chat_id, text).await?;
        }
        Command::Help => {
            bot.send_message(chat_id, help_text()).await?;
        }
    }

    Ok(())
}

async fn update_bank_statement(
    bot: Bot,
    chat_id: ChatId,
    (user_id, credential): (u64, Credential),
    days: Option<u32>,
    cfg: ConfigParameters,
) -> ResponseResult<()> {
    let Some(cancel) = cfg.runs.start(chat_id).await else {
        bot.send_message(chat_id, "A sync is already running, use /cancel to stop it.")
            .await?;
        return Ok(());
    };

    let client = match client_for(&bot, chat_id, user_id, credential, &cfg).await {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("failed to create client for user {user_id}: {err}");
            cfg.runs.finish(chat_id).await;
            bot.send_message(chat_id, err.to_string()).await?;
            return Ok(());
        }
    };

    // The dispatcher serializes updates per chat, and the code reply has to
    // get through while the sync runs.
    tokio::spawn(async move {
        let overlap = days.map(|days| chrono::Duration::days(i64::from(days)));
        let result = cfg.synchronizer.sync(&client, cancel, overlap).await;
        cfg.runs.finish(chat_id).await;

        let text = match result {
            Ok(report) => {
                tracing::info!(
                    "sync for user {user_id} done, {} failures",
                    report.failures()
                );
                report.to_string()
            }
            Err(err) => {
                tracing::warn!("sync for user {user_id} stopped: {err}");
                err.to_string()
            }
        };

        for page in pages(&text, MESSAGE_LIMIT) {
            if let Err(err) = bot.send_message(chat_id, page).await {
                tracing::warn!("failed to send report to chat {chat_id}: {err}");
                break;
            }
        }
    });

    Ok(())
}

async fn client_for(
    bot: &Bot,
    chat_id: ChatId,
    user_id: u64,
    credential: Credential,
    cfg: &ConfigParameters,
) -> Result<Arc<Client>, BotError> {
    if let Some(client) = cfg.clients.get(user_id).await {
        return Ok(client);
    }

    let confirm = ChatConfirm::new(bot.clone(), chat_id, cfg.codes.clone());
    let client = Client::builder()
        .credential(credential)
        .confirm(Arc::new(confirm))
        .config(cfg.provider.clone())
        .build()
        .await?;
    Ok(cfg.clients.insert(user_id, Arc::new(client)).await)
}

/// Only users with stored credentials are served.
fn allowed_credential(cfg: &ConfigParameters, from: Option<&User>) -> Option<(u64, Credential)> {
    let user_id = from?.id.0;
    cfg.credentials
        .get(user_id)
        .map(|credential| (user_id, credential.clone()))
}

/// Split `text` on line boundaries into chunks of at most `limit` chars.
/// A line longer than `limit` is cut.
fn pages(text: &str, limit: usize) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for line in text.lines() {
        let mut line: Vec<char> = line.chars().collect();
        while line.len() > limit {
            let rest = line.split_off(limit);
            if !current.is_empty() {
                pages.push(std::mem::take(&mut current));
            }
            pages.push(line.iter().collect());
            current_len = 0;
            line = rest;
        }

        let separator = usize::from(!current.is_empty());
        if current_len + separator + line.len() > limit {
            pages.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push('\n');
            current_len += 1;
        }
        current.extend(line.iter());
        current_len += line.len();
    }

    if !current.is_empty() {
        pages.push(current);
    }
    pages
}

fn parse_command(text: &str) -> Option<Result<Command, String>> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let mut parts = trimmed.split_whitespace();
    let cmd = parts.next().unwrap_or("");
    let cmd = cmd.split_once('@').map_or(cmd, |(cmd, _bot)| cmd);
    let arg = parts.next();

    let command = match cmd {
        "/update_bank_statement" => match arg.map(str::parse::<u32>) {
            None => Ok(Command::UpdateBankStatement { days: None }),
            Some(Ok(days)) if (1..=MAX_DAYS).contains(&days) => {
                Ok(Command::UpdateBankStatement { days: Some(days) })
            }
            Some(_) => Err(format!(
                "The first parameter must be empty or a number of days between 1 and {MAX_DAYS}."
            )),
        },
        "/cancel" => Ok(Command::Cancel),
        "/help" | "/start" => Ok(Command::Help),
        _ => return None,
    };
    Some(command)
}

fn help_text() -> &'static str {
    "/update_bank_statement [days] - sync bank and brokerage records; days \
     overrides how far back already stored records are refreshed\n\
     /cancel - stop the running sync\n\
     /help - show this message"
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    UpdateBankStatement { days: Option<u32> },
    Cancel,
    Help,
}
