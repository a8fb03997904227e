use async_trait::async_trait;
use engine::{Confirm, EngineError, ResultEngine};
use teloxide::{prelude::*, types::ChatId};

use crate::state::PendingCodes;

const CODE_PROMPT: &str = "Code:";

/// Asks the chat for the code the bank sent and waits for the reply.
pub(crate) struct ChatConfirm {
    bot: Bot,
    chat_id: ChatId,
    codes: PendingCodes,
}

impl ChatConfirm {
    pub(crate) fn new(bot: Bot, chat_id: ChatId, codes: PendingCodes) -> Self {
        Self {
            bot,
            chat_id,
            codes,
        }
    }
}

#[async_trait]
impl Confirm for ChatConfirm {
    async fn confirmation_code(&self, username: &str) -> ResultEngine<String> {
        let reply = self.codes.expect(self.chat_id).await;
        tracing::info!("asking chat {} for the code of {username}", self.chat_id);
        self.bot
            .send_message(self.chat_id, CODE_PROMPT)
            .await
            .map_err(|err| EngineError::Confirmation(err.to_string()))?;

        reply
            .await
            .map_err(|_| EngineError::Confirmation("code request dropped".to_string()))
    }
}
