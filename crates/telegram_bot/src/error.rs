use engine::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotError {
    #[error("missing telegram token")]
    MissingToken,
    #[error("missing synchronizer")]
    MissingSynchronizer,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("telegram: {0}")]
    Telegram(#[from] teloxide::RequestError),
}
