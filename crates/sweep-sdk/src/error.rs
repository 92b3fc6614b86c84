use thiserror::Error;

pub type Result<T> = std::result::Result<T, SweepSdkError>;

#[derive(Debug, Error)]
pub enum SweepSdkError {
    #[error("failed to decode transaction: {0}")]
    Decode(String),

    #[error("failed to extract unlock height: {0}")]
    HeightExtraction(String),

    #[error("wallet reported signing incomplete")]
    IncompleteSignature,

    #[error("insufficient funds: {available} sats available, {required} sats required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("transaction does not signal BIP-125 replaceability")]
    NotReplaceable,

    #[error("bitcoin rpc error: {0}")]
    Rpc(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("bridge api error: {0}")]
    BridgeApi(String),

    #[error("websocket error: {0}")]
    Websocket(String),
}

impl From<tokio_rusqlite::Error> for SweepSdkError {
    fn from(e: tokio_rusqlite::Error) -> Self {
        SweepSdkError::Store(e.to_string())
    }
}

impl From<bitcoincore_rpc_async::Error> for SweepSdkError {
    fn from(e: bitcoincore_rpc_async::Error) -> Self {
        SweepSdkError::Rpc(e.to_string())
    }
}
