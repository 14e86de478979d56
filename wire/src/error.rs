use thiserror::Error;

/// Errors produced while encoding or decoding wire envelopes.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("envelope decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("envelope encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload decode for `{kind}`: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("envelope type `{0}` carries no data payload")]
    NotData(String),
}
