pub mod build;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod corpus;
pub mod fleet;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod report;
pub mod services;
pub mod stopwords;
pub mod store;

#[derive(Debug)]
pub enum LdaError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
    Http(String),
    /// A capacity request was refused because the bid is below market.
    BidTooLow,
    Fleet(String),
    /// The launch failed after capacity was requested; the requests may
    /// still be open at the provider.
    Abandoned {
        request_ids: Vec<String>,
        cause: Box<LdaError>,
    },
    Corpus(String),
    Trainer(String),
    Model(String),
    Interrupted,
}

impl std::fmt::Display for LdaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LdaError::Io(e) => write!(f, "io: {e}"),
            LdaError::Json(e) => write!(f, "json: {e}"),
            LdaError::Config(msg) => write!(f, "config: {msg}"),
            LdaError::Http(msg) => write!(f, "http: {msg}"),
            LdaError::BidTooLow => write!(f, "fleet: bid price too low, try again later"),
            LdaError::Fleet(msg) => write!(f, "fleet: {msg}"),
            LdaError::Abandoned { request_ids, cause } => write!(
                f,
                "{cause} ({} capacity requests left open: {})",
                request_ids.len(),
                request_ids.join(" ")
            ),
            LdaError::Corpus(msg) => write!(f, "corpus: {msg}"),
            LdaError::Trainer(msg) => write!(f, "trainer: {msg}"),
            LdaError::Model(msg) => write!(f, "model: {msg}"),
            LdaError::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl LdaError {
    /// The error underneath any `Abandoned` wrapping.
    pub fn root_cause(&self) -> &LdaError {
        match self {
            LdaError::Abandoned { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.root_cause(), LdaError::Interrupted)
    }
}

impl std::error::Error for LdaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LdaError::Io(e) => Some(e),
            LdaError::Json(e) => Some(e),
            LdaError::Abandoned { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LdaError {
    fn from(e: std::io::Error) -> Self {
        LdaError::Io(e)
    }
}

impl From<serde_json::Error> for LdaError {
    fn from(e: serde_json::Error) -> Self {
        LdaError::Json(e)
    }
}

impl From<ureq::Error> for LdaError {
    fn from(e: ureq::Error) -> Self {
        LdaError::Http(e.to_string())
    }
}
