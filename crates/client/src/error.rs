#![forbid(unsafe_code)]

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("http {status} from {url}")]
    Status { status: u16, url: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("websocket: {0}")]
    WebSocket(Box<tungstenite::Error>),
    #[error("websocket handshake: {0}")]
    Handshake(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("server rejected {0}")]
    Rejected(&'static str),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }
}

impl From<ureq::Error> for ClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Status(status, response) => Self::Status {
                status,
                url: response.get_url().to_string(),
            },
            ureq::Error::Transport(transport) => Self::Transport(transport.to_string()),
        }
    }
}

impl From<tungstenite::Error> for ClientError {
    fn from(value: tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(value))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
