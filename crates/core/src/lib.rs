#![forbid(unsafe_code)]

pub mod detail;
pub mod layout;
pub mod tree;

pub mod ids {
    use serde::{Deserialize, Deserializer, Serialize};

    /// Server-assigned node id. The client never mints these.
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    )]
    #[serde(transparent)]
    pub struct NodeId(pub u64);

    impl NodeId {
        pub fn get(self) -> u64 {
            self.0
        }
    }

    impl std::fmt::Display for NodeId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl From<u64> for NodeId {
        fn from(value: u64) -> Self {
            Self(value)
        }
    }

    /// Tree id as used in URL paths. The backend hands these out either as integers or as
    /// short strings, so both decode into the same validated form.
    #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
    #[serde(transparent)]
    pub struct TreeId(String);

    impl TreeId {
        pub fn as_str(&self) -> &str {
            &self.0
        }

        pub fn try_new(value: impl Into<String>) -> Result<Self, TreeIdError> {
            let value = value.into();
            validate_tree_id(&value)?;
            Ok(Self(value))
        }
    }

    impl std::fmt::Display for TreeId {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(&self.0)
        }
    }

    impl<'de> Deserialize<'de> for TreeId {
        fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            #[derive(Deserialize)]
            #[serde(untagged)]
            enum Raw {
                Int(u64),
                Text(String),
            }

            let raw = match Raw::deserialize(deserializer)? {
                Raw::Int(value) => value.to_string(),
                Raw::Text(value) => value,
            };
            TreeId::try_new(raw).map_err(|err| serde::de::Error::custom(err.message()))
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum TreeIdError {
        Empty,
        TooLong,
        InvalidChar { ch: char, index: usize },
    }

    impl TreeIdError {
        pub fn message(&self) -> &'static str {
            match self {
                Self::Empty => "tree id must not be empty",
                Self::TooLong => "tree id is too long",
                Self::InvalidChar { .. } => "tree id must be [A-Za-z0-9._-]",
            }
        }
    }

    fn validate_tree_id(value: &str) -> Result<(), TreeIdError> {
        if value.is_empty() {
            return Err(TreeIdError::Empty);
        }
        if value.len() > 128 {
            return Err(TreeIdError::TooLong);
        }
        for (index, ch) in value.chars().enumerate() {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                continue;
            }
            return Err(TreeIdError::InvalidChar { ch, index });
        }
        Ok(())
    }

}
