use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of provider backends the relay can route to.
///
/// The wire name (`as_str`) is what the client sends in the `model` field of
/// a generation request. Adding a backend means adding a variant here and a
/// binding in `server::providers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Bedrock,
    Google,
    #[serde(rename = "openai")]
    OpenAi,
    /// GitHub Models, an OpenAI-compatible endpoint.
    Github,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Bedrock,
        ProviderKind::Google,
        ProviderKind::OpenAi,
        ProviderKind::Github,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Bedrock => "bedrock",
            ProviderKind::Google => "google",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Github => "github",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Bedrock => "Amazon Bedrock",
            ProviderKind::Google => "Google Gemini",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Github => "GitHub Models",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProvider(pub String);

impl fmt::Display for UnknownProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported model provider '{}'", self.0)
    }
}

impl std::error::Error for UnknownProvider {}

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_names_case_insensitively() {
        assert_eq!("openai".parse(), Ok(ProviderKind::OpenAi));
        assert_eq!("Bedrock".parse(), Ok(ProviderKind::Bedrock));
        assert_eq!("GITHUB".parse(), Ok(ProviderKind::Github));
        assert!("azure".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        for kind in ProviderKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: ProviderKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }
}
