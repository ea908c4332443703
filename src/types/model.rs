use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Represents a chat model identifier.
///
/// This can be a predefined model or a custom string value for models the service adds later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Model {
    /// Known model versions
    Known(KnownModel),

    /// Custom model identifier (for future models or private models)
    Custom(String),
}

/// Known chat model versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownModel {
    /// GPT-4
    #[serde(rename = "gpt-4")]
    Gpt4,

    /// GPT-4 Turbo
    #[serde(rename = "gpt-4-turbo")]
    Gpt4Turbo,

    /// GPT-4o
    #[serde(rename = "gpt-4o")]
    Gpt4o,

    /// GPT-4o mini
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,

    /// GPT-3.5 Turbo
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
}

impl KnownModel {
    /// Every known model.
    pub const ALL: [KnownModel; 5] = [
        KnownModel::Gpt4,
        KnownModel::Gpt4Turbo,
        KnownModel::Gpt4o,
        KnownModel::Gpt4oMini,
        KnownModel::Gpt35Turbo,
    ];

    /// The identifier the service uses for this model.
    pub fn as_str(&self) -> &'static str {
        match self {
            KnownModel::Gpt4 => "gpt-4",
            KnownModel::Gpt4Turbo => "gpt-4-turbo",
            KnownModel::Gpt4o => "gpt-4o",
            KnownModel::Gpt4oMini => "gpt-4o-mini",
            KnownModel::Gpt35Turbo => "gpt-3.5-turbo",
        }
    }
}

impl Model {
    /// The identifier sent to the service.
    pub fn as_str(&self) -> &str {
        match self {
            Model::Known(known) => known.as_str(),
            Model::Custom(custom) => custom,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for KnownModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Model {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(KnownModel::ALL
            .iter()
            .find(|known| known.as_str() == s)
            .map(|known| Model::Known(*known))
            .unwrap_or_else(|| Model::Custom(s.to_string())))
    }
}

impl From<KnownModel> for Model {
    fn from(model: KnownModel) -> Self {
        Model::Known(model)
    }
}

impl From<String> for Model {
    fn from(model: String) -> Self {
        match model.parse() {
            Ok(model) => model,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for Model {
    fn from(model: &str) -> Self {
        Model::from(model.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_serialization() {
        let model = Model::Known(KnownModel::Gpt4);
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#""gpt-4""#);

        let model = Model::Known(KnownModel::Gpt35Turbo);
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#""gpt-3.5-turbo""#);
    }

    #[test]
    fn custom_model_serialization() {
        let model = Model::Custom("my-finetune".to_string());
        let json = serde_json::to_string(&model).unwrap();
        assert_eq!(json, r#""my-finetune""#);
    }

    #[test]
    fn model_deserialization() {
        let model: Model = serde_json::from_str(r#""gpt-4o""#).unwrap();
        assert_eq!(model, Model::Known(KnownModel::Gpt4o));

        let model: Model = serde_json::from_str(r#""gpt-5-preview""#).unwrap();
        assert_eq!(model, Model::Custom("gpt-5-preview".to_string()));
    }

    #[test]
    fn parse_prefers_known_models() {
        assert_eq!(Model::from("gpt-4"), Model::Known(KnownModel::Gpt4));
        assert_eq!(
            Model::from(" o1-mini "),
            Model::Custom("o1-mini".to_string())
        );
    }
}
