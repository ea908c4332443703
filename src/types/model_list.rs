use serde::Deserialize;

/// Response body for `GET models`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelList {
    /// The models visible to the credential.
    pub data: Vec<ModelInfo>,
}

/// A single entry of a [`ModelList`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelInfo {
    /// Model identifier, usable in requests.
    pub id: String,

    /// Organization that owns the model.
    #[serde(default)]
    pub owned_by: Option<String>,
}

impl ModelList {
    /// The identifiers of every listed model, in listing order.
    pub fn ids(&self) -> Vec<String> {
        self.data.iter().map(|model| model.id.clone()).collect()
    }
}
