pub const DEFAULT_PROVIDER_ID: &str = "openai";
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Connection and sampling settings for the generation model.
#[derive(Debug, Clone, PartialEq)]
pub struct RagModelConfig {
    pub provider_id: String,
    pub api_key: String,
    pub endpoint: String,
    pub model_id: String,
    pub max_tokens: Option<u64>,
    pub temperature: Option<f64>,
}

impl RagModelConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: impl Into<String>,
        endpoint: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        let model_id = model_id.into().trim().to_string();
        Self {
            provider_id: provider_id.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            endpoint: endpoint.into().trim().to_string(),
            model_id: if model_id.is_empty() {
                DEFAULT_OPENAI_MODEL.to_string()
            } else {
                model_id
            },
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_model_falls_back_to_default() {
        let config = RagModelConfig::new(" openai ", " key ", "", "  ");
        assert_eq!(config.provider_id, "openai");
        assert_eq!(config.api_key, "key");
        assert_eq!(config.model_id, DEFAULT_OPENAI_MODEL);
        assert!(config.max_tokens.is_none());
    }
}
