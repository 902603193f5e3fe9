//! OpenAI Responses API classification service.
//!
//! Sends the receipt image as a base64 data URL together with a strict
//! `json_schema` text format and returns the parsed structured output.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ClassificationService, Result, check_status};
use crate::error::{RemoteError, SlipsError};
use crate::models::config::ClassifierConfig;
use crate::pdf::ExtractedImage;
use crate::receipt::classifier::SCHEMA_NAME;

const DEFAULT_PROMPT: &str = "You are an expert at extracting structured data from scanned receipt images. \
From the image, fill in the requested structured format:
- merchant: the store or business name as printed
- date: the purchase date as YYYY-MM-DD
- total: the amount paid, as a number
- currency: the ISO currency code of the total (ZAR, USD or GBP), or null if it is ZAR
- name: {merchant lowercase, hyphens for spaces}_{YYYY-MM-DD}_{total in ZAR with two decimals}zar

Examples of names:
pick-n-pay_2025-03-31_1336.37zar
checkers_2025-01-31_10.00zar
hussar-gril_2025-02-28_998.09zar

If the currency is not ZAR, the name uses these conversions:
1 USD = 18.50 ZAR
1 GBP = 22.50 ZAR";

// Request types

#[derive(Debug, Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage<'a>>,
    text: TextOptions<'a>,
}

#[derive(Debug, Serialize)]
struct InputMessage<'a> {
    role: &'static str,
    content: Vec<InputContent<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputContent<'a> {
    InputText { text: &'a str },
    InputImage { image_url: String },
}

#[derive(Debug, Serialize)]
struct TextOptions<'a> {
    format: TextFormat<'a>,
}

#[derive(Debug, Serialize)]
struct TextFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    name: &'static str,
    schema: &'a Value,
    strict: bool,
}

// Response types

#[derive(Debug, Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

/// Classification service backed by the OpenAI Responses API.
pub struct OpenAiClassifier {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    prompt: String,
}

impl OpenAiClassifier {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        let defaults = ClassifierConfig::default();
        Self {
            http,
            api_key: api_key.into(),
            endpoint: defaults.endpoint,
            model: defaults.model,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }

    /// Build from configuration, reading the API key from the configured environment variable.
    pub fn from_config(config: &ClassifierConfig, http: reqwest::Client) -> crate::error::Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                SlipsError::Config(format!("environment variable {} is not set", config.api_key_env))
            })?;

        Ok(Self::new(http, api_key)
            .with_endpoint(config.endpoint.clone())
            .with_model(config.model.clone()))
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    fn request_body<'a>(&'a self, image: &ExtractedImage, schema: &'a Value) -> ResponsesRequest<'a> {
        let image_url = format!(
            "data:{};base64,{}",
            image.mime_type(),
            STANDARD.encode(&image.data)
        );

        ResponsesRequest {
            model: &self.model,
            input: vec![
                InputMessage {
                    role: "system",
                    content: vec![InputContent::InputText { text: &self.prompt }],
                },
                InputMessage {
                    role: "user",
                    content: vec![
                        InputContent::InputText {
                            text: "Extract the receipt data from this image.",
                        },
                        InputContent::InputImage { image_url },
                    ],
                },
            ],
            text: TextOptions {
                format: TextFormat {
                    kind: "json_schema",
                    name: SCHEMA_NAME,
                    schema,
                    strict: true,
                },
            },
        }
    }
}

/// Pull the structured JSON out of a Responses API answer.
fn parse_output(response: ResponsesResponse) -> Result<Value> {
    match response.status.as_deref() {
        None | Some("completed") => {}
        Some(status) => {
            return Err(RemoteError::Decode(format!("response status is {}", status)));
        }
    }

    for item in response.output.into_iter().filter(|o| o.kind == "message") {
        for content in item.content {
            match content {
                OutputContent::OutputText { text } => {
                    return serde_json::from_str(&text).map_err(|e| {
                        RemoteError::Decode(format!("output is not JSON: {}", e))
                    });
                }
                OutputContent::Refusal { refusal } => {
                    return Err(RemoteError::Decode(format!("request refused: {}", refusal)));
                }
                OutputContent::Other => {}
            }
        }
    }

    Err(RemoteError::Decode("response has no output text".to_string()))
}

#[async_trait]
impl ClassificationService for OpenAiClassifier {
    async fn classify(&self, image: &ExtractedImage, schema: &Value) -> Result<Value> {
        let body = self.request_body(image, schema);

        debug!(
            "Classifying {} image ({} bytes) with {}",
            image.encoding,
            image.data.len(),
            self.model
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let response: ResponsesResponse = check_status(response).await?.json().await?;

        parse_output(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::ImageEncoding;
    use crate::receipt::response_schema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn image() -> ExtractedImage {
        ExtractedImage {
            data: b"abc".to_vec(),
            width: 1,
            height: 1,
            encoding: ImageEncoding::Png,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let classifier = OpenAiClassifier::new(reqwest::Client::new(), "key");
        let schema = response_schema();
        let body = serde_json::to_value(classifier.request_body(&image(), &schema)).unwrap();

        assert_eq!(body["model"], "gpt-4o-2024-08-06");
        assert_eq!(body["input"][0]["role"], "system");
        assert_eq!(body["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(body["input"][1]["content"][1]["type"], "input_image");
        assert_eq!(
            body["input"][1]["content"][1]["image_url"],
            "data:image/png;base64,YWJj"
        );
        assert_eq!(body["text"]["format"]["type"], "json_schema");
        assert_eq!(body["text"]["format"]["name"], "receipt_data");
        assert_eq!(body["text"]["format"]["strict"], true);
        assert_eq!(body["text"]["format"]["schema"], schema);
    }

    #[test]
    fn test_parse_output_text() {
        let response: ResponsesResponse = serde_json::from_value(json!({
            "status": "completed",
            "output": [
                { "type": "reasoning", "summary": [] },
                {
                    "type": "message",
                    "role": "assistant",
                    "content": [{
                        "type": "output_text",
                        "text": "{\"name\":\"checkers_2025-01-31_10.00zar\",\"merchant\":\"Checkers\",\"total\":10.0,\"date\":\"2025-01-31\",\"currency\":null}",
                        "annotations": []
                    }]
                }
            ]
        }))
        .unwrap();

        let value = parse_output(response).unwrap();
        assert_eq!(value["merchant"], "Checkers");
        assert_eq!(value["currency"], Value::Null);
    }

    #[test]
    fn test_parse_refusal_and_incomplete() {
        let refused: ResponsesResponse = serde_json::from_value(json!({
            "output": [{
                "type": "message",
                "content": [{ "type": "refusal", "refusal": "cannot help" }]
            }]
        }))
        .unwrap();
        assert!(matches!(parse_output(refused), Err(RemoteError::Decode(_))));

        let incomplete: ResponsesResponse = serde_json::from_value(json!({
            "status": "incomplete",
            "output": []
        }))
        .unwrap();
        assert!(matches!(parse_output(incomplete), Err(RemoteError::Decode(_))));

        let empty: ResponsesResponse = serde_json::from_value(json!({ "output": [] })).unwrap();
        assert!(matches!(parse_output(empty), Err(RemoteError::Decode(_))));
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = ClassifierConfig {
            api_key_env: "SLIPS_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..ClassifierConfig::default()
        };
        let err = OpenAiClassifier::from_config(&config, reqwest::Client::new())
            .err()
            .unwrap();
        assert!(matches!(err, SlipsError::Config(_)));
    }
}
