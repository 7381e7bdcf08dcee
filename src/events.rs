use base64::prelude::*;
use serde::de::{self, Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// A single publish/subscribe message. `data` holds the decoded payload bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSubMessage {
    #[serde(default, deserialize_with = "base64_data")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub publish_time: Option<String>,
    // push deliveries repeat the id and publish time in snake case
    #[serde(default, rename = "message_id")]
    message_id_snake: Option<String>,
    #[serde(default, rename = "publish_time")]
    publish_time_snake: Option<String>,
}

impl PubSubMessage {
    pub fn id(&self) -> Option<&str> {
        self.message_id
            .as_deref()
            .or(self.message_id_snake.as_deref())
    }

    pub fn published_at(&self) -> Option<&str> {
        self.publish_time
            .as_deref()
            .or(self.publish_time_snake.as_deref())
    }
}

/// The envelope a push subscription posts: the message plus the subscription name.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct PushEnvelope {
    pub message: PubSubMessage,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default, rename = "deliveryAttempt")]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug)]
pub enum Combined {
    Push(PushEnvelope),
    Message(PubSubMessage),
}

impl Combined {
    pub fn into_message(self) -> PubSubMessage {
        match self {
            Combined::Push(envelope) => envelope.message,
            Combined::Message(message) => message,
        }
    }
}

fn base64_data<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded: Option<String> = Deserialize::deserialize(deserializer)?;
    match encoded {
        Some(encoded) => BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| de::Error::custom(format!("invalid base64 message data: {e}"))),
        None => Ok(Vec::new()),
    }
}

impl<'de> Deserialize<'de> for Combined {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw_value: Value = Deserialize::deserialize(deserializer)?;
        debug!("raw_value: {:?}", raw_value);

        // a bare message has no `message` field, so it never matches the envelope
        if let Ok(event) = PushEnvelope::deserialize(&raw_value) {
            tracing::info!("push envelope detected");
            return Ok(Combined::Push(event));
        }

        if raw_value.get("data").is_some() {
            let event = PubSubMessage::deserialize(&raw_value).map_err(de::Error::custom)?;
            tracing::info!("pubsub message detected");
            return Ok(Combined::Message(event));
        }

        Err(de::Error::custom(format!(
            "unsupported event type: {raw_value}"
        )))
    }
}
