//! Feed wire protocol.
//!
//! Inbound: `{"type": "subscribed"|"update"|"system"|"market"|"trading",
//! "data": {...}, "timestamp": "..."}`. Outbound:
//! `{"type": "subscribe", "channels": [...]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use vg_types::{Domain, ExternalAlert, MetricSample, ParseError, SubscriptionConfig};

/// Kind of an inbound feed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Acknowledgement of a subscribe command.
    Subscribed,
    /// Multi-domain update, optionally carrying alerts.
    Update,
    System,
    Market,
    Trading,
}

impl MessageType {
    fn parse(raw: &str) -> Result<Self, ParseError> {
        match raw {
            "subscribed" => Ok(MessageType::Subscribed),
            "update" => Ok(MessageType::Update),
            "system" => Ok(MessageType::System),
            "market" => Ok(MessageType::Market),
            "trading" => Ok(MessageType::Trading),
            other => Err(ParseError::UnknownMessageType {
                message_type: other.to_string(),
            }),
        }
    }

    /// Domain carried by single-domain messages.
    pub fn domain(&self) -> Option<Domain> {
        match self {
            MessageType::System => Some(Domain::System),
            MessageType::Market => Some(Domain::Market),
            MessageType::Trading => Some(Domain::Trading),
            MessageType::Subscribed | MessageType::Update => None,
        }
    }
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub message_type: MessageType,
    pub data: Map<String, Value>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Samples and alert payloads extracted from one message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Translated {
    pub samples: Vec<MetricSample>,
    pub alerts: Vec<ExternalAlert>,
    /// Non-numeric or non-finite fields that were ignored.
    pub skipped_fields: usize,
    /// Alert payloads that failed to deserialize.
    pub rejected_alerts: usize,
}

impl InboundMessage {
    /// Validate raw text: it must be a JSON object with a known `type` and an
    /// object-valued `data`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(|e| ParseError::InvalidJson {
            message: e.to_string(),
        })?;
        let object = value.as_object().ok_or_else(|| ParseError::InvalidPayload {
            message: "message is not a JSON object".into(),
        })?;

        let raw_type = object
            .get("type")
            .ok_or_else(|| ParseError::MissingField {
                field: "type".into(),
            })?
            .as_str()
            .ok_or_else(|| ParseError::InvalidPayload {
                message: "type must be a string".into(),
            })?;
        let message_type = MessageType::parse(raw_type)?;

        let data = object
            .get("data")
            .ok_or_else(|| ParseError::MissingField {
                field: "data".into(),
            })?
            .as_object()
            .ok_or_else(|| ParseError::InvalidPayload {
                message: "data must be an object".into(),
            })?
            .clone();

        let timestamp = object.get("timestamp").and_then(parse_timestamp);

        Ok(Self {
            message_type,
            data,
            timestamp,
        })
    }

    /// Turn the message into samples for subscribed domains plus any alert
    /// payloads. `received_at` stamps samples when the message carries no
    /// usable timestamp.
    pub fn translate(
        &self,
        subscription: &SubscriptionConfig,
        received_at: DateTime<Utc>,
    ) -> Translated {
        let timestamp = self.timestamp.unwrap_or(received_at);
        let mut out = Translated::default();

        match self.message_type {
            MessageType::Subscribed => {}
            MessageType::System | MessageType::Market | MessageType::Trading => {
                if let Some(domain) = self.message_type.domain() {
                    if subscription.contains(domain) {
                        flatten(domain.as_str(), &self.data, timestamp, &mut out);
                    }
                }
            }
            MessageType::Update => {
                for domain in subscription.channels() {
                    match self.data.get(domain.as_str()) {
                        Some(Value::Object(fields)) => {
                            flatten(domain.as_str(), fields, timestamp, &mut out)
                        }
                        Some(_) => out.skipped_fields += 1,
                        None => {}
                    }
                }
                if let Some(Value::Array(alerts)) = self.data.get("alerts") {
                    for payload in alerts {
                        match serde_json::from_value::<ExternalAlert>(payload.clone()) {
                            Ok(alert) => out.alerts.push(alert),
                            Err(_) => out.rejected_alerts += 1,
                        }
                    }
                }
            }
        }

        out
    }
}

fn flatten(prefix: &str, fields: &Map<String, Value>, timestamp: DateTime<Utc>, out: &mut Translated) {
    for (key, value) in fields {
        let series = format!("{prefix}.{key}");
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(v) if v.is_finite() => out.samples.push(MetricSample::new(series, v, timestamp)),
                _ => out.skipped_fields += 1,
            },
            Value::Object(nested) => flatten(&series, nested, timestamp, out),
            _ => out.skipped_fields += 1,
        }
    }
}

/// RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    }
}

/// Commands sent to the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundCommand {
    Subscribe { channels: Vec<String> },
    Ping,
}

impl OutboundCommand {
    pub fn subscribe(subscription: &SubscriptionConfig) -> Self {
        OutboundCommand::Subscribe {
            channels: subscription.channel_names(),
        }
    }

    pub fn to_text(&self) -> String {
        // Plain enum of strings; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_types::Severity;

    fn all_channels() -> SubscriptionConfig {
        SubscriptionConfig::new(Domain::ALL)
    }

    #[test]
    fn rejects_missing_type_and_data() {
        assert_eq!(
            InboundMessage::parse(r#"{"data": {}}"#).unwrap_err(),
            ParseError::MissingField {
                field: "type".into()
            }
        );
        assert_eq!(
            InboundMessage::parse(r#"{"type": "system"}"#).unwrap_err(),
            ParseError::MissingField {
                field: "data".into()
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            InboundMessage::parse("not json"),
            Err(ParseError::InvalidJson { .. })
        ));
        assert!(matches!(
            InboundMessage::parse("[1,2,3]"),
            Err(ParseError::InvalidPayload { .. })
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type": "orders", "data": {}}"#),
            Err(ParseError::UnknownMessageType { .. })
        ));
        assert!(matches!(
            InboundMessage::parse(r#"{"type": "system", "data": 5}"#),
            Err(ParseError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn translates_single_domain_message() {
        let msg = InboundMessage::parse(
            r#"{"type": "system", "timestamp": "2024-03-01T12:00:00Z",
                "data": {"latency": 120, "cpu_usage": 55.5, "host": "a1", "disk": {"usage": 40}}}"#,
        )
        .unwrap();
        let out = msg.translate(&all_channels(), Utc::now());

        let mut series: Vec<_> = out.samples.iter().map(|s| s.series.as_str()).collect();
        series.sort();
        assert_eq!(series, vec!["system.cpu_usage", "system.disk.usage", "system.latency"]);
        assert_eq!(out.skipped_fields, 1);
        assert_eq!(
            out.samples[0].timestamp,
            DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z").unwrap()
        );
    }

    #[test]
    fn translates_update_with_alerts() {
        let msg = InboundMessage::parse(
            r#"{"type": "update", "timestamp": 1709294400000, "data": {
                "system": {"latency": 80},
                "market": {"volatility": 0.02},
                "alerts": [
                    {"type": "market", "severity": "critical", "message": "Liquidity dried up", "metric": "liquidity"},
                    {"severity": "info"}
                ]}}"#,
        )
        .unwrap();
        let out = msg.translate(&all_channels(), Utc::now());
        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.alerts.len(), 1);
        assert_eq!(out.alerts[0].severity, Severity::Critical);
        assert_eq!(out.rejected_alerts, 1);
        assert_eq!(out.samples[0].timestamp.timestamp_millis(), 1_709_294_400_000);
    }

    #[test]
    fn unsubscribed_domains_are_ignored() {
        let subscription = SubscriptionConfig::new([Domain::System]);
        let msg = InboundMessage::parse(r#"{"type": "market", "data": {"volatility": 0.3}}"#).unwrap();
        assert!(msg.translate(&subscription, Utc::now()).samples.is_empty());
    }

    #[test]
    fn subscribed_ack_yields_nothing() {
        let msg = InboundMessage::parse(r#"{"type": "subscribed", "data": {"channels": ["system"]}}"#).unwrap();
        assert_eq!(msg.translate(&all_channels(), Utc::now()), Translated::default());
    }

    #[test]
    fn subscribe_command_wire_format() {
        let cmd = OutboundCommand::subscribe(&SubscriptionConfig::new([Domain::Trading, Domain::System]));
        assert_eq!(cmd.to_text(), r#"{"type":"subscribe","channels":["system","trading"]}"#);
    }
}
