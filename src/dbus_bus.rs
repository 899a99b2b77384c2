//! D-Bus notification source
//!
//! Bridges daemon signals into the orchestrator's run queue. A topic is
//! `"<interface>.<Member>"` (e.g.
//! `fi.w1.wpa_supplicant1.Interface.ScanDone`); each subscription installs
//! a signal match rule on the bus and forwards matching messages from its
//! own task until the run tears it down.
//!
//! Signal bodies are converted to JSON: an empty body becomes `null`, a
//! single argument becomes that argument's value, and multiple arguments
//! become a positional array.

use crate::bus::{Notification, NotificationBus, SubscriptionId};
use crate::error::{HarnessError, HarnessResult};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zbus::{Connection, MatchRule, MessageStream};
use zvariant::{Structure, Value};

/// D-Bus backed notification bus
///
/// Multiple instances may share one connection (`with_connection`), e.g.
/// independent runs observing several logical interfaces of one daemon.
pub struct DbusBus {
    connection: Connection,
    forwarders: HashMap<SubscriptionId, tokio::task::JoinHandle<()>>,
}

impl DbusBus {
    /// Connect to the system bus
    pub async fn system() -> HarnessResult<Self> {
        let connection = Connection::system().await.map_err(|e| {
            HarnessError::Transport(format!("Failed to connect to D-Bus system bus: {}", e))
        })?;
        Ok(Self::with_connection(connection))
    }

    /// Connect to the session bus
    pub async fn session() -> HarnessResult<Self> {
        let connection = Connection::session().await.map_err(|e| {
            HarnessError::Transport(format!("Failed to connect to D-Bus session bus: {}", e))
        })?;
        Ok(Self::with_connection(connection))
    }

    /// Wrap an existing connection
    pub fn with_connection(connection: Connection) -> Self {
        Self {
            connection,
            forwarders: HashMap::new(),
        }
    }

    /// Get a reference to the underlying D-Bus connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

#[async_trait]
impl NotificationBus for DbusBus {
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<Notification>,
    ) -> HarnessResult<SubscriptionId> {
        let (interface, member) = parse_topic(topic)?;

        let rule = MatchRule::builder()
            .msg_type(zbus::message::Type::Signal)
            .interface(interface.as_str())
            .map_err(|e| {
                HarnessError::Subscription(format!("Invalid interface '{}': {}", interface, e))
            })?
            .member(member.as_str())
            .map_err(|e| {
                HarnessError::Subscription(format!("Invalid member '{}': {}", member, e))
            })?
            .build();

        let stream = MessageStream::for_match_rule(rule, &self.connection, None)
            .await
            .map_err(|e| {
                HarnessError::Subscription(format!("Failed to install match rule: {}", e))
            })?;

        let id = SubscriptionId::generate();
        let topic_owned = topic.to_string();
        debug!("DbusBus subscribe: {}.{} id={}", interface, member, id);

        let task = tokio::spawn(async move {
            let mut stream = stream;
            while let Some(result) = stream.next().await {
                let msg = match result {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("signal stream error on {}: {}", topic_owned, e);
                        continue;
                    }
                };
                let payload = match body_to_json(&msg) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("undecodable signal body on {}: {}", topic_owned, e);
                        continue;
                    }
                };
                if sink.send(Notification::new(&topic_owned, payload)).is_err() {
                    // Receiver gone: the run ended
                    break;
                }
            }
        });

        self.forwarders.insert(id, task);
        Ok(id)
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> HarnessResult<()> {
        if let Some(task) = self.forwarders.remove(&id) {
            task.abort();
            debug!("DbusBus unsubscribe: id={}", id);
        }
        Ok(())
    }
}

impl Drop for DbusBus {
    fn drop(&mut self) {
        for task in self.forwarders.values() {
            task.abort();
        }
    }
}

/// Split a topic into (interface, member) at the last dot
fn parse_topic(topic: &str) -> HarnessResult<(String, String)> {
    match topic.rsplit_once('.') {
        Some((interface, member)) if !interface.is_empty() && !member.is_empty() => {
            Ok((interface.to_string(), member.to_string()))
        }
        _ => Err(HarnessError::Subscription(format!(
            "Topic '{}' is not of the form <interface>.<Member>",
            topic
        ))),
    }
}

/// Convert a signal body to JSON
fn body_to_json(msg: &zbus::message::Message) -> HarnessResult<serde_json::Value> {
    let body = msg.body();
    if body.signature().to_string().is_empty() {
        return Ok(serde_json::Value::Null);
    }

    let structure: Structure = body
        .deserialize()
        .map_err(|e| HarnessError::Parse(format!("Failed to deserialize signal body: {}", e)))?;

    let fields = structure.fields();
    match fields.len() {
        0 => Ok(serde_json::Value::Null),
        1 => Ok(value_to_json(&fields[0])),
        _ => Ok(serde_json::Value::Array(
            fields.iter().map(value_to_json).collect(),
        )),
    }
}

/// Lossy zvariant-to-JSON conversion
///
/// Covers the types wireless daemon signals actually carry; anything
/// exotic is rendered as its debug string.
fn value_to_json(value: &Value<'_>) -> serde_json::Value {
    use serde_json::json;

    match value {
        Value::U8(v) => json!(v),
        Value::Bool(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F64(v) => json!(v),
        Value::Str(s) => json!(s.as_str()),
        Value::Signature(s) => json!(s.to_string()),
        Value::ObjectPath(p) => json!(p.as_str()),
        Value::Value(inner) => value_to_json(inner),
        Value::Array(a) => serde_json::Value::Array(a.iter().map(value_to_json).collect()),
        Value::Dict(d) => {
            let mut map = serde_json::Map::new();
            for (k, v) in d.iter() {
                let key = match k {
                    Value::Str(s) => s.as_str().to_string(),
                    other => format!("{:?}", other),
                };
                map.insert(key, value_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Structure(s) => {
            serde_json::Value::Array(s.fields().iter().map(value_to_json).collect())
        }
        other => json!(format!("{:?}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_topic() {
        let (iface, member) =
            parse_topic("fi.w1.wpa_supplicant1.Interface.ScanDone").unwrap();
        assert_eq!(iface, "fi.w1.wpa_supplicant1.Interface");
        assert_eq!(member, "ScanDone");
    }

    #[test]
    fn test_parse_topic_rejects_bare_member() {
        assert!(parse_topic("ScanDone").is_err());
        assert!(parse_topic(".ScanDone").is_err());
        assert!(parse_topic("fi.w1.").is_err());
    }

    #[test]
    fn test_value_to_json_scalars() {
        assert_eq!(value_to_json(&Value::from(true)), json!(true));
        assert_eq!(value_to_json(&Value::from(42u32)), json!(42));
        assert_eq!(value_to_json(&Value::from("wlan0")), json!("wlan0"));
    }
}
