use serde::{
    de::{Error as DeError, SeqAccess, Visitor},
    ser::SerializeSeq,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::Value;
use std::fmt;

use crate::{
    attr::AttrDescriptor,
    id::{AttrId, ClientEventId, EntityId, SessionId, TxId},
    transaction::Transaction,
    value::Namespace,
};

/// One entry of a `transact` message's `tx-steps` array (spec §6.1). The
/// wire shape is a heterogeneous JSON array (`["add-triple", id, attr, val]`)
/// rather than a tagged object, so (de)serialization is hand-rolled to match
/// the protocol byte-for-byte instead of serde's default enum encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum TxStep {
    AddTriple { entity_id: EntityId, attr_id: AttrId, value: Value },
    DeleteEntity { entity_id: EntityId, namespace: Namespace },
    AddAttr { descriptor: AttrDescriptor },
}

impl Serialize for TxStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TxStep::AddTriple { entity_id, attr_id, value } => {
                let mut seq = serializer.serialize_seq(Some(4))?;
                seq.serialize_element("add-triple")?;
                seq.serialize_element(entity_id)?;
                seq.serialize_element(attr_id)?;
                seq.serialize_element(value)?;
                seq.end()
            }
            TxStep::DeleteEntity { entity_id, namespace } => {
                let mut seq = serializer.serialize_seq(Some(3))?;
                seq.serialize_element("delete-entity")?;
                seq.serialize_element(entity_id)?;
                seq.serialize_element(namespace)?;
                seq.end()
            }
            TxStep::AddAttr { descriptor } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("add-attr")?;
                seq.serialize_element(descriptor)?;
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for TxStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TxStepVisitor;
        impl<'de> Visitor<'de> for TxStepVisitor {
            type Value = TxStep;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result { f.write_str("a tx-step array") }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TxStep, A::Error> {
                let kind: String = seq.next_element()?.ok_or_else(|| DeError::custom("missing tx-step kind"))?;
                match kind.as_str() {
                    "add-triple" => {
                        let entity_id = seq.next_element()?.ok_or_else(|| DeError::custom("add-triple: missing entity_id"))?;
                        let attr_id = seq.next_element()?.ok_or_else(|| DeError::custom("add-triple: missing attr_id"))?;
                        let value = seq.next_element()?.ok_or_else(|| DeError::custom("add-triple: missing value"))?;
                        Ok(TxStep::AddTriple { entity_id, attr_id, value })
                    }
                    "delete-entity" => {
                        let entity_id = seq.next_element()?.ok_or_else(|| DeError::custom("delete-entity: missing entity_id"))?;
                        let namespace = seq.next_element()?.ok_or_else(|| DeError::custom("delete-entity: missing namespace"))?;
                        Ok(TxStep::DeleteEntity { entity_id, namespace })
                    }
                    "add-attr" => {
                        let descriptor = seq.next_element()?.ok_or_else(|| DeError::custom("add-attr: missing descriptor"))?;
                        Ok(TxStep::AddAttr { descriptor })
                    }
                    other => Err(DeError::custom(format!("unknown tx-step kind: {other}"))),
                }
            }
        }
        deserializer.deserialize_seq(TxStepVisitor)
    }
}

/// Outbound frames (spec §6.1, "→" column).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ClientMessage {
    Init {
        #[serde(rename = "app-id")]
        app_id: String,
        #[serde(rename = "refresh-token", skip_serializing_if = "Option::is_none")]
        refresh_token: Option<String>,
        #[serde(rename = "client-event-id")]
        client_event_id: ClientEventId,
        versions: Value,
    },
    AddQuery {
        q: Value,
        #[serde(rename = "client-event-id")]
        client_event_id: ClientEventId,
        #[serde(rename = "session-id")]
        session_id: SessionId,
        subscribe: bool,
    },
    Transact {
        #[serde(rename = "tx-steps")]
        tx_steps: Vec<TxStep>,
        created: i64,
        order: u32,
        #[serde(rename = "client-event-id")]
        client_event_id: ClientEventId,
    },
    #[serde(rename = "join-room")]
    JoinRoom {
        #[serde(rename = "room-type")]
        room_type: String,
        #[serde(rename = "room-id")]
        room_id: String,
        #[serde(rename = "client-event-id")]
        client_event_id: ClientEventId,
    },
    #[serde(rename = "leave-room")]
    LeaveRoom {
        #[serde(rename = "room-type")]
        room_type: String,
        #[serde(rename = "room-id")]
        room_id: String,
        #[serde(rename = "client-event-id")]
        client_event_id: ClientEventId,
    },
}

/// Inbound frames (spec §6.1/§4.4.3, "←" column). Deserialization is
/// hand-rolled (rather than a derived tagged enum) so that an `op` the
/// client doesn't recognize, or a recognized `op` with a shape that fails
/// to parse, both fall through to `Unknown` with the full payload intact —
/// spec §4.4.3 requires logging the whole message, never crashing.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    InitOk {
        #[allow(dead_code)]
        session_id: SessionId,
        attrs: Vec<AttrDescriptor>,
    },
    InitError {
        error: Value,
    },
    /// `add-query-ok` / `query-result` / `query-response` (spec §4.4.4).
    QueryResponse {
        client_event_id: Option<ClientEventId>,
        data: Value,
    },
    /// `refresh` / `refresh-query`: `data` is `None` when the payload carries
    /// no result (triggers a targeted invalidation instead, spec §4.4.3).
    Refresh {
        data: Option<Value>,
    },
    RefreshOk {
        computations: Vec<Value>,
    },
    TransactOk {
        client_event_id: ClientEventId,
    },
    TransactionAck {
        tx_id: TxId,
    },
    /// Remote-originated `transact`, and the legacy `transaction` op when it
    /// carries `tx-steps`.
    Transact {
        client_event_id: Option<ClientEventId>,
        tx_steps: Vec<TxStep>,
    },
    /// The legacy `transaction` op without `tx-steps` (spec §4.4.3): the
    /// payload itself is a full `Transaction`, applied directly rather than
    /// translated from wire steps.
    LegacyTransaction(Transaction),
    JoinRoomOk {
        room_type: String,
        room_id: String,
    },
    LeaveRoomOk {
        room_type: String,
        room_id: String,
    },
    Presence {
        payload: Value,
    },
    RefreshPresence {
        payload: Value,
    },
    SetPresenceOk {
        payload: Value,
    },
    Error {
        message: String,
    },
    Unknown {
        op: Option<String>,
        payload: Value,
    },
}

impl ServerMessage {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let payload: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(payload))
    }

    pub fn from_value(payload: Value) -> Self {
        let op = payload.get("op").and_then(Value::as_str).map(str::to_owned);
        match op.as_deref() {
            Some("init-ok") => Self::parse_init_ok(&payload).unwrap_or_else(|| Self::unknown(op, payload)),
            Some("init-error") => ServerMessage::InitError { error: payload.get("error").cloned().unwrap_or(Value::Null) },
            Some("add-query-ok") | Some("query-result") | Some("query-response") => ServerMessage::QueryResponse {
                client_event_id: payload
                    .get("client-event-id")
                    .and_then(Value::as_str)
                    .and_then(|s| ClientEventId::parse(s).ok()),
                data: payload,
            },
            Some("refresh") | Some("refresh-query") => {
                let data = payload.get("data").or_else(|| payload.get("result")).cloned();
                ServerMessage::Refresh { data }
            }
            Some("refresh-ok") => {
                let computations = payload.get("computations").and_then(Value::as_array).cloned().unwrap_or_default();
                ServerMessage::RefreshOk { computations }
            }
            Some("transact-ok") => match payload.get("client-event-id").and_then(Value::as_str).and_then(|s| ClientEventId::parse(s).ok())
            {
                Some(client_event_id) => ServerMessage::TransactOk { client_event_id },
                None => Self::unknown(op, payload),
            },
            Some("transaction-ack") => match payload.get("tx-id").and_then(Value::as_str).and_then(|s| TxId::parse(s).ok()) {
                Some(tx_id) => ServerMessage::TransactionAck { tx_id },
                None => Self::unknown(op, payload),
            },
            Some("transact") => Self::parse_remote_transact(&payload).unwrap_or_else(|| Self::unknown(op, payload)),
            Some("transaction") => Self::parse_remote_transact(&payload)
                .or_else(|| Self::parse_legacy_transaction(&payload))
                .unwrap_or_else(|| Self::unknown(op, payload)),
            Some("join-room-ok") => Self::parse_room(&payload, true).unwrap_or_else(|| Self::unknown(op, payload)),
            Some("leave-room-ok") => Self::parse_room(&payload, false).unwrap_or_else(|| Self::unknown(op, payload)),
            Some("presence") => ServerMessage::Presence { payload },
            Some("refresh-presence") => ServerMessage::RefreshPresence { payload },
            Some("set-presence-ok") => ServerMessage::SetPresenceOk { payload },
            Some("error") => {
                let message = payload
                    .get("message")
                    .or_else(|| payload.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                ServerMessage::Error { message }
            }
            _ => Self::unknown(op, payload),
        }
    }

    fn unknown(op: Option<String>, payload: Value) -> Self { ServerMessage::Unknown { op, payload } }

    fn parse_init_ok(payload: &Value) -> Option<Self> {
        let session_id = payload.get("session-id")?.as_str()?.to_string();
        let attrs_value = payload.get("attrs")?.clone();
        let attrs: Vec<AttrDescriptor> = serde_json::from_value(attrs_value).ok()?;
        Some(ServerMessage::InitOk { session_id: SessionId(session_id), attrs })
    }

    fn parse_remote_transact(payload: &Value) -> Option<Self> {
        let tx_steps_value = payload.get("tx-steps")?.clone();
        let tx_steps: Vec<TxStep> = serde_json::from_value(tx_steps_value).ok()?;
        let client_event_id = payload.get("client-event-id").and_then(Value::as_str).and_then(|s| ClientEventId::parse(s).ok());
        Some(ServerMessage::Transact { client_event_id, tx_steps })
    }

    /// `transaction` without `tx-steps` (spec §4.4.3): the payload is a full
    /// `Transaction`, serialized the same way this crate serializes one.
    fn parse_legacy_transaction(payload: &Value) -> Option<Self> {
        let tx: Transaction = serde_json::from_value(payload.clone()).ok()?;
        Some(ServerMessage::LegacyTransaction(tx))
    }

    fn parse_room(payload: &Value, joined: bool) -> Option<Self> {
        let room_type = payload.get("room-type")?.as_str()?.to_string();
        let room_id = payload.get("room-id")?.as_str()?.to_string();
        Some(if joined { ServerMessage::JoinRoomOk { room_type, room_id } } else { ServerMessage::LeaveRoomOk { room_type, room_id } })
    }
}
