//! Envelope model and two-phase codec.
//!
//! Envelopes serialise with short field names (`v type id src dst ts exp cor p`)
//! to keep bus frames small. Decoding happens in two phases: a cheap
//! [`EnvelopeHeader`] view extracts only what routing needs (`v`, `type`, `id`,
//! `dst`, `exp`), and the full [`Envelope`] is only decoded once the header has
//! passed the expiry and filter gates.

use crate::{error::WireError, kind, message::DataPayload, ttl, PROTOCOL_VERSION, WILDCARD_STATION};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Logical role of a bus endpoint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[display("edge")]
    Edge,
    #[display("core")]
    Core,
}

/// Logical bus endpoint: a role plus a station name.
///
/// The wildcard station `*` addresses every station of the role.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Display, Serialize, Deserialize)]
#[display("{role}/{station}")]
pub struct Address {
    pub role: Role,
    pub station: String,
}

impl Address {
    pub fn edge(station: impl Into<String>) -> Self {
        Self {
            role: Role::Edge,
            station: station.into(),
        }
    }

    pub fn core(station: impl Into<String>) -> Self {
        Self {
            role: Role::Core,
            station: station.into(),
        }
    }

    /// Broadcast address for every station of the provided role.
    pub fn broadcast(role: Role) -> Self {
        Self {
            role,
            station: WILDCARD_STATION.to_string(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.station == WILDCARD_STATION
    }

    /// True if a message addressed to `self` should be delivered to `target`.
    pub fn matches(&self, target: &Address) -> bool {
        self.role == target.role && (self.is_broadcast() || self.station == target.station)
    }
}

/// Outermost wire object carrying routing metadata and an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "v")]
    pub version: u32,

    #[serde(rename = "type")]
    pub kind: String,

    pub id: Uuid,

    pub src: Address,

    pub dst: Address,

    pub ts: DateTime<Utc>,

    /// Expiry instant. `None` never expires; the zero time decodes as `None`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_expiry"
    )]
    pub exp: Option<DateTime<Utc>>,

    /// Id of the envelope this one replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cor: Option<Uuid>,

    #[serde(rename = "p")]
    pub payload: serde_json::Value,
}

/// Header-only view of an envelope: the fields routing decisions need, decoded
/// without paying for the payload.
#[derive(Debug, Clone, Deserialize)]
pub struct EnvelopeHeader {
    #[serde(rename = "v")]
    pub version: u32,

    #[serde(rename = "type")]
    pub kind: String,

    pub id: Uuid,

    pub dst: Address,

    #[serde(
        default,
        deserialize_with = "de_expiry"
    )]
    pub exp: Option<DateTime<Utc>>,
}

/// Peers that still serialise a "never expires" expiry send the zero time
/// rather than omitting the field; both decode to `None`.
fn de_expiry<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let exp = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(exp.filter(|exp| exp.timestamp() > 0))
}

impl Envelope {
    /// Construct an outbound envelope of the provided type.
    ///
    /// Assigns a fresh id, stamps the creation time and derives the expiry
    /// from the type's default time-to-live.
    pub fn new(
        kind: impl Into<String>,
        src: Address,
        dst: Address,
        payload: serde_json::Value,
    ) -> Self {
        let kind = kind.into();
        let now = Utc::now();
        let exp = Some(now + ttl::ttl_for(&kind));
        Self {
            version: PROTOCOL_VERSION,
            kind,
            id: Uuid::new_v4(),
            src,
            dst,
            ts: now,
            exp,
            cor: None,
            payload,
        }
    }

    /// Construct a `data` envelope wrapping `{subject, data}`.
    ///
    /// The expiry is derived from the subject's time-to-live rather than the
    /// flat `data` default.
    pub fn data(
        subject: impl Into<String>,
        src: Address,
        dst: Address,
        data: serde_json::Value,
    ) -> Self {
        let subject = subject.into();
        let now = Utc::now();
        let exp = Some(now + ttl::data_ttl_for(&subject));
        Self {
            version: PROTOCOL_VERSION,
            kind: kind::DATA.to_string(),
            id: Uuid::new_v4(),
            src,
            dst,
            ts: now,
            exp,
            cor: None,
            payload: serde_json::json!({ "subject": subject, "data": data }),
        }
    }

    /// Construct a reply to `original`, correlated via `cor` and addressed
    /// back to its source.
    pub fn reply_to(
        original: &Envelope,
        kind: impl Into<String>,
        src: Address,
        payload: serde_json::Value,
    ) -> Self {
        let mut reply = Self::new(kind, src, original.src.clone(), payload);
        reply.cor = Some(original.id);
        reply
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        serde_json::to_vec(self).map_err(WireError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }

    /// Decode only the routing header. Accepts any legal envelope, unknown
    /// fields included.
    pub fn decode_header(bytes: &[u8]) -> Result<EnvelopeHeader, WireError> {
        serde_json::from_slice(bytes).map_err(WireError::Decode)
    }

    /// Deserialize the payload into a typed message shape.
    pub fn parse_payload<T>(&self) -> Result<T, WireError>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone()).map_err(|source| WireError::Payload {
            kind: self.kind.clone(),
            source,
        })
    }

    /// Extract the `{subject, data}` payload of a `data` envelope.
    pub fn data_payload(&self) -> Result<DataPayload, WireError> {
        if self.kind != kind::DATA {
            return Err(WireError::NotData(self.kind.clone()));
        }
        self.parse_payload()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.exp, Some(exp) if now > exp)
    }
}

impl EnvelopeHeader {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.exp, Some(exp) if now > exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn request_envelope() -> Envelope {
        Envelope::new(
            kind::ORDER_REQUEST,
            Address::edge("line-01"),
            Address::core("dispatch"),
            serde_json::json!({"order_uuid": Uuid::new_v4(), "order_type": "retrieve"}),
        )
    }

    #[test]
    fn encode_decode_identity() {
        let envelope = request_envelope();
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(envelope, decoded);
    }

    #[test]
    fn short_field_names_on_the_wire() {
        let envelope = request_envelope();
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        let object = value.as_object().unwrap();
        for field in ["v", "type", "id", "src", "dst", "ts", "exp", "p"] {
            assert!(object.contains_key(field), "missing wire field {field}");
        }
        assert!(!object.contains_key("cor"));
    }

    #[test]
    fn header_decode_tolerates_unknown_fields() {
        let envelope = request_envelope();
        let mut value: serde_json::Value =
            serde_json::from_slice(&envelope.encode().unwrap()).unwrap();
        value["vendor_extension"] = serde_json::json!({"future": true});
        let bytes = serde_json::to_vec(&value).unwrap();

        let header = Envelope::decode_header(&bytes).unwrap();
        assert_eq!(header.id, envelope.id);
        assert_eq!(header.kind, kind::ORDER_REQUEST);
        assert_eq!(header.dst, envelope.dst);
    }

    #[test]
    fn reply_correlates_to_original() {
        let original = request_envelope();
        let reply = Envelope::reply_to(
            &original,
            kind::ORDER_ACK,
            Address::core("dispatch"),
            serde_json::json!({}),
        );
        assert_eq!(reply.cor, Some(original.id));
        assert_eq!(reply.kind, kind::ORDER_ACK);
        assert_eq!(reply.dst, original.src);
    }

    #[test]
    fn zero_expiry_never_expires() {
        let bytes = serde_json::to_vec(&serde_json::json!({
            "v": 1,
            "type": "order.request",
            "id": Uuid::new_v4(),
            "src": {"role": "edge", "station": "line-01"},
            "dst": {"role": "core", "station": "dispatch"},
            "ts": Utc::now(),
            "exp": "0001-01-01T00:00:00Z",
            "p": {}
        }))
        .unwrap();

        let envelope = Envelope::decode(&bytes).unwrap();
        assert_eq!(envelope.exp, None);
        assert!(!envelope.is_expired(Utc::now() + TimeDelta::days(9000)));
    }

    #[test]
    fn expiry_comparison() {
        let mut envelope = request_envelope();
        let now = Utc::now();
        envelope.exp = Some(now - TimeDelta::minutes(1));
        assert!(envelope.is_expired(now));
        envelope.exp = Some(now + TimeDelta::minutes(1));
        assert!(!envelope.is_expired(now));
    }

    #[test]
    fn broadcast_matches_every_station() {
        let broadcast = Address::broadcast(Role::Edge);
        assert!(broadcast.matches(&Address::edge("line-01")));
        assert!(broadcast.matches(&Address::edge("line-02")));
        assert!(!broadcast.matches(&Address::core("dispatch")));

        let direct = Address::edge("line-01");
        assert!(direct.matches(&Address::edge("line-01")));
        assert!(!direct.matches(&Address::edge("line-02")));
    }
}
