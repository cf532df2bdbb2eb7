//! MessageCodec - Signature と transport message の相互変換
//!
//! # encode
//! 1. serde_json で Signature を bytes に変換
//! 2. message id = task uuid
//! 3. ETA が `now` より未来なら scheduled delivery を付ける
//!
//! # decode
//! - 空 payload は `CodecError::EmptyPayload`
//! - serde_json は整数リテラルを i64/u64 のまま保持する（float に落とさない）

use chrono::{DateTime, Utc};

use crate::domain::{CodecError, Message, Signature};

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }

    /// Encode a signature into an outbound message.
    ///
    /// Encoding failures never reach the transport.
    pub fn encode(&self, signature: &Signature, now: DateTime<Utc>) -> Result<Message, CodecError> {
        let data = serde_json::to_vec(signature).map_err(CodecError::Encode)?;

        let mut message = Message::new(data)
            .with_id(signature.uuid.clone())
            .with_content_type(CONTENT_TYPE_JSON);

        if let Some(eta) = signature.eta
            && eta > now
        {
            message.schedule_at(eta);
        }

        Ok(message)
    }

    pub fn decode(&self, data: &[u8]) -> Result<Signature, CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        serde_json::from_slice(data).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Arg;
    use chrono::{Duration, TimeZone};
    use rstest::rstest;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn roundtrip_keeps_identity_name_eta_and_args() {
        let codec = MessageCodec::new();
        let sig = Signature::new(
            "report",
            vec![
                Arg::new("count", "int64", json!(9_007_199_254_740_993_i64)),
                Arg::new("ratio", "float64", json!(0.5)),
                Arg::new("tags", "[]string", json!(["a", "b"])),
            ],
        )
        .with_eta(now() + Duration::hours(1));

        let message = codec.encode(&sig, now()).unwrap();
        assert_eq!(message.id, sig.uuid);
        assert_eq!(message.content_type.as_deref(), Some(CONTENT_TYPE_JSON));

        let back = codec.decode(&message.data).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn integers_are_not_coerced_to_floats() {
        let codec = MessageCodec::new();
        let raw = br#"{"UUID":"task_1","Name":"add","Args":[{"Name":"a","Type":"int64","Value":18446744073709551615},{"Name":"b","Type":"int64","Value":-42}]}"#;

        let sig = codec.decode(raw).unwrap();
        assert_eq!(sig.args[0].value.as_u64(), Some(u64::MAX));
        assert!(sig.args[0].value.is_u64());
        assert_eq!(sig.args[1].value.as_i64(), Some(-42));
        assert!(!sig.args[1].value.is_f64());
    }

    #[rstest]
    #[case::future(Duration::hours(1), true)]
    #[case::past(Duration::seconds(-1), false)]
    #[case::exactly_now(Duration::zero(), false)]
    fn eta_schedules_only_when_strictly_in_the_future(
        #[case] offset: Duration,
        #[case] scheduled: bool,
    ) {
        let codec = MessageCodec::new();
        let eta = now() + offset;
        let sig = Signature::new("add", vec![]).with_eta(eta);

        let message = codec.encode(&sig, now()).unwrap();
        assert_eq!(message.is_scheduled(), scheduled);
        if scheduled {
            assert_eq!(message.scheduled_enqueue_time, Some(eta));
        }
    }

    #[test]
    fn no_eta_means_immediate_delivery() {
        let codec = MessageCodec::new();
        let message = codec.encode(&Signature::new("add", vec![]), now()).unwrap();
        assert!(!message.is_scheduled());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let codec = MessageCodec::new();
        assert!(matches!(codec.decode(b""), Err(CodecError::EmptyPayload)));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let codec = MessageCodec::new();
        assert!(matches!(
            codec.decode(b"{not json"),
            Err(CodecError::Decode(_))
        ));
    }
}
