//! Synchronous durability requirements, carried as alt-magic framing-extras
//! (spec §4.1, §6).

use bytes::Bytes;
use cb_codec::kv::framing::{FrameInfo, ID_DURABILITY_REQUIREMENT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityLevel {
    Majority,
    MajorityAndPersistToActive,
    PersistToMajority,
}

impl DurabilityLevel {
    fn wire_value(self) -> u8 {
        match self {
            DurabilityLevel::Majority => 0x01,
            DurabilityLevel::MajorityAndPersistToActive => 0x02,
            DurabilityLevel::PersistToMajority => 0x03,
        }
    }

    /// Builds the durability-requirement frame info: a 1-byte level, plus an
    /// optional big-endian 2-byte timeout in milliseconds when the caller
    /// wants something other than the server default.
    pub fn frame_info(self, timeout_millis: Option<u16>) -> FrameInfo {
        let mut payload = vec![self.wire_value()];
        if let Some(timeout) = timeout_millis {
            payload.extend_from_slice(&timeout.to_be_bytes());
        }
        FrameInfo { id: ID_DURABILITY_REQUIREMENT, payload: Bytes::from(payload) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_info_without_timeout_is_a_single_byte_payload() {
        let info = DurabilityLevel::Majority.frame_info(None);
        assert_eq!(&info.payload[..], &[0x01]);
    }

    #[test]
    fn frame_info_with_timeout_appends_big_endian_millis() {
        let info = DurabilityLevel::PersistToMajority.frame_info(Some(2500));
        assert_eq!(&info.payload[..], &[0x03, 0x09, 0xc4]);
    }
}
