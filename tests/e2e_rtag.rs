//! E2E tests for the R-TAG codec and the test frame layout
//!
//! Property tests cover every stream id / sequence number pair; the fixed
//! cases pin the byte layout the switch and capture tooling rely on.

use chrono::{DateTime, Utc};
use frertester::frame::ethernet::{
    self, FrameError, FrameHeader, FrameTemplate, MacAddr, VlanTag, INNER_ETHERTYPE,
    MIN_PAYLOAD_SIZE,
};
use frertester::frame::rtag::{self, MalformedReason, RtagError, RTAG_ETHERTYPE};
use proptest::prelude::*;

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap()
}

fn header(vlan: Option<VlanTag>) -> FrameHeader {
    FrameHeader {
        dst: MacAddr::BROADCAST,
        src: "02:00:00:00:00:01".parse().unwrap(),
        vlan,
    }
}

proptest! {
    #[test]
    fn prop_tag_decodes_to_its_fields(stream_id in any::<u16>(), seq in any::<u16>()) {
        let tag = rtag::decode(&rtag::encode(stream_id, seq)).unwrap();
        prop_assert_eq!(tag.stream_id, stream_id);
        prop_assert_eq!(tag.sequence_number, seq);
    }

    #[test]
    fn prop_wrong_ethertype_rejected(first in any::<u16>(), rest in any::<[u8; 4]>()) {
        prop_assume!(first != RTAG_ETHERTYPE);
        let mut buf = first.to_be_bytes().to_vec();
        buf.extend_from_slice(&rest);
        prop_assert_eq!(
            rtag::decode(&buf),
            Err(RtagError::MalformedTag(MalformedReason::EtherType { found: first }))
        );
    }

    #[test]
    fn prop_generated_frame_parses(
        stream_id in any::<u16>(),
        seq in any::<u16>(),
        counter in any::<u32>(),
        payload in MIN_PAYLOAD_SIZE..1400usize,
        tagged in any::<bool>(),
    ) {
        let vlan = tagged.then_some(VlanTag { priority: 6, vlan_id: 100 });
        let mut template = FrameTemplate::new(header(vlan), stream_id, payload).unwrap();
        template.set_sequence(seq, counter);
        let bytes = template.stamp(epoch()).to_vec();

        let parsed = ethernet::parse(&bytes).unwrap();
        prop_assert_eq!(parsed.tag.stream_id, stream_id);
        prop_assert_eq!(parsed.tag.sequence_number, seq);
        prop_assert_eq!(parsed.counter, Some(counter));
        prop_assert_eq!(parsed.send_timestamp, Some(epoch()));
        prop_assert_eq!(parsed.vlan, vlan);
    }
}

#[test]
fn test_truncated_tag() {
    for len in 0..6 {
        let buf = vec![0x89; len];
        assert_eq!(
            rtag::decode(&buf),
            Err(RtagError::MalformedTag(MalformedReason::Truncated { len }))
        );
    }
}

#[test]
fn test_vlan_tagged_layout() {
    let vlan = Some(VlanTag {
        priority: 6,
        vlan_id: 100,
    });
    let mut template = FrameTemplate::new(header(vlan), 0x0102, 100).unwrap();
    template.set_sequence(0x0304, 7);
    let bytes = template.stamp(epoch()).to_vec();

    // DMAC SMAC | 8100 TCI | 893D seq stream | 88B5 | payload
    assert_eq!(bytes.len(), 12 + 4 + 6 + 2 + 100);
    assert_eq!(&bytes[12..14], &[0x81, 0x00]);
    assert_eq!(u16::from_be_bytes([bytes[14], bytes[15]]), (6 << 13) | 100);
    assert_eq!(&bytes[16..22], &[0x89, 0x3D, 0x03, 0x04, 0x01, 0x02]);
    assert_eq!(u16::from_be_bytes([bytes[22], bytes[23]]), INNER_ETHERTYPE);
    assert_eq!(&bytes[24..34], b"FRER_TEST_");
    assert_eq!(*bytes.last().unwrap(), b'X');
}

#[test]
fn test_foreign_payload_has_no_timestamp() {
    let mut bytes = vec![0xff; 12];
    bytes.extend_from_slice(&rtag::encode(9, 42));
    bytes.extend_from_slice(&0x0800u16.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 40]);

    let parsed = ethernet::parse(&bytes).unwrap();
    assert_eq!(parsed.tag.sequence_number, 42);
    assert_eq!(parsed.inner_ethertype, Some(0x0800));
    assert_eq!(parsed.send_timestamp, None);
    assert_eq!(parsed.counter, None);
}

#[test]
fn test_untagged_frame_is_malformed() {
    let mut bytes = vec![0xff; 12];
    bytes.extend_from_slice(&0x0800u16.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 46]);

    assert!(matches!(
        ethernet::parse(&bytes),
        Err(FrameError::Tag(RtagError::MalformedTag(
            MalformedReason::EtherType { found: 0x0800 }
        )))
    ));
}

#[test]
fn test_payload_below_marker_rejected() {
    assert!(matches!(
        FrameTemplate::new(header(None), 1, MIN_PAYLOAD_SIZE - 1),
        Err(FrameError::PayloadTooSmall { .. })
    ));
}
