use chrono::{TimeZone, Utc};
use profile_proto::wire::profile::v1::{ProfileStoredV1, ProfileV1};
use profile_proto::{ConversionError, decode_profile_stored, timestamp_from_datetime};
use prost::Message;

fn profile() -> ProfileV1 {
    ProfileV1 {
        id: "01900000-0000-7000-8000-000000000001".to_string(),
        tenant_id: "01900000-0000-7000-8000-0000000000aa".to_string(),
        nin: "123-45-6789".to_string(),
        name: "Dohn Joe".to_string(),
        email: "dohnjoe@email.com".to_string(),
        phone: "+15550100".to_string(),
        dob: Utc
            .with_ymd_and_hms(1990, 1, 31, 0, 0, 0)
            .single()
            .map(timestamp_from_datetime),
    }
}

#[test]
fn stored_event_round_trips_through_wire_bytes() -> anyhow::Result<()> {
    let event = ProfileStoredV1 {
        profile: Some(profile()),
        stored_at: Some(timestamp_from_datetime(Utc::now())),
    };
    let bytes = event.encode_to_vec();
    let decoded = decode_profile_stored(&bytes)?;
    assert_eq!(decoded, event);
    Ok(())
}

#[test]
fn stored_event_without_profile_is_rejected() {
    let bytes = ProfileStoredV1::default().encode_to_vec();
    assert_eq!(
        decode_profile_stored(&bytes),
        Err(ConversionError::MissingField {
            message: "ProfileStoredV1",
            field: "profile",
        })
    );
}

#[test]
fn stored_event_with_malformed_tenant_is_rejected() {
    let mut profile = profile();
    profile.tenant_id = "tenant-a".to_string();
    let bytes = ProfileStoredV1 {
        profile: Some(profile),
        stored_at: None,
    }
    .encode_to_vec();
    assert!(matches!(
        decode_profile_stored(&bytes),
        Err(ConversionError::InvalidValue {
            field: "tenant_id",
            ..
        })
    ));
}

#[test]
fn garbage_bytes_fail_to_decode() {
    assert!(matches!(
        decode_profile_stored(&[0xff, 0xff, 0xff]),
        Err(ConversionError::Decode { .. })
    ));
}

#[test]
fn generated_fields_keep_proto_tags() {
    let profile = ProfileV1 {
        id: "a".to_string(),
        phone: "p".to_string(),
        ..ProfileV1::default()
    };
    // field 1 (id) then field 6 (phone), both length-delimited
    assert_eq!(profile.encode_to_vec(), vec![0x0a, 0x01, b'a', 0x32, 0x01, b'p']);

    let stored = ProfileStoredV1 {
        profile: None,
        stored_at: Some(prost_types::Timestamp {
            seconds: 1,
            nanos: 0,
        }),
    };
    assert_eq!(stored.encode_to_vec(), vec![0x12, 0x02, 0x08, 0x01]);
}
