//! Attachment state resolution across masks, callers and driver states.

use proptest::prelude::*;
use rstest::rstest;

use volplane::{
    resolve, AttachmentsMask, InstanceId, Volume, VolumeAttachment, VolumeAttachmentState,
};

fn volume_attached_to(instances: &[&str]) -> Volume {
    let mut volume = Volume::new("vol-1", "data");
    volume.attachments = instances
        .iter()
        .map(|id| VolumeAttachment {
            volume_id: "vol-1".to_string(),
            instance_id: Some(InstanceId::new("mock", *id)),
            device_name: Some("/dev/xvdf".to_string()),
            ..VolumeAttachment::default()
        })
        .collect();
    volume
}

fn caller() -> InstanceId {
    InstanceId::new("mock", "i-1")
}

// ─── Property Tests ─────────────────────────────────────────────────────────

fn arb_mask() -> impl Strategy<Value = AttachmentsMask> {
    (0u32..32).prop_map(AttachmentsMask::from_bits)
}

fn arb_instances() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(prop::sample::select(vec!["i-1", "I-1", "i-2", "i-3"]), 0..3)
        .prop_map(|ids| ids.into_iter().map(str::to_string).collect())
}

proptest! {
    /// A state set by the driver survives resolution unchanged.
    #[test]
    fn driver_state_is_trusted(
        mask in arb_mask().prop_filter("non-empty", |m| !m.is_none()),
        state in prop::sample::select(vec![
            VolumeAttachmentState::Attached,
            VolumeAttachmentState::Available,
            VolumeAttachmentState::Unavailable,
        ]),
        instances in arb_instances(),
    ) {
        let refs: Vec<&str> = instances.iter().map(String::as_str).collect();
        let mut volume = volume_attached_to(&refs);
        volume.attachment_state = state;
        resolve(&mut volume, Some(&caller()), mask);
        prop_assert_eq!(volume.attachment_state, state);
    }

    /// The computed state depends only on the attachment list and caller.
    #[test]
    fn computed_state_follows_attachments(
        mask in arb_mask().prop_filter("non-empty", |m| !m.is_none()),
        instances in arb_instances(),
    ) {
        let refs: Vec<&str> = instances.iter().map(String::as_str).collect();
        let mut volume = volume_attached_to(&refs);
        resolve(&mut volume, Some(&caller()), mask);

        let expected = if instances.is_empty() {
            VolumeAttachmentState::Available
        } else if instances.iter().any(|i| i.eq_ignore_ascii_case("i-1")) {
            VolumeAttachmentState::Attached
        } else {
            VolumeAttachmentState::Unavailable
        };
        prop_assert_eq!(volume.attachment_state, expected);
        prop_assert_eq!(volume.attachments.len(), instances.len());
    }

    /// The empty mask strips attachments and always includes.
    #[test]
    fn empty_mask_strips_and_includes(instances in arb_instances()) {
        let refs: Vec<&str> = instances.iter().map(String::as_str).collect();
        let mut volume = volume_attached_to(&refs);
        prop_assert!(resolve(&mut volume, Some(&caller()), AttachmentsMask::NONE));
        prop_assert!(volume.attachments.is_empty());
        prop_assert_eq!(volume.attachment_state, VolumeAttachmentState::Unset);
    }

    /// Inclusion follows the ordered exclusion rules for every mask.
    #[test]
    fn inclusion_matches_rules(mask in arb_mask(), instances in arb_instances()) {
        let refs: Vec<&str> = instances.iter().map(String::as_str).collect();
        let mut volume = volume_attached_to(&refs);
        let included = resolve(&mut volume, Some(&caller()), mask);

        let state = volume.attachment_state;
        let (attached, unattached, mine) = (mask.attached(), mask.unattached(), mask.mine());
        use VolumeAttachmentState::*;
        let excluded = !mask.is_none()
            && ((state == Available && attached && !unattached)
                || (matches!(state, Attached | Unavailable) && unattached && !attached)
                || (mine
                    && attached
                    && ((state == Available && !unattached) || state == Unavailable)));
        prop_assert_eq!(included, !excluded);
    }
}

// ─── Golden Cases ───────────────────────────────────────────────────────────

#[test]
fn instance_ids_match_without_case() {
    let mut volume = volume_attached_to(&["i-1"]);
    let caller = InstanceId::new("mock", "I-1");
    assert!(resolve(&mut volume, Some(&caller), AttachmentsMask::FOR_INSTANCE));
    assert_eq!(volume.attachment_state, VolumeAttachmentState::Attached);
}

#[test]
fn unknown_caller_sees_attached_volume_as_unavailable() {
    let mut volume = volume_attached_to(&["i-1", "i-2"]);
    let caller = InstanceId::new("mock", "i-9");
    assert!(!resolve(&mut volume, Some(&caller), AttachmentsMask::ATTACHED_TO_INSTANCE));
    assert_eq!(volume.attachment_state, VolumeAttachmentState::Unavailable);
    assert_eq!(volume.attachments.len(), 2);
}

#[rstest]
#[case::attached_only_excludes_free(&[], AttachmentsMask::ONLY_ATTACHED, false)]
#[case::unattached_only_includes_free(&[], AttachmentsMask::ONLY_UNATTACHED, true)]
#[case::unattached_only_excludes_mine(&["i-1"], AttachmentsMask::ONLY_UNATTACHED, false)]
#[case::unattached_only_excludes_theirs(&["i-2"], AttachmentsMask::ONLY_UNATTACHED, false)]
#[case::attached_only_includes_theirs(&["i-2"], AttachmentsMask::ONLY_ATTACHED, true)]
#[case::mine_attached_includes_mine(&["i-1"], AttachmentsMask::ATTACHED_TO_INSTANCE, true)]
#[case::mine_attached_excludes_theirs(&["i-2"], AttachmentsMask::ATTACHED_TO_INSTANCE, false)]
#[case::mine_attached_excludes_free(&[], AttachmentsMask::ATTACHED_TO_INSTANCE, false)]
#[case::mine_or_free_includes_free(&[], AttachmentsMask::ATTACHED_TO_INSTANCE_OR_UNATTACHED, true)]
#[case::mine_or_free_excludes_theirs(&["i-2"], AttachmentsMask::ATTACHED_TO_INSTANCE_OR_UNATTACHED, false)]
#[case::both_flags_include_everything(&["i-2"], AttachmentsMask::ONLY_ATTACHED | AttachmentsMask::UNATTACHED, true)]
fn inclusion(#[case] instances: &[&str], #[case] mask: AttachmentsMask, #[case] expected: bool) {
    let mut volume = volume_attached_to(instances);
    assert_eq!(resolve(&mut volume, Some(&caller()), mask), expected);
}

#[rstest]
#[case("", AttachmentsMask::NONE)]
#[case("false", AttachmentsMask::NONE)]
#[case("true", AttachmentsMask::WITH_DEVICES_FOR_INSTANCE)]
#[case("25", AttachmentsMask::from_bits(25))]
#[case("attached", AttachmentsMask::ONLY_ATTACHED)]
#[case("mine,attached", AttachmentsMask::ATTACHED_TO_INSTANCE)]
#[case("mine, attached, unattached", AttachmentsMask::ATTACHED_TO_INSTANCE_OR_UNATTACHED)]
fn parses_query_values(#[case] raw: &str, #[case] expected: AttachmentsMask) {
    assert_eq!(raw.parse::<AttachmentsMask>().unwrap(), expected);
}

#[test]
fn rejects_unknown_flags() {
    assert!(matches!(
        "mine,sideways".parse::<AttachmentsMask>(),
        Err(volplane::Error::InvalidMask { .. })
    ));
}
