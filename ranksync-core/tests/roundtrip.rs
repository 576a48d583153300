//! Roundtrip tests for the RolesText codec and config serialisation.
//!
//! Each `#[case]` is isolated: no shared state.

use ranksync_core::{
    codec::{decode, decode_set, encode},
    config::Config,
    GroupSet,
};
use rstest::rstest;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[rstest]
#[case::single(vec!["default"])]
#[case::pair(vec!["admin", "vip"])]
#[case::stored_order_kept(vec!["vip", "default", "admin"])]
#[case::unicode(vec!["админ", "会员", "vip"])]
#[case::spaces_inside_names(vec!["server owner", "vip plus"])]
fn decode_inverts_encode(#[case] groups: Vec<&str>) {
    let text = encode(&groups);
    let decoded = decode(&text).expect("decode");
    assert_eq!(decoded, groups);
}

#[rstest]
#[case::empty(vec![])]
#[case::one(vec!["vip"])]
#[case::many(vec!["vip", "admin", "default"])]
fn group_set_survives_roles_text(#[case] groups: Vec<&str>) {
    let set: GroupSet = groups.into_iter().collect();
    let back = decode_set(&set.encode()).expect("decode");
    assert_eq!(back, set);
}

#[test]
fn group_set_encoding_is_order_independent() {
    let a: GroupSet = ["vip", "admin"].into_iter().collect();
    let b: GroupSet = ["admin", "vip"].into_iter().collect();
    assert_eq!(a.encode(), b.encode());
    assert_eq!(a.encode(), "admin,vip");
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[test]
fn config_yaml_roundtrip() {
    let home = TempDir::new().expect("home");
    let mut config = Config::default_at(home.path());
    config.debug = true;
    config.database.table = "player_ranks".to_string();

    let yaml = serde_yaml::to_string(&config).expect("serialize");
    let back: Config = serde_yaml::from_str(&yaml).expect("deserialize");
    assert_eq!(back, config);
}
