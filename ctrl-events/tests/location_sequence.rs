//! Location ids are numbered per process starting at zero.
//!
//! Kept in its own test binary so no other test advances the counter first.

use ctrl_events::LocationId;

#[test]
fn test_local_ids_follow_construction_order() {
    let ids: Vec<LocationId> = (0..16).map(|_| LocationId::new().unwrap()).collect();
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(id.local_id() as usize, i);
        assert_eq!(id.process_id(), std::process::id());
        assert_eq!(id.hostname(), ids[0].hostname());
    }
}
