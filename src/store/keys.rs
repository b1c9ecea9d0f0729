//! Metadata store key layout
//!
//! Keys are URL-style paths rooted at `/api/v1`.

pub const ROOT: &str = "/api/v1";

pub const DOCKS_PREFIX: &str = "/api/v1/docks/";
pub const POOLS_PREFIX: &str = "/api/v1/pools/";
pub const PROFILES_PREFIX: &str = "/api/v1/profiles/";
pub const VOLUMES_PREFIX: &str = "/api/v1/volumes/";
pub const VOLUME_PREFIX: &str = "/api/v1/volume/";
pub const SNAPSHOTS_PREFIX: &str = "/api/v1/volume/snapshots/";
pub const SHARES_PREFIX: &str = "/api/v1/shares/";
pub const SHARE_PREFIX: &str = "/api/v1/share/";

/// Path segment separating a parent resource from its attachments
pub const ATTACHMENTS_SEGMENT: &str = "/attachments/";

pub fn dock(id: &str) -> String {
    format!("{}{}", DOCKS_PREFIX, id)
}

pub fn pool(id: &str) -> String {
    format!("{}{}", POOLS_PREFIX, id)
}

pub fn profile(id: &str) -> String {
    format!("{}{}", PROFILES_PREFIX, id)
}

pub fn volume(id: &str) -> String {
    format!("{}{}", VOLUMES_PREFIX, id)
}

pub fn volume_attachments(volume_id: &str) -> String {
    format!("{}{}{}", VOLUME_PREFIX, volume_id, ATTACHMENTS_SEGMENT)
}

pub fn volume_attachment(volume_id: &str, attachment_id: &str) -> String {
    format!("{}{}", volume_attachments(volume_id), attachment_id)
}

pub fn snapshot(id: &str) -> String {
    format!("{}{}", SNAPSHOTS_PREFIX, id)
}

pub fn share(id: &str) -> String {
    format!("{}{}", SHARES_PREFIX, id)
}

pub fn share_attachments(share_id: &str) -> String {
    format!("{}{}{}", SHARE_PREFIX, share_id, ATTACHMENTS_SEGMENT)
}

pub fn share_attachment(share_id: &str, attachment_id: &str) -> String {
    format!("{}{}", share_attachments(share_id), attachment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(dock("d1"), "/api/v1/docks/d1");
        assert_eq!(volume("v1"), "/api/v1/volumes/v1");
        assert_eq!(
            volume_attachment("v1", "a1"),
            "/api/v1/volume/v1/attachments/a1"
        );
        assert_eq!(snapshot("s1"), "/api/v1/volume/snapshots/s1");
        assert_eq!(
            share_attachment("sh1", "a1"),
            "/api/v1/share/sh1/attachments/a1"
        );
    }

    #[test]
    fn test_snapshot_keys_do_not_collide_with_attachments() {
        // A volume literally named "snapshots" still has a distinct attachment prefix
        assert!(!snapshot("s1").starts_with(&volume_attachments("snapshots")));
    }
}
