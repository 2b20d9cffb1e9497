use kelas_types::models::{Channel, Role};

/// Whether `role` may post in `channel`.
///
/// Open channels accept anyone. Locked (announcement) channels only let
/// teachers and admins start a thread, but anyone may answer an existing one.
/// This drives UI affordances and request checks; it does not replace
/// store-level authorization.
pub fn can_post(channel: &Channel, role: Role, is_reply_context: bool) -> bool {
    if !channel.locked {
        return true;
    }
    role.is_privileged() || is_reply_context
}
