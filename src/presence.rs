use crate::models::presence::{ClientStatus, Presence};
use crate::state::AppState;

pub const VALID_STATUSES: &[&str] = &["online", "idle", "dnd", "invisible"];

/// Set a user's presence. Returns the previous presence if any.
pub fn set_presence(
    state: &AppState,
    user_id: &str,
    status: &str,
    activities: Vec<serde_json::Value>,
) -> Option<Presence> {
    let presence = Presence {
        user_id: user_id.to_string(),
        status: status.to_string(),
        client_status: ClientStatus {
            desktop: Some(status.to_string()),
            ..ClientStatus::default()
        },
        activities,
    };
    state.presences.insert(user_id.to_string(), presence)
}

pub fn remove_presence(state: &AppState, user_id: &str) -> Option<Presence> {
    state.presences.remove(user_id).map(|(_, p)| p)
}

/// Presences of the given members that are currently online.
pub fn presences_for(state: &AppState, member_ids: &[String]) -> Vec<Presence> {
    member_ids
        .iter()
        .filter_map(|id| state.presences.get(id).map(|p| p.clone()))
        .collect()
}

/// `invisible` is a client-side choice; the wire never distinguishes it from
/// being offline.
pub fn wire_status(status: &str) -> &str {
    if status == "invisible" {
        "offline"
    } else {
        status
    }
}
