//! Reaction toggling and per-emoji grouping.
//!
//! Pure transforms over a message's reaction list; the store applies the
//! results, the connection layer moves them.

use serde::Serialize;
use uuid::Uuid;

use crate::models::message::{Message, Reaction};

/// One emoji's aggregate, for compact display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: usize,
    pub users: Vec<Uuid>,
    /// Whether the current user is among the reactors; drives the toggle
    /// affordance.
    pub user_reacted: bool,
}

pub struct ReactionAggregator;

impl ReactionAggregator {
    /// Toggle by triple identity: an existing (user, emoji) entry is removed,
    /// otherwise one is added. Returns true when the reaction was added.
    pub fn toggle(reactions: &mut Vec<Reaction>, user_id: Uuid, emoji: &str) -> bool {
        if let Some(position) = reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji)
        {
            reactions.remove(position);
            return false;
        }
        reactions.push(Reaction {
            user_id,
            emoji: emoji.to_string(),
        });
        true
    }

    /// Insert preserving the at-most-one-per-(user, emoji) invariant. Used
    /// when folding `reaction.added` pushes, which may be replayed.
    pub fn apply_added(reactions: &mut Vec<Reaction>, user_id: Uuid, emoji: &str) {
        let exists = reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji);
        if !exists {
            reactions.push(Reaction {
                user_id,
                emoji: emoji.to_string(),
            });
        }
    }

    pub fn apply_removed(reactions: &mut Vec<Reaction>, user_id: Uuid, emoji: &str) {
        reactions.retain(|r| !(r.user_id == user_id && r.emoji == emoji));
    }

    /// Group a message's reactions per distinct emoji, largest group first.
    pub fn group_by_emoji(message: &Message, current_user: Uuid) -> Vec<ReactionGroup> {
        let mut groups: Vec<ReactionGroup> = Vec::new();

        for reaction in &message.reactions {
            match groups.iter_mut().find(|g| g.emoji == reaction.emoji) {
                Some(group) => {
                    group.count += 1;
                    group.users.push(reaction.user_id);
                    group.user_reacted |= reaction.user_id == current_user;
                }
                None => groups.push(ReactionGroup {
                    emoji: reaction.emoji.clone(),
                    count: 1,
                    users: vec![reaction.user_id],
                    user_reacted: reaction.user_id == current_user,
                }),
            }
        }

        groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.emoji.cmp(&b.emoji)));
        groups
    }
}
