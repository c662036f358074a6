use crate::types::{Player, PlayerView};

/// The set of joined players, in join order. Ids are caller-supplied and
/// unique; joining twice with the same id is a no-op.
#[derive(Debug, Default)]
pub struct Roster {
    players: Vec<Player>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player. Returns false (without error) when the id is already
    /// present, so duplicate joins just re-confirm.
    pub fn join(&mut self, player: Player) -> bool {
        if self.contains(&player.id) {
            return false;
        }
        self.players.push(player);
        true
    }

    /// Remove a player by id. None means the player wasn't present, which is
    /// never fatal to the caller.
    pub fn leave(&mut self, id: &str) -> Option<Player> {
        let index = self.players.iter().position(|p| p.id == id)?;
        Some(self.players.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player> {
        self.players.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.players.iter().map(|p| &p.id)
    }

    pub fn clear(&mut self) {
        self.players.clear();
    }

    /// Render the roster for one viewer. The AI flag is asymmetric: only the
    /// AI-controlled player sees it, and only on their own record. Every other
    /// record reads false for every viewer, so no one can learn who the AI is
    /// from someone else's entry.
    pub fn view_for(&self, viewer: Option<&str>, ai_player: Option<&str>) -> Vec<PlayerView> {
        self.players
            .iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                name: p.name.clone(),
                is_ai_controlled: ai_player == Some(p.id.as_str())
                    && viewer == Some(p.id.as_str()),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, name: &str) -> Player {
        Player {
            id: id.into(),
            name: name.into(),
        }
    }

    #[test]
    fn join_is_idempotent_by_id() {
        let mut roster = Roster::new();
        assert!(roster.join(player("p1", "Ann")));
        assert!(!roster.join(player("p1", "Ann")));
        assert!(!roster.join(player("p1", "Different Name")));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.get("p1").unwrap().name, "Ann");
    }

    #[test]
    fn leave_unknown_player_is_none() {
        let mut roster = Roster::new();
        roster.join(player("p1", "Ann"));
        assert!(roster.leave("ghost").is_none());
        assert_eq!(roster.leave("p1").unwrap().name, "Ann");
        assert!(roster.is_empty());
    }

    #[test]
    fn preserves_join_order() {
        let mut roster = Roster::new();
        roster.join(player("b", "Bea"));
        roster.join(player("a", "Al"));
        roster.join(player("c", "Cy"));
        let ids: Vec<_> = roster.ids().cloned().collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn ai_flag_only_visible_to_the_ai_player() {
        let mut roster = Roster::new();
        for id in ["p1", "p2", "p3"] {
            roster.join(player(id, id));
        }

        // The AI player sees the flag on their own record only
        let own = roster.view_for(Some("p2"), Some("p2"));
        assert!(own.iter().find(|v| v.id == "p2").unwrap().is_ai_controlled);
        assert!(own
            .iter()
            .filter(|v| v.id != "p2")
            .all(|v| !v.is_ai_controlled));

        // Everyone else sees false everywhere, including on the AI's record
        for viewer in ["p1", "p3"] {
            let view = roster.view_for(Some(viewer), Some("p2"));
            assert!(view.iter().all(|v| !v.is_ai_controlled));
        }

        // Unauthenticated spectator view reveals nothing either
        let anon = roster.view_for(None, Some("p2"));
        assert!(anon.iter().all(|v| !v.is_ai_controlled));
    }

    #[test]
    fn no_flag_when_no_ai_assigned() {
        let mut roster = Roster::new();
        roster.join(player("p1", "Ann"));
        let view = roster.view_for(Some("p1"), None);
        assert!(view.iter().all(|v| !v.is_ai_controlled));
    }
}
