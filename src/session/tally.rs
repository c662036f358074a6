use super::roster::Roster;
use crate::types::{PlayerId, RoundResult};
use std::collections::HashMap;

/// Why a vote was refused
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("voting is not currently open")]
    VotingClosed,
    #[error("the AI-controlled player cannot vote")]
    VoterIsAi,
}

/// Collects votes for the current round and computes the plurality winner.
///
/// One entry per voter, last write wins. The winner is the candidate with the
/// strictly highest count; on a tie the first candidate to have received a
/// vote wins (candidates are examined in first-vote arrival order). Self-votes
/// are accepted.
#[derive(Debug, Default)]
pub struct VoteTally {
    open: bool,
    ai_player: Option<PlayerId>,
    votes: HashMap<PlayerId, PlayerId>,
    /// Candidates in the order their first vote arrived; fixes the tie-break
    arrival: Vec<PlayerId>,
    result: Option<RoundResult>,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear everything for a new round
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Open voting. The AI-controlled player is barred from voting.
    pub fn open(&mut self, ai_player: PlayerId) {
        self.open = true;
        self.ai_player = Some(ai_player);
        self.votes.clear();
        self.arrival.clear();
        self.result = None;
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn record(&mut self, voter: PlayerId, voted_for: PlayerId) -> Result<(), VoteError> {
        if !self.open {
            return Err(VoteError::VotingClosed);
        }
        if self.ai_player.as_deref() == Some(voter.as_str()) {
            return Err(VoteError::VoterIsAi);
        }
        if !self.arrival.contains(&voted_for) {
            self.arrival.push(voted_for.clone());
        }
        self.votes.insert(voter, voted_for);
        Ok(())
    }

    /// True once every eligible voter has a recorded vote
    pub fn all_voted<'a>(&self, eligible: impl IntoIterator<Item = &'a PlayerId>) -> bool {
        eligible
            .into_iter()
            .all(|voter| self.votes.contains_key(voter))
    }

    /// Close voting and compute the result. Idempotent: a second call returns
    /// the previously computed result without recounting.
    pub fn close(&mut self, roster: &Roster) -> RoundResult {
        if let Some(result) = &self.result {
            return result.clone();
        }
        self.open = false;

        debug_assert!(self.ai_player.is_some(), "tally closed without an AI player");
        let ai_player_id = self.ai_player.clone().unwrap_or_default();
        let ai_player_name = roster
            .get(&ai_player_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let mut vote_counts: HashMap<PlayerId, u32> = HashMap::new();
        for voted_for in self.votes.values() {
            *vote_counts.entry(voted_for.clone()).or_insert(0) += 1;
        }

        // First strict maximum in first-vote arrival order
        let mut most_voted_player_id: Option<PlayerId> = None;
        let mut most_votes = 0u32;
        for candidate in &self.arrival {
            let count = vote_counts.get(candidate).copied().unwrap_or(0);
            if count > most_votes {
                most_votes = count;
                most_voted_player_id = Some(candidate.clone());
            }
        }

        let most_voted_player_name = most_voted_player_id.as_ref().map(|id| {
            roster
                .get(id)
                .map(|p| p.name.clone())
                .unwrap_or_else(|| "Unknown".to_string())
        });
        let correct = most_voted_player_id.as_deref() == Some(ai_player_id.as_str());

        let result = RoundResult {
            ai_player_id,
            ai_player_name,
            most_voted_player_id,
            most_voted_player_name,
            vote_counts,
            correct,
        };
        self.result = Some(result.clone());
        result
    }
}
