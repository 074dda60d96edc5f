//! Per-room admin conversation state.
//!
//! Pure transitions: this module decides what a message means, the
//! orchestrator performs the side effects. While a confirmation is
//! pending, no other command runs in that room.

/// Commands understood in an admin room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Auth,
    Deauth,
    Delist,
    Help,
    Yes,
    No,
}

impl Command {
    pub fn parse(body: &str) -> Option<Self> {
        match body.trim() {
            "!auth" => Some(Self::Auth),
            "!deauth" => Some(Self::Deauth),
            "!delist" => Some(Self::Delist),
            "!help" => Some(Self::Help),
            "!yes" => Some(Self::Yes),
            "!no" => Some(Self::No),
            _ => None,
        }
    }
}

/// A destructive operation awaiting `!yes`/`!no`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingAction {
    Delist {
        /// (account id, handle) pairs to delist.
        accounts: Vec<(i64, String)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingConfirmation {
    /// Monotonic id tying a timeout timer to its confirmation. A timer
    /// whose id no longer matches arrived after a resolution and is stale.
    id: u64,
    action: PendingAction,
}

/// What the orchestrator should do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminReply {
    RunCommand(Command),
    ConfirmResolved { action: PendingAction, accepted: bool },
    /// A confirmation is pending and the message was neither answer.
    Reprompt,
    Ignore,
}

pub struct AdminRoom {
    pub room_id: String,
    /// The human member of this 1:1 room. Only their messages count.
    pub owner: String,
    pending: Option<PendingConfirmation>,
}

impl AdminRoom {
    pub fn new(room_id: String, owner: String) -> Self {
        Self {
            room_id,
            owner,
            pending: None,
        }
    }

    pub fn on_message(&mut self, sender: &str, body: &str) -> AdminReply {
        if sender != self.owner {
            return AdminReply::Ignore;
        }

        let command = Command::parse(body);
        if self.pending.is_some() {
            return match command {
                Some(Command::Yes) => self.resolve(true),
                Some(Command::No) => self.resolve(false),
                _ => AdminReply::Reprompt,
            };
        }

        match command {
            Some(cmd @ (Command::Auth | Command::Deauth | Command::Delist | Command::Help)) => {
                AdminReply::RunCommand(cmd)
            }
            // Anything else, including a stray !yes/!no, gets the help text.
            _ => AdminReply::RunCommand(Command::Help),
        }
    }

    fn resolve(&mut self, accepted: bool) -> AdminReply {
        let pending = self.pending.take().unwrap();
        AdminReply::ConfirmResolved {
            action: pending.action,
            accepted,
        }
    }

    pub fn begin_confirmation(&mut self, id: u64, action: PendingAction) {
        self.pending = Some(PendingConfirmation { id, action });
    }

    /// Expire the confirmation with the given id. Returns false when the
    /// timer is stale, in which case nothing changed.
    pub fn on_timeout(&mut self, id: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.id == id => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> AdminRoom {
        AdminRoom::new("!room:example.org".to_string(), "@alice:example.org".to_string())
    }

    fn delist_action() -> PendingAction {
        PendingAction::Delist {
            accounts: vec![(1, "alice_feed".to_string())],
        }
    }

    #[test]
    fn commands_parse() {
        assert_eq!(Command::parse("!auth"), Some(Command::Auth));
        assert_eq!(Command::parse("  !delist  "), Some(Command::Delist));
        assert_eq!(Command::parse("!nope"), None);
        assert_eq!(Command::parse("hello"), None);
    }

    #[test]
    fn owner_command_runs() {
        let mut room = room();
        assert_eq!(
            room.on_message("@alice:example.org", "!help"),
            AdminReply::RunCommand(Command::Help)
        );
    }

    #[test]
    fn non_owner_is_ignored() {
        let mut room = room();
        assert_eq!(
            room.on_message("@mallory:example.org", "!deauth"),
            AdminReply::Ignore
        );
    }

    #[test]
    fn unrecognized_text_falls_through_to_help() {
        let mut room = room();
        assert_eq!(
            room.on_message("@alice:example.org", "hello there"),
            AdminReply::RunCommand(Command::Help)
        );
        // A !yes with nothing pending is just unrecognized input.
        assert_eq!(
            room.on_message("@alice:example.org", "!yes"),
            AdminReply::RunCommand(Command::Help)
        );
    }

    #[test]
    fn pending_confirmation_blocks_other_commands() {
        let mut room = room();
        room.begin_confirmation(1, delist_action());

        assert_eq!(
            room.on_message("@alice:example.org", "!auth"),
            AdminReply::Reprompt
        );
        assert_eq!(
            room.on_message("@alice:example.org", "anything else"),
            AdminReply::Reprompt
        );
        assert!(room.has_pending());
    }

    #[test]
    fn yes_resolves_accepted() {
        let mut room = room();
        room.begin_confirmation(1, delist_action());
        assert_eq!(
            room.on_message("@alice:example.org", "!yes"),
            AdminReply::ConfirmResolved {
                action: delist_action(),
                accepted: true
            }
        );
        assert!(!room.has_pending());
    }

    #[test]
    fn no_resolves_declined() {
        let mut room = room();
        room.begin_confirmation(1, delist_action());
        assert_eq!(
            room.on_message("@alice:example.org", "!no"),
            AdminReply::ConfirmResolved {
                action: delist_action(),
                accepted: false
            }
        );
    }

    #[test]
    fn timeout_clears_matching_confirmation() {
        let mut room = room();
        room.begin_confirmation(7, delist_action());
        assert!(room.on_timeout(7));
        assert!(!room.has_pending());
    }

    #[test]
    fn stale_timeout_is_a_noop() {
        let mut room = room();
        room.begin_confirmation(7, delist_action());
        room.on_message("@alice:example.org", "!no");
        room.begin_confirmation(8, delist_action());

        // Timer from the resolved confirmation fires late.
        assert!(!room.on_timeout(7));
        assert!(room.has_pending());
    }
}
