use std::collections::HashMap;

use serde_json::{json, Value};

use crate::Socket;

/// One attendee of a loop. The socket is the identity; client, user and
/// role are what the other participants get to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub client: Option<String>,
    pub user: String,
    pub role: String,
}

/// A named voice conference channel and its participant set.
#[derive(Debug, Default)]
pub struct Loop {
    name: String,
    participants: HashMap<Socket, Participant>,
}

impl Loop {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            participants: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts or replaces the participant behind `socket`.
    pub fn add_participant(
        &mut self,
        socket: Socket,
        client: Option<&str>,
        user: &str,
        role: &str,
    ) -> bool {
        if socket <= 0 || user.is_empty() || role.is_empty() {
            return false;
        }

        self.participants.insert(
            socket,
            Participant {
                client: client.map(str::to_string),
                user: user.to_string(),
                role: role.to_string(),
            },
        );
        true
    }

    /// Removes the participant behind `socket`; absent sockets are a
    /// no-op.
    pub fn drop_participant(&mut self, socket: Socket) -> bool {
        self.participants.remove(&socket).is_some()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn participant(&self, socket: Socket) -> Option<&Participant> {
        self.participants.get(&socket)
    }

    /// Snapshot of all participants as a JSON array of
    /// `{client, user, role}` objects.
    pub fn participants(&self) -> Value {
        let entries: Vec<Value> = self
            .participants
            .values()
            .map(|participant| {
                json!({
                    "client": participant.client.clone().map(Value::String).unwrap_or(Value::Null),
                    "user": participant.user,
                    "role": participant.role,
                })
            })
            .collect();
        Value::Array(entries)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_add_and_drop() {
        let mut tower = Loop::new("tower");
        assert_eq!(tower.name(), "tower");
        assert_eq!(tower.participant_count(), 0);

        assert!(tower.add_participant(5, Some("client-1"), "alice", "controller"));
        assert_eq!(tower.participant_count(), 1);

        assert!(tower.drop_participant(5));
        assert_eq!(tower.participant_count(), 0);

        // dropping an absent socket is a no-op
        assert!(!tower.drop_participant(5));
    }

    #[test]
    fn test_add_is_insert_or_replace() {
        let mut tower = Loop::new("tower");

        assert!(tower.add_participant(5, None, "alice", "controller"));
        assert!(tower.add_participant(5, None, "alice", "supervisor"));

        assert_eq!(tower.participant_count(), 1);
        assert_eq!(tower.participant(5).unwrap().role, "supervisor");
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut tower = Loop::new("tower");
        assert!(!tower.add_participant(0, None, "alice", "controller"));
        assert!(!tower.add_participant(-3, None, "alice", "controller"));
        assert!(!tower.add_participant(5, None, "", "controller"));
        assert!(!tower.add_participant(5, None, "alice", ""));
        assert_eq!(tower.participant_count(), 0);
    }

    #[test]
    fn test_participants_snapshot() {
        let mut tower = Loop::new("tower");
        tower.add_participant(5, Some("web"), "alice", "controller");
        tower.add_participant(6, None, "bob", "observer");

        let snapshot = tower.participants();
        let entries = snapshot.as_array().unwrap();
        assert_eq!(entries.len(), 2);

        let alice = entries
            .iter()
            .find(|entry| entry["user"] == "alice")
            .unwrap();
        assert_eq!(alice["client"], "web");
        assert_eq!(alice["role"], "controller");

        let bob = entries.iter().find(|entry| entry["user"] == "bob").unwrap();
        assert_eq!(bob["client"], Value::Null);
    }
}
