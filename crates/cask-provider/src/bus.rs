use serde::{Deserialize, Serialize};

use cask_types::Guid;

/// One change notification, emitted after a successful commit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeEvent {
    GroupAdded { name: String },
    GroupRemoved { name: String },
    GroupRenamed { old_name: String, new_name: String },
    InstanceAdded { guid: Guid, name: String },
    InstanceRemoved { guid: Guid },
    InstanceRenamed { guid: Guid, new_name: String },
    ObjectWritten { guid: Guid },
    DataWritten { guid: Guid, key: String },
    DataRemoved { guid: Guid, key: String },
}

/// Change-notification bus keyed by sequence number.
///
/// Consumers poll with [`get_event`](Self::get_event): there is no push
/// model, a caller re-polls the next sequence number to notice new events.
/// Events are only published for committed changes; an aborted transaction
/// publishes nothing.
#[derive(Debug, Default)]
pub struct ChangeBus {
    events: Vec<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event, returning its sequence number.
    pub fn push(&mut self, event: ChangeEvent) -> u64 {
        self.events.push(event);
        (self.events.len() - 1) as u64
    }

    /// Fetch the event at `seq`, or `None` if no event with that sequence
    /// number exists yet. Never blocks.
    pub fn get_event(&self, seq: u64) -> Option<&ChangeEvent> {
        self.events.get(seq as usize)
    }

    /// Sequence number the next published event will get.
    pub fn next_seq(&self) -> u64 {
        self.events.len() as u64
    }
}
