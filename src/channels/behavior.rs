//! Channel behaviors: the four ways a named channel may combine writes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The behavior a channel exhibits on `Update`/`Get`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelBehaviorKind {
    /// Stores the latest written value.
    LastValue,
    /// Accumulates every write into an ordered list.
    Topic,
    /// Stores a value that is consumed (cleared) after a single read cycle.
    Ephemeral,
    /// Tracks which expected senders have written; available once every
    /// expected sender has been seen.
    Barrier,
}

/// One write attempt against a channel.
#[derive(Clone, Debug)]
pub enum ChannelWrite {
    /// A value write for `LastValue`/`Topic`/`Ephemeral` channels.
    Value(Value),
    /// A sender-id write for `Barrier` channels. Writes of this kind
    /// against a non-Barrier channel, or `Value` writes against a Barrier
    /// channel, are ignored by `Channel::update` (spec §4.2 failure
    /// semantics).
    BarrierSender(String),
}

/// The behavior-appropriate read view returned by `Channel::get`.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelView<'a> {
    Value(Option<&'a Value>),
    List(&'a [Value]),
    BarrierSeen(&'a std::collections::BTreeSet<String>),
}
