//! OneBot v11 support for qq-agent.
//!
//! Typed inbound events and message segments, the [`OneBotApi`] trait the
//! context engine calls through, and a reqwest-backed [`OneBotClient`] that
//! talks to NapCat's HTTP endpoint.

pub mod api;
pub mod client;
pub mod error;
pub mod event;
pub mod segment;

pub use {
    api::{BotStatus, FriendInfo, GroupInfo, LoginInfo, OneBotApi, SentMessage},
    client::OneBotClient,
    error::{Error, Result},
    event::{Event, ForwardNode, MessageContent, MessageEvent, MessageType, RawSegment, Sender},
    segment::Segment,
};
