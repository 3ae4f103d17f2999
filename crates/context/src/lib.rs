//! Chat context engine.
//!
//! Keeps a bounded, deduplicated message window per conversation target,
//! normalizes OneBot events (expanding quoted replies and forwarded bundles),
//! runs the reconnecting event listener, and paces outbound text into
//! human-sized chunks.

pub mod access;
pub mod buffer;
pub mod chunker;
pub mod compress;
pub mod error;
mod listener;
pub mod manager;
pub mod message;
pub mod outbound;
pub mod parser;
pub mod rate_limit;
mod resolver;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use {
    access::{AccessDenied, AccessPolicy},
    buffer::MessageBuffer,
    chunker::{TypingDelay, chunk},
    compress::{CompressMethod, RuleBasedSummarizer, Summarizer, rule_based_summary},
    error::{Error, Result},
    manager::{BufferStats, CompressOutcome, ContextManager, ContextSnapshot},
    message::Message,
    outbound::{OutboundSender, SendError, SendReport},
    parser::{MessageLookup, ParsedContent, SegmentParser},
    rate_limit::{Permit, RateLimited, RateLimiter},
};
