//! Outbound messaging: the sink contract, Lark client and card rendering.
//!
//! A turn talks to the platform only through [`MessageSink`]; [`LarkClient`] is the
//! production implementation against the Lark Open API.

mod card;
mod lark;
mod sink;
mod turn;

pub use card::{render_card, render_sources, text_content};
pub use lark::{LarkClient, LarkError};
pub use sink::{MessageSink, SinkError};
pub use turn::{ConversationTurn, OutboundSnapshot, Source};
