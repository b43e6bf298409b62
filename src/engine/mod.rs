mod hold;
mod order;
mod webhook;

pub use hold::HoldEngine;
pub use order::OrderEngine;
pub use webhook::{WebhookEngine, WebhookOutcome, WebhookRequest};
