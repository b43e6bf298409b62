mod hold;
mod order;
mod product;
mod webhook;

pub use hold::{Hold, HoldStatus};
pub use order::{Order, OrderStatus};
pub use product::Product;
pub use webhook::{PaymentStatus, PaymentWebhook, ProcessingStatus};
