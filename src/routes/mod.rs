mod holds;
mod orders;
mod products;
mod webhooks;

pub use holds::hold_routes;
pub use orders::order_routes;
pub use products::product_routes;
pub use webhooks::webhook_routes;
