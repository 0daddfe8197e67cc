// commerce/src/models/mod.rs

//! Rows of the orchestration schema. Money is `i64` cents.

pub mod cart;
pub mod customer;
pub mod discount;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;

pub use cart::{Cart, CartItem, CartStatus};
pub use customer::Customer;
pub use discount::{allocate_discounts, Discount, DiscountKind, DiscountUsage};
pub use order::{Order, OrderStatus, ShippingSnapshot};
pub use order_item::OrderItem;
pub use payment::{Gateway, Payment, PaymentMethod, PaymentStatus};
pub use product::ProductVariant;
