//! Outbound email notifications.
//!
//! Delivery goes through the [`Mailer`] trait. Services hand a
//! [`Notification`] to the [`Notifier`] after their transaction commits;
//! a failed delivery is logged and never fails the request.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;

use crate::models::{Address, Order, OrderItem, OrderStatus, Product, User};

pub const TEMPLATE_WELCOME: &str = "welcome";
pub const TEMPLATE_ORDER_CONFIRMATION: &str = "order_confirmation";
pub const TEMPLATE_ADMIN_NEW_ORDER: &str = "admin_new_order";
pub const TEMPLATE_ORDER_STATUS_UPDATE: &str = "order_status_update";
pub const TEMPLATE_LOW_STOCK_ALERT: &str = "low_stock_alert";
pub const TEMPLATE_PASSWORD_RESET: &str = "password_reset";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, template: &str, recipient: &str, context: Value) -> Result<(), MailError>;
}

/// Mailer that only writes the message to the log.
pub struct LogMailer {
    from: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, template: &str, recipient: &str, context: Value) -> Result<(), MailError> {
        tracing::info!(from = %self.from, to = %recipient, template, "email sent");
        tracing::debug!(template, context = %context, "email context");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    Welcome {
        user: User,
    },
    OrderCreated {
        order: Order,
        items: Vec<OrderItem>,
        customer: User,
        shipping: Address,
    },
    OrderStatusChanged {
        order: Order,
        customer: User,
        old: OrderStatus,
        new: OrderStatus,
    },
    ProductStockLow {
        product: Product,
    },
    PasswordReset {
        user: User,
        token: String,
    },
}

/// Renders cents as a decimal amount, e.g. `1999` -> `"19.99"`.
pub fn format_price(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.unsigned_abs();
    format!("{sign}{}.{:02}", cents / 100, cents % 100)
}

#[derive(Clone)]
pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    admin_email: String,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, admin_email: impl Into<String>) -> Self {
        Self {
            mailer,
            admin_email: admin_email.into(),
        }
    }

    pub async fn dispatch(&self, notification: Notification) {
        for (template, recipient, context) in self.messages(notification) {
            if let Err(err) = self.mailer.send(template, &recipient, context).await {
                tracing::warn!(error = %err, template, to = %recipient, "notification failed");
            }
        }
    }

    fn messages(&self, notification: Notification) -> Vec<(&'static str, String, Value)> {
        match notification {
            Notification::Welcome { user } => vec![(
                TEMPLATE_WELCOME,
                user.email.clone(),
                json!({ "name": user.full_name() }),
            )],
            Notification::OrderCreated {
                order,
                items,
                customer,
                shipping,
            } => {
                let lines: Vec<Value> = items
                    .iter()
                    .map(|item| {
                        json!({
                            "product_name": item.product_name,
                            "quantity": item.quantity,
                            "unit_price": format_price(item.price),
                            "total": item.total_price().map(format_price),
                        })
                    })
                    .collect();
                let total = format_price(order.total_price);
                vec![
                    (
                        TEMPLATE_ORDER_CONFIRMATION,
                        customer.email.clone(),
                        json!({
                            "name": customer.full_name(),
                            "order_number": order.order_number,
                            "items": lines,
                            "total": total,
                            "shipping_address": shipping.formatted(),
                        }),
                    ),
                    (
                        TEMPLATE_ADMIN_NEW_ORDER,
                        self.admin_email.clone(),
                        json!({
                            "order_number": order.order_number,
                            "customer": customer.full_name(),
                            "customer_email": customer.email,
                            "item_count": items.len(),
                            "total": total,
                        }),
                    ),
                ]
            }
            Notification::OrderStatusChanged {
                order,
                customer,
                old,
                new,
            } => vec![(
                TEMPLATE_ORDER_STATUS_UPDATE,
                customer.email.clone(),
                json!({
                    "name": customer.full_name(),
                    "order_number": order.order_number,
                    "old_status": old.as_str(),
                    "new_status": new.as_str(),
                    "status_label": new.label(),
                }),
            )],
            Notification::ProductStockLow { product } => vec![(
                TEMPLATE_LOW_STOCK_ALERT,
                self.admin_email.clone(),
                json!({
                    "product_id": product.id,
                    "product_name": product.name,
                    "stock": product.stock,
                }),
            )],
            Notification::PasswordReset { user, token } => vec![(
                TEMPLATE_PASSWORD_RESET,
                user.email.clone(),
                json!({ "name": user.full_name(), "token": token }),
            )],
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".into(),
            password_hash: String::new(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            role: "user".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn product(stock: i32) -> Product {
        let now = Utc::now();
        Product {
            id: Uuid::new_v4(),
            category_id: Uuid::new_v4(),
            name: "Mug".into(),
            slug: "mug".into(),
            description: None,
            price: 1250,
            stock,
            is_active: true,
            is_featured: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn formats_cents() {
        assert_eq!(format_price(1999), "19.99");
        assert_eq!(format_price(5), "0.05");
        assert_eq!(format_price(-250), "-2.50");
    }

    #[tokio::test]
    async fn low_stock_alert_goes_to_admin() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|template, recipient, context| {
                template == TEMPLATE_LOW_STOCK_ALERT
                    && recipient == "ops@example.com"
                    && context["stock"] == 2
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let notifier = Notifier::new(Arc::new(mailer), "ops@example.com");
        notifier
            .dispatch(Notification::ProductStockLow {
                product: product(2),
            })
            .await;
    }

    #[tokio::test]
    async fn status_update_carries_human_label() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|template, recipient, context| {
                template == TEMPLATE_ORDER_STATUS_UPDATE
                    && recipient == "ada@example.com"
                    && context["status_label"] == "Being prepared"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let customer = user();
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            order_number: "ORD-2025-0A1B2C3D".into(),
            user_id: customer.id,
            status: OrderStatus::Processing,
            total_price: 2500,
            shipping_address_id: Uuid::new_v4(),
            billing_address_id: Uuid::new_v4(),
            notes: None,
            shipped_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        };
        Notifier::new(Arc::new(mailer), "ops@example.com")
            .dispatch(Notification::OrderStatusChanged {
                order,
                customer,
                old: OrderStatus::Confirmed,
                new: OrderStatus::Processing,
            })
            .await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let mut mailer = MockMailer::new();
        mailer
            .expect_send()
            .withf(|template, recipient, _| {
                template == TEMPLATE_WELCOME && recipient == "ada@example.com"
            })
            .times(1)
            .returning(|_, _, _| Err(MailError::Transport("smtp down".into())));

        Notifier::new(Arc::new(mailer), "ops@example.com")
            .dispatch(Notification::Welcome { user: user() })
            .await;
    }
}
