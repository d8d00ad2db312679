mod common;

use std::sync::Arc;

use common::{
    address, category, contended::ContendedStore, product, register, state_with_store, stock_of,
};
use storefront_api::{
    dto::{cart::AddToCartRequest, orders::CheckoutRequest},
    error::AppError,
    models::Product,
    routes::params::OrderListQuery,
    services::{cart_service, order_service},
};

/// Two products of the same category, smaller id first.
fn by_id(a: Product, b: Product) -> (Product, Product) {
    if a.id < b.id { (a, b) } else { (b, a) }
}

#[tokio::test]
async fn losing_the_race_on_a_later_line_rolls_back_earlier_lines() {
    let store = Arc::new(ContendedStore::new());
    let (state, mailer) = state_with_store(store.clone());
    let user = register(&state, "racer@example.com").await;
    let shipping = address(&state, &user, "9 Race Way").await;
    let category_id = category(&state, "Kitchen").await;
    let (first, second) = by_id(
        product(&state, category_id, "Kettle", 3900, 5).await,
        product(&state, category_id, "Teapot", 2900, 5).await,
    );

    for (product_id, quantity) in [(first.id, 2), (second.id, 3)] {
        cart_service::add_to_cart(&state, &user, AddToCartRequest { product_id, quantity })
            .await
            .unwrap();
    }
    // another buyer takes most of the second product after validation
    store.sell_elsewhere(second.id, 1);
    mailer.clear();

    let err = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address_id: shipping,
            billing_address_id: None,
            notes: None,
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref msg) if msg.contains(second.name.as_str())));
    assert_eq!(store.locked(), vec![first.id, second.id]);

    assert_eq!(stock_of(&state, first.id).await, 5);
    assert_eq!(stock_of(&state, second.id).await, 5);
    let count = cart_service::cart_count(&state, &user).await.unwrap().data.unwrap();
    assert_eq!(count.count, 5);
    let orders = order_service::list_orders(&state, &user, OrderListQuery::default())
        .await
        .unwrap();
    assert!(orders.data.unwrap().items.is_empty());
    assert!(mailer.templates().is_empty());
}

#[tokio::test]
async fn checkout_and_cancel_lock_products_in_id_order() {
    let store = Arc::new(ContendedStore::new());
    let (state, _) = state_with_store(store.clone());
    let user = register(&state, "orderly@example.com").await;
    let shipping = address(&state, &user, "4 Queue Ln").await;
    let category_id = category(&state, "Garden").await;
    let (low, high) = by_id(
        product(&state, category_id, "Rake", 1900, 10).await,
        product(&state, category_id, "Spade", 2400, 10).await,
    );

    // cart lines are created highest id first
    for product_id in [high.id, low.id] {
        cart_service::add_to_cart(&state, &user, AddToCartRequest { product_id, quantity: 1 })
            .await
            .unwrap();
    }

    let placed = order_service::checkout(
        &state,
        &user,
        CheckoutRequest {
            shipping_address_id: shipping,
            billing_address_id: None,
            notes: None,
        },
    )
    .await
    .unwrap()
    .data
    .unwrap();
    assert_eq!(store.locked(), vec![low.id, high.id]);
    assert_eq!(stock_of(&state, high.id).await, 9);

    store.clear_locks();
    order_service::cancel_order(&state, &user, &placed.order.order_number)
        .await
        .unwrap();
    assert_eq!(store.locked(), vec![low.id, high.id]);
    assert_eq!(stock_of(&state, low.id).await, 10);
    assert_eq!(stock_of(&state, high.id).await, 10);
}
