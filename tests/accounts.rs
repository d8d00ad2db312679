mod common;

use common::{address, address_request, admin, category, product, register, test_state};
use storefront_api::{
    dto::{
        auth::{ForgotPasswordRequest, LoginRequest, ResetPasswordRequest},
        cart::AddToCartRequest,
        orders::{CheckoutRequest, UpdateOrderStatusRequest},
    },
    error::AppError,
    middleware::auth::AuthUser,
    models::{OrderStatus, ROLE_USER},
    services::{auth_service, cart_service, order_service, user_service},
};
use uuid::Uuid;

#[tokio::test]
async fn registration_sends_welcome_and_allows_login() {
    let (state, mailer) = test_state();
    register(&state, "New.User@Example.com").await;
    assert_eq!(mailer.sent_to("new.user@example.com"), vec!["welcome"]);

    let login = auth_service::login_user(
        &state,
        LoginRequest {
            email: "new.user@example.com".to_string(),
            password: "password123".to_string(),
        },
    )
    .await
    .unwrap()
    .data
    .unwrap();
    assert!(!login.token.is_empty());

    let err = auth_service::login_user(
        &state,
        LoginRequest {
            email: "new.user@example.com".to_string(),
            password: "wrong-password".to_string(),
        },
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn forgot_password_looks_the_same_for_unknown_emails() {
    let (state, mailer) = test_state();
    register(&state, "known@example.com").await;
    mailer.clear();

    let known = auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: "known@example.com".to_string(),
        },
    )
    .await
    .unwrap();
    let unknown = auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: "nobody@example.com".to_string(),
        },
    )
    .await
    .unwrap();

    assert_eq!(known.message, unknown.message);
    assert_eq!(mailer.templates(), vec!["password_reset"]);
}

#[tokio::test]
async fn forgot_password_is_throttled_per_email() {
    let (state, _) = test_state();
    let request = || ForgotPasswordRequest {
        email: "spam@example.com".to_string(),
    };
    for _ in 0..3 {
        auth_service::forgot_password(&state, request()).await.unwrap();
    }
    let err = auth_service::forgot_password(&state, request()).await.unwrap_err();
    assert!(matches!(err, AppError::TooManyRequests(_)));
}

#[tokio::test]
async fn first_address_becomes_default_and_default_stays_unique() {
    let (state, _) = test_state();
    let user = register(&state, "addr@example.com").await;
    let first = address(&state, &user, "1 First St").await;
    let second = address(&state, &user, "2 Second St").await;

    let listed = user_service::list_addresses(&state, &user).await.unwrap().data.unwrap();
    let defaults: Vec<_> = listed.items.iter().filter(|a| a.address.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].address.id, first);

    user_service::set_default_address(&state, &user, second).await.unwrap();
    let listed = user_service::list_addresses(&state, &user).await.unwrap().data.unwrap();
    let defaults: Vec<_> = listed.items.iter().filter(|a| a.address.is_default).collect();
    assert_eq!(defaults.len(), 1);
    assert_eq!(defaults[0].address.id, second);
    // default first
    assert_eq!(listed.items[0].address.id, second);
}

#[tokio::test]
async fn creating_a_default_address_demotes_the_previous_one() {
    let (state, _) = test_state();
    let user = register(&state, "promote@example.com").await;
    let first = address(&state, &user, "1 Old Rd").await;
    let created = user_service::create_address(&state, &user, address_request("2 New Rd", true))
        .await
        .unwrap()
        .data
        .unwrap();
    assert!(created.address.is_default);

    let old = user_service::get_address(&state, &user, first).await.unwrap().data.unwrap();
    assert!(!old.address.is_default);
}

#[tokio::test]
async fn deleting_the_default_promotes_another_address() {
    let (state, _) = test_state();
    let user = register(&state, "delete@example.com").await;
    let only = address(&state, &user, "1 Only St").await;

    let err = user_service::delete_address(&state, &user, only).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let other = address(&state, &user, "2 Other St").await;
    user_service::delete_address(&state, &user, only).await.unwrap();

    let listed = user_service::list_addresses(&state, &user).await.unwrap().data.unwrap();
    assert_eq!(listed.items.len(), 1);
    assert_eq!(listed.items[0].address.id, other);
    assert!(listed.items[0].address.is_default);
}

#[tokio::test]
async fn addresses_of_other_users_are_not_found() {
    let (state, _) = test_state();
    let owner = register(&state, "mine@example.com").await;
    let stranger = register(&state, "theirs@example.com").await;
    let id = address(&state, &owner, "1 Private Way").await;

    let err = user_service::set_default_address(&state, &stranger, id).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn refresh_and_check_describe_the_current_account() {
    let (state, _) = test_state();
    let user = register(&state, "session@example.com").await;

    let refreshed = auth_service::refresh_token(&state, &user)
        .await
        .unwrap()
        .data
        .unwrap();
    assert!(!refreshed.session.token.is_empty());
    assert_eq!(refreshed.user.id, user.user_id);
    let claims = auth_service::decode_token(&state.config.jwt_secret, &refreshed.session.token)
        .unwrap();
    assert_eq!(claims.sub, user.user_id.to_string());

    let check = auth_service::check_auth(&state, &user).await.unwrap().data.unwrap();
    assert!(check.authenticated);
    assert_eq!(check.email, "session@example.com");
    assert_eq!(check.role, ROLE_USER);

    let ghost = AuthUser {
        user_id: Uuid::new_v4(),
        role: ROLE_USER.to_string(),
    };
    let err = auth_service::refresh_token(&state, &ghost).await.unwrap_err();
    assert!(matches!(err, AppError::Unauthorized(_)));
}

#[tokio::test]
async fn reset_tokens_can_be_verified_before_use() {
    let (state, mailer) = test_state();
    register(&state, "forgetful@example.com").await;
    auth_service::forgot_password(
        &state,
        ForgotPasswordRequest {
            email: "forgetful@example.com".to_string(),
        },
    )
    .await
    .unwrap();
    let context = mailer.last_context("password_reset").unwrap();
    let token = context["token"].as_str().unwrap().to_string();

    let check = auth_service::verify_reset_token(&state, &token)
        .await
        .unwrap()
        .data
        .unwrap();
    assert!(check.valid);
    assert_eq!(check.email, "forgetful@example.com");

    // verifying does not use the token up
    auth_service::reset_password(
        &state,
        ResetPasswordRequest {
            token: token.clone(),
            password: "new-password-1".to_string(),
        },
    )
    .await
    .unwrap();

    let err = auth_service::verify_reset_token(&state, &token).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
    let err = auth_service::verify_reset_token(&state, "not-a-token").await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn user_stats_count_orders_and_delivered_spend() {
    let (state, _) = test_state();
    let user = register(&state, "regular@example.com").await;
    let shipping = address(&state, &user, "8 Loyal Ave").await;
    address(&state, &user, "9 Office Park").await;
    let category_id = category(&state, "Pantry").await;
    let coffee = product(&state, category_id, "Coffee", 1500, 20).await;

    let mut placed = Vec::new();
    for quantity in [2, 1] {
        cart_service::add_to_cart(
            &state,
            &user,
            AddToCartRequest {
                product_id: coffee.id,
                quantity,
            },
        )
        .await
        .unwrap();
        let order = order_service::checkout(
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
        placed.push(order.order);
    }
    order_service::update_order_status(
        &state,
        &admin(),
        placed[0].id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Delivered,
        },
    )
    .await
    .unwrap();

    let stats = user_service::user_stats(&state, &user).await.unwrap().data.unwrap();
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.completed_orders, 1);
    assert_eq!(stats.total_spent, 3000);
    assert_eq!(stats.total_addresses, 2);
}
