use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{
            AuthCheck, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LoginResponse,
            RefreshResponse, RegisterRequest, ResetPasswordRequest, ResetTokenCheck,
        },
        cart::{
            AddToCartRequest, CartCount, CartItemDto, CartSummary, CartValidation,
            MergeCartRequest, MergeCartResult, PurgeCartsResult, UpdateCartItemRequest,
        },
        categories::{CategoryList, CreateCategoryRequest},
        orders::{
            CheckoutRequest, OrderDetail, OrderList, OrderStats, OrderTracking, OrderWithItems,
            RevenueStats, TrackingStep, UpdateOrderStatusRequest,
        },
        products::{
            Availability, BestSeller, BestSellerList, CreateProductRequest, DeleteProductResult,
            ProductList, StockOperation, UpdateProductRequest, UpdateStockRequest,
        },
        users::{AddressDto, AddressList, AddressRequest, UpdateProfileRequest, UserStats},
    },
    models::{Address, CartItem, Category, Order, OrderItem, OrderStatus, Product, User},
    response::{ApiResponse, ErrorBody, Meta},
    routes::{
        admin, auth, cart, categories, health, orders, params, products as product_routes, users,
    },
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        auth::me,
        auth::refresh,
        auth::check,
        auth::change_password,
        auth::forgot_password,
        auth::reset_password,
        auth::verify_reset_token,
        product_routes::list_products,
        product_routes::featured_products,
        product_routes::best_sellers,
        product_routes::check_availability,
        product_routes::get_product,
        product_routes::get_product_by_slug,
        product_routes::create_product,
        product_routes::update_product,
        product_routes::delete_product,
        categories::list_categories,
        categories::get_category,
        categories::create_category,
        cart::get_cart,
        cart::add_to_cart,
        cart::update_cart_item,
        cart::remove_from_cart,
        cart::clear_cart,
        cart::cart_count,
        cart::validate_cart,
        cart::merge_cart,
        cart::quick_add,
        orders::list_orders,
        orders::checkout,
        orders::order_stats,
        orders::get_order,
        orders::get_order_by_number,
        orders::cancel_order,
        orders::track_order,
        users::get_profile,
        users::update_profile,
        users::user_stats,
        users::list_addresses,
        users::create_address,
        users::get_address,
        users::update_address,
        users::delete_address,
        users::set_default_address,
        admin::list_all_orders,
        admin::get_order_admin,
        admin::update_order_status,
        admin::revenue_stats,
        admin::list_all_products,
        admin::update_stock,
        admin::toggle_featured,
        admin::toggle_active,
        admin::list_low_stock,
        admin::purge_abandoned_carts
    ),
    components(
        schemas(
            User,
            Category,
            Product,
            CartItem,
            Order,
            OrderItem,
            OrderStatus,
            Address,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            ChangePasswordRequest,
            ForgotPasswordRequest,
            ResetPasswordRequest,
            RefreshResponse,
            AuthCheck,
            ResetTokenCheck,
            AddToCartRequest,
            UpdateCartItemRequest,
            MergeCartRequest,
            CartItemDto,
            CartSummary,
            CartCount,
            CartValidation,
            MergeCartResult,
            PurgeCartsResult,
            CreateCategoryRequest,
            CategoryList,
            CheckoutRequest,
            UpdateOrderStatusRequest,
            OrderWithItems,
            OrderDetail,
            OrderList,
            TrackingStep,
            OrderTracking,
            OrderStats,
            RevenueStats,
            CreateProductRequest,
            UpdateProductRequest,
            StockOperation,
            UpdateStockRequest,
            DeleteProductResult,
            ProductList,
            BestSeller,
            BestSellerList,
            Availability,
            UpdateProfileRequest,
            UserStats,
            AddressRequest,
            AddressDto,
            AddressList,
            params::Pagination,
            params::SortOrder,
            params::ProductSortBy,
            Meta,
            ErrorBody,
            ApiResponse<ErrorBody>,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartSummary>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderDetail>,
            ApiResponse<OrderList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Products", description = "Product catalog endpoints"),
        (name = "Categories", description = "Category endpoints"),
        (name = "Cart", description = "Cart endpoints"),
        (name = "Orders", description = "Order endpoints"),
        (name = "Users", description = "Profile and address endpoints"),
        (name = "Admin", description = "Admin endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
