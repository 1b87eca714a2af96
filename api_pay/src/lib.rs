use actix_web::web::{self};

pub mod gateway;
pub mod machine;
pub mod retry;

pub mod routes {
    pub mod ipn;
    pub mod pay;
}

pub mod services {
    pub mod pay;
}

pub mod dtos {
    pub mod pay;
}

pub use services::pay::{PayContext, PaySettings};

pub fn mount_pay() -> actix_web::Scope {
    web::scope("/pay")
        .service(routes::pay::post_initiate_upfront)
        .service(routes::pay::post_initiate_completion)
        .service(routes::pay::get_status)
        .service(routes::pay::post_register_ipn)
}

/// Public endpoints the gateways call.
pub fn mount_webhook() -> actix_web::Scope {
    web::scope("/pay")
        .service(routes::ipn::get_ipn)
        .service(routes::ipn::post_ipn)
        .service(routes::ipn::post_stripe_webhook)
}
