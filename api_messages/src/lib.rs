use actix_web::web::{self};

pub mod resolver;

pub mod routes {
    pub mod job;
    pub mod message;
}

pub mod services {
    pub mod message;
}

pub mod dtos {
    pub mod message;
}

pub fn mount_messages() -> actix_web::Scope {
    web::scope("/messages")
        .service(routes::message::post_clear)
        .service(routes::message::post_message)
        .service(routes::message::get_messages)
        .service(routes::message::put_message)
        .service(routes::message::delete_message)
}
