use actix_web::web::{self};

pub mod routes {
    pub mod job;
}

mod services {
    pub(crate) mod job;
}

mod dtos {
    pub(crate) mod job;
}

pub fn mount_jobs() -> actix_web::Scope {
    web::scope("/jobs")
        .service(routes::job::get_jobs)
        .service(routes::job::get_job)
        .service(routes::job::put_job)
        .service(api_messages::routes::job::post_job_message)
        .service(api_messages::routes::job::get_job_messages)
}
