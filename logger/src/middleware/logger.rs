use std::{sync::Arc, time::Instant};

use actix_web::{
    Error,
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
};
use colored::{ColoredString, Colorize};
use common::jwt::get_jwt_claims_or_error;
use futures::future::{LocalBoxFuture, Ready, ready};
use log::{info, warn};

/// Logs method, path, status, latency and user id of every request.
pub struct LoggerMiddleware {
    enabled: bool,
}

impl LoggerMiddleware {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl<S, B> Transform<S, ServiceRequest> for LoggerMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = LoggerMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(LoggerMiddlewareService {
            service: Arc::new(service),
            enabled: self.enabled,
        }))
    }
}

pub struct LoggerMiddlewareService<S> {
    service: Arc<S>,
    enabled: bool,
}

fn colored_status(status: u16) -> ColoredString {
    match status {
        200..=299 => status.to_string().green(),
        300..=399 => status.to_string().yellow(),
        400..=499 => status.to_string().bright_red(),
        _ => status.to_string().red(),
    }
}

fn colored_method(method: &str) -> ColoredString {
    match method {
        "GET" => method.blue(),
        "POST" => method.yellow(),
        "PUT" => method.purple(),
        "DELETE" => method.red(),
        _ => method.normal(),
    }
}

impl<S, B> Service<ServiceRequest> for LoggerMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Arc::clone(&self.service);
        if !self.enabled {
            return Box::pin(async move { srv.call(req).await.map(|res| res.map_into_boxed_body()) });
        }

        let method = req.method().to_string();
        let path = req.path().to_string();
        let user_id = get_jwt_claims_or_error(&req)
            .ok()
            .map_or("None".to_string(), |c| c.user_id.to_string());
        let started = Instant::now();

        Box::pin(async move {
            let res = srv.call(req).await?;
            let status = res.status().as_u16();
            let line = format!(
                "[{}] {} {} {} user_id={}",
                colored_status(status),
                colored_method(&method),
                path.bright_white(),
                format!("({}ms)", started.elapsed().as_millis()).bright_black(),
                user_id.bright_blue(),
            );
            if status >= 500 {
                warn!("{}", line);
            } else {
                info!("{}", line);
            }
            Ok(res.map_into_boxed_body())
        })
    }
}
