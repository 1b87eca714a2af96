use std::{future::Future, pin::Pin, sync::Arc};

use actix_web::{
    Error, HttpMessage,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    web,
};
use common::{error::AppError, jwt};
use db::repo::Store;
use futures::future::{Ready, ok};

/// Requires valid, unrevoked JWT claims on every request of the wrapped scope
/// and exposes them to handlers as `web::ReqData<JwtClaims>`.
pub struct AuthMiddleware {}

impl AuthMiddleware {
    pub fn new() -> Self {
        Self {}
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: actix_web::body::MessageBody + 'static,
{
    type Response = ServiceResponse<actix_web::body::BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = Arc::clone(&self.service);

        Box::pin(async move {
            // claims are parsed by the extractor middleware
            let claims = match jwt::get_jwt_claims_or_error(&req) {
                Ok(claims) => claims,
                Err(response) => return Ok(req.into_response(response)),
            };

            let Some(store) = req.app_data::<web::Data<Arc<dyn Store>>>().cloned() else {
                return Ok(req.error_response(AppError::Internal(
                    "Store is not configured".to_string(),
                )));
            };
            match store.is_revoked(claims.jti).await {
                Ok(false) => {}
                Ok(true) => {
                    return Ok(req.error_response(AppError::Unauthenticated(
                        "Token has been revoked".to_string(),
                    )));
                }
                Err(e) => return Ok(req.error_response(e)),
            }

            req.extensions_mut().insert(claims);
            srv.call(req).await.map(|res| res.map_into_boxed_body())
        })
    }
}
