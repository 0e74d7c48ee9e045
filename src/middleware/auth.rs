use crate::auth::ApiToken;
use crate::error::AppError;
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use tracing::warn;

/// Requires `Authorization: Bearer <token>` on the wrapped resource.
pub struct BearerAuth {
    token: ApiToken,
}

impl BearerAuth {
    pub fn new(token: ApiToken) -> Self {
        Self { token }
    }
}

/// Why a request was turned away, as reported to the client.
fn check_authorization(token: &ApiToken, value: Option<&str>) -> Result<(), &'static str> {
    let value = value.ok_or("missing Authorization header")?;
    match value.split_once(' ') {
        Some(("Bearer", candidate)) => {
            if token.matches(candidate) {
                Ok(())
            } else {
                Err("invalid token")
            }
        }
        _ => Err("invalid Authorization format"),
    }
}

impl<S, B> Transform<S, ServiceRequest> for BearerAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BearerAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BearerAuthMiddleware {
            service,
            token: self.token.clone(),
        }))
    }
}

pub struct BearerAuthMiddleware<S> {
    service: S,
    token: ApiToken,
}

impl<S, B> Service<ServiceRequest> for BearerAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // a header that is not valid UTF-8 cannot be a well-formed bearer header
        let header_value = req
            .headers()
            .get(header::AUTHORIZATION)
            .map(|v| v.to_str().unwrap_or_default());

        if let Err(reason) = check_authorization(&self.token, header_value) {
            warn!(path = %req.path(), reason, "Rejected unauthenticated request");
            let response = AppError::Unauthorized(reason.to_string()).error_response();
            let response = req.into_response(response).map_into_right_body();
            return Box::pin(async move { Ok(response) });
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test as actix_test, web, App};

    #[test]
    fn test_check_authorization() {
        let token = ApiToken::new("abc");
        assert_eq!(check_authorization(&token, Some("Bearer abc")), Ok(()));
        assert_eq!(
            check_authorization(&token, None),
            Err("missing Authorization header")
        );
        assert_eq!(
            check_authorization(&token, Some("Basic abc")),
            Err("invalid Authorization format")
        );
        assert_eq!(
            check_authorization(&token, Some("Bearerabc")),
            Err("invalid Authorization format")
        );
        assert_eq!(check_authorization(&token, Some("Bearer abd")), Err("invalid token"));
        assert_eq!(check_authorization(&token, Some("Bearer abc ")), Err("invalid token"));
    }

    #[actix_web::test]
    async fn test_only_wrapped_resources_are_protected() {
        let app = actix_test::init_service(
            App::new()
                .service(
                    web::resource("/secret")
                        .wrap(BearerAuth::new(ApiToken::new("abc")))
                        .route(web::get().to(|| async { "ok" })),
                )
                .route("/open", web::get().to(|| async { "ok" })),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/secret").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "unauthorized");
        assert_eq!(body["error"]["message"], "missing Authorization header");

        let req = actix_test::TestRequest::get()
            .uri("/secret")
            .insert_header((header::AUTHORIZATION, "Bearer abc"))
            .to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = actix_test::TestRequest::get().uri("/open").to_request();
        assert_eq!(actix_test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
